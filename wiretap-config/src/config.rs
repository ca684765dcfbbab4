use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// The default endpoint serving ingest configurations.
pub const DEFAULT_CONFIG_ENDPOINT: &str = "https://config.wiretap.dev/";

/// The default endpoint receiving encoded batches.
pub const DEFAULT_TRACKS_ENDPOINT: &str = "https://tracks.wiretap.dev/";

/// The default environment when the host does not provide one.
pub const DEFAULT_ENVIRONMENT: &str = "PRODUCTION";

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The tracking-plan identifier is empty.
    #[error("tp id must not be empty")]
    MissingTpId,

    /// An endpoint override could not be parsed as a URL.
    #[error("invalid {field} endpoint: {source}")]
    InvalidEndpoint {
        /// The endpoint field that failed to parse.
        field: &'static str,
        /// The underlying parse error.
        source: url::ParseError,
    },

    /// The configuration could not be deserialized.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration of the Wiretap engine, provided by the host application.
///
/// All fields besides the tracking-plan identifier have defaults. Use
/// [`Config::builder`] to construct a validated instance, or deserialize one
/// from JSON via [`Config::from_json`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The tracking-plan identifier this installation reports under.
    pub tp_id: String,

    /// The environment name used to resolve environment-specific sampling
    /// rates and tagged on every track.
    pub environment: String,

    /// Optional alias identifying this source in multi-source setups.
    pub source_alias: String,

    /// Base URL of the config endpoint.
    pub config_endpoint: String,

    /// Base URL of the tracks endpoint.
    pub tracks_endpoint: String,

    /// Custom domain-to-provider mappings, merged over the built-in provider
    /// table. Keys may be substrings, `*` wildcards, or `regex:` patterns.
    pub custom_domains: HashMap<String, String>,

    /// Initial tags merged into every outgoing track's payload.
    pub tags: HashMap<String, String>,

    /// Extra context fields, primarily set by test harnesses.
    pub custom_context: HashMap<String, String>,

    /// Enables verbose debug logging.
    pub debug: bool,

    /// Computes and schedules batches without ever posting them.
    pub dry_run: bool,

    /// Skips collection of device/platform/activity context fields.
    pub ignore_context: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tp_id: String::new(),
            environment: DEFAULT_ENVIRONMENT.to_owned(),
            source_alias: String::new(),
            config_endpoint: DEFAULT_CONFIG_ENDPOINT.to_owned(),
            tracks_endpoint: DEFAULT_TRACKS_ENDPOINT.to_owned(),
            custom_domains: HashMap::new(),
            tags: HashMap::new(),
            custom_context: HashMap::new(),
            debug: false,
            dry_run: false,
            ignore_context: false,
        }
    }
}

impl Config {
    /// Starts building a config for the given tracking-plan identifier.
    pub fn builder(tp_id: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            config: Config {
                tp_id: tp_id.into(),
                ..Config::default()
            },
        }
    }

    /// Parses a config from a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the full URL of the ingest config document for this tp id.
    pub fn ingest_config_url(&self) -> String {
        format!("{}config-{}.json", self.config_endpoint, self.tp_id)
    }

    /// Returns the full URL batches are posted to.
    pub fn tracks_url(&self) -> String {
        format!("{}{}", self.tracks_endpoint, self.tp_id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tp_id.is_empty() {
            return Err(ConfigError::MissingTpId);
        }

        for (field, value) in [
            ("config", &self.config_endpoint),
            ("tracks", &self.tracks_endpoint),
        ] {
            Url::parse(value).map_err(|source| ConfigError::InvalidEndpoint { field, source })?;
        }

        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config(tp_id={}, environment={}, dry_run={}, debug={})",
            self.tp_id, self.environment, self.dry_run, self.debug
        )
    }
}

/// Builder for [`Config`].
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the environment name.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.environment = environment.into();
        self
    }

    /// Sets the source alias.
    pub fn source_alias(mut self, alias: impl Into<String>) -> Self {
        self.config.source_alias = alias.into();
        self
    }

    /// Overrides the config endpoint.
    pub fn config_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.config_endpoint = endpoint.into();
        self
    }

    /// Overrides the tracks endpoint.
    pub fn tracks_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.tracks_endpoint = endpoint.into();
        self
    }

    /// Adds custom domain-to-provider mappings.
    pub fn custom_domains(mut self, domains: HashMap<String, String>) -> Self {
        self.config.custom_domains.extend(domains);
        self
    }

    /// Sets the initial tag set.
    pub fn tags(mut self, tags: HashMap<String, String>) -> Self {
        self.config.tags.extend(tags);
        self
    }

    /// Adds a context field included on every track.
    pub fn context_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_context.insert(key.into(), value.into());
        self
    }

    /// Enables debug logging.
    pub fn enable_debug(mut self) -> Self {
        self.config.debug = true;
        self
    }

    /// Enables dry-run mode: batches are scheduled but never posted.
    pub fn dry_run(mut self) -> Self {
        self.config.dry_run = true;
        self
    }

    /// Disables collection of device/platform/activity context fields.
    pub fn ignore_context(mut self) -> Self {
        self.config.ignore_context = true;
        self
    }

    /// Validates and returns the config.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

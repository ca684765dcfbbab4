use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::AdaptiveRule;

/// Sampling options carried by the ingest config.
///
/// The options are also persisted with each session so that sampling keeps
/// working on the rates the session was created under, independently of later
/// config refreshes. Adaptive rules travel as raw JSON strings and are parsed
/// leniently on use, see [`SamplingOptions::rules`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingOptions {
    /// Whether per-request adaptive sampling is enabled.
    pub use_adaptive_sampling: bool,
    /// Adaptive sampling rules as raw JSON documents.
    pub adaptive_sampling_patterns: Vec<String>,
}

impl SamplingOptions {
    /// Deserializes options from their persisted JSON form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serializes options into their persisted JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses the raw rule documents, skipping malformed ones with a warning.
    pub fn rules(&self) -> Vec<AdaptiveRule> {
        self.adaptive_sampling_patterns
            .iter()
            .filter_map(|raw| match AdaptiveRule::parse(raw) {
                Some(rule) => Some(rule),
                None => {
                    wiretap_log::warn!("skipping malformed adaptive sampling rule: {raw}");
                    None
                }
            })
            .collect()
    }
}

/// The configuration document served by the config endpoint.
///
/// Rates are expressed as `1/X` probabilities: a rate of 1 tracks everything,
/// a rate of 10 tracks one session in ten.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// The default sampling rate.
    pub sample_rate: u32,
    /// Per-environment overrides for the default rate.
    pub environment_rates: HashMap<String, u32>,
    /// Adaptive sampling options.
    pub options: SamplingOptions,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1,
            environment_rates: HashMap::new(),
            options: SamplingOptions::default(),
        }
    }
}

impl IngestConfig {
    /// Parses a config document, ignoring unknown fields.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Returns the sampling rate for the given environment.
    pub fn sampling_rate_for(&self, environment: &str) -> u32 {
        self.environment_rates
            .get(environment)
            .copied()
            .unwrap_or(self.sample_rate)
    }

    /// Whether adaptive sampling is enabled.
    pub fn adaptive_sampling_enabled(&self) -> bool {
        self.options.use_adaptive_sampling
    }

    /// Rolls the session dice for the given environment.
    ///
    /// Returns `true` with probability `1 / sampling_rate_for(environment)`.
    /// A rate of zero disables tracking outright.
    pub fn should_enable_tracking<R: Rng + ?Sized>(&self, environment: &str, rng: &mut R) -> bool {
        let rate = self.sampling_rate_for(environment);
        match rate {
            0 => false,
            1 => true,
            rate => rng.gen_range(0.0..1.0) <= 1.0 / f64::from(rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parse_full_document() {
        let config = IngestConfig::from_json(
            r#"{
                "sample_rate": 10,
                "environment_rates": {"PRODUCTION": 4},
                "options": {
                    "useAdaptiveSampling": true,
                    "adaptiveSamplingPatterns": ["{\"provider\": \"segment\", \"sample_rate\": 2}"]
                },
                "unknown_field": 42
            }"#,
        )
        .unwrap();

        assert_eq!(config.sample_rate, 10);
        assert_eq!(config.sampling_rate_for("PRODUCTION"), 4);
        assert_eq!(config.sampling_rate_for("STAGING"), 10);
        assert!(config.adaptive_sampling_enabled());
        assert_eq!(config.options.rules().len(), 1);
    }

    #[test]
    fn parse_empty_document() {
        let config = IngestConfig::from_json("{}").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.sampling_rate_for("PRODUCTION"), 1);
    }

    #[test]
    fn tracking_dice_extremes() {
        let mut rng = rand::thread_rng();

        let mut config = IngestConfig::default();
        assert!(config.should_enable_tracking("PRODUCTION", &mut rng));

        config.sample_rate = 0;
        assert!(!config.should_enable_tracking("PRODUCTION", &mut rng));
    }

    #[test]
    fn options_round_trip() {
        let options = SamplingOptions {
            use_adaptive_sampling: true,
            adaptive_sampling_patterns: vec![r#"{"provider": "braze", "sample_rate": 3}"#.to_owned()],
        };

        let raw = options.to_json().unwrap();
        assert_eq!(SamplingOptions::from_json(&raw).unwrap(), options);
    }
}

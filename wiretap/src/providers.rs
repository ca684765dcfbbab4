//! Destination provider resolution.
//!
//! The engine only tracks requests aimed at known analytics destinations. A
//! built-in table maps URL patterns to provider names; hosts can extend or
//! override it with custom domains. Patterns come in three shapes: a
//! `regex:` prefix for full regular expressions, a `*` wildcard form, and
//! plain substring matching.

use std::collections::{HashMap, HashSet};

use regex::Regex;

/// The built-in pattern-to-provider table.
pub fn default_providers() -> HashMap<String, String> {
    let table = [
        ("api.amplitude.com", "amplitude"),
        ("api2.amplitude.com", "amplitude"),
        ("bat.bing.com", "bing"),
        ("ping.chartbeat.net", "chartbeat"),
        ("track-sdk-eu.customer.io/api", "customerio"),
        ("track-sdk.customer.io/api", "customerio"),
        ("facebook.com/tr/", "facebook"),
        ("google-analytics.com", "googleanalytics"),
        ("analytics.google.com", "googleanalytics"),
        ("api.intercom.io", "intercom"),
        ("kissmetrics.com", "kissmetrics"),
        ("trk.kissmetrics.io", "kissmetrics"),
        ("px.ads.linkedin.com", "linkedin"),
        ("api.mixpanel.com", "mixpanel"),
        ("logx.optimizely.com/v1/events", "optimizely"),
        ("ct.pinterest.com", "pinterest"),
        ("pdst.fm", "podsights"),
        ("quantserve.com", "quantserve"),
        ("sb.scorecardresearch.com", "scorecardresearch"),
        ("api.segment.io", "segment"),
        ("api.segment.com", "segment"),
    ];

    table
        .into_iter()
        .map(|(pattern, provider)| (pattern.to_owned(), provider.to_owned()))
        .collect()
}

/// Resolves request URLs to provider names.
///
/// Compiled regexes are cached, and patterns that fail to compile are
/// remembered and never retried.
#[derive(Debug)]
pub struct ProviderMatcher {
    patterns: Vec<(String, String)>,
    regex_cache: HashMap<String, Regex>,
    failed_patterns: HashSet<String>,
}

impl ProviderMatcher {
    /// Creates a matcher from the built-in table plus custom domains.
    ///
    /// Custom domains take precedence over built-in patterns. Within each
    /// group, patterns are tried in lexicographic order to keep resolution
    /// deterministic.
    pub fn new(custom_domains: &HashMap<String, String>) -> Self {
        let mut patterns: Vec<(String, String)> = custom_domains
            .iter()
            .map(|(pattern, provider)| (pattern.clone(), provider.clone()))
            .collect();
        patterns.sort();

        let mut builtin: Vec<_> = default_providers().into_iter().collect();
        builtin.sort();
        patterns.extend(builtin);

        Self {
            patterns,
            regex_cache: HashMap::new(),
            failed_patterns: HashSet::new(),
        }
    }

    /// Returns the provider for the first pattern matching the URL.
    pub fn match_provider(&mut self, url: &str) -> Option<String> {
        // Patterns cannot be borrowed across the cache lookup, so walk by index.
        for index in 0..self.patterns.len() {
            let (pattern, provider) = self.patterns[index].clone();

            let matches = if let Some(regex) = pattern.strip_prefix("regex:") {
                self.regex_matches(regex.to_owned(), url)
            } else if pattern.contains('*') {
                self.regex_matches(wildcard_to_regex(&pattern), url)
            } else {
                url.contains(&pattern)
            };

            if matches {
                return Some(provider);
            }
        }

        None
    }

    fn regex_matches(&mut self, pattern: String, url: &str) -> bool {
        if self.failed_patterns.contains(&pattern) {
            return false;
        }

        if let Some(regex) = self.regex_cache.get(&pattern) {
            return regex.is_match(url);
        }

        match Regex::new(&pattern) {
            Ok(regex) => {
                let matches = regex.is_match(url);
                self.regex_cache.insert(pattern, regex);
                matches
            }
            Err(_) => {
                self.failed_patterns.insert(pattern);
                false
            }
        }
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    pattern.replace('.', "\\.").replace('*', ".*")
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn matcher() -> ProviderMatcher {
        ProviderMatcher::new(&HashMap::new())
    }

    #[test]
    fn substring_patterns() {
        let mut matcher = matcher();

        assert_eq!(
            matcher.match_provider("https://api.segment.io/v1/batch"),
            Some("segment".to_owned())
        );
        assert_eq!(
            matcher.match_provider("https://www.google-analytics.com/g/collect"),
            Some("googleanalytics".to_owned())
        );
        assert_eq!(matcher.match_provider("https://example.com/collect"), None);
    }

    #[test]
    fn wildcard_patterns() {
        let custom = HashMap::from([(
            "*.mycompany.com/track".to_owned(),
            "custom_provider".to_owned(),
        )]);
        let mut matcher = ProviderMatcher::new(&custom);

        assert_eq!(
            matcher.match_provider("https://analytics.mycompany.com/track"),
            Some("custom_provider".to_owned())
        );
        assert_eq!(matcher.match_provider("https://analytics.mycompany.com/other"), None);
    }

    #[test]
    fn regex_patterns() {
        let custom = HashMap::from([(
            "regex:https://collector-[0-9]+\\.internal/events".to_owned(),
            "internal".to_owned(),
        )]);
        let mut matcher = ProviderMatcher::new(&custom);

        assert_eq!(
            matcher.match_provider("https://collector-42.internal/events"),
            Some("internal".to_owned())
        );
    }

    #[test]
    fn invalid_regex_never_matches() {
        let custom = HashMap::from([("regex:([unclosed".to_owned(), "broken".to_owned())]);
        let mut matcher = ProviderMatcher::new(&custom);

        assert_eq!(matcher.match_provider("https://x/([unclosed"), None);
        // Second lookup hits the failed-pattern set.
        assert_eq!(matcher.match_provider("https://x/([unclosed"), None);
    }

    #[test]
    fn custom_domains_take_precedence() {
        let custom = HashMap::from([("api.segment.io".to_owned(), "renamed".to_owned())]);
        let mut matcher = ProviderMatcher::new(&custom);

        assert_eq!(
            matcher.match_provider("https://api.segment.io/v1/track"),
            Some("renamed".to_owned())
        );
    }
}

//! Adaptive sampling rules and the matcher that applies them to requests.
//!
//! Rules arrive as raw JSON documents inside the ingest config options. A
//! rule names a provider, a target sample rate, and an optional match
//! condition over the request's endpoint and payload:
//!
//! ```json
//! {
//!     "provider": "segment",
//!     "match": {"event": ["purchase", "signup"]},
//!     "sample_rate": 2
//! }
//! ```
//!
//! Conditions support the boolean operators `and`, `or` and `not`, field
//! equality with single or multiple (any-of) values, and a small set of
//! special keys for substring matching.

use std::collections::BTreeMap;

use serde_json::Value;

/// Matches a substring of the endpoint path.
const ENDPOINT_PATH_CONTAINS: &str = "@TP_ENDPOINT_PATH@CONTAINS";
/// Matches a substring of the endpoint or the raw payload.
const ENDPOINT_OR_PAYLOAD_CONTAINS: &str = "@TP_ENDPOINT_OR_PAYLOAD@CONTAINS";
/// Matches a value under any payload field.
const ANY_KEY: &str = "@TP_ANY_KEY";
/// Suffix turning a field condition into a substring match.
const CONTAINS_SUFFIX: &str = "@CONTAINS";

/// The value side of a field condition.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchValue {
    /// The field must equal this value.
    Single(String),
    /// The field must equal any of these values.
    Multiple(Vec<String>),
}

impl MatchValue {
    fn any(&self, predicate: impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Single(value) => predicate(value),
            Self::Multiple(values) => values.iter().any(|value| predicate(value)),
        }
    }
}

/// A condition from an adaptive sampling rule.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchCondition {
    /// All inner conditions must match.
    And(Vec<MatchCondition>),
    /// At least one inner condition must match.
    Or(Vec<MatchCondition>),
    /// The inner condition must not match.
    Not(Box<MatchCondition>),
    /// Field conditions, combined with an implicit AND.
    Fields(BTreeMap<String, MatchValue>),
}

/// An adaptive sampling rule from the ingest config.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveRule {
    /// The destination provider this rule applies to.
    pub provider: String,
    /// The condition a request must satisfy, if any.
    pub condition: Option<MatchCondition>,
    /// The target sample rate for matching requests.
    pub sample_rate: u32,
}

impl AdaptiveRule {
    /// Parses a rule from its raw JSON document.
    ///
    /// Returns `None` for documents that are not valid JSON, lack a provider,
    /// or carry a condition that cannot be interpreted. The sample rate
    /// defaults to 1 when absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let object = value.as_object()?;

        let provider = object.get("provider")?.as_str()?.to_owned();
        let sample_rate = match object.get("sample_rate") {
            Some(rate) => u32::try_from(rate.as_i64()?).ok()?,
            None => 1,
        };
        let condition = match object.get("match") {
            Some(condition) => Some(parse_condition(condition.as_object()?)?),
            None => None,
        };

        Some(Self {
            provider,
            condition,
            sample_rate,
        })
    }
}

fn parse_condition(object: &serde_json::Map<String, Value>) -> Option<MatchCondition> {
    if let Some(inner) = object.get("and") {
        let conditions = parse_condition_list(inner)?;
        return Some(MatchCondition::And(conditions));
    }

    if let Some(inner) = object.get("or") {
        let conditions = parse_condition_list(inner)?;
        return Some(MatchCondition::Or(conditions));
    }

    if let Some(inner) = object.get("not") {
        let condition = parse_condition(inner.as_object()?)?;
        return Some(MatchCondition::Not(Box::new(condition)));
    }

    let mut fields = BTreeMap::new();
    for (key, value) in object {
        let value = match value {
            Value::String(value) => MatchValue::Single(value.clone()),
            Value::Array(values) => MatchValue::Multiple(
                values
                    .iter()
                    .map(|value| value.as_str().map(str::to_owned))
                    .collect::<Option<_>>()?,
            ),
            _ => return None,
        };
        fields.insert(key.clone(), value);
    }

    Some(MatchCondition::Fields(fields))
}

fn parse_condition_list(value: &Value) -> Option<Vec<MatchCondition>> {
    value
        .as_array()?
        .iter()
        .map(|inner| parse_condition(inner.as_object()?))
        .collect()
}

/// The request data adaptive rules are matched against.
#[derive(Clone, Copy, Debug)]
pub struct MatchTarget<'a> {
    /// The destination provider of the request.
    pub provider: &'a str,
    /// The full request URL.
    pub endpoint: &'a str,
    /// The path component of the request URL.
    pub path: &'a str,
    /// The request body as text, empty for binary bodies.
    pub payload: &'a str,
}

type FlatMap = BTreeMap<String, Vec<String>>;

/// Returns the first rule matching the request, in rule order.
///
/// Rules for other providers never match. Payload fields are flattened once
/// up front and shared by all field conditions: a batched payload (top-level
/// JSON array) yields one variation per element, and a request matches when
/// any variation satisfies the condition. Endpoint query parameters form an
/// additional variation.
pub fn match_rules<'a>(
    target: &MatchTarget<'_>,
    rules: &'a [AdaptiveRule],
) -> Option<&'a AdaptiveRule> {
    let provider_rules: Vec<_> = rules
        .iter()
        .filter(|rule| rule.provider == target.provider)
        .collect();
    if provider_rules.is_empty() {
        return None;
    }

    let variations = payload_variations(target);

    provider_rules.into_iter().find(|rule| match &rule.condition {
        None => true,
        Some(condition) => variations
            .iter()
            .any(|flat| evaluate(condition, flat, target)),
    })
}

fn evaluate(condition: &MatchCondition, flat: &FlatMap, target: &MatchTarget<'_>) -> bool {
    match condition {
        MatchCondition::And(inner) => inner.iter().all(|c| evaluate(c, flat, target)),
        MatchCondition::Or(inner) => inner.iter().any(|c| evaluate(c, flat, target)),
        MatchCondition::Not(inner) => !evaluate(inner, flat, target),
        MatchCondition::Fields(fields) => fields
            .iter()
            .all(|(key, value)| evaluate_field(key, value, flat, target)),
    }
}

fn evaluate_field(key: &str, value: &MatchValue, flat: &FlatMap, target: &MatchTarget<'_>) -> bool {
    if key == ENDPOINT_PATH_CONTAINS {
        return value.any(|needle| target.path.contains(needle));
    }

    if key == ENDPOINT_OR_PAYLOAD_CONTAINS {
        return value
            .any(|needle| target.endpoint.contains(needle) || target.payload.contains(needle));
    }

    if key == ANY_KEY {
        return value.any(|needle| flat.values().flatten().any(|field| field == needle));
    }

    if let Some(key) = key.strip_suffix(CONTAINS_SUFFIX) {
        let Some(field_values) = flat.get(key) else {
            return false;
        };
        return value.any(|needle| field_values.iter().any(|field| field.contains(needle)));
    }

    let Some(field_values) = flat.get(key) else {
        return false;
    };
    value.any(|needle| field_values.iter().any(|field| field == needle))
}

/// Flattens the payload into one or more key-value variations.
///
/// Always yields at least one (possibly empty) variation so that special-key
/// conditions are evaluated even for requests without a structured payload.
fn payload_variations(target: &MatchTarget<'_>) -> Vec<FlatMap> {
    let mut variations = Vec::new();

    match serde_json::from_str::<Value>(target.payload) {
        Ok(Value::Array(elements)) => {
            for element in &elements {
                let mut flat = FlatMap::new();
                flatten_into(element, &mut flat);
                variations.push(flat);
            }
        }
        Ok(value) => {
            let mut flat = FlatMap::new();
            flatten_into(&value, &mut flat);
            variations.push(flat);
        }
        Err(_) => (),
    }

    if let Some(query) = target.endpoint.split_once('?').map(|(_, query)| query) {
        let mut flat = FlatMap::new();
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                flat.entry(key.to_owned()).or_default().push(value.to_owned());
            }
        }
        variations.push(flat);
    }

    if variations.is_empty() {
        variations.push(FlatMap::new());
    }

    variations
}

/// Collects primitive leaf values under their immediate key name.
fn flatten_into(value: &Value, flat: &mut FlatMap) {
    let Value::Object(object) = value else {
        return;
    };

    for (key, value) in object {
        match value {
            Value::String(value) => flat.entry(key.clone()).or_default().push(value.clone()),
            Value::Number(value) => flat.entry(key.clone()).or_default().push(value.to_string()),
            Value::Bool(value) => flat.entry(key.clone()).or_default().push(value.to_string()),
            Value::Array(elements) => {
                for element in elements {
                    match element {
                        Value::String(value) => {
                            flat.entry(key.clone()).or_default().push(value.clone());
                        }
                        Value::Object(_) => flatten_into(element, flat),
                        _ => (),
                    }
                }
            }
            Value::Object(_) => flatten_into(value, flat),
            Value::Null => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn target<'a>(provider: &'a str, endpoint: &'a str, payload: &'a str) -> MatchTarget<'a> {
        let path = endpoint
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path)
            .unwrap_or("");
        MatchTarget {
            provider,
            endpoint,
            path,
            payload,
        }
    }

    #[test]
    fn parse_minimal_rule() {
        let rule = AdaptiveRule::parse(r#"{"provider": "segment"}"#).unwrap();
        assert_eq!(rule.provider, "segment");
        assert_eq!(rule.sample_rate, 1);
        assert_eq!(rule.condition, None);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(AdaptiveRule::parse("not json"), None);
        assert_eq!(AdaptiveRule::parse(r#"{"sample_rate": 5}"#), None);
        assert_eq!(
            AdaptiveRule::parse(r#"{"provider": "segment", "match": {"event": 42}}"#),
            None
        );
    }

    #[test]
    fn provider_must_match() {
        let rules = [AdaptiveRule::parse(r#"{"provider": "segment", "sample_rate": 2}"#).unwrap()];

        let hit = target("segment", "https://api.segment.io/v1/track", "{}");
        assert!(match_rules(&hit, &rules).is_some());

        let miss = target("braze", "https://api.braze.com/track", "{}");
        assert!(match_rules(&miss, &rules).is_none());
    }

    #[test]
    fn field_equality_and_any_of() {
        let rules = [AdaptiveRule::parse(
            r#"{"provider": "segment", "match": {"event": ["purchase", "signup"]}, "sample_rate": 2}"#,
        )
        .unwrap()];

        let hit = target("segment", "https://x/t", r#"{"event": "signup", "plan": "free"}"#);
        assert!(match_rules(&hit, &rules).is_some());

        let miss = target("segment", "https://x/t", r#"{"event": "page_view"}"#);
        assert!(match_rules(&miss, &rules).is_none());
    }

    #[test]
    fn batched_payload_matches_per_element() {
        let rules = [AdaptiveRule::parse(
            r#"{"provider": "segment", "match": {"event": "purchase"}, "sample_rate": 2}"#,
        )
        .unwrap()];

        let batch = r#"[{"event": "page_view"}, {"event": "purchase"}]"#;
        assert!(match_rules(&target("segment", "https://x/batch", batch), &rules).is_some());
    }

    #[test]
    fn special_keys() {
        let path_rule = AdaptiveRule::parse(
            r#"{"provider": "segment", "match": {"@TP_ENDPOINT_PATH@CONTAINS": "/v1/track"}, "sample_rate": 2}"#,
        )
        .unwrap();
        let text_rule = AdaptiveRule::parse(
            r#"{"provider": "segment", "match": {"@TP_ENDPOINT_OR_PAYLOAD@CONTAINS": "purchase"}, "sample_rate": 2}"#,
        )
        .unwrap();
        let any_rule = AdaptiveRule::parse(
            r#"{"provider": "segment", "match": {"@TP_ANY_KEY": "premium"}, "sample_rate": 2}"#,
        )
        .unwrap();

        let hit = target(
            "segment",
            "https://api.segment.io/v1/track",
            r#"{"event": "purchase", "plan": "premium"}"#,
        );
        assert_eq!(match_rules(&hit, &[path_rule]).map(|r| r.sample_rate), Some(2));
        assert_eq!(match_rules(&hit, &[text_rule]).map(|r| r.sample_rate), Some(2));
        assert_eq!(match_rules(&hit, &[any_rule]).map(|r| r.sample_rate), Some(2));
    }

    #[test]
    fn contains_suffix_and_boolean_operators() {
        let rules = [AdaptiveRule::parse(
            r#"{
                "provider": "segment",
                "match": {
                    "and": [
                        {"event@CONTAINS": "purchase"},
                        {"not": {"env": "debug"}}
                    ]
                },
                "sample_rate": 2
            }"#,
        )
        .unwrap()];

        let hit = target("segment", "https://x/t", r#"{"event": "purchase_completed"}"#);
        assert!(match_rules(&hit, &rules).is_some());

        let miss = target(
            "segment",
            "https://x/t",
            r#"{"event": "purchase_completed", "env": "debug"}"#,
        );
        assert!(match_rules(&miss, &rules).is_none());
    }

    #[test]
    fn query_parameters_form_a_variation() {
        let rules = [AdaptiveRule::parse(
            r#"{"provider": "ga4", "match": {"en": "page_view"}, "sample_rate": 2}"#,
        )
        .unwrap()];

        let hit = target("ga4", "https://region1.google-analytics.com/g/collect?v=2&en=page_view", "");
        assert!(match_rules(&hit, &rules).is_some());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = [
            AdaptiveRule::parse(
                r#"{"provider": "segment", "match": {"event": "purchase"}, "sample_rate": 2}"#,
            )
            .unwrap(),
            AdaptiveRule::parse(r#"{"provider": "segment", "sample_rate": 5}"#).unwrap(),
        ];

        let purchase = target("segment", "https://x/t", r#"{"event": "purchase"}"#);
        assert_eq!(match_rules(&purchase, &rules).map(|r| r.sample_rate), Some(2));

        let other = target("segment", "https://x/t", r#"{"event": "page_view"}"#);
        assert_eq!(match_rules(&other, &rules).map(|r| r.sample_rate), Some(5));
    }
}

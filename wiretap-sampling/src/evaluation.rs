//! Per-request sampling decisions on top of the session dice roll.

use std::fmt;

use rand::Rng;

use crate::{match_rules, AdaptiveRule, MatchTarget};

/// How an included request's sampling decision was made.
///
/// The string forms are reported in the delivered payload and must stay
/// stable across SDK implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingMode {
    /// Adaptive sampling disabled, session dice only.
    Default,
    /// Session dice passed and an adaptive rule matched.
    SessionSampledRuleMatched,
    /// Session dice passed, no adaptive rule matched.
    SessionSampledNoRule,
    /// Session dice failed, the request was rescued by an adaptive rule.
    RescuedByRule,
}

impl SamplingMode {
    /// Returns the stable wire name of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "NOT_ADAPTIVE",
            Self::SessionSampledRuleMatched => "ADAPTIVE/DEFAULT_DICE/EVENT_MATCHED",
            Self::SessionSampledNoRule => "ADAPTIVE/DEFAULT_DICE/EVENT_NOT_MATCHED",
            Self::RescuedByRule => "ADAPTIVE/EVENT_DICE/EVENT_MATCHED",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The session sampling rate is zero.
    TrackingDisabled,
    /// The session dice failed and adaptive sampling is disabled.
    AdaptiveSamplingDisabled,
    /// The session dice failed and no adaptive rule matched.
    NoMatchingRule,
    /// A rule matched but the rescue dice failed.
    RescueProbabilityFailed,
}

impl DropReason {
    /// Returns the stable name of this reason, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrackingDisabled => "tracking-disabled",
            Self::AdaptiveSamplingDisabled => "adaptive-sampling-disabled",
            Self::NoMatchingRule => "no-matching-pattern",
            Self::RescueProbabilityFailed => "rescue-probability-failed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of evaluating a request for sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    /// The request is delivered.
    Include {
        /// The sample rate to report with the request.
        effective_rate: u32,
        /// How the decision was made.
        mode: SamplingMode,
    },
    /// The request is dropped.
    Drop {
        /// Why the request is dropped.
        reason: DropReason,
    },
}

impl SamplingDecision {
    /// Whether the request is delivered.
    pub fn is_include(&self) -> bool {
        matches!(self, Self::Include { .. })
    }
}

/// Evaluates the two-tier sampling decision for a request.
///
/// The first tier is the session dice, rolled once at session creation and
/// passed in as `session_tracking_enabled`. The second tier applies adaptive
/// rules: for tracked sessions a matching rule only annotates the effective
/// rate, while for untracked sessions a matching rule may rescue the request
/// with the conditional probability computed by [`rescue_probability`].
pub fn evaluate<R: Rng + ?Sized>(
    target: &MatchTarget<'_>,
    session_rate: u32,
    session_tracking_enabled: bool,
    adaptive_enabled: bool,
    rules: &[AdaptiveRule],
    rng: &mut R,
) -> SamplingDecision {
    if session_rate == 0 {
        return SamplingDecision::Drop {
            reason: DropReason::TrackingDisabled,
        };
    }

    if session_tracking_enabled {
        if !adaptive_enabled {
            return SamplingDecision::Include {
                effective_rate: session_rate,
                mode: SamplingMode::Default,
            };
        }

        return match match_rules(target, rules) {
            Some(rule) if rule.sample_rate > 0 => SamplingDecision::Include {
                effective_rate: rule.sample_rate.min(session_rate),
                mode: SamplingMode::SessionSampledRuleMatched,
            },
            _ => SamplingDecision::Include {
                effective_rate: session_rate,
                mode: SamplingMode::SessionSampledNoRule,
            },
        };
    }

    if !adaptive_enabled {
        return SamplingDecision::Drop {
            reason: DropReason::AdaptiveSamplingDisabled,
        };
    }

    let rule = match match_rules(target, rules) {
        Some(rule) if rule.sample_rate > 0 => rule,
        _ => {
            return SamplingDecision::Drop {
                reason: DropReason::NoMatchingRule,
            }
        }
    };

    let probability = rescue_probability(rule.sample_rate, session_rate);
    if rng.gen_range(0.0..1.0) < probability {
        SamplingDecision::Include {
            effective_rate: rule.sample_rate,
            mode: SamplingMode::RescuedByRule,
        }
    } else {
        SamplingDecision::Drop {
            reason: DropReason::RescueProbabilityFailed,
        }
    }
}

/// Computes the conditional probability of rescuing an unsampled request.
///
/// For the overall inclusion probability of matched requests to equal the
/// rule's `1/rule_rate` target, the rescue draw, taken only when the session
/// dice already failed, must succeed with:
///
/// ```text
/// p = (1/rule_rate - 1/session_rate) / (1 - 1/session_rate)
/// ```
///
/// Returns 0 when the rule's rate does not exceed what session sampling
/// already provides, or when the session tracks everything anyway.
pub fn rescue_probability(rule_rate: u32, session_rate: u32) -> f64 {
    if rule_rate == 0 || session_rate == 0 {
        return 0.0;
    }

    let session_probability = 1.0 / f64::from(session_rate);
    if session_probability >= 1.0 {
        return 0.0;
    }

    let target_probability = 1.0 / f64::from(rule_rate);
    if target_probability <= session_probability {
        return 0.0;
    }

    ((target_probability - session_probability) / (1.0 - session_probability)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn rules(raw: &[&str]) -> Vec<AdaptiveRule> {
        raw.iter().map(|raw| AdaptiveRule::parse(raw).unwrap()).collect()
    }

    fn purchase_target() -> MatchTarget<'static> {
        MatchTarget {
            provider: "segment",
            endpoint: "https://api.segment.io/v1/track",
            path: "v1/track",
            payload: r#"{"event": "purchase"}"#,
        }
    }

    #[test]
    fn zero_rate_disables_tracking() {
        let decision = evaluate(&purchase_target(), 0, true, true, &[], &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Drop {
                reason: DropReason::TrackingDisabled
            }
        );
    }

    #[test]
    fn tracked_session_without_adaptive() {
        let decision = evaluate(&purchase_target(), 10, true, false, &[], &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Include {
                effective_rate: 10,
                mode: SamplingMode::Default
            }
        );
    }

    #[test]
    fn tracked_session_rule_lowers_effective_rate() {
        let rules = rules(&[
            r#"{"provider": "segment", "match": {"event": "purchase"}, "sample_rate": 2}"#,
        ]);

        let decision = evaluate(&purchase_target(), 10, true, true, &rules, &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Include {
                effective_rate: 2,
                mode: SamplingMode::SessionSampledRuleMatched
            }
        );
    }

    #[test]
    fn tracked_session_without_matching_rule() {
        let rules = rules(&[
            r#"{"provider": "segment", "match": {"event": "signup"}, "sample_rate": 2}"#,
        ]);

        let decision = evaluate(&purchase_target(), 10, true, true, &rules, &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Include {
                effective_rate: 10,
                mode: SamplingMode::SessionSampledNoRule
            }
        );
    }

    #[test]
    fn untracked_session_drops_without_adaptive() {
        let decision = evaluate(&purchase_target(), 10, false, false, &[], &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Drop {
                reason: DropReason::AdaptiveSamplingDisabled
            }
        );
    }

    #[test]
    fn untracked_session_drops_without_matching_rule() {
        let decision = evaluate(&purchase_target(), 10, false, true, &[], &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Drop {
                reason: DropReason::NoMatchingRule
            }
        );
    }

    #[test]
    fn rescue_with_certain_probability() {
        // rule rate 1 means track everything, so the rescue dice always passes.
        let rules = rules(&[r#"{"provider": "segment", "sample_rate": 1}"#]);

        let decision = evaluate(&purchase_target(), 10, false, true, &rules, &mut rand::thread_rng());
        assert_eq!(
            decision,
            SamplingDecision::Include {
                effective_rate: 1,
                mode: SamplingMode::RescuedByRule
            }
        );
    }

    #[test]
    fn rescue_probability_values() {
        // 1/2 target with 1/10 sessions: (0.5 - 0.1) / 0.9
        let p = rescue_probability(2, 10);
        assert!((p - 0.4 / 0.9).abs() < 1e-9);

        // Rule not stronger than the session rate rescues nothing.
        assert_eq!(rescue_probability(10, 10), 0.0);
        assert_eq!(rescue_probability(20, 10), 0.0);

        // Sessions tracked at 100% leave nothing to rescue.
        assert_eq!(rescue_probability(2, 1), 0.0);

        assert_eq!(rescue_probability(1, 10), 1.0);
        assert_eq!(rescue_probability(0, 10), 0.0);
    }

    #[test]
    fn mode_and_reason_names() {
        assert_eq!(SamplingMode::Default.as_str(), "NOT_ADAPTIVE");
        assert_eq!(
            SamplingMode::RescuedByRule.as_str(),
            "ADAPTIVE/EVENT_DICE/EVENT_MATCHED"
        );
        assert_eq!(DropReason::TrackingDisabled.as_str(), "tracking-disabled");
        assert_eq!(DropReason::NoMatchingRule.as_str(), "no-matching-pattern");
    }
}

//! Session identity and lifecycle.
//!
//! A session pins the sampling decision for a stretch of user activity: the
//! tracking dice is rolled once at creation and never again for that session.
//! Sessions expire after 30 minutes without activity, measured on the
//! monotonic clock so wall-clock changes cannot extend or shorten them. The
//! sampling options are embedded at creation, keeping the session
//! self-contained even when the cached ingest config expires later.

use std::time::Duration;

use rand::Rng;
use uuid::Uuid;
use wiretap_sampling::{
    AdaptiveRule, MatchTarget, SamplingDecision, SamplingOptions,
};
use wiretap_storage::SessionRecord;

use crate::clock::Clock;

/// Idle time after which a session expires.
pub const MAX_IDLE_DURATION: Duration = Duration::from_secs(30 * 60);

/// Minimum drift before an activity refresh is persisted.
const ACTIVITY_WRITE_INTERVAL_MS: i64 = 60 * 1000;

/// A sampling-stable identity for a run of user activity.
#[derive(Debug)]
pub struct Session {
    session_id: String,
    sampling_rate: u32,
    tracking_enabled: bool,
    created_at: i64,
    last_activity_time: i64,
    is_new: bool,
    sampling_options: SamplingOptions,
    rules: Vec<AdaptiveRule>,
}

impl Session {
    /// Creates a new session with a fresh identifier and current timestamps.
    pub fn new(
        sampling_rate: u32,
        tracking_enabled: bool,
        sampling_options: SamplingOptions,
        clock: &dyn Clock,
    ) -> Self {
        let rules = parse_rules(&sampling_options);
        Self {
            session_id: Uuid::new_v4().to_string(),
            sampling_rate,
            tracking_enabled,
            created_at: clock.wall_millis(),
            last_activity_time: clock.boot_elapsed_millis(),
            is_new: true,
            sampling_options,
            rules,
        }
    }

    /// Restores a session from its persisted record.
    ///
    /// A record with unreadable sampling options falls back to defaults, the
    /// same as sessions persisted before options were embedded.
    pub fn from_record(record: SessionRecord) -> Self {
        let sampling_options =
            SamplingOptions::from_json(&record.sampling_options).unwrap_or_default();
        let rules = parse_rules(&sampling_options);

        Self {
            session_id: record.session_id,
            sampling_rate: record.sampling_rate,
            tracking_enabled: record.tracking_enabled,
            created_at: record.created_at,
            last_activity_time: record.last_activity_time,
            is_new: false,
            sampling_options,
            rules,
        }
    }

    /// Converts the session into its persisted record.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            sampling_rate: self.sampling_rate,
            tracking_enabled: self.tracking_enabled,
            created_at: self.created_at,
            last_activity_time: self.last_activity_time,
            sampling_options: self.sampling_options.to_json().unwrap_or_default(),
        }
    }

    /// The opaque session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The sampling rate the session was created under.
    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// The session's fixed tracking decision.
    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled
    }

    /// Wall-clock creation time in milliseconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Monotonic time of the last recorded activity in milliseconds.
    pub fn last_activity_time(&self) -> i64 {
        self.last_activity_time
    }

    /// Whether this instance was created in this process run.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether the session expired from inactivity.
    ///
    /// A persisted activity time larger than the current monotonic reading
    /// means the clock restarted, which also expires the session.
    pub fn has_expired(&self, clock: &dyn Clock) -> bool {
        self.idle_duration_ms(clock) >= max_idle_ms()
    }

    /// Refreshes the activity time when drift exceeds one minute.
    ///
    /// Returns `true` when the time changed and the session should be
    /// persisted. Smaller drifts are coalesced to limit storage writes.
    pub fn update_last_activity(&mut self, clock: &dyn Clock) -> bool {
        let elapsed = clock.boot_elapsed_millis();

        if self.last_activity_time > elapsed
            || elapsed > self.last_activity_time + ACTIVITY_WRITE_INTERVAL_MS
        {
            self.last_activity_time = elapsed;
            return true;
        }

        false
    }

    /// Evaluates the two-tier sampling decision for a request.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        target: &MatchTarget<'_>,
        rng: &mut R,
    ) -> SamplingDecision {
        wiretap_sampling::evaluate(
            target,
            self.sampling_rate,
            self.tracking_enabled,
            self.sampling_options.use_adaptive_sampling,
            &self.rules,
            rng,
        )
    }

    fn idle_duration_ms(&self, clock: &dyn Clock) -> i64 {
        let elapsed = clock.boot_elapsed_millis();
        if self.last_activity_time > elapsed {
            return i64::MAX;
        }
        elapsed - self.last_activity_time
    }
}

fn parse_rules(options: &SamplingOptions) -> Vec<AdaptiveRule> {
    if options.use_adaptive_sampling {
        options.rules()
    } else {
        Vec::new()
    }
}

fn max_idle_ms() -> i64 {
    i64::try_from(MAX_IDLE_DURATION.as_millis()).unwrap_or(i64::MAX)
}

//! Timing and capacity configuration for every tier.
//!
//! DESIGN
//! ======
//! All knobs have compiled-in defaults and can be overridden from the
//! environment with `SYNC_*` variables. Durations are configured in
//! milliseconds. Invalid or missing values fall back to the default.

use std::time::Duration;

pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;
pub const DEFAULT_MESSAGE_HISTORY: usize = 50;
pub const DEFAULT_LOCAL_STROKE_HISTORY: usize = 200;
pub const DEFAULT_REMOTE_STROKE_WINDOW: usize = 500;

const DEFAULT_LOCAL_LIVENESS_MS: u64 = 30_000;
const DEFAULT_LOAD_LIVENESS_MS: u64 = 45_000;
const DEFAULT_REMOTE_LIVENESS_MS: u64 = 45_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_GRACE_MS: u64 = 5_000;
const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_CAP_MS: u64 = 10_000;
const DEFAULT_RETRY_MAX: u32 = 3;
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

const DEFAULT_RETENTION_PARTICIPANT_MS: u64 = 300_000;
const DEFAULT_RETENTION_MESSAGES: usize = 100;
const DEFAULT_RETENTION_STROKES: usize = 1_000;

/// Parse an environment variable, falling back to `default` when the
/// variable is missing or malformed.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    raw.parse::<T>().unwrap_or(default)
}

fn env_duration(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_ms))
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Exponential backoff used to re-probe the primary transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            cap: Duration::from_millis(DEFAULT_RETRY_CAP_MS),
            max_retries: DEFAULT_RETRY_MAX,
        }
    }
}

// =============================================================================
// RETENTION POLICY
// =============================================================================

/// Bounds applied when pruning the durable cross-device store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Participants not seen for this long are deleted.
    pub participant_ttl: Duration,
    /// Newest messages kept.
    pub max_messages: usize,
    /// Newest strokes kept.
    pub max_strokes: usize,
}

impl RetentionPolicy {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            participant_ttl: env_duration("SYNC_RETENTION_PARTICIPANT_MS", DEFAULT_RETENTION_PARTICIPANT_MS),
            max_messages: env_parse("SYNC_RETENTION_MESSAGES", DEFAULT_RETENTION_MESSAGES),
            max_strokes: env_parse("SYNC_RETENTION_STROKES", DEFAULT_RETENTION_STROKES),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            participant_ttl: Duration::from_millis(DEFAULT_RETENTION_PARTICIPANT_MS),
            max_messages: DEFAULT_RETENTION_MESSAGES,
            max_strokes: DEFAULT_RETENTION_STROKES,
        }
    }
}

// =============================================================================
// SYNC CONFIG
// =============================================================================

/// Every capacity bound, window, and interval used by the sync tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Admitted participant ceiling.
    pub max_participants: usize,
    /// Chat messages retained in every tier.
    pub message_history: usize,
    /// Strokes retained in the persisted local snapshot.
    pub local_stroke_history: usize,
    /// Newest strokes fetched per cross-device poll.
    pub remote_stroke_window: usize,
    /// Liveness window applied by the local relay sweep.
    pub local_liveness: Duration,
    /// Liveness window applied when loading the persisted local snapshot.
    pub load_liveness: Duration,
    /// Liveness window applied to durable-store participant queries.
    pub remote_liveness: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Time allowed for the primary transport to reach `Subscribed`.
    pub grace_timeout: Duration,
    pub retry: RetryPolicy,
    pub cleanup_interval: Duration,
    pub retention: RetentionPolicy,
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_participants: env_parse("SYNC_MAX_PARTICIPANTS", DEFAULT_MAX_PARTICIPANTS),
            message_history: env_parse("SYNC_MESSAGE_HISTORY", DEFAULT_MESSAGE_HISTORY),
            local_stroke_history: env_parse("SYNC_LOCAL_STROKE_HISTORY", DEFAULT_LOCAL_STROKE_HISTORY),
            remote_stroke_window: env_parse("SYNC_REMOTE_STROKE_WINDOW", DEFAULT_REMOTE_STROKE_WINDOW),
            local_liveness: env_duration("SYNC_LOCAL_LIVENESS_MS", DEFAULT_LOCAL_LIVENESS_MS),
            load_liveness: env_duration("SYNC_LOAD_LIVENESS_MS", DEFAULT_LOAD_LIVENESS_MS),
            remote_liveness: env_duration("SYNC_REMOTE_LIVENESS_MS", DEFAULT_REMOTE_LIVENESS_MS),
            poll_interval: env_duration("SYNC_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            sweep_interval: env_duration("SYNC_SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS),
            heartbeat_interval: env_duration("SYNC_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS),
            grace_timeout: env_duration("SYNC_GRACE_MS", DEFAULT_GRACE_MS),
            retry: RetryPolicy {
                base: env_duration("SYNC_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS),
                cap: env_duration("SYNC_RETRY_CAP_MS", DEFAULT_RETRY_CAP_MS),
                max_retries: env_parse("SYNC_RETRY_MAX", DEFAULT_RETRY_MAX),
            },
            cleanup_interval: env_duration("SYNC_CLEANUP_INTERVAL_MS", DEFAULT_CLEANUP_INTERVAL_MS),
            retention: RetentionPolicy::from_env(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            message_history: DEFAULT_MESSAGE_HISTORY,
            local_stroke_history: DEFAULT_LOCAL_STROKE_HISTORY,
            remote_stroke_window: DEFAULT_REMOTE_STROKE_WINDOW,
            local_liveness: Duration::from_millis(DEFAULT_LOCAL_LIVENESS_MS),
            load_liveness: Duration::from_millis(DEFAULT_LOAD_LIVENESS_MS),
            remote_liveness: Duration::from_millis(DEFAULT_REMOTE_LIVENESS_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            grace_timeout: Duration::from_millis(DEFAULT_GRACE_MS),
            retry: RetryPolicy::default(),
            cleanup_interval: Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Duration as whole milliseconds, saturating at `i64::MAX`.
#[must_use]
pub fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

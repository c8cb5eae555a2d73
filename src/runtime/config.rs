//! Worker tuning knobs, grounded in how `weavegraph`'s `RuntimeConfig`
//! resolves its settings: sensible compiled-in defaults, overridable from
//! the environment via `dotenvy`.

/// Tuning constants for one worker's claim/execute/idle loop. See
/// `SPEC_FULL.md` §4.4 for the semantics each field drives.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How long a claimed lease is held before it is considered expired.
    pub lease_ms: i64,
    /// Attempts allowed before a failing step is marked `failed` for good.
    pub max_attempts: u32,
    /// Base of the exponential backoff applied between retries.
    pub backoff_base_ms: i64,
    /// Lower bound on the idle-sleep duration (before jitter).
    pub poll_floor_ms: i64,
    /// Upper bound on the idle-sleep duration (before jitter).
    pub poll_ceiling_ms: i64,
    /// Sleep duration when no runnable instance exists at all.
    pub idle_sleep_ms: i64,
    /// Upper bound on the random jitter added to every idle sleep.
    pub jitter_max_ms: i64,
    /// This worker's identity, stamped into `lease_owner`.
    pub worker_id: String,
}

impl RunnerConfig {
    pub const LEASE_MS: i64 = 30_000;
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BACKOFF_BASE_MS: i64 = 1_000;
    pub const POLL_FLOOR_MS: i64 = 100;
    pub const POLL_CEILING_MS: i64 = 5_000;
    pub const IDLE_SLEEP_MS: i64 = 1_000;
    pub const JITTER_MAX_MS: i64 = 500;

    /// A fresh worker identity: process id plus start time, per
    /// `SPEC_FULL.md` §7's environment note — sufficient to disambiguate
    /// workers without a coordination service.
    fn generate_worker_id() -> String {
        let pid = std::process::id();
        let started_at = chrono::Utc::now().timestamp_millis();
        format!("worker-{pid}-{started_at}")
    }

    fn env_i64(key: &str, default: i64) -> i64 {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn env_u32(key: &str, default: u32) -> u32 {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Load from the process environment, reading a `.env` file first if
    /// present. Unset variables fall back to the spec's defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            lease_ms: Self::env_i64("FLOWLOOM_LEASE_MS", Self::LEASE_MS),
            max_attempts: Self::env_u32("FLOWLOOM_MAX_ATTEMPTS", Self::MAX_ATTEMPTS),
            backoff_base_ms: Self::env_i64("FLOWLOOM_BACKOFF_BASE_MS", Self::BACKOFF_BASE_MS),
            poll_floor_ms: Self::env_i64("FLOWLOOM_POLL_FLOOR_MS", Self::POLL_FLOOR_MS),
            poll_ceiling_ms: Self::env_i64("FLOWLOOM_POLL_CEILING_MS", Self::POLL_CEILING_MS),
            idle_sleep_ms: Self::env_i64("FLOWLOOM_IDLE_SLEEP_MS", Self::IDLE_SLEEP_MS),
            jitter_max_ms: Self::env_i64("FLOWLOOM_JITTER_MAX_MS", Self::JITTER_MAX_MS),
            worker_id: std::env::var("FLOWLOOM_WORKER_ID").unwrap_or_else(|_| Self::generate_worker_id()),
        }
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lease_ms: Self::LEASE_MS,
            max_attempts: Self::MAX_ATTEMPTS,
            backoff_base_ms: Self::BACKOFF_BASE_MS,
            poll_floor_ms: Self::POLL_FLOOR_MS,
            poll_ceiling_ms: Self::POLL_CEILING_MS,
            idle_sleep_ms: Self::IDLE_SLEEP_MS,
            jitter_max_ms: Self::JITTER_MAX_MS,
            worker_id: Self::generate_worker_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.lease_ms, 30_000);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.backoff_base_ms, 1_000);
    }

    #[test]
    fn worker_id_can_be_overridden() {
        let cfg = RunnerConfig::default().with_worker_id("fixed-id");
        assert_eq!(cfg.worker_id, "fixed-id");
    }
}

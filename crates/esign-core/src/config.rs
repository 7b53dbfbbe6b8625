//! Engine configuration

use std::time::Duration;

/// Tunables for the signature engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest batch accepted by `create_batch` (unbounded when `None`)
    pub max_signers_per_batch: Option<usize>,

    /// Cap on active requests per document (unbounded when `None`)
    pub max_active_signers_per_document: Option<usize>,

    /// Concurrent provider dispatches within one batch
    pub dispatch_concurrency: usize,

    /// Time between expiration sweeps
    pub sweep_interval: Duration,

    /// Most requests a single sweep will expire
    pub sweep_batch_limit: usize,

    /// Wall-clock budget for one sweep
    pub sweep_timeout: Duration,

    /// Compare-and-swap retries before giving up on a contended request
    pub transition_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_signers_per_batch: None,
            max_active_signers_per_document: None,
            dispatch_concurrency: 4,
            sweep_interval: Duration::from_secs(60),
            sweep_batch_limit: 500,
            sweep_timeout: Duration::from_secs(30),
            transition_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables
    ///
    /// - `ESIGN_MAX_SIGNERS_PER_BATCH`
    /// - `ESIGN_MAX_ACTIVE_SIGNERS_PER_DOCUMENT`
    /// - `ESIGN_DISPATCH_CONCURRENCY`
    /// - `ESIGN_SWEEP_INTERVAL_SECS`
    /// - `ESIGN_SWEEP_BATCH_LIMIT`
    /// - `ESIGN_SWEEP_TIMEOUT_SECS`
    /// - `ESIGN_TRANSITION_RETRIES`
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            max_signers_per_batch: parse("ESIGN_MAX_SIGNERS_PER_BATCH")
                .map(|v| v as usize)
                .filter(|&v| v > 0),
            max_active_signers_per_document: parse("ESIGN_MAX_ACTIVE_SIGNERS_PER_DOCUMENT")
                .map(|v| v as usize)
                .filter(|&v| v > 0),
            dispatch_concurrency: parse("ESIGN_DISPATCH_CONCURRENCY")
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.dispatch_concurrency),
            sweep_interval: parse("ESIGN_SWEEP_INTERVAL_SECS")
                .filter(|&v| v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_batch_limit: parse("ESIGN_SWEEP_BATCH_LIMIT")
                .map(|v| v as usize)
                .unwrap_or(defaults.sweep_batch_limit),
            sweep_timeout: parse("ESIGN_SWEEP_TIMEOUT_SECS")
                .filter(|&v| v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_timeout),
            transition_retries: parse("ESIGN_TRANSITION_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.transition_retries),
        }
    }
}

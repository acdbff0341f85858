//! Pipeline runtime configuration.
//!
//! Every field has a default so a partial configuration file (or none at all)
//! yields a usable [`PipelineConfig`]. Loading from files and environment lives
//! in the CLI; this module only defines the shape and its validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GateConfig, PipelineError, RouterConfig};

/// Tunables for the executor, the gates and the model router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retries after the first failed attempt of a stage (or lesson).
    pub max_retries: u32,
    /// Base back-off; attempt `n` waits `backoff_base_ms × 2^n`.
    pub backoff_base_ms: u64,
    /// Upper bound on any single back-off, so a raised `max_retries` cannot
    /// produce hour-long waits. The default (60 s) sits above every delay of
    /// the default schedule (1, 2, 4, 8 s), which therefore stays purely
    /// exponential.
    pub backoff_max_ms: u64,
    /// Per-call timeout for model invocations.
    pub call_timeout_secs: u64,
    /// Whole-job timeout; reaching it forces FAILED.
    pub job_timeout_secs: u64,
    /// Worker pool size for lesson authoring.
    pub lesson_concurrency: usize,
    /// How often a running job checks the store for a cancellation request
    /// made by another process.
    pub cancel_poll_ms: u64,
    pub gates: GateConfig,
    pub router: RouterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            call_timeout_secs: 300,
            job_timeout_secs: 30 * 60,
            lesson_concurrency: 3,
            cancel_poll_ms: 1_000,
            gates: GateConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    /// Delay before the retry that follows failed attempt `attempt` (zero-based):
    /// `backoff_base_ms × 2^attempt`, capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(millis)
    }

    /// Rejects configurations the executor cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |message: &str| {
            Err(PipelineError::Configuration {
                message: message.to_owned(),
            })
        };
        if self.lesson_concurrency == 0 {
            return fail("lesson_concurrency must be at least 1");
        }
        if self.call_timeout_secs == 0 || self.job_timeout_secs == 0 {
            return fail("timeouts must be positive");
        }
        if self.cancel_poll_ms == 0 {
            return fail("cancel_poll_ms must be positive");
        }
        let g = &self.gates;
        if g.min_modules > g.max_modules
            || g.min_lessons_per_module > g.max_lessons_per_module
            || g.min_objectives > g.max_objectives
            || g.min_duration_minutes > g.max_duration_minutes
        {
            return fail("gate lower bounds must not exceed upper bounds");
        }
        if !(0.0..=100.0).contains(&g.qa_min_score) {
            return fail("qa_min_score must be within [0, 100]");
        }
        for spec in [&self.router.premium, &self.router.standard] {
            if spec.model.as_str().trim().is_empty() {
                return fail("model identifiers must not be blank");
            }
            if !(spec.cost_per_call.is_finite() && spec.cost_per_call >= 0.0) {
                return fail("cost_per_call must be a non-negative number");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.lesson_concurrency, 3);
        assert_eq!(config.call_timeout(), Duration::from_secs(300));
        assert_eq!(config.job_timeout(), Duration::from_secs(1800));
        assert_eq!(config.gates.qa_min_score, 60.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_schedule_is_uncapped_for_every_default_retry() {
        let config = PipelineConfig::default();
        let delays: Vec<Duration> = (0..=config.max_retries).map(|a| config.backoff(a)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
        assert!(config.backoff(config.max_retries) < Duration::from_millis(config.backoff_max_ms));
    }

    #[test]
    fn zero_cancel_poll_is_rejected() {
        let config = PipelineConfig {
            cancel_poll_ms: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PipelineConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 500,
            ..PipelineConfig::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(3), Duration::from_millis(500));
        assert_eq!(config.backoff(70), Duration::from_millis(500));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_retries": 1, "gates": {"qa_min_score": 75.0}}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.gates.qa_min_score, 75.0);
        assert_eq!(config.gates.min_modules, 3);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = PipelineConfig::default();
        config.gates.min_modules = 20;
        assert!(config.validate().is_err());
    }
}

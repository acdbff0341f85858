//! Layered configuration.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `.courseforge/config.toml`, or the file named by `--config`
//! 3. `ANTHROPIC_API_KEY` (for `llm.api_key` only)
//! 4. `COURSEFORGE_*` environment variables, `__` separating sections
//!    (`COURSEFORGE_PIPELINE__MAX_RETRIES=5` sets `pipeline.max_retries`)

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use llm::HttpLlmConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = ".courseforge/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub llm: HttpLlmConfig,
    /// Process-wide cap on model calls in flight, across all jobs.
    pub max_outstanding_calls: usize,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            llm: HttpLlmConfig::default(),
            max_outstanding_calls: 8,
            store: StoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per job.
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".courseforge/jobs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// `EnvFilter` directives; `COURSEFORGE_LOG` wins when set.
    pub log_filter: String,
    /// OTLP/gRPC collector; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: "info".into(),
            otlp_endpoint: None,
            service_name: "courseforge".into(),
        }
    }
}

impl CliConfig {
    /// The provider chain, without extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(
                Env::raw()
                    .only(&["ANTHROPIC_API_KEY", "OTEL_EXPORTER_OTLP_ENDPOINT"])
                    .map(|key| {
                        if key == "ANTHROPIC_API_KEY" {
                            "llm.api_key".into()
                        } else {
                            "telemetry.otlp_endpoint".into()
                        }
                    }),
            )
            .merge(Env::prefixed("COURSEFORGE_").split("__"))
    }

    /// Loads and validates configuration.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            anyhow::ensure!(path.exists(), "config file {} does not exist", path.display());
        }
        let config: Self = Self::figment(path)
            .extract()
            .context("failed to load configuration")?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

//! SPDX-License-Identifier: GPL-3.0-or-later

//! Declarative pipeline configuration, loaded from a TOML file and
//! passed into the Coordinator as a single value rather than read from
//! module-scope environment state.

use crate::error::PipelineError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sampling rates the pipeline accepts, in frames per second.
pub const ALLOWED_SAMPLING_RATES: [u32; 4] = [1, 3, 5, 10];

fn default_concurrency() -> usize {
    4
}

fn default_retry_initial_backoff_ms() -> u64 {
    1000
}

fn default_retry_factor() -> u32 {
    2
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_circuit_breaker_threshold() -> u32 {
    10
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_total_deadline_secs() -> u64 {
    1800
}

fn default_partial_cycle_threshold_secs() -> f64 {
    3.0
}

fn default_complete_cycle_threshold_secs() -> f64 {
    5.0
}

fn default_resample_confidence_threshold() -> f32 {
    0.6
}

fn default_max_frame_dimension() -> u32 {
    1024
}

fn default_vision_template() -> String {
    "vision_system_prompt".to_string()
}

fn default_narrative_template() -> String {
    "narrative_system_prompt".to_string()
}

fn default_report_template() -> String {
    "cycle_report".to_string()
}

fn default_telemetry_dir() -> PathBuf {
    PathBuf::from("./telemetry")
}

/// Retry/backoff parameters shared by the external vision and narrative
/// text clients.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            factor: default_retry_factor(),
            max_attempts: default_retry_max_attempts(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Identifiers and sampling parameters for the external vision model.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionModelConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Identifiers and sampling parameters for the optional narrative
/// text-generation model.
#[derive(Debug, Clone, Deserialize)]
pub struct NarrativeModelConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// The single configuration object passed into the Coordinator, covering
/// every tunable a run needs: sampling, concurrency, model identifiers,
/// retry and timeout parameters, and template selection.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Frames per second to sample; must be one of [`ALLOWED_SAMPLING_RATES`].
    pub sampling_rate: u32,
    /// Optional cap on the number of frames extracted; `None` = unbounded.
    #[serde(default)]
    pub max_frames: Option<u64>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_frame_dimension")]
    pub max_frame_dimension: u32,

    pub vision_model: VisionModelConfig,
    #[serde(default)]
    pub narrative_model: Option<NarrativeModelConfig>,
    /// When true, ReportGenerator attempts narrative mode before falling
    /// back to deterministic rendering.
    #[serde(default)]
    pub narrative_mode: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_resample_confidence_threshold")]
    pub resample_confidence_threshold: f32,

    /// Cycle completeness thresholds, exposed as configuration rather
    /// than hard-coded constants so they can be retuned without a
    /// rebuild.
    #[serde(default = "default_partial_cycle_threshold_secs")]
    pub partial_cycle_threshold_secs: f64,
    #[serde(default = "default_complete_cycle_threshold_secs")]
    pub complete_cycle_threshold_secs: f64,

    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_total_deadline_secs")]
    pub total_deadline_secs: u64,

    #[serde(default = "default_telemetry_dir")]
    pub telemetry_dir: PathBuf,

    #[serde(default = "default_vision_template")]
    pub vision_prompt_template: String,
    #[serde(default = "default_narrative_template")]
    pub narrative_prompt_template: String,
    #[serde(default = "default_report_template")]
    pub report_template: String,
}

impl PipelineConfig {
    /// Parses a `PipelineConfig` from a TOML document, then validates it.
    pub fn from_toml_str(source_id: &str, text: &str) -> Result<Self, PipelineError> {
        let cfg: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::config_invalid(source_id, e))?;
        cfg.validate(source_id)?;
        Ok(cfg)
    }

    pub fn from_toml_file(source_id: &str, path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config_invalid(source_id, e))?;
        Self::from_toml_str(source_id, &text)
    }

    fn validate(&self, source_id: &str) -> Result<(), PipelineError> {
        if !ALLOWED_SAMPLING_RATES.contains(&self.sampling_rate) {
            return Err(PipelineError::config_invalid(
                source_id,
                format!(
                    "sampling_rate must be one of {:?}, got {}",
                    ALLOWED_SAMPLING_RATES, self.sampling_rate
                ),
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config_invalid(
                source_id,
                "concurrency must be >= 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::config_invalid(
                source_id,
                "retry.max_attempts must be >= 1",
            ));
        }
        if self.partial_cycle_threshold_secs < 0.0 || self.complete_cycle_threshold_secs < 0.0 {
            return Err(PipelineError::config_invalid(
                source_id,
                "cycle thresholds must be non-negative",
            ));
        }
        if self.narrative_mode && self.narrative_model.is_none() {
            return Err(PipelineError::config_invalid(
                source_id,
                "narrative_mode requires narrative_model to be configured",
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn total_deadline(&self) -> Duration {
        Duration::from_secs(self.total_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        sampling_rate = 3

        [vision_model]
        model = "vision-mini-2"
        endpoint = "https://models.example.com/v1/vision"
        "#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg = PipelineConfig::from_toml_str("B1", minimal_toml()).unwrap();
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.partial_cycle_threshold_secs, 3.0);
        assert_eq!(cfg.complete_cycle_threshold_secs, 5.0);
        assert!(!cfg.narrative_mode);
    }

    #[test]
    fn invalid_sampling_rate_is_rejected() {
        let toml = r#"
        sampling_rate = 7

        [vision_model]
        model = "vision-mini-2"
        endpoint = "https://models.example.com/v1/vision"
        "#;
        let err = PipelineConfig::from_toml_str("B1", toml).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid { .. }));
    }

    #[test]
    fn narrative_mode_without_model_is_rejected() {
        let toml = r#"
        sampling_rate = 3
        narrative_mode = true

        [vision_model]
        model = "vision-mini-2"
        endpoint = "https://models.example.com/v1/vision"
        "#;
        let err = PipelineConfig::from_toml_str("B1", toml).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid { .. }));
    }
}

//! SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy for the excavator cycle pipeline.
//!
//! Hard failures short-circuit the Coordinator and are returned as
//! [`PipelineError`]; soft failures are recovered inside the producing
//! stage and never surface here (see module docs on each stage).

use thiserror::Error;

/// Maximum length, in bytes, of an underlying cause message embedded in a
/// [`PipelineError`]. Longer causes are truncated at a UTF-8 boundary.
const MAX_CAUSE_LEN: usize = 500;

fn truncate_cause(cause: impl std::fmt::Display) -> String {
    let s = cause.to_string();
    if s.len() <= MAX_CAUSE_LEN {
        return s;
    }
    let mut end = MAX_CAUSE_LEN;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// The stage that raised a hard failure, used to annotate [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    FrameExtractor,
    FrameClassifier,
    ActionDetector,
    CycleAssembler,
    TelemetryEnricher,
    ReportGenerator,
    Coordinator,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageName::FrameExtractor => "frame_extractor",
            StageName::FrameClassifier => "frame_classifier",
            StageName::ActionDetector => "action_detector",
            StageName::CycleAssembler => "cycle_assembler",
            StageName::TelemetryEnricher => "telemetry_enricher",
            StageName::ReportGenerator => "report_generator",
            StageName::Coordinator => "coordinator",
        };
        write!(f, "{s}")
    }
}

/// Hard failures that abort the pipeline and surface as the Coordinator's
/// returned error. Every variant carries the stage that raised it, the
/// source identifier, and a cause message truncated to 500 characters.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration invalid (source={source_id}): {cause}")]
    ConfigInvalid { source_id: String, cause: String },

    #[error("source unavailable (stage={stage}, source={source_id}): {cause}")]
    SourceUnavailable {
        stage: StageName,
        source_id: String,
        cause: String,
    },

    #[error("decode failed (stage={stage}, source={source_id}): {cause}")]
    DecodeFailed {
        stage: StageName,
        source_id: String,
        cause: String,
    },

    #[error("no frames extracted (source={source_id})")]
    NoFramesExtracted { source_id: String },

    #[error("prompt template missing (stage={stage}, source={source_id}): {cause}")]
    PromptTemplateMissing {
        stage: StageName,
        source_id: String,
        cause: String,
    },

    #[error("classifier unavailable (source={source_id}): {cause}")]
    ClassifierUnavailable { source_id: String, cause: String },

    #[error("stage timeout (stage={stage}, source={source_id})")]
    StageTimeout {
        stage: StageName,
        source_id: String,
    },

    #[error("report template missing (source={source_id}): {cause}")]
    TemplateMissing { source_id: String, cause: String },

    #[error("report render failed (source={source_id}): {cause}")]
    RenderFailed { source_id: String, cause: String },

    #[error("pipeline cancelled (source={source_id})")]
    Cancelled { source_id: String },

    #[error("internal error (stage={stage}, source={source_id}): {cause}")]
    Internal {
        stage: StageName,
        source_id: String,
        cause: String,
    },
}

impl PipelineError {
    pub fn source_unavailable(stage: StageName, source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            stage,
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn decode_failed(stage: StageName, source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::DecodeFailed {
            stage,
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn prompt_template_missing(
        stage: StageName,
        source_id: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::PromptTemplateMissing {
            stage,
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn classifier_unavailable(source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::ClassifierUnavailable {
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn internal(stage: StageName, source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Internal {
            stage,
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn config_invalid(source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::ConfigInvalid {
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }

    pub fn render_failed(source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::RenderFailed {
            source_id: source_id.into(),
            cause: truncate_cause(cause),
        }
    }
}

/// Informational process exit codes. This crate exposes a library API
/// only; this mapping exists for downstream command-line binaries.
impl From<&PipelineError> for i32 {
    fn from(err: &PipelineError) -> i32 {
        match err {
            PipelineError::ConfigInvalid { .. } => 1,
            PipelineError::SourceUnavailable { .. } => 2,
            PipelineError::DecodeFailed { .. } | PipelineError::NoFramesExtracted { .. } => 2,
            PipelineError::ClassifierUnavailable { .. } => 3,
            PipelineError::StageTimeout { .. } => 4,
            PipelineError::Cancelled { .. } => 5,
            PipelineError::PromptTemplateMissing { .. }
            | PipelineError::TemplateMissing { .. }
            | PipelineError::RenderFailed { .. }
            | PipelineError::Internal { .. } => 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_under_limit_is_untouched() {
        let e = PipelineError::internal(StageName::Coordinator, "B6", "short cause");
        match e {
            PipelineError::Internal { cause, .. } => assert_eq!(cause, "short cause"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn cause_over_limit_is_truncated() {
        let long = "x".repeat(600);
        let e = PipelineError::internal(StageName::Coordinator, "B6", long);
        match e {
            PipelineError::Internal { cause, .. } => {
                assert!(cause.chars().count() <= MAX_CAUSE_LEN + 1);
                assert!(cause.ends_with('…'));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn exit_codes_map_to_documented_values() {
        let e = PipelineError::classifier_unavailable("B6", "circuit open");
        assert_eq!(i32::from(&e), 3);
        let e = PipelineError::Cancelled { source_id: "B6".into() };
        assert_eq!(i32::from(&e), 5);
    }
}

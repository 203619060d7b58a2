//! SPDX-License-Identifier: GPL-3.0-or-later

//! A multi-stage pipeline that turns excavator operation video into a
//! sequence of dig/swing/dump/return work cycles, aggregate statistics,
//! and a rendered report (see each submodule for the stage it implements).
//!
//! The public entry point is [`Coordinator`], built with [`build_coordinator`]
//! from a [`PipelineConfig`].

pub mod config;
pub mod error;
pub mod external;
pub mod logic;
pub mod templates;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, StageName};
pub use logic::coordinator::{CancellationSignal, Coordinator};
pub use types::{
    ActivityLabel, Classification, Completeness, Cycle, CycleStatistics, Event, EventKind, Frame,
    Mime, PipelineResult, ProgressEvent, ReportArtifact, RunId, StageStats, TelemetryRecord,
};

use external::text_client::TextClient;
use external::vision_client::VisionClient;

/// Builds a [`Coordinator`] from a validated [`PipelineConfig`], loading
/// the configured prompt templates and constructing the external model
/// clients.
pub fn build_coordinator(config: PipelineConfig, source_id: &str) -> Result<Coordinator, PipelineError> {
    let vision_prompt = templates::load_prompt(
        &config.vision_prompt_template,
        StageName::FrameClassifier,
        source_id,
    )?;
    let vision_client = VisionClient::new(config.vision_model.clone(), vision_prompt)
        .map_err(|e| PipelineError::classifier_unavailable(source_id, e))?;

    let text_client = match &config.narrative_model {
        Some(narrative_cfg) if config.narrative_mode => {
            let narrative_prompt = templates::load_prompt(
                &config.narrative_prompt_template,
                StageName::ReportGenerator,
                source_id,
            )?;
            Some(
                TextClient::new(narrative_cfg.clone(), narrative_prompt)
                    .map_err(|e| PipelineError::render_failed(source_id, e))?,
            )
        }
        _ => None,
    };

    Ok(Coordinator::new(config, vision_client, text_client))
}

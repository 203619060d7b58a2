//! SPDX-License-Identifier: GPL-3.0-or-later

//! Sequences the six stages, carries shared context, enforces timeouts,
//! surfaces progress, and assembles the final [`PipelineResult`]. A
//! typed, statically-composed call chain rather than a dynamic stage
//! list, since the stage graph is fixed end-to-end. Per-stage timing and
//! fault counts are recorded into a `StageStats` map and surfaced on
//! [`PipelineResult`] for diagnostics.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageName};
use crate::external::text_client::TextClient;
use crate::external::vision_client::VisionClient;
use crate::logic::{action_detector, cycle_assembler, frame_classifier, frame_extractor, report_generator, telemetry_enricher};
use crate::types::{PipelineResult, ProgressEvent, RunId, StageStats};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage progress weights on the Coordinator's normalized 0-100% scale:
/// FrameExtractor, FrameClassifier, ActionDetector, CycleAssembler,
/// TelemetryEnricher, ReportGenerator.
const STAGE_WEIGHTS: [(StageName, f32); 6] = [
    (StageName::FrameExtractor, 10.0),
    (StageName::FrameClassifier, 25.0),
    (StageName::ActionDetector, 5.0),
    (StageName::CycleAssembler, 20.0),
    (StageName::TelemetryEnricher, 10.0),
    (StageName::ReportGenerator, 30.0),
]
;

fn weight_for(stage: StageName) -> f32 {
    STAGE_WEIGHTS
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

fn cumulative_weight_before(stage: StageName) -> f32 {
    STAGE_WEIGHTS
        .iter()
        .take_while(|(s, _)| *s != stage)
        .map(|(_, w)| w)
        .sum()
}

/// A cooperative cancellation signal checked between stages and at each
/// suspension point within a stage. A plain atomic flag rather than a
/// cancellation-token crate.
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        CancellationSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Immutable per-run context; the mutable progress callback and
/// cancellation signal are threaded separately.
pub struct Coordinator {
    config: PipelineConfig,
    vision_client: Arc<VisionClient>,
    text_client: Option<Arc<TextClient>>,
}

impl Coordinator {
    pub fn new(
        config: PipelineConfig,
        vision_client: VisionClient,
        text_client: Option<TextClient>,
    ) -> Self {
        Coordinator {
            config,
            vision_client: Arc::new(vision_client),
            text_client: text_client.map(Arc::new),
        }
    }

    /// Runs the full pipeline over `source_path`, strictly 1 -> 6: no
    /// stage starts until its predecessor's output is fully available.
    pub async fn run(
        &self,
        source_path: &Path,
        mut on_progress: impl FnMut(ProgressEvent) + Send,
        cancel: CancellationSignal,
    ) -> Result<PipelineResult, PipelineError> {
        let run_id = RunId::new();
        let source_id = telemetry_enricher::source_identifier(source_path);
        tracing::info!(run_id = %run_id, source_id = %source_id, "starting pipeline run");

        let deadline = Instant::now() + self.config.total_deadline();
        let mut stage_stats: HashMap<String, StageStats> = HashMap::new();

        macro_rules! check_budget {
            ($stage:expr) => {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled {
                        source_id: source_id.clone(),
                    });
                }
                if Instant::now() >= deadline {
                    return Err(PipelineError::StageTimeout {
                        stage: $stage,
                        source_id: source_id.clone(),
                    });
                }
            };
        }

        // Stage 1: FrameExtractor. Decoding is blocking I/O; run on a
        // dedicated blocking thread and apply the stage's soft timeout.
        check_budget!(StageName::Coordinator);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::FrameExtractor);
        let weight = weight_for(StageName::FrameExtractor);
        let cfg1 = self.config.clone();
        let source_path_owned = source_path.to_path_buf();
        let source_id_for_blocking = source_id.clone();
        let source_id_for_err = source_id.clone();
        let frames = run_with_timeout(self.config.stage_timeout(), StageName::FrameExtractor, &source_id, async move {
            let joined = tokio::task::spawn_blocking(move || {
                frame_extractor::extract_frames(&source_path_owned, &cfg1, &source_id_for_blocking, |_e| {})
            })
            .await
            .map_err(|e| PipelineError::internal(StageName::FrameExtractor, &source_id_for_err, e))?;
            joined
        })
        .await?;
        record_stage(&mut stage_stats, "frame_extractor", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::FrameExtractor,
            overall_percent: weight_base + weight,
            detail: format!("extracted {} frames", frames.len()),
        });

        // Stage 2: FrameClassifier.
        check_budget!(StageName::FrameClassifier);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::FrameClassifier);
        let weight = weight_for(StageName::FrameClassifier);
        let classifications = run_with_timeout(
            self.config.stage_timeout(),
            StageName::FrameClassifier,
            &source_id,
            frame_classifier::classify(&frames, Arc::clone(&self.vision_client), &self.config, &source_id, &cancel),
        )
        .await?;
        record_stage(&mut stage_stats, "frame_classifier", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::FrameClassifier,
            overall_percent: weight_base + weight,
            detail: format!("classified {} frames", classifications.len()),
        });
        let total_frames_extracted = frames.len() as u64;
        drop(frames); // only classifications need to survive past this point

        // Stage 3: ActionDetector. Pure; cannot fail.
        check_budget!(StageName::ActionDetector);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::ActionDetector);
        let weight = weight_for(StageName::ActionDetector);
        let events = action_detector::detect_events(&classifications);
        record_stage(&mut stage_stats, "action_detector", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::ActionDetector,
            overall_percent: weight_base + weight,
            detail: format!("detected {} events", events.len()),
        });
        let events_count = events.len();

        // Stage 4: CycleAssembler. Pure; cannot hard-fail.
        check_budget!(StageName::CycleAssembler);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::CycleAssembler);
        let weight = weight_for(StageName::CycleAssembler);
        let cycles = cycle_assembler::assemble_cycles(
            &events,
            self.config.partial_cycle_threshold_secs,
            self.config.complete_cycle_threshold_secs,
        );
        let statistics = cycle_assembler::compute_statistics(&cycles);
        record_stage(&mut stage_stats, "cycle_assembler", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::CycleAssembler,
            overall_percent: weight_base + weight,
            detail: format!("assembled {} cycles", cycles.len()),
        });

        // Stage 5: TelemetryEnricher. Blocking file I/O.
        check_budget!(StageName::TelemetryEnricher);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::TelemetryEnricher);
        let weight = weight_for(StageName::TelemetryEnricher);
        let telemetry_dir = self.config.telemetry_dir.clone();
        let source_id_for_telemetry = source_id.clone();
        let telemetry = run_with_timeout(
            self.config.stage_timeout(),
            StageName::TelemetryEnricher,
            &source_id,
            async move {
                Ok(tokio::task::spawn_blocking(move || {
                    telemetry_enricher::enrich(&telemetry_dir, &source_id_for_telemetry)
                })
                .await
                .unwrap_or_else(|_| crate::types::TelemetryRecord::not_found()))
            },
        )
        .await?;
        record_stage(&mut stage_stats, "telemetry_enricher", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::TelemetryEnricher,
            overall_percent: weight_base + weight,
            detail: format!("telemetry found: {}", telemetry.found),
        });

        // Stage 6: ReportGenerator.
        check_budget!(StageName::ReportGenerator);
        let stage_started = Instant::now();
        let weight_base = cumulative_weight_before(StageName::ReportGenerator);
        let weight = weight_for(StageName::ReportGenerator);
        let generated_at = chrono::Utc::now().to_rfc3339();
        let text_client_ref = self.text_client.as_deref();
        let report = run_with_timeout(
            self.config.stage_timeout(),
            StageName::ReportGenerator,
            &source_id,
            report_generator::generate_report(
                &source_id,
                &generated_at,
                &cycles,
                &statistics,
                &telemetry,
                &self.config,
                text_client_ref,
            ),
        )
        .await?;
        record_stage(&mut stage_stats, "report_generator", stage_started, false);
        on_progress(ProgressEvent {
            stage: StageName::ReportGenerator,
            overall_percent: weight_base + weight,
            detail: "report rendered".to_string(),
        });

        tracing::info!(run_id = %run_id, source_id = %source_id, "pipeline run complete");

        Ok(PipelineResult {
            source_id,
            total_frames_extracted,
            max_frames: self.config.max_frames,
            events_count,
            cycles,
            statistics,
            telemetry,
            report,
            stage_stats,
        })
    }
}

fn record_stage(stats: &mut HashMap<String, StageStats>, name: &str, started: Instant, faulted: bool) {
    let entry = stats.entry(name.to_string()).or_default();
    entry.calls += 1;
    if faulted {
        entry.faults += 1;
    }
    entry.last_latency_ms = Some(started.elapsed().as_millis().min(u32::MAX as u128) as u32);
}

async fn run_with_timeout<T>(
    timeout: Duration,
    stage: StageName,
    source_id: &str,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(PipelineError::StageTimeout {
            stage,
            source_id: source_id.to_string(),
        }),
    }
}

//! SPDX-License-Identifier: GPL-3.0-or-later

//! The pipeline's data model: Frame, ActivityLabel, Classification, Event,
//! Cycle, CycleStatistics, TelemetryRecord, PipelineResult and the small
//! supporting types the Coordinator threads between stages. Every record
//! here is a total, explicitly-typed constructor rather than an untyped
//! map passed between stages.

use crate::error::StageName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Correlates log lines and telemetry across one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A still-image encoding a [`Frame`]'s bytes are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

/// A decoded still image drawn from the source video. Immutable after
/// extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Monotonically increasing index, starting at 0.
    pub index: u64,
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// Encoded still-image bytes, resized to fit within the model-friendly
    /// bound (longest side <= 1024px).
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
}

/// A value from the fixed, finite activity vocabulary. Any other label a
/// classifier response names is coerced to `Idle` with a note (see
/// [`ActivityLabel::from_model_label`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLabel {
    Digging,
    SwingToDump,
    Dumping,
    SwingToDig,
    Idle,
}

impl ActivityLabel {
    /// Parses a label string as returned (or claimed to be returned) by the
    /// external vision model. Unknown values coerce to `Idle`; the caller
    /// is expected to attach a note documenting the coercion.
    pub fn from_model_label(raw: &str) -> Self {
        match raw {
            "digging" => ActivityLabel::Digging,
            "swing_to_dump" => ActivityLabel::SwingToDump,
            "dumping" => ActivityLabel::Dumping,
            "swing_to_dig" => ActivityLabel::SwingToDig,
            "idle" => ActivityLabel::Idle,
            _ => ActivityLabel::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Digging => "digging",
            ActivityLabel::SwingToDump => "swing_to_dump",
            ActivityLabel::Dumping => "dumping",
            ActivityLabel::SwingToDig => "swing_to_dig",
            ActivityLabel::Idle => "idle",
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pairing of a [`Frame`] with an [`ActivityLabel`] produced by stage 2.
/// Ordered by frame index; exactly one per Frame once the stage completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub frame_index: u64,
    pub timestamp: f64,
    pub label: ActivityLabel,
    /// In `[0, 1]`. A failed model call carries confidence 0.
    pub confidence: f32,
    pub note: Option<String>,
}

/// A state transition between two consecutive Classifications with
/// different labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DigStart,
    DigEnd,
    DumpStart,
    DumpEnd,
    ReturnToDig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Timestamp of the second (new-label) Classification in the pair.
    pub timestamp: f64,
    pub frame_index: u64,
    pub prev_label: ActivityLabel,
    pub new_label: ActivityLabel,
}

/// Whether a [`Cycle`] reached all four phases or only the dig phases
/// before being cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Partial,
}

/// One grouped unit of work: dig, swing to dump, dump, swing back to dig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-based, monotonically assigned in the order cycles are closed.
    pub number: u32,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub phase_dig: f64,
    pub phase_swing_to_dump: f64,
    pub phase_dump: f64,
    pub phase_return: f64,
    pub completeness: Completeness,
    pub note: Option<String>,
}

impl Cycle {
    /// Sum of the four phase durations; should approximate `duration`
    /// for any complete cycle.
    pub fn phase_sum(&self) -> f64 {
        self.phase_dig + self.phase_swing_to_dump + self.phase_dump + self.phase_return
    }
}

/// Aggregate statistics derived from a sequence of [`Cycle`]s.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CycleStatistics {
    pub count: usize,
    pub mean_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    /// Population standard deviation (divide by N); 0 if N <= 1.
    pub std_dev: f64,
    /// sum(cycle.duration) / count — pure work time per cycle.
    pub specific_average: f64,
    /// (last_cycle.end - first_cycle.start) / count — includes gaps.
    pub approximate_average: f64,
    /// approximate_average - specific_average; always >= 0.
    pub idle_per_cycle: f64,
}

impl CycleStatistics {
    /// Statistics for an empty cycle list: all zeroed.
    pub fn zeroed() -> Self {
        CycleStatistics {
            count: 0,
            mean_duration: 0.0,
            min_duration: 0.0,
            max_duration: 0.0,
            std_dev: 0.0,
            specific_average: 0.0,
            approximate_average: 0.0,
            idle_per_cycle: 0.0,
        }
    }
}

/// Optional external telemetry keyed by a derived identifier. Missing
/// telemetry never fails the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub fuel_burned_litres: f64,
    pub time_swinging_left_secs: f64,
    pub time_swinging_right_secs: f64,
    pub found: bool,
}

impl TelemetryRecord {
    pub fn not_found() -> Self {
        TelemetryRecord {
            fuel_burned_litres: 0.0,
            time_swinging_left_secs: 0.0,
            time_swinging_right_secs: 0.0,
            found: false,
        }
    }
}

/// The MIME type of a rendered [`ReportArtifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mime {
    TextMarkdown,
    TextHtml,
}

impl Mime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mime::TextMarkdown => "text/markdown",
            Mime::TextHtml => "text/html",
        }
    }
}

/// A rendered report: bytes plus a MIME type.
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub bytes: Vec<u8>,
    pub mime: Mime,
}

/// Per-stage call/fault/latency counters, surfaced on [`PipelineResult`]
/// for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageStats {
    pub calls: u64,
    pub faults: u64,
    pub last_latency_ms: Option<u32>,
}

/// A progress notification emitted by a stage. Best-effort: failures in
/// the receiving callback never abort the pipeline.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: StageName,
    /// Normalized 0.0-100.0 across the whole run, using the Coordinator's
    /// fixed stage weights (10/25/5/20/10/30).
    pub overall_percent: f32,
    pub detail: String,
}

/// Aggregates every stage's output plus run metadata. The single return
/// value of the Coordinator.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub source_id: String,
    pub total_frames_extracted: u64,
    pub max_frames: Option<u64>,
    pub events_count: usize,
    pub cycles: Vec<Cycle>,
    pub statistics: CycleStatistics,
    pub telemetry: TelemetryRecord,
    pub report: ReportArtifact,
    pub stage_stats: HashMap<String, StageStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_label_coerces_to_idle() {
        assert_eq!(ActivityLabel::from_model_label("bulldozing"), ActivityLabel::Idle);
        assert_eq!(ActivityLabel::from_model_label("digging"), ActivityLabel::Digging);
    }

    #[test]
    fn cycle_phase_sum() {
        let c = Cycle {
            number: 1,
            start: 0.0,
            end: 30.0,
            duration: 30.0,
            phase_dig: 8.0,
            phase_swing_to_dump: 10.0,
            phase_dump: 4.0,
            phase_return: 8.0,
            completeness: Completeness::Complete,
            note: None,
        };
        assert!((c.phase_sum() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn zeroed_statistics_are_all_zero() {
        let s = CycleStatistics::zeroed();
        assert_eq!(s.count, 0);
        assert_eq!(s.idle_per_cycle, 0.0);
    }
}

//! SPDX-License-Identifier: GPL-3.0-or-later

//! Stage 6: renders cycles, statistics, and telemetry into a report
//! artifact. Deterministic rendering is hand-assembled with
//! `std::fmt::Write` rather than a templating engine, which makes
//! byte-identical repeat output trivial to guarantee. Narrative mode is
//! a pure enhancement over the same deterministic data, falling back to
//! the deterministic render on any failure.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::external::retry::with_retry;
use crate::external::text_client::TextClient;
use crate::templates;
use crate::types::{Completeness, Cycle, CycleStatistics, Mime, ReportArtifact, TelemetryRecord};
use std::fmt::Write as _;

/// Substitutes the `{source_id}`/`{generated_at}` placeholders in a
/// loaded report header template.
fn render_header(template: &str, source_id: &str, generated_at: &str) -> String {
    template
        .replace("{source_id}", source_id)
        .replace("{generated_at}", generated_at)
}

/// Formats seconds-from-start as `MM:SS`, rounded to the nearest integer
/// second.
fn format_mm_ss(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Formats a duration in seconds with one decimal place.
fn format_duration(seconds: f64) -> String {
    format!("{seconds:.1}")
}

fn render_cycle_table_markdown(out: &mut String, cycles: &[Cycle]) {
    let _ = writeln!(out, "| Cycle | Start | End | Duration (s) | Status | Notes |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for c in cycles {
        let status = match c.completeness {
            Completeness::Complete => "complete",
            Completeness::Partial => "partial",
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            c.number,
            format_mm_ss(c.start),
            format_mm_ss(c.end),
            format_duration(c.duration),
            status,
            c.note.as_deref().unwrap_or("")
        );
    }
}

fn render_statistics_markdown(out: &mut String, stats: &CycleStatistics) {
    let _ = writeln!(out, "\n## Statistics\n");
    let _ = writeln!(out, "- Cycle count: {}", stats.count);
    let _ = writeln!(out, "- Mean duration: {} s", format_duration(stats.mean_duration));
    let _ = writeln!(out, "- Min duration: {} s", format_duration(stats.min_duration));
    let _ = writeln!(out, "- Max duration: {} s", format_duration(stats.max_duration));
    let _ = writeln!(out, "- Standard deviation: {} s", format_duration(stats.std_dev));
    let _ = writeln!(
        out,
        "- Specific average: {} s",
        format_duration(stats.specific_average)
    );
    let _ = writeln!(
        out,
        "- Approximate average: {} s",
        format_duration(stats.approximate_average)
    );
    let _ = writeln!(out, "- Idle per cycle: {} s", format_duration(stats.idle_per_cycle));
}

fn render_telemetry_markdown(out: &mut String, telemetry: &TelemetryRecord) {
    let _ = writeln!(out, "\n## Telemetry\n");
    if !telemetry.found {
        let _ = writeln!(out, "No matching telemetry was found for this source.");
        return;
    }
    let _ = writeln!(out, "- Fuel burned: {:.2} L", telemetry.fuel_burned_litres);
    let _ = writeln!(
        out,
        "- Time swinging left: {} s",
        format_duration(telemetry.time_swinging_left_secs)
    );
    let _ = writeln!(
        out,
        "- Time swinging right: {} s",
        format_duration(telemetry.time_swinging_right_secs)
    );
}

/// Renders the deterministic Markdown report. Byte-identical given
/// identical inputs.
pub fn render_deterministic_markdown(
    header: &str,
    cycles: &[Cycle],
    stats: &CycleStatistics,
    telemetry: &TelemetryRecord,
    narrative: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", header.trim_end());
    let _ = writeln!(out);

    render_cycle_table_markdown(&mut out, cycles);
    render_statistics_markdown(&mut out, stats);
    render_telemetry_markdown(&mut out, telemetry);

    if let Some(text) = narrative {
        let _ = writeln!(out, "\n## Narrative\n");
        let _ = writeln!(out, "{text}");
    }

    out
}

/// Composes the structured cycle payload sent to the narrative model.
fn structured_cycle_payload(
    source_id: &str,
    cycles: &[Cycle],
    stats: &CycleStatistics,
) -> serde_json::Value {
    serde_json::json!({
        "source_id": source_id,
        "cycles": cycles,
        "statistics": {
            "count": stats.count,
            "mean_duration": stats.mean_duration,
            "min_duration": stats.min_duration,
            "max_duration": stats.max_duration,
            "std_dev": stats.std_dev,
            "specific_average": stats.specific_average,
            "approximate_average": stats.approximate_average,
            "idle_per_cycle": stats.idle_per_cycle,
        },
    })
}

/// Renders the final report, optionally invoking the narrative model
/// first. Any narrative failure is recovered to deterministic mode with
/// a note appended, never propagated as a hard failure.
pub async fn generate_report(
    source_id: &str,
    generated_at: &str,
    cycles: &[Cycle],
    stats: &CycleStatistics,
    telemetry: &TelemetryRecord,
    cfg: &PipelineConfig,
    text_client: Option<&TextClient>,
) -> Result<ReportArtifact, PipelineError> {
    let header_template = templates::load_report_template(&cfg.report_template, source_id)?;
    let header = render_header(&header_template, source_id, generated_at);

    let mut narrative_note = None;
    let mut narrative_text = None;

    if cfg.narrative_mode {
        if let Some(client) = text_client {
            let payload = structured_cycle_payload(source_id, cycles, stats);
            let result = with_retry(&cfg.retry, || async {
                client.generate_narrative(payload.clone()).await
            })
            .await;
            match result {
                Ok(text) => narrative_text = Some(text),
                Err(e) => {
                    log::warn!("narrative mode failed, falling back to deterministic report: {e}");
                    narrative_note =
                        Some(format!("narrative mode unavailable, showing deterministic report ({e})"));
                }
            }
        } else {
            narrative_note = Some(
                "narrative mode requested but no narrative model was configured".to_string(),
            );
        }
    }

    let mut body = render_deterministic_markdown(
        &header,
        cycles,
        stats,
        telemetry,
        narrative_text.as_deref(),
    );
    if let Some(note) = narrative_note {
        let _ = writeln!(body, "\n_Note: {note}_");
    }

    Ok(ReportArtifact {
        bytes: body.into_bytes(),
        mime: Mime::TextMarkdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Completeness;

    fn sample_cycle(number: u32) -> Cycle {
        Cycle {
            number,
            start: 0.0,
            end: 30.0,
            duration: 30.0,
            phase_dig: 8.0,
            phase_swing_to_dump: 10.0,
            phase_dump: 4.0,
            phase_return: 8.0,
            completeness: Completeness::Complete,
            note: None,
        }
    }

    #[test]
    fn mm_ss_formatting() {
        assert_eq!(format_mm_ss(65.4), "01:05");
        assert_eq!(format_mm_ss(0.0), "00:00");
        assert_eq!(format_mm_ss(3599.6), "60:00");
    }

    #[test]
    fn deterministic_rendering_is_byte_identical_across_runs() {
        let cycles = vec![sample_cycle(1)];
        let stats = CycleStatistics {
            count: 1,
            mean_duration: 30.0,
            min_duration: 30.0,
            max_duration: 30.0,
            std_dev: 0.0,
            specific_average: 30.0,
            approximate_average: 30.0,
            idle_per_cycle: 0.0,
        };
        let telemetry = TelemetryRecord::not_found();
        let header = render_header(
            "# Excavator Cycle Report — {source_id}\n\nGenerated {generated_at}\n",
            "B6",
            "2026-01-01",
        );

        let a = render_deterministic_markdown(&header, &cycles, &stats, &telemetry, None);
        let b = render_deterministic_markdown(&header, &cycles, &stats, &telemetry, None);
        assert_eq!(a, b);
    }

    #[test]
    fn telemetry_block_reflects_found_values() {
        let mut out = String::new();
        let telemetry = TelemetryRecord {
            fuel_burned_litres: 1.41,
            time_swinging_left_secs: 44.0,
            time_swinging_right_secs: 43.0,
            found: true,
        };
        render_telemetry_markdown(&mut out, &telemetry);
        assert!(out.contains("1.41 L"));
        assert!(out.contains("44.0 s"));
        assert!(out.contains("43.0 s"));
    }
}

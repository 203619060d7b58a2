//! SPDX-License-Identifier: GPL-3.0-or-later

//! Stage 5: optionally attaches external telemetry read from a PDF keyed
//! by a derived source identifier. Never hard-fails — any file-access or
//! parse error is logged and downgrades to `found = false`.

use crate::types::TelemetryRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static FUEL_BURNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)fuel\s*burned[^0-9]{0,40}([0-9]+(?:\.[0-9]+)?)\s*l\b").unwrap()
});

static SWING_LEFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)time\s*spent\s*swinging\s*left[^0-9]{0,40}([0-9:]+(?:\.[0-9]+)?)\s*(sec(?:onds?)?)?")
        .unwrap()
});

static SWING_RIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)time\s*spent\s*swinging\s*right[^0-9]{0,40}([0-9:]+(?:\.[0-9]+)?)\s*(sec(?:onds?)?)?")
        .unwrap()
});

/// Parses a duration given either as plain seconds (optionally with a
/// trailing "sec"/"seconds") or as `HH:MM:SS`.
fn parse_duration_secs(raw: &str) -> Option<f64> {
    if raw.contains(':') {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return None;
        }
        let h: f64 = parts[0].trim().parse().ok()?;
        let m: f64 = parts[1].trim().parse().ok()?;
        let s: f64 = parts[2].trim().parse().ok()?;
        Some(h * 3600.0 + m * 60.0 + s)
    } else {
        raw.trim().parse().ok()
    }
}

/// Derives the telemetry-lookup identifier from a source path:
/// `B6.mp4` -> `B6`.
pub fn source_identifier(source_path: &Path) -> String {
    source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.to_string_lossy().into_owned())
}

/// Extracts a [`TelemetryRecord`] from `<dir>/<id>.pdf`, if present.
pub fn enrich(telemetry_dir: &Path, source_id: &str) -> TelemetryRecord {
    let pdf_path = telemetry_dir.join(format!("{source_id}.pdf"));
    if !pdf_path.exists() {
        return TelemetryRecord::not_found();
    }

    let text = match pdf_extract::extract_text(&pdf_path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("failed to extract telemetry text from {pdf_path:?}: {e}");
            return TelemetryRecord::not_found();
        }
    };

    parse_telemetry_text(&text)
}

/// Parses telemetry fields out of already-extracted PDF text. Split out
/// from [`enrich`] so the regex logic is testable without a PDF fixture.
pub fn parse_telemetry_text(text: &str) -> TelemetryRecord {
    let fuel = FUEL_BURNED
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let left = SWING_LEFT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_duration_secs(m.as_str()));

    let right = SWING_RIGHT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_duration_secs(m.as_str()));

    let found = fuel.is_some() || left.is_some() || right.is_some();

    TelemetryRecord {
        fuel_burned_litres: fuel.unwrap_or(0.0),
        time_swinging_left_secs: left.unwrap_or(0.0),
        time_swinging_right_secs: right.unwrap_or(0.0),
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn source_identifier_strips_extension() {
        assert_eq!(source_identifier(Path::new("/videos/B6.mp4")), "B6");
        assert_eq!(source_identifier(Path::new("B6.mp4")), "B6");
    }

    #[test]
    fn missing_file_returns_not_found() {
        let rec = enrich(Path::new("/nonexistent/telemetry/dir"), "B6");
        assert!(!rec.found);
        assert_eq!(rec.fuel_burned_litres, 0.0);
    }

    #[test]
    fn telemetry_present_with_all_fields() {
        let text =
            "Fuel Burned 1.41 L … Time Spent Swinging Left 44 sec … Time Spent Swinging Right 43 sec";
        let rec = parse_telemetry_text(text);
        assert!(rec.found);
        assert!((rec.fuel_burned_litres - 1.41).abs() < 1e-9);
        assert!((rec.time_swinging_left_secs - 44.0).abs() < 1e-9);
        assert!((rec.time_swinging_right_secs - 43.0).abs() < 1e-9);
    }

    #[test]
    fn telemetry_with_only_fuel_still_sets_found() {
        let text = "Fuel Burned 2.0 L";
        let rec = parse_telemetry_text(text);
        assert!(rec.found);
        assert_eq!(rec.time_swinging_left_secs, 0.0);
        assert_eq!(rec.time_swinging_right_secs, 0.0);
    }

    #[test]
    fn hh_mm_ss_durations_are_converted() {
        let text = "Time Spent Swinging Left 00:01:30";
        let rec = parse_telemetry_text(text);
        assert!((rec.time_swinging_left_secs - 90.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_is_not_found() {
        let rec = parse_telemetry_text("nothing relevant here");
        assert!(!rec.found);
    }

    #[test]
    fn enrich_with_real_tempdir_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let rec = enrich(&PathBuf::from(dir.path()), "B6");
        assert!(!rec.found);
    }
}

//! SPDX-License-Identifier: GPL-3.0-or-later

//! Embedded prompt and report templates, looked up by the identifiers
//! named in [`crate::config::PipelineConfig`] and loaded once at
//! classifier/report-generator construction time from a declarative
//! template store compiled into the binary.

use crate::error::{PipelineError, StageName};
use include_dir::{include_dir, Dir};

static PROMPTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates/prompts");
static REPORTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates/reports");

fn lookup(dir: &Dir<'_>, template_id: &str) -> Option<&'static str> {
    let file_name = format!("{template_id}.txt");
    dir.get_file(&file_name)
        .or_else(|| dir.get_file(format!("{template_id}.md")))
        .and_then(|f| f.contents_utf8())
}

/// Loads a prompt template by identifier.
pub fn load_prompt(template_id: &str, stage: StageName, source_id: &str) -> Result<String, PipelineError> {
    lookup(&PROMPTS, template_id)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            PipelineError::prompt_template_missing(
                stage,
                source_id,
                format!("no prompt template named {template_id:?}"),
            )
        })
}

/// Loads a report header template by identifier.
pub fn load_report_template(template_id: &str, source_id: &str) -> Result<String, PipelineError> {
    lookup(&REPORTS, template_id)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            PipelineError::TemplateMissing {
                source_id: source_id.to_string(),
                cause: format!("no report template named {template_id:?}"),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_prompt_loads() {
        let prompt = load_prompt("vision_system_prompt", StageName::FrameClassifier, "B6").unwrap();
        assert!(prompt.contains("digging"));
    }

    #[test]
    fn missing_prompt_is_reported() {
        let err = load_prompt("does_not_exist", StageName::FrameClassifier, "B6").unwrap_err();
        assert!(matches!(err, PipelineError::PromptTemplateMissing { .. }));
    }

    #[test]
    fn report_template_loads() {
        let tpl = load_report_template("cycle_report", "B6").unwrap();
        assert!(tpl.contains("Excavator Cycle Report"));
    }
}

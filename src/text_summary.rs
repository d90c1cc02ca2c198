//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for text mode.

use crate::model::{GenerationResult, Outcome};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use std::sync::OnceLock;
use time::{OffsetDateTime, UtcOffset};

/// Data URLs are long; show only the head.
const IMAGE_PREVIEW_CHARS: usize = 48;

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Record the local UTC offset. Call before the runtime spawns threads:
/// `time` refuses the lookup once the process is multi-threaded.
pub(crate) fn capture_local_offset() {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let _ = LOCAL_OFFSET.set(offset);
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary for a finished submit.
pub(crate) fn build_text_summary(outcome: &Outcome, attempts: u32) -> TextSummary {
    let mut lines = Vec::new();
    match outcome {
        Outcome::Success(result) => {
            lines.push(format!("Generated: {}", result.id));
            push_result_lines(&mut lines, result);
            if attempts > 1 {
                lines.push(format!("Attempts: {attempts}"));
            }
        }
        Outcome::Aborted => lines.push("Request aborted".to_string()),
        Outcome::Exhausted { message } => {
            lines.push(format!("Failed after {attempts} attempts: {message}"));
        }
        Outcome::Rejected { message } => lines.push(format!("Rejected: {message}")),
    }
    TextSummary { lines }
}

/// One block per history entry, most recent first.
pub(crate) fn build_history_summary(history: &[GenerationResult]) -> TextSummary {
    if history.is_empty() {
        return TextSummary {
            lines: vec!["No generations yet".to_string()],
        };
    }
    let mut lines = Vec::new();
    for (i, entry) in history.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.push(format!("[{}] {}", i + 1, entry.id));
        push_result_lines(&mut lines, entry);
    }
    TextSummary { lines }
}

fn push_result_lines(lines: &mut Vec<String>, result: &GenerationResult) {
    lines.push(format!("  Style:   {}", result.style));
    lines.push(format!("  Prompt:  {}", result.prompt));
    lines.push(format!("  Created: {}", format_created_at(&result.created_at)));
    lines.push(format!("  Image:   {}", preview(&result.image_url)));
}

/// Render an RFC 3339 timestamp at the offset captured on startup (UTC if none was).
fn format_created_at(raw: &str) -> String {
    let offset = LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC);
    format_at_offset(raw, offset)
}

/// Anything that is not RFC 3339 passes through unchanged.
fn format_at_offset(raw: &str, offset: UtcOffset) -> String {
    let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) else {
        return raw.to_string();
    };
    ts.to_offset(offset)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| raw.to_string())
}

fn preview(url: &str) -> String {
    if url.chars().count() <= IMAGE_PREVIEW_CHARS {
        return url.to_string();
    }
    let head: String = url.chars().take(IMAGE_PREVIEW_CHARS).collect();
    format!("{head}… ({} bytes)", url.len())
}

//! Post-submit processing utilities.
//!
//! Turns an [`Outcome`] into user notices, persists successes into history and runs exports.

use crate::cli::Cli;
use crate::model::{GenerationResult, Outcome, ABORTED_MESSAGE};
use crate::storage;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeLevel {
    Success,
    /// Requested by the user; shown, but not as an error.
    Neutral,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Result of post-submit processing, ready for presentation layers.
pub(crate) struct ProcessedOutcome {
    pub notices: Vec<Notice>,
    pub history: Vec<GenerationResult>,
    pub saved_path: Option<PathBuf>,
}

/// Process a finished submit: notices, history update (when `history_path` is set) and exports.
pub(crate) fn process_outcome(
    args: &Cli,
    history_path: Option<&Path>,
    outcome: &Outcome,
) -> ProcessedOutcome {
    let mut notices = Vec::new();
    let mut saved_path = None;
    let mut history = history_path.map(storage::load_history).unwrap_or_default();

    match outcome {
        Outcome::Success(result) => {
            notices.push(Notice::new(NoticeLevel::Success, "Generated"));
            if let Some(path) = history_path {
                match storage::record_success(path, result) {
                    Ok(updated) => {
                        history = updated;
                        saved_path = Some(path.to_path_buf());
                    }
                    Err(e) => {
                        storage::push_recent(&mut history, result.clone());
                        notices.push(Notice::new(
                            NoticeLevel::Error,
                            format!("Saving history failed: {e:#}"),
                        ));
                    }
                }
            } else {
                storage::push_recent(&mut history, result.clone());
            }
            if let Some(export_path) = args.export_json.as_deref() {
                match storage::export_json(export_path, result) {
                    Ok(()) => notices.push(Notice::new(
                        NoticeLevel::Success,
                        format!("Exported JSON: {}", export_path.display()),
                    )),
                    Err(e) => notices.push(Notice::new(
                        NoticeLevel::Error,
                        format!("Export JSON failed: {e:#}"),
                    )),
                }
            }
        }
        Outcome::Aborted => notices.push(Notice::new(NoticeLevel::Neutral, ABORTED_MESSAGE)),
        Outcome::Exhausted { message } | Outcome::Rejected { message } => {
            notices.push(Notice::new(NoticeLevel::Error, message.clone()))
        }
    }

    ProcessedOutcome {
        notices,
        history,
        saved_path,
    }
}

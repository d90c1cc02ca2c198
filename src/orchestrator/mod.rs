//! Application-level orchestration utilities.
//!
//! This module owns the request lifecycle (issue/retry/cancel) and post-submit processing
//! such as history updates, exports and user notices. UI/CLI layers call into this module
//! to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, RequestController, UiCommand};
pub(crate) use post_process::{process_outcome, NoticeLevel};

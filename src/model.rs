use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Resolved settings for one studio invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    pub base_url: String,
    pub user_agent: String,
    pub retry: RetryPolicy,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    pub auto_save: bool,
}

/// Bounded exponential backoff without jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay inserted after a failed `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Style {
    #[default]
    Editorial,
    Streetwear,
    Vintage,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Editorial, Style::Streetwear, Style::Vintage];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Editorial => "Editorial",
            Style::Streetwear => "Streetwear",
            Style::Vintage => "Vintage",
        }
    }

    /// Parse a stored style label, ignoring case.
    pub fn from_label(label: &str) -> Option<Style> {
        Style::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the generation POST. Immutable once handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub image_data_url: String,
    pub prompt: String,
    pub style: Style,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub id: String,
    pub image_url: String,
    pub prompt: String,
    pub style: String,
    pub created_at: String,
}

/// How a failed attempt affects the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    ClientAbort,
    NonRetryable,
    Retryable,
}

/// Terminal result of one `submit` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success(GenerationResult),
    Aborted,
    Exhausted { message: String },
    Rejected { message: String },
}

pub const ABORTED_MESSAGE: &str = "Request aborted";
pub const FALLBACK_FAILURE_MESSAGE: &str = "Failed to generate";

impl Outcome {
    pub fn exhausted(message: impl Into<String>) -> Self {
        Outcome::Exhausted {
            message: non_empty_or_fallback(message.into()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Outcome::Rejected {
            message: non_empty_or_fallback(message.into()),
        }
    }

    /// Value the controller exposes as `last_error` after this outcome.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Aborted => Some(ABORTED_MESSAGE.to_string()),
            Outcome::Exhausted { message } | Outcome::Rejected { message } => {
                Some(message.clone())
            }
        }
    }

    /// Whether the outcome should be shown as an application error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Exhausted { .. } | Outcome::Rejected { .. })
    }
}

fn non_empty_or_fallback(message: String) -> String {
    if message.trim().is_empty() {
        FALLBACK_FAILURE_MESSAGE.to_string()
    } else {
        message
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StudioEvent {
    AttemptStarted {
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFailed {
        attempt: u32,
        class: FailureClass,
        message: String,
    },
    BackoffStarted {
        attempt: u32,
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    Info(InfoEvent),
    Completed {
        outcome: Box<Outcome>,
    },
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Cancelling,
    NothingToAbort,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Cancelling => "Cancelling…".to_string(),
            InfoEvent::NothingToAbort => "Abort requested, but no request is in flight".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            max_attempts: 100,
            backoff_base: Duration::from_secs(u64::MAX / 2),
        };
        assert_eq!(policy.backoff(64), Duration::MAX);
    }

    #[test]
    fn request_uses_camel_case_wire_names() {
        let req = GenerationRequest {
            image_data_url: "data:image/png;base64,AAAA".into(),
            prompt: "red jacket".into(),
            style: Style::Streetwear,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["imageDataUrl"], "data:image/png;base64,AAAA");
        assert_eq!(v["style"], "Streetwear");
    }

    #[test]
    fn result_requires_every_field() {
        let missing = r#"{"id":"1","imageUrl":"u","prompt":"p","style":"Vintage"}"#;
        assert!(serde_json::from_str::<GenerationResult>(missing).is_err());
    }

    #[test]
    fn style_labels_parse_case_insensitively() {
        assert_eq!(Style::from_label("vintage"), Some(Style::Vintage));
        assert_eq!(Style::from_label(" Editorial "), Some(Style::Editorial));
        assert_eq!(Style::from_label("baroque"), None);
    }

    #[test]
    fn empty_failure_messages_fall_back() {
        assert_eq!(
            Outcome::exhausted("  ").error_message().as_deref(),
            Some(FALLBACK_FAILURE_MESSAGE)
        );
        assert_eq!(
            Outcome::Aborted.error_message().as_deref(),
            Some(ABORTED_MESSAGE)
        );
        assert!(!Outcome::Aborted.is_failure());
    }
}

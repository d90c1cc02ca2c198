//! Request lifecycle controller.
//!
//! Owns issue/retry/cancel orchestration for generation requests and emits events for
//! presentation layers. Every `submit` resolves to exactly one [`Outcome`].

use crate::engine::{BackendError, GenerationBackend};
use crate::model::{FailureClass, GenerationRequest, InfoEvent, Outcome, RetryPolicy, StudioEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Commands emitted by UI layers while a request is in flight.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Abort,
}

/// One outstanding network call. Dropped as soon as the call settles.
#[derive(Debug)]
struct AttemptState {
    attempt_number: u32,
    cancel: CancellationToken,
    started_at: Instant,
}

/// Per-submit handle. Every attempt token is a child of `cancel`, so signalling it
/// reaches the live call and any pending backoff, but never a later submit.
#[derive(Debug)]
struct Lifecycle {
    cancel: CancellationToken,
    attempt: Option<AttemptState>,
}

pub struct RequestController<B> {
    backend: B,
    policy: RetryPolicy,
    event_tx: Option<UnboundedSender<StudioEvent>>,
    lifecycle: Mutex<Option<Lifecycle>>,
    loading: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Resets the lifecycle slot even if the submit future is dropped mid-flight.
struct SubmitGuard<'a, B> {
    ctrl: &'a RequestController<B>,
}

impl<B> Drop for SubmitGuard<'_, B> {
    fn drop(&mut self) {
        *self.ctrl.slot() = None;
        self.ctrl.loading.store(false, Ordering::SeqCst);
    }
}

impl<B: GenerationBackend> RequestController<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            event_tx: None,
            lifecycle: Mutex::new(None),
            loading: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, event_tx: UnboundedSender<StudioEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// True from the start of `submit` until its outcome is returned.
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// True exactly while an attempt's network call is outstanding.
    pub fn can_abort(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|l| l.attempt.is_some())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Issue `request`, retrying transient failures, until a terminal outcome.
    ///
    /// Callers must not overlap `submit` calls on one controller; the UI disables
    /// submission while [`loading`](Self::loading) is true.
    pub async fn submit(&self, request: GenerationRequest) -> Outcome {
        let session = CancellationToken::new();
        *self.slot() = Some(Lifecycle {
            cancel: session.clone(),
            attempt: None,
        });
        self.loading.store(true, Ordering::SeqCst);
        self.set_last_error(None);
        let guard = SubmitGuard { ctrl: self };

        let outcome = self.run_attempts(&request, &session).await;

        drop(guard);
        self.set_last_error(outcome.error_message());
        match &outcome {
            Outcome::Success(result) => tracing::info!(id = %result.id, "generation succeeded"),
            Outcome::Aborted => tracing::info!("generation aborted by caller"),
            Outcome::Exhausted { message } => {
                tracing::warn!(%message, "generation failed after retries")
            }
            Outcome::Rejected { message } => tracing::warn!(%message, "generation rejected"),
        }
        self.emit(StudioEvent::Completed {
            outcome: Box::new(outcome.clone()),
        });
        outcome
    }

    /// Signal the in-flight submit, if any. Returns whether anything was signalled;
    /// repeated calls and calls with nothing in flight are no-ops.
    pub fn cancel(&self) -> bool {
        let signalled = match self.slot().as_ref() {
            Some(l) if !l.cancel.is_cancelled() => {
                if let Some(attempt) = &l.attempt {
                    attempt.cancel.cancel();
                    tracing::info!(attempt = attempt.attempt_number, "cancelling in-flight attempt");
                } else {
                    tracing::info!("cancelling pending backoff");
                }
                l.cancel.cancel();
                true
            }
            _ => false,
        };
        if signalled {
            self.emit(StudioEvent::Info(InfoEvent::Cancelling));
        }
        signalled
    }

    async fn run_attempts(&self, request: &GenerationRequest, session: &CancellationToken) -> Outcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let token = self.begin_attempt(session, attempt);
            self.emit(StudioEvent::AttemptStarted {
                attempt,
                max_attempts,
            });
            tracing::debug!(attempt, max_attempts, "sending generation request");

            let res = tokio::select! {
                biased;
                _ = token.cancelled() => Err(BackendError::Cancelled),
                res = self.backend.generate(request, token.clone()) => res,
            };
            self.end_attempt(attempt);

            // A cancel that lands together with a response still wins.
            if session.is_cancelled() {
                return Outcome::Aborted;
            }
            let err = match res {
                Ok(result) => return Outcome::Success(result),
                Err(err) => err,
            };

            let class = err.classify();
            let message = err.to_string();
            tracing::debug!(attempt, ?class, %message, "attempt failed");
            self.emit(StudioEvent::AttemptFailed {
                attempt,
                class,
                message: message.clone(),
            });

            match class {
                FailureClass::ClientAbort => return Outcome::Aborted,
                FailureClass::NonRetryable => return Outcome::rejected(message),
                FailureClass::Retryable if attempt >= max_attempts => {
                    return Outcome::exhausted(message)
                }
                FailureClass::Retryable => {}
            }

            let delay = self.policy.backoff(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
            self.emit(StudioEvent::BackoffStarted { attempt, delay });
            tokio::select! {
                biased;
                _ = session.cancelled() => return Outcome::Aborted,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn begin_attempt(&self, session: &CancellationToken, attempt_number: u32) -> CancellationToken {
        let token = session.child_token();
        if let Some(l) = self.slot().as_mut() {
            l.attempt = Some(AttemptState {
                attempt_number,
                cancel: token.clone(),
                started_at: Instant::now(),
            });
        }
        token
    }

    fn end_attempt(&self, attempt_number: u32) {
        if let Some(l) = self.slot().as_mut() {
            if let Some(state) = l.attempt.take() {
                tracing::trace!(
                    attempt = attempt_number,
                    elapsed_ms = state.started_at.elapsed().as_millis() as u64,
                    "attempt settled"
                );
            }
        }
    }
}

impl<B> RequestController<B> {
    fn slot(&self) -> MutexGuard<'_, Option<Lifecycle>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_error(&self, value: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn emit(&self, event: StudioEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Drive one submit to completion while honouring UI commands.
pub(crate) async fn run_controller<B: GenerationBackend>(
    controller: &RequestController<B>,
    request: GenerationRequest,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Outcome {
    let submit = controller.submit(request);
    tokio::pin!(submit);
    let mut commands_open = true;

    loop {
        tokio::select! {
            outcome = &mut submit => break outcome,
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(UiCommand::Abort) => {
                        if !controller.cancel() {
                            controller.emit(StudioEvent::Info(InfoEvent::NothingToAbort));
                        }
                    }
                    None => commands_open = false,
                }
            }
        }
    }
}

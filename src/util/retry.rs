//! Retry with exponential backoff, jitter, and quota fallback.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{AuthType, RetrySettings};
use crate::error::{ParleyError, Result};
use crate::session::events::{emit, TelemetryEvent, TelemetrySink};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive 429 failures that count as persistent quota exhaustion.
    pub persistent_quota_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            persistent_quota_threshold: settings.persistent_quota_threshold.max(1),
        }
    }
}

/// Session-wide fallback mode, shared by every coordinator of one session.
#[derive(Debug)]
pub struct FallbackState {
    active: AtomicBool,
    quota_error_occurred: AtomicBool,
    /// Consecutive streamed calls that ended in a quota error.
    stream_quota_streak: AtomicU32,
    fallback_model: String,
}

impl FallbackState {
    pub fn new(fallback_model: impl Into<String>) -> Self {
        Self {
            active: AtomicBool::new(false),
            quota_error_occurred: AtomicBool::new(false),
            stream_quota_streak: AtomicU32::new(0),
            fallback_model: fallback_model.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Once set, stays set for the rest of the session.
    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    /// The model to dispatch to: the fallback model while fallback is active.
    pub fn effective_model(&self, requested: &str) -> String {
        if self.is_active() {
            self.fallback_model.clone()
        } else {
            requested.to_string()
        }
    }

    pub fn quota_error_occurred(&self) -> bool {
        self.quota_error_occurred.load(Ordering::SeqCst)
    }

    pub fn mark_quota_error(&self) {
        self.quota_error_occurred.store(true, Ordering::SeqCst);
    }

    pub fn clear_quota_error(&self) {
        self.quota_error_occurred.store(false, Ordering::SeqCst);
    }

    /// A streamed call finished without a quota error.
    pub fn reset_stream_quota_streak(&self) {
        self.stream_quota_streak.store(0, Ordering::SeqCst);
    }
}

/// What the host decided after persistent quota exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackIntent {
    /// Switch the session to the fallback model and keep trying.
    Switch,
    /// Give up and surface the error.
    Stop,
}

/// Host hook consulted when quota exhaustion looks persistent.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    async fn handle(
        &self,
        current_model: &str,
        fallback_model: &str,
        auth_type: AuthType,
        error: &ParleyError,
    ) -> FallbackIntent;
}

/// Wraps single model invocations with backoff and fallback switching.
#[derive(Clone)]
pub struct RetryFallbackCoordinator {
    policy: RetryPolicy,
    state: Arc<FallbackState>,
    handler: Option<Arc<dyn FallbackHandler>>,
    auth_type: AuthType,
    telemetry: Option<TelemetrySink>,
}

impl std::fmt::Debug for RetryFallbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryFallbackCoordinator")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("has_handler", &self.handler.is_some())
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

impl RetryFallbackCoordinator {
    pub fn new(policy: RetryPolicy, state: Arc<FallbackState>, auth_type: AuthType) -> Self {
        Self {
            policy,
            state,
            handler: None,
            auth_type,
            telemetry: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> &Arc<FallbackState> {
        &self.state
    }

    /// Run `operation` against `model`, retrying retryable failures.
    ///
    /// The operation receives the model to dispatch to, which is the fallback
    /// model once fallback mode is active.
    pub async fn execute<F, Fut, T>(
        &self,
        model: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.policy.initial_delay;
        let mut consecutive_quota_errors: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ParleyError::Cancelled);
            }
            attempt += 1;
            let current_model = self.state.effective_model(model);

            let err = match operation(current_model.clone()).await {
                Ok(value) => return Ok(value),
                Err(ParleyError::Cancelled) => return Err(ParleyError::Cancelled),
                Err(err) => err,
            };

            if err.is_quota_error() {
                self.state.mark_quota_error();
                consecutive_quota_errors += 1;
            } else {
                consecutive_quota_errors = 0;
            }

            let persistent_quota = err.is_terminal_quota()
                || (err.is_quota_error()
                    && consecutive_quota_errors >= self.policy.persistent_quota_threshold);

            if persistent_quota {
                match self.consult_handler(&current_model, &err).await {
                    Some(FallbackIntent::Switch) => {
                        attempt = 0;
                        consecutive_quota_errors = 0;
                        delay = self.policy.initial_delay;
                        continue;
                    }
                    Some(FallbackIntent::Stop) => return Err(err),
                    None => {}
                }
            }

            if err.is_terminal_quota()
                || !err.is_retryable()
                || attempt >= self.policy.max_attempts
            {
                return Err(err);
            }

            let wait = match &err {
                ParleyError::RateLimited {
                    retry_after_ms: Some(ms),
                } => Duration::from_millis(*ms),
                _ => jittered(delay),
            };

            tracing::warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                model = %current_model,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "Retrying after error"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ParleyError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            delay = delay.saturating_mul(2).min(self.policy.max_delay);
        }
    }
}

impl RetryFallbackCoordinator {
    /// Account for an error that ended a streamed call on `model`.
    ///
    /// Streamed calls are not retried here, but their quota failures count
    /// toward persistent exhaustion across calls; a `Switch` makes the next
    /// call go to the fallback model.
    pub async fn observe_stream_error(
        &self,
        model: &str,
        err: &ParleyError,
    ) -> Option<FallbackIntent> {
        if !err.is_quota_error() {
            self.state.reset_stream_quota_streak();
            return None;
        }
        self.state.mark_quota_error();
        let streak = self.state.stream_quota_streak.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(model, streak, error = %err, "Streamed call hit a quota error");

        let persistent =
            err.is_terminal_quota() || streak >= self.policy.persistent_quota_threshold;
        if !persistent {
            return None;
        }
        let intent = self.consult_handler(model, err).await;
        if intent == Some(FallbackIntent::Switch) {
            self.state.reset_stream_quota_streak();
        }
        intent
    }

    /// Ask the host whether to switch models; `None` when fallback is
    /// already active or no handler is installed.
    async fn consult_handler(&self, current_model: &str, err: &ParleyError) -> Option<FallbackIntent> {
        if self.state.is_active() {
            return None;
        }
        let handler = self.handler.as_ref()?;
        let fallback_model = self.state.fallback_model().to_string();
        let intent = handler
            .handle(current_model, &fallback_model, self.auth_type, err)
            .await;
        if intent == FallbackIntent::Switch {
            tracing::warn!(
                from = %current_model,
                to = %fallback_model,
                auth_type = %self.auth_type,
                "Switching to fallback model after persistent quota errors"
            );
            self.state.activate();
            emit(
                self.telemetry.as_ref(),
                TelemetryEvent::FlashFallback {
                    from: current_model.to_string(),
                    to: fallback_model,
                    auth_type: self.auth_type,
                },
            );
        }
        Some(intent)
    }
}

/// `delay` scaled by a random factor in [0.7, 1.3).
pub fn jittered(delay: Duration) -> Duration {
    let factor = 0.7 + rand_factor() * 0.6;
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}

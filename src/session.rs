//! Token-gated session.
//!
//! A session starts `Pending`, becomes `Active` after one successful gate
//! check and ends `Terminated`. Termination is absorbing: whichever path
//! terminates first (gate check, background re-validation, the pre-submit
//! re-check, completion or teardown) fixes the reason, and every later
//! attempt is a no-op.
//!
//! On transport failures the gate check fails closed and the background
//! re-validation fails open.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use derive_more::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::authority::Authority;
use crate::error::Error;
use crate::store::ExpiryStore;
use crate::types::AccessToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
const DEFAULT_GATE_FAILURE_DELAY: Duration = Duration::from_millis(2000);

/// Session timing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) poll_interval: Duration,
    pub(crate) gate_failure_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            gate_failure_delay: DEFAULT_GATE_FAILURE_DELAY,
        }
    }
}

impl SessionConfig {
    /// Interval between background re-validations (default 3 s).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause before an unreachable gate check is treated as a denial (default 2 s).
    #[must_use]
    pub fn with_gate_failure_delay(mut self, delay: Duration) -> Self {
        self.gate_failure_delay = delay;
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn gate_failure_delay(&self) -> Duration {
        self.gate_failure_delay
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Terminated(Termination),
}

impl SessionState {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    #[must_use]
    pub fn termination(&self) -> Option<&Termination> {
        match self {
            Self::Terminated(t) => Some(t),
            _ => None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Termination {
    #[display("Missing access token")]
    MissingToken,
    #[display("Invalid or expired token: {reason}")]
    InvalidToken { reason: String },
    #[display("Token validation service unavailable")]
    GateUnavailable,
    #[display("Session expired: {reason}")]
    SessionExpired { reason: String },
    /// The submission succeeded and the session has served its purpose.
    #[display("Request completed")]
    Completed,
    #[display("Page closed")]
    Closed,
}

impl Termination {
    /// Whether this ending must be rendered as access denied.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Completed | Self::Closed)
    }
}

/// Handle on the background re-validation task.
struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct SessionInner<A, S> {
    token: AccessToken,
    authority: Arc<A>,
    store: Arc<S>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    poller: Mutex<Option<PollHandle>>,
}

/// Owns the access token and the session state.
pub struct SessionController<A, S> {
    inner: Arc<SessionInner<A, S>>,
}

// Manual Clone: avoid derive adding `A: Clone, S: Clone` bounds.
impl<A, S> Clone for SessionController<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Authority, S: ExpiryStore> SessionController<A, S> {
    /// Creates a `Pending` session for `token`. No network call is made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingToken`] if no token was supplied.
    pub fn initialize(
        token: Option<AccessToken>,
        authority: Arc<A>,
        store: Arc<S>,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let token = token.ok_or(Error::MissingToken)?;
        let (state, _) = watch::channel(SessionState::Pending);
        Ok(Self {
            inner: Arc::new(SessionInner {
                token,
                authority,
                store,
                config,
                state,
                poller: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn token(&self) -> &AccessToken {
        &self.inner.token
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change, including revocation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether the background re-validation task is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Performs the initial gate check and returns the resulting state.
    ///
    /// Only acts on a `Pending` session; otherwise the current state is
    /// returned untouched.
    pub async fn gate_check(&self) -> SessionState {
        if self.state() != SessionState::Pending {
            return self.state();
        }

        match self.inner.authority.validate_token(&self.inner.token).await {
            Ok(validation) if validation.valid => {
                let activated = self.inner.state.send_if_modified(|state| {
                    if *state == SessionState::Pending {
                        *state = SessionState::Active;
                        true
                    } else {
                        false
                    }
                });
                if activated {
                    if let Some(expires_at) = validation.expires_at() {
                        self.inner.store.save(expires_at);
                    }
                    SessionInner::start_polling(&self.inner);
                    tracing::info!("Access token validated, session active");
                }
            }
            Ok(validation) => {
                let reason = validation.reason_or_unknown().to_owned();
                tracing::warn!(reason = %reason, "Access token rejected at gate");
                self.inner.terminate(Termination::InvalidToken { reason });
            }
            Err(e) => {
                tracing::error!(error = %e, "Token validation unreachable at gate");
                tokio::time::sleep(self.inner.config.gate_failure_delay).await;
                self.inner.terminate(Termination::GateUnavailable);
            }
        }

        self.state()
    }

    /// On-demand re-validation ahead of a submission.
    ///
    /// Any answer other than "valid" terminates the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if the session is not active, the
    /// token was rejected, or the authority could not be reached.
    pub async fn revalidate(&self) -> Result<(), Error> {
        if let SessionState::Terminated(t) = self.state() {
            return Err(Error::SessionExpired(t.to_string()));
        }
        if !self.state().is_active() {
            return Err(Error::SessionExpired("session not active".into()));
        }

        match self.inner.authority.validate_token(&self.inner.token).await {
            Ok(validation) if validation.valid => match self.state() {
                SessionState::Terminated(t) => Err(Error::SessionExpired(t.to_string())),
                _ => Ok(()),
            },
            Ok(validation) => {
                let reason = validation.reason_or_unknown().to_owned();
                tracing::warn!(reason = %reason, "Access token rejected before submission");
                self.inner.terminate(Termination::SessionExpired {
                    reason: reason.clone(),
                });
                Err(Error::SessionExpired(reason))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token validation failed during submission");
                let reason = "token validation failed during submission".to_owned();
                self.inner.terminate(Termination::SessionExpired {
                    reason: reason.clone(),
                });
                Err(Error::SessionExpired(reason))
            }
        }
    }

    /// Ends the session after a successful submission.
    pub fn complete(&self) {
        self.inner.terminate(Termination::Completed);
    }

    /// Ends the session because the page is going away.
    pub fn teardown(&self) {
        self.inner.terminate(Termination::Closed);
    }

    /// Forces termination for `reason`. Returns `false` if already terminated.
    pub fn terminate(&self, reason: Termination) -> bool {
        self.inner.terminate(reason)
    }
}

impl<A: Authority, S: ExpiryStore> SessionInner<A, S> {
    fn terminate(&self, termination: Termination) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminated() {
                return false;
            }
            *state = SessionState::Terminated(termination.clone());
            true
        });

        self.stop_polling();

        if changed {
            self.store.clear();
            tracing::info!(reason = %termination, "Session terminated");
        }
        changed
    }

    fn start_polling(this: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(this).poll(cancel.clone()));
        let previous = this
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(PollHandle { cancel, task });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn stop_polling(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    async fn poll(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.poll_interval;
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            let active = self.state.borrow().is_active();
            if !active {
                break;
            }

            let result = self.authority.validate_token(&self.token).await;
            if cancel.is_cancelled() {
                break;
            }

            match result {
                Ok(validation) if validation.valid => {}
                Ok(validation) => {
                    let reason = validation.reason_or_unknown().to_owned();
                    tracing::warn!(reason = %reason, "Access token became invalid during session");
                    self.terminate(Termination::SessionExpired { reason });
                    break;
                }
                Err(e) => {
                    // Transient failures must not evict a valid session.
                    tracing::warn!(error = %e, "Background token re-validation failed");
                }
            }
        }
    }
}

//! The page context: one object owning the token, session, form and
//! presenter for the life of a page.
//!
//! ```rust,ignore
//! let mut page = Page::new(
//!     PageConfig::from_env()?,
//!     FormStateMachine::new(FormConfig::gift_card())?,
//!     Arc::new(HttpAuthority::new(AuthorityConfig::from_env()?)),
//!     Arc::new(MemoryExpiryStore::new()),
//!     presenter,
//! );
//! page.load(&entry_url).await;
//! page.edit(Field::CardNumber, "4111 1111 1111 1111");
//! let outcome = page.submit().await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::authority::Authority;
use crate::error::Error;
use crate::form::{FormStateMachine, View};
use crate::presenter::{Denial, Presenter};
use crate::session::{SessionConfig, SessionController, SessionState, Termination};
use crate::store::ExpiryStore;
use crate::submission::{SubmissionOutcome, SubmissionPipeline};
use crate::types::{AccessToken, Field, SectionId};
use crate::validation::ValidationResult;

const DEFAULT_TOKEN_PARAM: &str = "token";
const DEFAULT_DENIAL_REDIRECT: &str = "https://www.google.com";
const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(500);

/// Page-level settings.
#[derive(Debug, Clone)]
pub struct PageConfig {
    pub(crate) token_param: String,
    pub(crate) denial_redirect: Url,
    pub(crate) reveal_delay: Duration,
    pub(crate) session: SessionConfig,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            token_param: DEFAULT_TOKEN_PARAM.into(),
            denial_redirect: DEFAULT_DENIAL_REDIRECT
                .parse()
                .expect("valid default URL"),
            reveal_delay: DEFAULT_REVEAL_DELAY,
            session: SessionConfig::default(),
        }
    }
}

impl PageConfig {
    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `GIFTGATE_DENIAL_REDIRECT`: where denied users are sent
    /// - `GIFTGATE_POLL_INTERVAL_MS`: background re-validation interval
    /// - `GIFTGATE_GATE_FAILURE_DELAY_MS`: pause before an unreachable gate denies
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(url_str) = std::env::var("GIFTGATE_DENIAL_REDIRECT") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("GIFTGATE_DENIAL_REDIRECT: {e}")))?;
            config = config.with_denial_redirect(url);
        }
        if let Some(interval) = env_millis("GIFTGATE_POLL_INTERVAL_MS")? {
            config.session = config.session.with_poll_interval(interval);
        }
        if let Some(delay) = env_millis("GIFTGATE_GATE_FAILURE_DELAY_MS")? {
            config.session = config.session.with_gate_failure_delay(delay);
        }

        Ok(config)
    }

    /// Query parameter carrying the access token (default `token`).
    #[must_use]
    pub fn with_token_param(mut self, name: impl Into<String>) -> Self {
        self.token_param = name.into();
        self
    }

    #[must_use]
    pub fn with_denial_redirect(mut self, url: Url) -> Self {
        self.denial_redirect = url;
        self
    }

    /// Pause between a successful gate check and revealing the form.
    #[must_use]
    pub fn with_reveal_delay(mut self, delay: Duration) -> Self {
        self.reveal_delay = delay;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

pub(crate) fn env_millis(name: &str) -> Result<Option<Duration>, Error> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Reads the access token from the entry URL. Empty values count as absent.
#[must_use]
pub fn extract_token(entry: &Url, param: &str) -> Option<AccessToken> {
    entry
        .query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| value.into_owned().try_into().ok())
}

/// Puts the form into its denied view and tells the presenter, once.
fn render_termination<P: Presenter>(
    form: &Mutex<FormStateMachine>,
    presenter: &P,
    redirect_to: &Url,
    termination: &Termination,
) {
    if !termination.is_denial() {
        return;
    }
    {
        let mut form = form.lock().unwrap_or_else(PoisonError::into_inner);
        if form.view() == View::Denied {
            return;
        }
        form.deny();
    }
    tracing::info!(reason = %termination, redirect = %redirect_to, "Access denied");
    presenter.deny(&Denial {
        termination: termination.clone(),
        redirect_to: redirect_to.clone(),
    });
}

async fn watch_revocation<P: Presenter>(
    mut changes: watch::Receiver<SessionState>,
    form: Arc<Mutex<FormStateMachine>>,
    presenter: Arc<P>,
    redirect_to: Url,
) {
    loop {
        let termination = changes.borrow_and_update().termination().cloned();
        if let Some(termination) = termination {
            render_termination(&form, &*presenter, &redirect_to, &termination);
            break;
        }
        if changes.changed().await.is_err() {
            break;
        }
    }
}

/// A token-gated form page.
pub struct Page<A, S, P>
where
    A: Authority,
    S: ExpiryStore,
    P: Presenter,
{
    config: PageConfig,
    authority: Arc<A>,
    store: Arc<S>,
    presenter: Arc<P>,
    form: Arc<Mutex<FormStateMachine>>,
    session: Option<SessionController<A, S>>,
    pipeline: Option<SubmissionPipeline<A, S>>,
    watcher: Option<JoinHandle<()>>,
    missing_token: bool,
}

impl<A, S, P> Page<A, S, P>
where
    A: Authority,
    S: ExpiryStore,
    P: Presenter,
{
    #[must_use]
    pub fn new(
        config: PageConfig,
        form: FormStateMachine,
        authority: Arc<A>,
        store: Arc<S>,
        presenter: Arc<P>,
    ) -> Self {
        Self {
            config,
            authority,
            store,
            presenter,
            form: Arc::new(Mutex::new(form)),
            session: None,
            pipeline: None,
            watcher: None,
            missing_token: false,
        }
    }

    /// Handles the initial page request: token extraction, gate check and,
    /// on success, revealing the form.
    ///
    /// A missing token ends the page before any network call.
    pub async fn load(&mut self, entry: &Url) -> SessionState {
        if self.session.is_some() || self.missing_token {
            return self.session_state();
        }

        let token = extract_token(entry, &self.config.token_param);
        let session = match SessionController::initialize(
            token,
            Arc::clone(&self.authority),
            Arc::clone(&self.store),
            self.config.session.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "No access token in entry URL");
                self.missing_token = true;
                self.render(&Termination::MissingToken);
                return self.session_state();
            }
        };
        self.session = Some(session.clone());
        self.pipeline = Some(SubmissionPipeline::new(
            session.clone(),
            Arc::clone(&self.authority),
        ));

        match session.gate_check().await {
            SessionState::Active => {
                tokio::time::sleep(self.config.reveal_delay).await;
                if session.state().is_active() {
                    self.presenter.reveal();
                }
                self.watcher = Some(tokio::spawn(watch_revocation(
                    session.subscribe(),
                    Arc::clone(&self.form),
                    Arc::clone(&self.presenter),
                    self.config.denial_redirect.clone(),
                )));
            }
            SessionState::Terminated(termination) => self.render(&termination),
            SessionState::Pending => {}
        }

        self.session_state()
    }

    fn render(&self, termination: &Termination) {
        render_termination(
            &self.form,
            &*self.presenter,
            &self.config.denial_redirect,
            termination,
        );
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state(),
            None if self.missing_token => SessionState::Terminated(Termination::MissingToken),
            None => SessionState::Pending,
        }
    }

    /// Locked view of the form.
    pub fn form(&self) -> MutexGuard<'_, FormStateMachine> {
        self.form.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a user edit and returns the field's validation result.
    pub fn edit(&self, field: Field, value: impl Into<String>) -> ValidationResult {
        self.form().set_field(field, value)
    }

    /// Switches section; disallowed moves are ignored and return `false`.
    pub fn navigate(&self, target: &SectionId) -> bool {
        self.form().navigate(target)
    }

    pub fn reset(&self) {
        self.form().reset();
    }

    /// Submits the active section.
    pub async fn submit(&self) -> SubmissionOutcome {
        let Some(pipeline) = &self.pipeline else {
            return SubmissionOutcome::SessionExpired;
        };
        let outcome = pipeline.submit(&self.form, &*self.presenter).await;
        if outcome == SubmissionOutcome::SessionExpired {
            if let SessionState::Terminated(termination) = self.session_state() {
                self.render(&termination);
            }
        }
        outcome
    }

    /// Ends the page: stops background re-validation. Safe to call twice.
    pub fn teardown(&mut self) {
        if let Some(session) = &self.session {
            session.teardown();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl<A, S, P> Drop for Page<A, S, P>
where
    A: Authority,
    S: ExpiryStore,
    P: Presenter,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::testing::ScriptedAuthority;
    use crate::authority::{BusinessResponse, TokenValidation, TransportError};
    use crate::form::FormConfig;
    use crate::presenter::testing::{Event, RecordingPresenter};
    use crate::store::MemoryExpiryStore;
    use time::Date;
    use time::macros::date;

    type TestPage = Page<ScriptedAuthority, MemoryExpiryStore, RecordingPresenter>;

    fn fixed_today() -> Date {
        date!(2026 - 10 - 19)
    }

    fn page() -> (TestPage, Arc<ScriptedAuthority>, Arc<RecordingPresenter>) {
        let authority = Arc::new(ScriptedAuthority::new());
        let presenter = Arc::new(RecordingPresenter::default());
        let form = FormStateMachine::new(FormConfig::gift_card())
            .unwrap()
            .with_clock(fixed_today);
        let page = Page::new(
            PageConfig::default(),
            form,
            Arc::clone(&authority),
            Arc::new(MemoryExpiryStore::new()),
            Arc::clone(&presenter),
        );
        (page, authority, presenter)
    }

    fn entry(query: &str) -> Url {
        format!("https://gift.example.com/{query}").parse().unwrap()
    }

    fn fill_valid_card(page: &TestPage) {
        page.edit(Field::CardNumber, "4111111111111111").unwrap();
        let _ = page.edit(Field::ExpiryMonth, "11");
        page.edit(Field::ExpiryYear, "2026").unwrap();
        page.edit(Field::Cvv, "123").unwrap();
    }

    #[test]
    fn token_extraction() {
        let token = extract_token(&entry("?token=abc&x=1"), "token").unwrap();
        assert_eq!(token.as_str(), "abc");
        assert!(extract_token(&entry("?token="), "token").is_none());
        assert!(extract_token(&entry("?other=abc"), "token").is_none());
        assert!(extract_token(&entry(""), "token").is_none());
        assert_eq!(
            extract_token(&entry("?t=a%20b"), "t").unwrap().as_str(),
            "a b"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_is_terminal_without_network() {
        let (mut page, authority, presenter) = page();

        let state = page.load(&entry("")).await;
        assert_eq!(state, SessionState::Terminated(Termination::MissingToken));
        assert_eq!(authority.validate_calls(), 0);
        assert_eq!(authority.submit_calls(), 0);
        assert_eq!(page.form().view(), View::Denied);

        let denials = presenter.denials();
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].redirect_to.as_str(), "https://www.google.com/");
        assert!(!presenter.events().contains(&Event::Reveal));

        assert_eq!(page.submit().await, SubmissionOutcome::SessionExpired);
        assert_eq!(authority.validate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_token_reveals_form_after_delay() {
        let (mut page, authority, presenter) = page();

        let started = tokio::time::Instant::now();
        let state = page.load(&entry("?token=abc")).await;
        assert_eq!(state, SessionState::Active);
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(presenter.events(), vec![Event::Reveal]);
        assert_eq!(authority.validate_calls(), 1);

        page.teardown();
        assert_eq!(page.session_state(), SessionState::Terminated(Termination::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_denies_and_blocks_business_calls() {
        let (mut page, authority, presenter) = page();
        authority.push_validation(Ok(TokenValidation::invalid("expired")));

        let state = page.load(&entry("?token=abc")).await;
        assert_eq!(
            state,
            SessionState::Terminated(Termination::InvalidToken {
                reason: "expired".into()
            })
        );
        assert!(!presenter.events().contains(&Event::Reveal));
        assert_eq!(presenter.denials().len(), 1);

        fill_valid_card(&page);
        assert!(!page.form().can_submit(), "denied form cannot submit");
        assert_eq!(page.submit().await, SubmissionOutcome::SessionExpired);
        assert_eq!(authority.submit_calls(), 0);
        assert_eq!(presenter.denials().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_gate_denies_without_reveal() {
        let (mut page, authority, presenter) = page();
        authority.push_validation(Err(TransportError::Unavailable("refused".into())));

        let state = page.load(&entry("?token=abc")).await;
        assert_eq!(state, SessionState::Terminated(Termination::GateUnavailable));
        assert!(!presenter.events().contains(&Event::Reveal));
        assert_eq!(presenter.denials().len(), 1);
        assert_eq!(page.form().view(), View::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn balance_check_end_to_end() {
        let (mut page, authority, presenter) = page();
        authority.push_submission(Ok(BusinessResponse::accepted("Balance: $50.00")));

        page.load(&entry("?token=abc")).await;
        fill_valid_card(&page);
        assert!(page.form().can_submit());

        let outcome = page.submit().await;
        assert_eq!(
            outcome,
            SubmissionOutcome::Succeeded {
                message: "Balance: $50.00".into()
            }
        );
        assert_eq!(page.form().view(), View::Success);
        assert_eq!(
            page.session_state(),
            SessionState::Terminated(Termination::Completed)
        );
        assert!(presenter.denials().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(authority.validate_calls(), 2, "gate check and pre-submit check only");
        assert!(presenter.denials().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn revocation_during_session_denies() {
        let (mut page, authority, presenter) = page();
        page.load(&entry("?token=abc")).await;
        fill_valid_card(&page);

        authority.push_validation(Ok(TokenValidation::invalid("revoked")));
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert_eq!(page.form().view(), View::Denied);
        let denials = presenter.denials();
        assert_eq!(denials.len(), 1);
        assert_eq!(
            denials[0].termination,
            Termination::SessionExpired {
                reason: "revoked".into()
            }
        );
        assert!(!page.navigate(&"register".into()));

        assert_eq!(page.submit().await, SubmissionOutcome::SessionExpired);
        assert_eq!(authority.validate_calls(), 2, "no re-check after revocation");
        assert_eq!(authority.submit_calls(), 0);
        assert_eq!(presenter.denials().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_polling_errors_keep_form_usable() {
        let (mut page, authority, presenter) = page();
        page.load(&entry("?token=abc")).await;

        authority.push_validation(Err(TransportError::Timeout));
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert_eq!(page.session_state(), SessionState::Active);
        assert!(presenter.denials().is_empty());
        assert!(page.navigate(&"register".into()));
        page.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn session_expiry_at_submit_denies_once() {
        let (mut page, authority, presenter) = page();
        page.load(&entry("?token=abc")).await;
        fill_valid_card(&page);
        authority.push_validation(Ok(TokenValidation::invalid("expired")));

        assert_eq!(page.submit().await, SubmissionOutcome::SessionExpired);
        tokio::task::yield_now().await;

        assert_eq!(authority.submit_calls(), 0);
        assert_eq!(presenter.denials().len(), 1);
        assert_eq!(page.form().view(), View::Denied);
    }
}

use url::Url;

use crate::session::Termination;

/// Rendering side of the page.
///
/// Markup and styling live outside this crate; the page drives them through
/// this trait.
pub trait Presenter: Send + Sync + 'static {
    /// Show or hide the loading indicator.
    fn set_loading(&self, loading: bool);

    /// Hide the initial loading screen and show the form.
    fn reveal(&self);

    /// Leave the page: access was denied or revoked.
    fn deny(&self, denial: &Denial);

    /// Show the success panel with the authority's message.
    fn success(&self, message: &str);

    /// Show a recoverable error; entered data stays in place.
    fn error(&self, message: &str);
}

/// Access-denied outcome handed to the presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub termination: Termination,
    /// Where the user is sent.
    pub redirect_to: Url,
}

/// Keeps the loading indicator up for as long as it lives.
pub(crate) struct LoadingGuard<'a, P: Presenter> {
    presenter: &'a P,
}

impl<'a, P: Presenter> LoadingGuard<'a, P> {
    pub(crate) fn show(presenter: &'a P) -> Self {
        presenter.set_loading(true);
        Self { presenter }
    }
}

impl<P: Presenter> Drop for LoadingGuard<'_, P> {
    fn drop(&mut self) {
        self.presenter.set_loading(false);
    }
}

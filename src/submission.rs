use std::sync::{Arc, Mutex, PoisonError};

use crate::authority::{Authority, BusinessRequest};
use crate::form::FormStateMachine;
use crate::presenter::{LoadingGuard, Presenter};
use crate::session::SessionController;
use crate::store::ExpiryStore;
use crate::types::Field;
use crate::validation::FieldError;

pub(crate) const DEFAULT_SUCCESS_MESSAGE: &str = "Your request has been processed successfully!";
pub(crate) const DEFAULT_FAILURE_MESSAGE: &str = "Submission failed";
pub(crate) const TRANSPORT_FAILURE_MESSAGE: &str =
    "Failed to process your request. Please try again.";

/// How a submission attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The active section is not submittable yet. Nothing was sent.
    Incomplete(Vec<(Field, FieldError)>),
    /// The session was already over, or the token check before sending failed.
    SessionExpired,
    Succeeded { message: String },
    /// The authority refused the request; the form keeps its data.
    Rejected { message: String },
    /// The business call could not be completed; safe to retry.
    Failed,
}

/// Sends a validated section to the authority.
pub struct SubmissionPipeline<A, S> {
    session: SessionController<A, S>,
    authority: Arc<A>,
}

impl<A: Authority, S: ExpiryStore> SubmissionPipeline<A, S> {
    #[must_use]
    pub fn new(session: SessionController<A, S>, authority: Arc<A>) -> Self {
        Self { session, authority }
    }

    /// Runs one submission of the active section.
    ///
    /// The token re-check always precedes the business call, and at most one
    /// business request is issued.
    pub async fn submit<P: Presenter>(
        &self,
        form: &Mutex<FormStateMachine>,
        presenter: &P,
    ) -> SubmissionOutcome {
        if self.session.state().is_terminated() {
            return SubmissionOutcome::SessionExpired;
        }

        let (flow, payload) = {
            let form = form.lock().unwrap_or_else(PoisonError::into_inner);
            match form.submission_flow() {
                Some(flow) if form.can_submit() => (flow, form.payload(flow)),
                _ => return SubmissionOutcome::Incomplete(form.section_errors()),
            }
        };

        let _loading = LoadingGuard::show(presenter);

        if let Err(e) = self.session.revalidate().await {
            tracing::warn!(error = %e, "Submission aborted");
            return SubmissionOutcome::SessionExpired;
        }

        let request = BusinessRequest {
            flow,
            token: self.session.token().clone(),
            payload,
        };

        match self.authority.submit(&request).await {
            Ok(response) if response.success => {
                form.lock().unwrap_or_else(PoisonError::into_inner).succeed();
                let message = response
                    .message
                    .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_owned());
                presenter.success(&message);
                self.session.complete();
                tracing::info!(flow = ?flow, "Submission accepted");
                SubmissionOutcome::Succeeded { message }
            }
            Ok(response) => {
                let message = response
                    .error
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_owned());
                tracing::info!(flow = ?flow, error = %message, "Submission rejected");
                presenter.error(&message);
                SubmissionOutcome::Rejected { message }
            }
            Err(e) => {
                tracing::error!(flow = ?flow, error = %e, "Submission failed");
                presenter.error(TRANSPORT_FAILURE_MESSAGE);
                SubmissionOutcome::Failed
            }
        }
    }
}

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Which relay endpoint failed; decides the shape of the error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Validation,
    Business,
    Status,
}

/// Relay failures that never produced an upstream answer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The caller left out a required field.
    #[error("missing input for {0:?}")]
    MissingInput(Capability),

    #[error("upstream timed out")]
    Timeout(Capability),

    #[error("upstream unavailable: {detail}")]
    Unavailable {
        capability: Capability,
        detail: String,
    },
}

impl RelayError {
    pub(super) fn from_reqwest(capability: Capability, e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(capability)
        } else {
            Self::Unavailable {
                capability,
                detail: e.to_string(),
            }
        }
    }

    fn capability(&self) -> Capability {
        match self {
            Self::MissingInput(c) | Self::Timeout(c) => *c,
            Self::Unavailable { capability, .. } => *capability,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let capability = self.capability();

        if capability == Capability::Status {
            tracing::error!(error = %self, "Status check error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Status check failed" })),
            )
                .into_response();
        }

        let (status, message) = match (&self, capability) {
            (Self::MissingInput(_), Capability::Validation) => {
                (StatusCode::BAD_REQUEST, "Token is required")
            }
            (Self::MissingInput(_), _) => {
                (StatusCode::BAD_REQUEST, "Token and card data are required")
            }
            (Self::Timeout(_), Capability::Validation) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Token validation service timeout")
            }
            (Self::Timeout(_), _) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service timeout - please try again")
            }
            (Self::Unavailable { .. }, Capability::Validation) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token validation service unavailable",
            ),
            (Self::Unavailable { .. }, _) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Gift processing service unavailable",
            ),
        };

        if !matches!(self, Self::MissingInput(_)) {
            tracing::error!(error = %self, capability = ?capability, "Relay upstream error");
        }

        let body = match capability {
            Capability::Validation => json!({ "valid": false, "reason": message }),
            _ => json!({ "success": false, "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            RelayError::MissingInput(Capability::Business).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Timeout(Capability::Validation).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RelayError::Unavailable {
                capability: Capability::Business,
                detail: "refused".into()
            }
            .into_response()
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Timeout(Capability::Status).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

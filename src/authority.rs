use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::types::{AccessToken, Field};

/// Remote authority that decides token validity and processes submissions.
///
/// The page never talks HTTP directly; it goes through this trait so the
/// session and submission logic can run against any transport.
/// [`HttpAuthority`](crate::client::HttpAuthority) is the relay-backed
/// implementation.
pub trait Authority: Send + Sync + 'static {
    /// Ask whether `token` is still valid.
    fn validate_token(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<TokenValidation, TransportError>> + Send;

    /// Issue one business request.
    fn submit(
        &self,
        request: &BusinessRequest,
    ) -> impl Future<Output = Result<BusinessResponse, TransportError>> + Send;
}

/// Failure to get an answer from the authority at all.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}

/// Body of a validate-token call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: AccessToken,
}

/// Answer of the validate-token capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_data: Option<TokenData>,
}

impl TokenValidation {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
            token_data: None,
        }
    }

    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            token_data: None,
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: time::OffsetDateTime) -> Self {
        self.token_data = Some(TokenData { expires_at });
        self
    }

    /// Reason reported by the authority, or `"unknown"`.
    #[must_use]
    pub fn reason_or_unknown(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<time::OffsetDateTime> {
        self.token_data.as_ref().map(|d| d.expires_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: time::OffsetDateTime,
}

/// Business capability a section submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    CheckBalance,
    RegisterCard,
    PersonalizePin,
    Redeem,
}

impl Flow {
    /// Relay path of this flow's endpoint.
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::CheckBalance => "/api/check-balance",
            Self::RegisterCard => "/api/register-card",
            Self::PersonalizePin => "/api/personalize-pin",
            Self::Redeem => "/api/redeem",
        }
    }

    /// Fields that must validate before this flow may be submitted.
    #[must_use]
    pub fn required_fields(self) -> &'static [Field] {
        const CARD_AND_PIN: [Field; 6] = [
            Field::CardNumber,
            Field::ExpiryMonth,
            Field::ExpiryYear,
            Field::Cvv,
            Field::NewPin,
            Field::ConfirmPin,
        ];
        match self {
            Self::PersonalizePin => &CARD_AND_PIN,
            Self::CheckBalance | Self::RegisterCard | Self::Redeem => &Field::CARD,
        }
    }

    /// `formData` action tag; `None` for flows that send `cardData`.
    #[must_use]
    pub fn action(self) -> Option<Action> {
        match self {
            Self::CheckBalance => Some(Action::CheckBalance),
            Self::RegisterCard => Some(Action::RegisterCard),
            Self::PersonalizePin => Some(Action::PersonalizePin),
            Self::Redeem => None,
        }
    }
}

/// The `action` tag carried inside `formData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "checkBalance")]
    CheckBalance,
    #[serde(rename = "registerCard")]
    RegisterCard,
    #[serde(rename = "personalizePIN")]
    PersonalizePin,
}

/// Card fields of the flat gift card sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormData {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    #[serde(rename = "newPIN", default, skip_serializing_if = "Option::is_none")]
    pub new_pin: Option<String>,
    #[serde(rename = "confirmPIN", default, skip_serializing_if = "Option::is_none")]
    pub confirm_pin: Option<String>,
    pub action: Action,
}

/// Card fields of the redemption wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
}

/// Section-specific payload; serializes as either `formData` or `cardData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    FormData(FormData),
    CardData(CardData),
}

/// One business request: the token plus the section's field values.
#[derive(Debug, Clone, Serialize)]
pub struct BusinessRequest {
    #[serde(skip)]
    pub flow: Flow,
    pub token: AccessToken,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Answer of a business capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct BusinessResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl BusinessResponse {
    #[must_use]
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

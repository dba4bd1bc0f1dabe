use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque access token taken from the entry URL.
///
/// Guaranteed non-empty by construction. Immutable for the life of the page;
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl std::str::FromStr for AccessToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for AccessToken {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            Err(Error::MissingToken)
        } else {
            Ok(Self(s))
        }
    }
}

impl From<AccessToken> for String {
    fn from(t: AccessToken) -> Self {
        t.0
    }
}

/// Identifier of a form section (`"check"`, `"register"`, ...).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct SectionId(pub String);

impl From<&str> for SectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A user-editable input on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum Field {
    #[display("cardNumber")]
    CardNumber,
    #[display("expiryMonth")]
    ExpiryMonth,
    #[display("expiryYear")]
    ExpiryYear,
    #[display("cvv")]
    Cvv,
    #[display("newPIN")]
    NewPin,
    #[display("confirmPIN")]
    ConfirmPin,
}

impl Field {
    /// Card identification fields shared by every flow.
    pub const CARD: [Field; 4] = [
        Field::CardNumber,
        Field::ExpiryMonth,
        Field::ExpiryYear,
        Field::Cvv,
    ];

    /// PIN personalization fields.
    pub const PIN: [Field; 2] = [Field::NewPin, Field::ConfirmPin];
}

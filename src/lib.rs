#![doc = include_str!("../README.md")]

pub mod authority;
#[cfg(feature = "client")]
pub mod client;
pub mod error;
pub mod form;
pub mod page;
pub mod presenter;
#[cfg(feature = "relay")]
pub mod relay;
pub mod session;
pub mod store;
pub mod submission;
pub mod types;
pub mod validation;

// Re-exports for convenient access
pub use authority::{
    Action, Authority, BusinessRequest, BusinessResponse, CardData, Flow, FormData, Payload,
    TokenData, TokenValidation, TransportError,
};
#[cfg(feature = "client")]
pub use client::{AuthorityConfig, HttpAuthority};
pub use error::Error;
pub use form::{FormConfig, FormStateMachine, NavigationMode, SectionSpec, View};
pub use page::{Page, PageConfig, extract_token};
pub use presenter::{Denial, Presenter};
pub use session::{SessionConfig, SessionController, SessionState, Termination};
pub use store::{ExpiryStore, MemoryExpiryStore};
pub use submission::{SubmissionOutcome, SubmissionPipeline};
pub use types::{AccessToken, Field, SectionId};
pub use validation::{BrandPolicy, CardBrand, FieldError, ValidationResult};

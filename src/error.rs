#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Missing access token")]
    MissingToken,
    #[error("Session expired: {0}")]
    SessionExpired(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

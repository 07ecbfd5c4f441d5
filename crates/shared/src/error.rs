/// Shared error type used across relay and client.
#[derive(Debug, thiserror::Error)]
pub enum UnmeError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

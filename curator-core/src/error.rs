use thiserror::Error;

#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CuratorError {
    /// Transient failures are the only ones worth retrying: connection
    /// drops, timeouts, and rate limits. Everything else surfaces
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CuratorError::Connection(_) | CuratorError::Timeout(_) | CuratorError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for CuratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CuratorError::Timeout(err.to_string())
        } else if err.is_connect() {
            CuratorError::Connection(err.to_string())
        } else if err.is_decode() {
            CuratorError::Protocol(err.to_string())
        } else {
            CuratorError::Connection(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CuratorError::Connection("refused".into()).is_transient());
        assert!(CuratorError::Timeout("30s".into()).is_transient());
        assert!(CuratorError::RateLimited("429".into()).is_transient());
        assert!(!CuratorError::Authentication("401".into()).is_transient());
        assert!(!CuratorError::Protocol("bad shape".into()).is_transient());
        assert!(!CuratorError::Validation("empty name".into()).is_transient());
    }
}

//! Error types for Flotilla.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The backend could not produce a working instance after bounded retries.
    #[error("Provisioning failed for {runner}: {message}")]
    Provision { runner: String, message: String },

    /// The control plane rejected a token or deletion request.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Expected-absent resource. Callers treat this as success.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or rate-limit failure. Retried by the next reconciliation cycle.
    #[error("Transient API error: {0}")]
    TransientApi(String),

    /// State store connectivity or consistency failure.
    #[error("State store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn provision(runner: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provision {
            runner: runner.into(),
            message: message.into(),
        }
    }

    /// Whether this error means "already absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error comes from the state store. Store failures are the
    /// only ones allowed to abort a reconciliation cycle.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Extension for collapsing "not found" into success.
pub trait IgnoreNotFound {
    fn ignore_not_found(self) -> Result<()>;
}

impl IgnoreNotFound for Result<()> {
    fn ignore_not_found(self) -> Result<()> {
        match self {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_not_found() {
        let absent: Result<()> = Err(Error::NotFound("runner:x".to_string()));
        assert!(absent.ignore_not_found().is_ok());

        let transient: Result<()> = Err(Error::TransientApi("timeout".to_string()));
        assert!(transient.ignore_not_found().is_err());
    }

    #[test]
    fn test_store_classification() {
        assert!(Error::Store("connection refused".to_string()).is_store());
        assert!(!Error::provision("r-1", "boom").is_store());
    }
}

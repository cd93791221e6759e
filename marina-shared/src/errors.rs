//! Error taxonomy for marina.
//!
//! A container exiting non-zero is not an error: it is reported as a
//! build outcome by the orchestrator. Everything here aborts the run.

use thiserror::Error;

/// Errors raised by the build engine.
#[derive(Debug, Error)]
pub enum MarinaError {
    /// The build manifest is malformed or incomplete.
    ///
    /// Raised before any container is created.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// The container engine is unreachable or answered with a server error.
    #[error("container engine error: {0}")]
    Engine(String),

    /// The log-forwarding worker failed while streaming container output.
    #[error("log stream error: {0}")]
    Stream(String),

    /// Invalid run-level configuration (bad cache spec, bad env entry, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Host filesystem failure (working directory, context copy, archive file).
    #[error("storage error: {0}")]
    Storage(String),

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MarinaError {
    /// Whether this error came from the container engine.
    pub fn is_engine_fault(&self) -> bool {
        matches!(self, MarinaError::Engine(_))
    }

    /// Prefix the message with `context`, keeping the kind.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        let wrap = |msg: String| format!("{}: {}", context, msg);
        match self {
            MarinaError::Manifest(m) => MarinaError::Manifest(wrap(m)),
            MarinaError::Engine(m) => MarinaError::Engine(wrap(m)),
            MarinaError::Stream(m) => MarinaError::Stream(wrap(m)),
            MarinaError::Config(m) => MarinaError::Config(wrap(m)),
            MarinaError::Storage(m) => MarinaError::Storage(wrap(m)),
            MarinaError::Internal(m) => MarinaError::Internal(wrap(m)),
        }
    }
}

impl From<std::io::Error> for MarinaError {
    fn from(err: std::io::Error) -> Self {
        MarinaError::Storage(err.to_string())
    }
}

pub type MarinaResult<T> = Result<T, MarinaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = MarinaError::Manifest("missing key: name".into());
        assert_eq!(err.to_string(), "invalid manifest: missing key: name");

        let err = MarinaError::Engine("connection refused".into());
        assert_eq!(err.to_string(), "container engine error: connection refused");
    }

    #[test]
    fn test_with_context_keeps_kind() {
        let err = MarinaError::Engine("no such image".into()).with_context("building runner");
        assert!(err.is_engine_fault());
        assert_eq!(
            err.to_string(),
            "container engine error: building runner: no such image"
        );
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MarinaError = io.into();
        assert!(matches!(err, MarinaError::Storage(_)));
        assert!(!err.is_engine_fault());
    }
}

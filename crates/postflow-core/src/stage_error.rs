//! Video pipeline stage errors
//!
//! A stage either fails in a way that may succeed on a later attempt
//! (service hiccups, timeouts) or in a way that never will (an unknown voice,
//! missing input images). The runner retries the former up to the stage's
//! attempt ceiling and fails the job immediately on the latter.

use std::fmt;

/// Stage execution error that can be either recoverable or terminal
#[derive(Debug)]
pub struct StageError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl StageError {
    /// Create a terminal stage error
    ///
    /// Use for failures a retry cannot fix, such as an unsupported voice or
    /// input media that no longer resolves.
    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Create a recoverable stage error
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for StageError {
    /// Plain errors are assumed transient.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to mark failures as terminal
pub trait StageResultExt<T> {
    fn terminal(self) -> Result<T, StageError>;
}

impl<T, E: Into<anyhow::Error>> StageResultExt<T> for Result<T, E> {
    fn terminal(self) -> Result<T, StageError> {
        self.map_err(|e| StageError::terminal(e.into()))
    }
}

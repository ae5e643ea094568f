//! Error types for hpltune
//!
//! Every failure a tuning run can hit maps to one variant of [`TuneError`].
//! Errors are never recovered inside a phase: they abort the phase and are
//! surfaced to the orchestrator unchanged, which aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tuning operations
#[derive(Error, Debug)]
pub enum TuneError {
    /// Reading a resource fact from the cluster failed
    #[error("Resource probe failed ({fact}): {message}")]
    Probe { fact: &'static str, message: String },

    /// Affinity table, scheduler output or sweep log could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The scheduler rejected a job submission
    #[error("Job submission failed for '{job}': {message}")]
    Submission { job: String, message: String },

    /// The scheduler could not cancel a job
    #[error("Job cancellation failed for '{job}': {message}")]
    Cancellation { job: String, message: String },

    /// The scheduler is not answering
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    /// No running job matches the requested name
    #[error("No running job named '{0}'")]
    NotFound(String),

    /// Polling ran out of attempts; the job may still be running
    #[error("Job '{job}' did not complete after {attempts} attempts")]
    Timeout { job: String, attempts: u32 },

    /// The sweep produced no usable result rows
    #[error("No benchmark results found: {0}")]
    NoData(String),

    /// An artifact could not be rendered because a field is missing
    #[error("Template error in {artifact}: missing or invalid field '{field}'")]
    Template {
        artifact: &'static str,
        field: &'static str,
    },

    /// I/O error during artifact or result file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run aborted through the cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TuneError>,
    },
}

impl TuneError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a probe error for the named resource fact
    pub fn probe(fact: &'static str, message: impl Into<String>) -> Self {
        Self::Probe {
            fact,
            message: message.into(),
        }
    }

    /// Create a submission error
    pub fn submission(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Submission {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(artifact: &'static str, field: &'static str) -> Self {
        Self::Template { artifact, field }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &TuneError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error is a scheduler-query transient that a poll loop may
    /// absorb. Everything else aborts the phase.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), Self::Unavailable(_) | Self::Io { .. })
    }
}

/// Result type alias for tuning operations
pub type Result<T> = std::result::Result<T, TuneError>;

impl From<serde_json::Error> for TuneError {
    fn from(err: serde_json::Error) -> Self {
        TuneError::Config(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TuneError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = TuneError::io("/tmp/hpl.dat", io_err);
        assert!(err.to_string().contains("/tmp/hpl.dat"));
    }

    #[test]
    fn test_root_unwraps_context() {
        let err = TuneError::NoData("empty sweep".into()).with_context("sweep phase");
        assert!(matches!(err.root(), TuneError::NoData(_)));
        assert!(err.to_string().starts_with("sweep phase: "));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TuneError::Unavailable("squeue timed out".into()).is_transient());
        assert!(!TuneError::NotFound("HPL-Benchmark".into()).is_transient());
        assert!(!TuneError::Timeout {
            job: "HPL-Benchmark".into(),
            attempts: 60
        }
        .is_transient());
    }
}

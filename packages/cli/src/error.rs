use std::path::PathBuf;

use thiserror::Error;

/// Fatal error raised by a command.
///
/// The CLI does not recover from any of these: every variant propagates to
/// `main`, which logs it and exits non-zero. The user re-runs after fixing
/// the condition.
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or malformed local configuration, with a remediation hint.
    #[error("{0}")]
    Config(String),

    /// TCP/TLS or WebSocket level failure.
    #[error("{0}")]
    Transport(String),

    /// The server answered, but not with what the protocol promises
    /// (non-200 status, error frame, missing daycare hostname, …).
    #[error("{0}")]
    Protocol(String),

    /// Local filesystem trouble, tagged with the offending path.
    #[error("{path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A precondition the user can fix, described specifically.
    #[error("{0}")]
    Validation(String),
}

impl CliError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::Fs {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

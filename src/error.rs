use std::io;

use thiserror::Error;

/// Errors raised while building, running, or parsing a GPSBabel conversion.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action {action} requires a filename, and none was given")]
    MissingFilename { action: &'static str },

    #[error("file format '{0}' is unknown")]
    UnknownFormat(String),

    #[error("filter '{0}' is unknown")]
    UnknownFilter(String),

    #[error("'{owner}' has no such option '{option}'")]
    InvalidOption { owner: String, option: String },

    #[error("unknown character set '{0}'")]
    UnknownCharset(String),

    #[error("malformed GPX document at byte {position}: {reason}")]
    MalformedDocument { position: u64, reason: String },

    #[error("cannot convert '{text}' for field '{field}'")]
    Coercion { field: &'static str, text: String },

    #[error("gpsbabel reported an error: {stderr}")]
    ProcessFailure { stderr: String },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported GPSBabel version '{0}'")]
    UnsupportedVersion(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for failures of the child process itself, including a failed spawn.
    pub fn is_process_failure(&self) -> bool {
        matches!(self, Self::ProcessFailure { .. } | Self::Spawn { .. })
    }

    /// True for errors raised while validating an action, which never touch the chain.
    pub fn is_chain_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownAction(_)
                | Self::MissingFilename { .. }
                | Self::UnknownFormat(_)
                | Self::UnknownFilter(_)
                | Self::InvalidOption { .. }
                | Self::UnknownCharset(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

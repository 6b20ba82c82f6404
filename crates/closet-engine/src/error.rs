use std::path::PathBuf;

use thiserror::Error;

/// Failure of one logical call to the classification provider.
///
/// The set is closed so callers can match on the kind instead of on text.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable credential; surfaced at startup and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider answered with a non-retryable failure status.
    #[error("upstream request failed ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// Every credential hit a quota or transport failure.
    #[error("all API credentials exhausted after {attempts} attempt(s); last error: {last_error}")]
    AllCredentialsExhausted { attempts: usize, last_error: String },

    /// The provider succeeded but its text could not be used.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Upstream { .. } => "upstream",
            Self::AllCredentialsExhausted { .. } => "credentials_exhausted",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

#[derive(Debug, Error)]
pub enum StylistError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("need at least {required} items in wardrobe, found {found}")]
    NotEnoughItems { required: usize, found: usize },

    #[error("wardrobe item {0} not found")]
    ItemNotFound(i64),

    #[error("unsupported image format for {0}")]
    UnsupportedImage(String),

    #[error("failed to read image {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

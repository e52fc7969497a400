use reqwest::StatusCode;
use thiserror::Error;
use wvdl_mp4::decrypt::DecryptError;

/// Coarse classification of [`Error`] used by callers to decide what to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed base64 or binary input.
    Decode,
    /// The HTTP request itself failed.
    Transport,
    /// The server answered, but not with what was expected.
    Protocol,
    /// A manifest or container could not be parsed.
    Format,
    /// Fewer segments were written than requested.
    PartialData,
    Cancelled,
    /// The external decryption tool failed.
    Tool,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("cannot decode base64 {what}: {source}")]
    Base64 {
        what: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("license request to {url} failed: {source}")]
    LicenseTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    #[error("license rejected with error code {0}")]
    LicenseRejected(i64),

    #[error("content decryption module failed: {0}")]
    Cdm(String),

    #[error("no asset with flavor {0} in playback response")]
    NoMatchingVariant(String),

    #[error("playback response has no entries")]
    Unavailable,

    #[error("{0} is not a media playlist")]
    UnsupportedManifestType(String),

    #[error("cannot parse {0} as hls playlist")]
    Playlist(String),

    #[error("media playlist {0} declares no key")]
    MissingKey(String),

    #[error("media playlist {0} declares no init segment")]
    MissingMap(String),

    #[error("malformed key and urls: {0}")]
    KeyAndUrls(String),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error("incomplete download: wrote {written} of {expected} segments")]
    Incomplete { expected: usize, written: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{tool} failed with {status}: {output}")]
    Tool {
        tool: String,
        status: String,
        output: String,
    },

    #[error("cannot read config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKeyId(_) | Self::Base64 { .. } => ErrorKind::Decode,
            Self::Transport { .. } | Self::LicenseTransport { .. } => ErrorKind::Transport,
            Self::Status { .. }
            | Self::UnexpectedResponse { .. }
            | Self::LicenseRejected(_)
            | Self::Cdm(_)
            | Self::Unavailable
            | Self::NoMatchingVariant(_)
            | Self::MissingKey(_) => ErrorKind::Protocol,
            Self::UnsupportedManifestType(_)
            | Self::Playlist(_)
            | Self::MissingMap(_)
            | Self::KeyAndUrls(_)
            | Self::Decrypt(_)
            | Self::Config { .. } => ErrorKind::Format,
            Self::Incomplete { .. } => ErrorKind::PartialData,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Tool { .. } | Self::Io(_) => ErrorKind::Tool,
        }
    }

    /// Worth another attempt under a caller level retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }

    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    pub(crate) fn unexpected(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnexpectedResponse {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<wvdl_mp4::Error> for Error {
    fn from(value: wvdl_mp4::Error) -> Self {
        match value {
            wvdl_mp4::Error::InvalidKeyId(x) => Self::InvalidKeyId(x),
            x => Self::Decrypt(DecryptError::Parse(x)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

/// The errors that may occur when reading or building mp4 data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read mp4 data: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot decode box type: {0}")]
    BoxType(#[from] std::string::FromUtf8Error),

    #[error("cannot decode {0}")]
    Decode(String),

    #[cfg(feature = "pssh")]
    #[error("invalid key id: {0}")]
    InvalidKeyId(String),
}

impl Error {
    pub fn new_decode_err<T: Into<String>>(reason: T) -> Self {
        Self::Decode(reason.into())
    }

    /// Returns true if the error happened while reading past the available data.
    pub fn is_read_err(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

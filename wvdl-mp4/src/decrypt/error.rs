use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecryptError {
    /// Neither movie fragments nor a `mvex` box.
    #[error("mp4 data is not fragmented")]
    NotFragmented,

    /// A `moof` came before any `moov`.
    #[error("mp4 data has no initialization segment")]
    MissingInit,

    #[error("key must be 16 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("iv must be 8 or 16 bytes, got {0}")]
    InvalidIvSize(usize),

    #[error("key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid mp4 data: {0}")]
    InvalidFormat(String),

    #[error("protection scheme {0} is not one of cenc, cens, cbc1, cbcs")]
    UnsupportedScheme(String),

    #[error("bad subsample map: {0}")]
    SubsampleError(String),

    #[error("senc describes {count} samples, sample {index} requested")]
    SampleOutOfRange { index: usize, count: usize },

    /// The fragment is stored in clear.
    #[error("fragment has no sample encryption information")]
    NoSampleEncryption,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] crate::Error),
}

pub type Result<T> = std::result::Result<T, DecryptError>;

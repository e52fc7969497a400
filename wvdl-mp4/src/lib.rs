#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate contains a mp4 parser ported from [shaka-player](https://github.com/shaka-project/shaka-player) project,
//! extended with the pieces needed to acquire protected streams.
//!
//! # Optional Features
//!
//! The following are a list of [Cargo features](https://doc.rust-lang.org/stable/cargo/reference/features.html#the-features-section) that can be
//! enabled or disabled:
//!
//! - **decrypt**: Enables `CENC`, `CENS`, `CBC1` and `CBCS` decryption of fragmented mp4 data.
//! - **pssh**: Enables building Widevine protection headers.
//! - **fixture**: Exposes a builder for small synthetic encrypted fragmented mp4 files.

#[cfg(feature = "decrypt")]
#[cfg_attr(docsrs, doc(cfg(feature = "decrypt")))]
pub mod boxes;

#[cfg(feature = "decrypt")]
#[cfg_attr(docsrs, doc(cfg(feature = "decrypt")))]
pub mod decrypt;

#[cfg(all(feature = "decrypt", any(test, feature = "fixture")))]
#[cfg_attr(docsrs, doc(cfg(feature = "fixture")))]
pub mod fixture;

#[cfg(feature = "pssh")]
#[cfg_attr(docsrs, doc(cfg(feature = "pssh")))]
pub mod pssh;

mod error;
mod parser;
mod reader;

pub use error::Error;
pub use parser::*;
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `wvdl_mp4::Error`.
pub type Result<T> = std::result::Result<T, Error>;

//! CENC/CBCS decryption for fragmented MP4 data.
//!
//! This module provides native Rust decryption for Common Encryption (CENC)
//! and Sample-based AES-CBC encryption (CBCS) protected MP4 content.
//!
//! # Supported Encryption Schemes
//!
//! | Scheme | Description | Cipher Mode |
//! |--------|-------------|-------------|
//! | `cenc` | AES-CTR full sample encryption | AES-128-CTR |
//! | `cens` | AES-CTR subsample encryption | AES-128-CTR |
//! | `cbc1` | AES-CBC full sample encryption | AES-128-CBC |
//! | `cbcs` | AES-CBC pattern encryption | AES-128-CBC (1:9 pattern) |
//!
//! # Quick Start
//!
//! ```no_run
//! use wvdl_mp4::decrypt::Mp4Decrypter;
//! use std::fs;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let decrypter = Mp4Decrypter::from_hex("100b6c20940f779a4589152b57d2dacb")?;
//!     let data = fs::read("encrypted.mp4")?;
//!     fs::write("decrypted.mp4", decrypter.decrypt(&data)?)?;
//!     Ok(())
//! }
//! ```
//!
//! Every fragment is decrypted on its own. Fragments without a `senc` box are
//! written as they are, so streams mixing clear and protected fragments work
//! in any order.

mod cipher;
mod container;
mod context;
mod decrypter;
mod error;
mod fragment;

pub use cipher::{Cipher, Scheme};
pub use container::{DecryptSummary, Mp4Decrypter, is_fragmented};
pub use context::{DecryptContext, TrackDecryptInfo};
pub use decrypter::SingleSampleDecrypter;
pub use error::{DecryptError, Result};
pub use fragment::decrypt_fragment;

//! Acquire, reassemble and decrypt Widevine protected HLS streams.
//!
//! A [`Session`] resolves a content identifier into a [`Manifest`], builds the
//! protection header for its key, exchanges it for a content key through a
//! [`CdmProvider`], downloads every segment with a bounded number of requests
//! in flight and writes them back in order. Audio is decrypted in process with
//! [`wvdl_mp4::decrypt`], videos are handed to an external `mp4decrypt`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wvdl::{Credentials, EngineConfig, Events, RemoteCdm, Session};
//!
//! # async fn run() -> wvdl::Result<()> {
//! let config = EngineConfig::default();
//! let cdm = RemoteCdm::new(reqwest::Client::new(), "http://127.0.0.1:8786", "android", "secret");
//! let credentials = Credentials::new("<bearer token>", "<media user token>");
//! let session = Session::new(config, credentials, Arc::new(cdm), Events::none())?;
//!
//! session.download_track("1440818839", "track.m4a".as_ref()).await?;
//! # Ok(())
//! # }
//! ```

mod cdm;
mod client;
mod config;
mod error;
mod events;
mod fetch;
mod license;
mod manifest;
mod retry;
mod session;
mod tool;
mod writer;

pub use cdm::RemoteCdm;
pub use client::{Credentials, build_client};
pub use config::{
    AUDIO_FLAVOR, EngineConfig, LICENSE_URL, PLAYBACK_URL, RADIO_LICENSE_URL, RetryPolicy,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, Events, Stage};
pub use fetch::{FetchReport, Fetcher};
pub use license::{
    CdmProvider, ContentDecryption, ContentKey, LicenseClient, LicenseResponse, LicenseSession,
    LicenseState,
};
pub use manifest::{
    Asset, KeyReference, Manifest, ManifestResolver, PlaybackDescriptor, PlaybackEntry,
    parse_media_playlist, select_flavor,
};
pub use reqwest;
pub use session::{Counter, Download, Session};
pub use tool::{KeyAndUrls, Mp4DecryptTool};
pub use writer::{ReassemblyBuffer, Segment, WriteReport, write_ordered};
pub use wvdl_mp4::pssh::ProtectionHeader;

use crate::{
    Error, Result,
    client::{Credentials, build_client},
    config::EngineConfig,
    events::{Events, Stage},
    fetch::Fetcher,
    license::{CdmProvider, ContentKey, LicenseClient},
    manifest::{Manifest, ManifestResolver},
    tool::{KeyAndUrls, Mp4DecryptTool},
    writer::WriteReport,
};
use log::{debug, info};
use reqwest::Client;
use std::{
    fmt,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use wvdl_mp4::{
    decrypt::{DecryptSummary, Mp4Decrypter},
    pssh::ProtectionHeader,
};

/// Result of one finished download.
#[derive(Clone, Debug)]
pub struct Download {
    pub path: PathBuf,
    pub write: WriteReport,
    /// Present when the container was decrypted in process.
    pub summary: Option<DecryptSummary>,
}

/// Everything one account needs to download, passed explicitly instead of
/// living in globals.
pub struct Session {
    config: EngineConfig,
    resolver: ManifestResolver,
    license: LicenseClient,
    fetcher: Fetcher,
    tool: Mp4DecryptTool,
    cdm: Arc<dyn CdmProvider>,
    events: Events,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        config: EngineConfig,
        credentials: Credentials,
        cdm: Arc<dyn CdmProvider>,
        events: Events,
    ) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self::with_client(client, config, credentials, cdm, events))
    }

    pub fn with_client(
        client: Client,
        config: EngineConfig,
        credentials: Credentials,
        cdm: Arc<dyn CdmProvider>,
        events: Events,
    ) -> Self {
        let cancel = CancellationToken::new();

        Self {
            resolver: ManifestResolver::new(client.clone(), credentials.clone(), &config),
            license: LicenseClient::new(client.clone(), credentials, config.clone()),
            fetcher: Fetcher::new(client, &config, events.clone(), cancel.clone()),
            tool: Mp4DecryptTool::new(&config.decrypt_tool),
            config,
            cdm,
            events,
            cancel,
        }
    }

    /// Token that cancels every download of this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(())
    }

    /// Build the protection header for `manifest` and exchange it for a key.
    pub async fn content_key(&self, adam_id: &str, manifest: &Manifest) -> Result<ContentKey> {
        let kid = &manifest.require_key()?.kid;
        let header = ProtectionHeader::new("", kid)?;
        debug!("kid {} for {}", header.key_id_hex(), adam_id);

        self.ensure_running()?;
        self.events.stage(Stage::AcquiringLicense);

        let license = &self.license;
        let cdm = self.cdm.as_ref();
        let header = &header;

        self.config
            .retry
            .run("license", move |_| license.acquire(cdm, adam_id, header))
            .await
    }

    /// Download and decrypt one audio track into `output`.
    pub async fn download_track(&self, adam_id: &str, output: &Path) -> Result<Download> {
        self.ensure_running()?;
        self.events.stage(Stage::ResolvingManifest);

        let resolver = &self.resolver;
        let manifest = self
            .config
            .retry
            .run("playback", move |_| resolver.resolve_audio(adam_id))
            .await?;
        let key = self.content_key(adam_id, &manifest).await?;

        self.ensure_running()?;
        self.events.stage(Stage::Downloading);

        let urls = manifest.segment_urls();
        self.fetcher.probe_size(&urls).await;

        let mut data = Vec::new();
        let write = self.fetcher.fetch(&urls, &mut data).await?.write.check()?;

        self.events.stage(Stage::Decrypting);
        let summary = decrypt_into(key, data, output.to_owned()).await?;
        info!(
            "decrypted {} fragments ({} passed through) into {}",
            summary.fragments,
            summary.passed_through,
            output.display()
        );

        self.events.stage(Stage::Done);
        Ok(Download {
            path: output.to_owned(),
            write,
            summary: Some(summary),
        })
    }

    /// Resolve a video playlist into the key and segment list hand-off.
    pub async fn key_and_urls(&self, playlist_url: &str, adam_id: &str) -> Result<KeyAndUrls> {
        self.ensure_running()?;
        self.events.stage(Stage::ResolvingManifest);

        let resolver = &self.resolver;
        let manifest = self
            .config
            .retry
            .run("playlist", move |_| resolver.resolve_video(playlist_url))
            .await?;
        let key = self.content_key(adam_id, &manifest).await?;

        Ok(KeyAndUrls::new(&key.to_hex(), manifest.segment_urls()))
    }

    /// Ask the playback endpoint for the media playlist of a video.
    pub async fn video_playlist(&self, adam_id: &str) -> Result<String> {
        self.ensure_running()?;
        self.events.stage(Stage::ResolvingManifest);

        let resolver = &self.resolver;
        self.config
            .retry
            .run("playback", move |_| resolver.resolve_video_url(adam_id))
            .await
    }

    /// Download a video. Without `playlist_url` the playback endpoint is asked for it.
    pub async fn download_video(
        &self,
        playlist_url: Option<&str>,
        adam_id: &str,
        output: &Path,
    ) -> Result<Download> {
        let playlist_url = match playlist_url {
            Some(x) => x.to_owned(),
            None => self.video_playlist(adam_id).await?,
        };

        let artifact = self.key_and_urls(&playlist_url, adam_id).await?;
        self.decrypt_video(&artifact, output).await
    }

    /// Fetch the segments of `artifact` into a temporary file and hand it to
    /// the external tool. A partial download still produces `output` but is
    /// reported as [`Error::Incomplete`].
    pub async fn decrypt_video(&self, artifact: &KeyAndUrls, output: &Path) -> Result<Download> {
        self.ensure_running()?;
        self.events.stage(Stage::Downloading);
        self.fetcher.probe_size(&artifact.urls).await;

        let temp = tempfile::Builder::new()
            .prefix("enc_mv_data-")
            .suffix(".mp4")
            .tempfile()?;
        let mut file = File::from_std(temp.as_file().try_clone()?);
        let report = self.fetcher.fetch(&artifact.urls, &mut file).await?;
        file.flush().await?;
        drop(file);

        self.events.stage(Stage::Decrypting);
        self.tool.run(&artifact.key, temp.path(), output).await?;
        drop(temp);

        let write = report.write.check()?;
        self.events.stage(Stage::Done);

        Ok(Download {
            path: output.to_owned(),
            write,
            summary: None,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn decrypt_into(key: ContentKey, data: Vec<u8>, output: PathBuf) -> Result<DecryptSummary> {
    tokio::task::spawn_blocking(move || -> Result<DecryptSummary> {
        let decrypter = Mp4Decrypter::new(key.as_bytes())?;
        let dir = match output.parent() {
            Some(x) if !x.as_os_str().is_empty() => x,
            _ => Path::new("."),
        };

        // Dropped unpersisted on any error, so `output` only ever holds a whole file.
        let temp = tempfile::Builder::new()
            .prefix(".wvdl-")
            .suffix(".part")
            .tempfile_in(dir)?;
        let mut file = BufWriter::new(temp);
        let summary = decrypter.decrypt_to(&data, &mut file)?;
        file.into_inner()
            .map_err(|x| x.into_error())?
            .persist(&output)
            .map_err(|x| x.error)?;
        Ok(summary)
    })
    .await
    .map_err(|x| Error::Io(std::io::Error::other(x)))?
}

/// Outcome tally over a batch of downloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub total: usize,
    pub success: usize,
    pub unavailable: usize,
    pub error: usize,
}

impl Counter {
    pub fn record<T>(&mut self, result: &Result<T>) {
        self.total += 1;

        match result {
            Ok(_) => self.success += 1,
            Err(Error::Unavailable | Error::NoMatchingVariant(_)) => self.unavailable += 1,
            Err(_) => self.error += 1,
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {}, success: {}, unavailable: {}, error: {}",
            self.total, self.success, self.unavailable, self.error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_keeps_going() {
        let mut counter = Counter::default();

        counter.record(&Ok::<_, Error>(()));
        counter.record::<()>(&Err(Error::Unavailable));
        counter.record::<()>(&Err(Error::NoMatchingVariant("28:ctrp256".to_owned())));
        counter.record::<()>(&Err(Error::LicenseRejected(1)));

        assert_eq!(
            counter,
            Counter {
                total: 4,
                success: 1,
                unavailable: 2,
                error: 1
            }
        );
        assert_eq!(
            counter.to_string(),
            "total: 4, success: 1, unavailable: 2, error: 1"
        );
    }
}

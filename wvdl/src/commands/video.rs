use super::{EngineArgs, cancel_on_ctrlc};
use crate::progress::Progress;
use anyhow::Result;
use clap::Args;
use log::{info, warn};
use std::path::PathBuf;
use wvdl::{Error, KeyAndUrls};

/// Download a music video and decrypt it with mp4decrypt.
#[derive(Debug, Clone, Args)]
pub struct Video {
    /// Catalog id of the video, sent with the license request.
    #[arg(required = true, value_name = "ADAM_ID")]
    pub adam_id: String,

    /// Media playlist of the video. Asked from the playback endpoint when missing.
    #[arg(long, value_name = "URL")]
    pub playlist: Option<String>,

    /// Skip playlist and license requests and download from a `KEY;URL;URL...` string.
    #[arg(long, value_name = "KEY;URLS", conflicts_with = "playlist")]
    pub key_and_urls: Option<KeyAndUrls>,

    /// Only print the `KEY;URL;URL...` string instead of downloading.
    #[arg(long, conflicts_with = "key_and_urls")]
    pub print_key_and_urls: bool,

    /// Output file.
    #[arg(short, long, required_unless_present = "print_key_and_urls")]
    pub output: Option<PathBuf>,
}

impl Video {
    pub async fn execute(self, engine: &EngineArgs) -> Result<()> {
        let session = engine.session(Progress::new(&self.adam_id).into_events())?;
        cancel_on_ctrlc(session.cancel_token())?;

        let artifact = match self.key_and_urls {
            Some(artifact) => artifact,
            None => {
                let playlist = match &self.playlist {
                    Some(x) => x.to_owned(),
                    None => session.video_playlist(&self.adam_id).await?,
                };

                session.key_and_urls(&playlist, &self.adam_id).await?
            }
        };

        let Some(output) = self.output.filter(|_| !self.print_key_and_urls) else {
            println!("{}", artifact);
            return Ok(());
        };

        info!(
            "Downloading {} segments to {}",
            artifact.urls.len(),
            output.display()
        );

        match session.decrypt_video(&artifact, &output).await {
            Ok(download) => info!(
                "Saved {} ({} bytes)",
                download.path.display(),
                download.write.bytes
            ),
            Err(Error::Incomplete { expected, written }) => warn!(
                "Saved {} but only {} of {} segments were downloaded",
                output.display(),
                written,
                expected
            ),
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

use super::{EngineArgs, cancel_on_ctrlc};
use crate::progress::Progress;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use log::{error, info, warn};
use std::path::PathBuf;
use wvdl::{Counter, Error};

/// Download and decrypt songs.
#[derive(Debug, Clone, Args)]
pub struct Track {
    /// Catalog ids of the songs. Ids containing `ra.` are radio stations
    /// and use the radio license endpoint.
    #[arg(required = true, value_name = "ADAM_ID")]
    pub ids: Vec<String>,

    /// Output file. Only allowed when a single id is given.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for output files, named <ADAM_ID>.m4a.
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,
}

impl Track {
    fn output_for(&self, id: &str) -> PathBuf {
        match &self.output {
            Some(output) => output.to_owned(),
            None => self.directory.join(format!("{}.m4a", id.replace(['/', '\\'], "_"))),
        }
    }

    pub async fn execute(self, engine: &EngineArgs) -> Result<()> {
        if self.output.is_some() && self.ids.len() > 1 {
            bail!("--output can only be used with a single id, use --directory instead.");
        }

        let session = engine.session(Progress::new("track").into_events())?;
        cancel_on_ctrlc(session.cancel_token())?;

        let mut counter = Counter::default();

        for id in &self.ids {
            let output = self.output_for(id);
            info!("Downloading {} to {}", id.bold(), output.display());

            let result = session.download_track(id, &output).await;

            match &result {
                Ok(download) => info!(
                    "Saved {} ({} bytes)",
                    download.path.display(),
                    download.write.bytes
                ),
                Err(e @ (Error::Unavailable | Error::NoMatchingVariant(_))) => {
                    warn!("{} is unavailable: {}", id, e)
                }
                Err(e) => error!("{} failed: {}", id, e),
            }

            let cancelled = matches!(result, Err(Error::Cancelled));
            counter.record(&result);

            if cancelled {
                break;
            }
        }

        info!("{}", counter);

        if counter.error > 0 {
            bail!("{} of {} downloads failed.", counter.error, counter.total);
        }

        Ok(())
    }
}

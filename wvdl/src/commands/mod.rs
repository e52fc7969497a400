mod pssh;
mod track;
mod video;

pub use pssh::Pssh;
pub use track::Track;
pub use video::Video;

use anyhow::{Result, bail};
use clap::{ArgAction, ColorChoice, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use wvdl::{Credentials, EngineConfig, Events, RemoteCdm, Session, build_client};

/// Download and decrypt Widevine protected songs and music videos.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Show debug logs, repeat for logs of every crate.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only show warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Pssh(Pssh),
    Track(Track),
    Video(Video),
}

/// Options shared by every command that talks to the service.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineArgs {
    /// Json file overriding engine settings (endpoints, concurrency, retries).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Authorization bearer token.
    #[arg(long, global = true, env = "WVDL_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Media user token of the account.
    #[arg(long, global = true, env = "WVDL_USER_TOKEN", hide_env_values = true)]
    pub user_token: Option<String>,

    /// Base url of a pywidevine serve compatible CDM.
    #[arg(long, global = true, env = "WVDL_CDM_HOST", value_name = "URL")]
    pub cdm_host: Option<String>,

    /// Device name configured on the CDM server.
    #[arg(long, global = true, env = "WVDL_CDM_DEVICE", default_value = "android")]
    pub cdm_device: String,

    /// Secret key of the CDM server.
    #[arg(long, global = true, env = "WVDL_CDM_SECRET", hide_env_values = true)]
    pub cdm_secret: Option<String>,

    /// Maximum number of segments downloaded at once.
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,
}

impl EngineArgs {
    pub fn config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency as usize;
        }

        Ok(config)
    }

    pub fn session(&self, events: Events) -> Result<Session> {
        let (Some(bearer_token), Some(user_token)) = (&self.bearer_token, &self.user_token) else {
            bail!("--bearer-token and --user-token (or WVDL_BEARER_TOKEN / WVDL_USER_TOKEN) are required.");
        };

        let Some(cdm_host) = &self.cdm_host else {
            bail!("--cdm-host (or WVDL_CDM_HOST) is required to acquire licenses.");
        };

        let config = self.config()?;
        let client = build_client(&config)?;
        let cdm = RemoteCdm::new(
            client.clone(),
            cdm_host,
            &self.cdm_device,
            self.cdm_secret.clone().unwrap_or_default(),
        );

        Ok(Session::with_client(
            client,
            config,
            Credentials::new(bearer_token, user_token),
            Arc::new(cdm),
            events,
        ))
    }
}

/// First Ctrl+C cancels `token` so downloads stop cleanly, the second exits.
pub fn cancel_on_ctrlc(token: tokio_util::sync::CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }

        log::warn!("Cancelling, press Ctrl+C again to exit immediately.");
        token.cancel();
    })?;

    Ok(())
}

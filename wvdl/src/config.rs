use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

pub const PLAYBACK_URL: &str = "https://play.music.apple.com/WebObjects/MZPlay.woa/wa/webPlayback";
pub const LICENSE_URL: &str =
    "https://play.itunes.apple.com/WebObjects/MZPlay.woa/wa/acquireWebPlaybackLicense";
pub const RADIO_LICENSE_URL: &str =
    "https://play.itunes.apple.com/WebObjects/MZPlay.woa/web/radio/versions/1/license";
pub const AUDIO_FLAVOR: &str = "28:ctrp256";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Engine settings. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub playback_url: String,
    pub license_url: String,
    pub radio_license_url: String,
    /// Asset flavor selected for audio tracks. Matched exactly.
    pub audio_flavor: String,
    /// Segment requests in flight at once.
    pub concurrency: usize,
    /// HEAD requests in flight at once while probing sizes.
    pub probe_concurrency: usize,
    /// Capacity of the queue between fetch tasks and the writer.
    pub queue_capacity: usize,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub origin: String,
    pub referer: String,
    /// Path or name of the external tool decrypting videos.
    pub decrypt_tool: String,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playback_url: PLAYBACK_URL.to_owned(),
            license_url: LICENSE_URL.to_owned(),
            radio_license_url: RADIO_LICENSE_URL.to_owned(),
            audio_flavor: AUDIO_FLAVOR.to_owned(),
            concurrency: 10,
            probe_concurrency: 4,
            queue_capacity: 16,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: USER_AGENT.to_owned(),
            origin: "https://music.apple.com".to_owned(),
            referer: "https://music.apple.com/".to_owned(),
            decrypt_tool: "mp4decrypt".to_owned(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load overrides from a json file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_err = |reason: String| Error::Config {
            path: path.to_string_lossy().into_owned(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|x| config_err(x.to_string()))?;
        let config = serde_json::from_str::<Self>(&text).map_err(|x| config_err(x.to_string()))?;
        config.validate().map_err(config_err)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_owned());
        }

        if self.probe_concurrency == 0 {
            return Err("probe_concurrency must be at least 1".to_owned());
        }

        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".to_owned());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Radio stations use their own license endpoint.
    pub fn license_url_for(&self, adam_id: &str) -> &str {
        if adam_id.contains("ra.") {
            &self.radio_license_url
        } else {
            &self.license_url
        }
    }
}

/// Fixed attempt ceiling and fixed delay, applied by callers around whole operations.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 4, "retry": {{"attempts": 5}}}}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.probe_concurrency, 4);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay_ms, 1500);
        assert_eq!(config.audio_flavor, "28:ctrp256");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 0}}"#).unwrap();

        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn radio_ids_use_radio_endpoint() {
        let config = EngineConfig::default();
        assert_eq!(config.license_url_for("ra.978194965"), RADIO_LICENSE_URL);
        assert_eq!(config.license_url_for("1440818839"), LICENSE_URL);
    }
}

use crate::{Error, Result};
use log::debug;
use std::{fmt, path::Path, str::FromStr};
use tokio::{fs, process::Command};

/// Hand-off string of the video path: `key;url0;url1;...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAndUrls {
    /// `<track>:<hex key>` as the decryption tool expects it.
    pub key: String,
    pub urls: Vec<String>,
}

impl KeyAndUrls {
    /// Key for track 1, which is where videos keep their content.
    pub fn new(hex_key: &str, urls: Vec<String>) -> Self {
        Self {
            key: format!("1:{}", hex_key),
            urls,
        }
    }
}

impl FromStr for KeyAndUrls {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = s.split(';');
        let key = fields.next().unwrap_or_default().trim();

        if key.is_empty() || !key.contains(':') {
            return Err(Error::KeyAndUrls(format!("bad key field {:?}", key)));
        }

        let urls = fields
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .map(|x| x.to_owned())
            .collect::<Vec<_>>();

        if urls.is_empty() {
            return Err(Error::KeyAndUrls("no urls".to_owned()));
        }

        Ok(Self {
            key: key.to_owned(),
            urls,
        })
    }
}

impl fmt::Display for KeyAndUrls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;

        for url in &self.urls {
            write!(f, ";{}", url)?;
        }

        Ok(())
    }
}

/// External `mp4decrypt` compatible decryption tool.
#[derive(Clone, Debug)]
pub struct Mp4DecryptTool {
    program: String,
}

impl Mp4DecryptTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Decrypt `input` into `output` with `key` (`<track>:<hex key>`).
    pub async fn run(&self, key: &str, input: &Path, output: &Path) -> Result<()> {
        debug!(
            "running {} {} -> {}",
            self.program,
            input.display(),
            output.display()
        );

        let result = Command::new(&self.program)
            .arg("--key")
            .arg(key)
            .arg(input)
            .arg(output)
            .output()
            .await
            .map_err(|x| Error::Tool {
                tool: self.program.clone(),
                status: "not started".to_owned(),
                output: x.to_string(),
            })?;

        if !result.status.success() {
            let mut log = String::from_utf8_lossy(&result.stdout).into_owned();
            log.push_str(&String::from_utf8_lossy(&result.stderr));

            return Err(Error::Tool {
                tool: self.program.clone(),
                status: result.status.to_string(),
                output: log.trim().to_owned(),
            });
        }

        remove_stray_output(output).await;
        Ok(())
    }
}

/// Some builds leave an `out_<name>` copy next to the output.
async fn remove_stray_output(output: &Path) {
    let Some(name) = output.file_name() else {
        return;
    };

    let stray = output.with_file_name(format!("out_{}", name.to_string_lossy()));

    if fs::try_exists(&stray).await.unwrap_or(false) {
        debug!("removing {}", stray.display());
        let _ = fs::remove_file(&stray).await;
    }
}

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Args;
use wvdl::ProtectionHeader;

/// Print the protection header sent to the license endpoint.
#[derive(Debug, Clone, Args)]
pub struct Pssh {
    /// Base64 key id, as found in the media playlist key uri.
    #[arg(required = true, value_name = "KID_BASE64")]
    pub kid: String,

    /// Content id embedded in the header.
    #[arg(long, default_value = "")]
    pub content_id: String,

    /// Print a standard `pssh` box instead of the marker prefixed form.
    #[arg(long)]
    pub pssh_box: bool,
}

impl Pssh {
    pub fn execute(self) -> Result<()> {
        let header = ProtectionHeader::new(&self.content_id, &self.kid)?;

        if self.pssh_box {
            println!("{}", STANDARD.encode(header.to_pssh_box()));
        } else {
            println!("{}", header.to_base64());
        }

        log::info!("kid: {}", header.key_id_hex());
        Ok(())
    }
}

//! Challenge and response exchange with the license endpoint.
//!
//! A [`LicenseSession`] moves through `AwaitingChallenge -> AwaitingLicense ->
//! Done | Failed`. The cryptography lives behind [`ContentDecryption`], which
//! a [`CdmProvider`] opens once per session.

use crate::{
    Error, Result,
    client::{Credentials, check_status},
    config::EngineConfig,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use wvdl_mp4::pssh::ProtectionHeader;

pub const KEY_SYSTEM: &str = "com.widevine.alpha";

/// The two operations a provisioned content decryption module offers.
#[async_trait]
pub trait ContentDecryption: Send {
    async fn generate_challenge(&mut self, header: &ProtectionHeader) -> Result<Vec<u8>>;

    async fn derive_content_key(&mut self, license: &[u8]) -> Result<Vec<u8>>;

    /// Release whatever the module holds for this session.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens a fresh [`ContentDecryption`] for every license session.
#[async_trait]
pub trait CdmProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ContentDecryption>>;
}

/// Content key derived from a license.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey(Vec<u8>);

impl ContentKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

#[derive(Debug, Serialize)]
struct LicenseRequest<'a> {
    challenge: String,
    #[serde(rename = "key-system")]
    key_system: &'a str,
    uri: String,
    #[serde(rename = "adamId")]
    adam_id: &'a str,
    #[serde(rename = "isLibrary")]
    is_library: bool,
    #[serde(rename = "user-initiated")]
    user_initiated: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LicenseResponse {
    #[serde(rename = "errorCode")]
    pub error_code: i64,
    pub status: i64,
    pub license: Option<String>,
    #[serde(rename = "renew-after")]
    pub renew_after: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LicenseState {
    AwaitingChallenge,
    AwaitingLicense,
    Done,
    Failed,
}

/// State of one license attempt. Never reused after `Done` or `Failed`.
pub struct LicenseSession<'a> {
    adam_id: &'a str,
    header: &'a ProtectionHeader,
    cdm: Box<dyn ContentDecryption>,
    challenge: Vec<u8>,
    content_key: Option<ContentKey>,
    state: LicenseState,
}

impl<'a> LicenseSession<'a> {
    pub fn new(
        adam_id: &'a str,
        header: &'a ProtectionHeader,
        cdm: Box<dyn ContentDecryption>,
    ) -> Self {
        Self {
            adam_id,
            header,
            cdm,
            challenge: Vec::new(),
            content_key: None,
            state: LicenseState::AwaitingChallenge,
        }
    }

    pub fn state(&self) -> &LicenseState {
        &self.state
    }

    pub fn content_key(&self) -> Option<&ContentKey> {
        self.content_key.as_ref()
    }

    async fn request_challenge(&mut self) -> Result<()> {
        self.challenge = self.cdm.generate_challenge(self.header).await?;
        self.state = LicenseState::AwaitingLicense;
        Ok(())
    }

    fn request_body(&self) -> LicenseRequest<'a> {
        LicenseRequest {
            challenge: STANDARD.encode(&self.challenge),
            key_system: KEY_SYSTEM,
            uri: format!("data:;base64,{}", self.header.to_base64()),
            adam_id: self.adam_id,
            is_library: false,
            user_initiated: true,
        }
    }

    async fn accept(&mut self, response: LicenseResponse) -> Result<()> {
        if response.error_code != 0 || response.status != 0 {
            return Err(Error::LicenseRejected(response.error_code));
        }

        let license = response
            .license
            .ok_or_else(|| Error::Cdm("license response carries no license".to_owned()))?;
        let license = STANDARD.decode(license).map_err(|x| Error::Base64 {
            what: "license",
            source: x,
        })?;

        let key = self.cdm.derive_content_key(&license).await?;
        self.content_key = Some(ContentKey::new(key));
        self.state = LicenseState::Done;
        Ok(())
    }
}

/// Sends license requests for one account.
#[derive(Clone, Debug)]
pub struct LicenseClient {
    client: Client,
    credentials: Credentials,
    config: EngineConfig,
}

impl LicenseClient {
    pub fn new(client: Client, credentials: Credentials, config: EngineConfig) -> Self {
        Self {
            client,
            credentials,
            config,
        }
    }

    /// Run one full license exchange and return the content key.
    pub async fn acquire(
        &self,
        provider: &dyn CdmProvider,
        adam_id: &str,
        header: &ProtectionHeader,
    ) -> Result<ContentKey> {
        let mut session = LicenseSession::new(adam_id, header, provider.open().await?);
        let result = self.drive(&mut session).await;

        if result.is_err() {
            session.state = LicenseState::Failed;
        }

        if let Err(e) = session.cdm.close().await {
            warn!("cannot close cdm session: {}", e);
        }

        result
    }

    async fn drive(&self, session: &mut LicenseSession<'_>) -> Result<ContentKey> {
        session.request_challenge().await?;

        let url = self.config.license_url_for(session.adam_id);
        debug!("requesting license for {} from {}", session.adam_id, url);

        let request = self.client.post(url).json(&session.request_body());
        let response = self
            .credentials
            .authorize(request)
            .send()
            .await
            .map_err(|x| Error::LicenseTransport {
                url: url.to_owned(),
                source: x,
            })?;
        check_status(url, response.status())?;

        let text = response.text().await.map_err(|x| Error::LicenseTransport {
            url: url.to_owned(),
            source: x,
        })?;
        let response =
            serde_json::from_str::<LicenseResponse>(&text).map_err(|x| Error::unexpected(url, x))?;
        debug!(
            "license response error_code={} status={} renew_after={}",
            response.error_code, response.status, response.renew_after
        );

        session.accept(response).await?;
        session
            .content_key
            .clone()
            .ok_or_else(|| Error::Cdm("no content key derived".to_owned()))
    }
}

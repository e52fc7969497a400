//! [`CdmProvider`] backed by a pywidevine serve compatible HTTP API.

use crate::{
    Error, Result,
    license::{CdmProvider, ContentDecryption},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use wvdl_mp4::pssh::ProtectionHeader;

const SECRET_HEADER: &str = "X-Secret-Key";

#[derive(Clone, Debug)]
pub struct RemoteCdm {
    client: Client,
    host: String,
    device: String,
    secret: String,
}

impl RemoteCdm {
    pub fn new(
        client: Client,
        host: impl Into<String>,
        device: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            host: host.into().trim_end_matches('/').to_owned(),
            device: device.into(),
            secret: secret.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.host, self.device, path)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>> {
        let url = self.url(path);
        let request = match body {
            Some(body) => self.client.post(&url).json(&body),
            None => self.client.get(&url),
        };

        let response = request
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .map_err(|x| Error::transport(&url, x))?;
        let text = response
            .text()
            .await
            .map_err(|x| Error::transport(&url, x))?;
        let response = serde_json::from_str::<ApiResponse<T>>(&text)
            .map_err(|x| Error::unexpected(&url, x))?;

        if response.status != 200 {
            return Err(Error::Cdm(format!("{} ({})", response.message, path)));
        }

        Ok(response.data)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        self.request(path, body)
            .await?
            .ok_or_else(|| Error::Cdm(format!("missing response data ({})", path)))
    }
}

#[async_trait]
impl CdmProvider for RemoteCdm {
    async fn open(&self) -> Result<Box<dyn ContentDecryption>> {
        let data = self.call::<OpenResponse>("open", None).await?;
        debug!("opened remote cdm session {}", data.session_id);

        Ok(Box::new(RemoteSession {
            cdm: self.clone(),
            session_id: data.session_id,
            open: true,
        }))
    }
}

struct RemoteSession {
    cdm: RemoteCdm,
    session_id: String,
    open: bool,
}

#[async_trait]
impl ContentDecryption for RemoteSession {
    async fn generate_challenge(&mut self, header: &ProtectionHeader) -> Result<Vec<u8>> {
        let data = self
            .cdm
            .call::<ChallengeResponse>(
                "get_license_challenge/STREAMING",
                Some(serde_json::json!({
                    "session_id": self.session_id,
                    "init_data": STANDARD.encode(header.to_pssh_box()),
                    "privacy_mode": false,
                })),
            )
            .await?;

        STANDARD
            .decode(data.challenge_b64)
            .map_err(|x| Error::Base64 {
                what: "challenge",
                source: x,
            })
    }

    async fn derive_content_key(&mut self, license: &[u8]) -> Result<Vec<u8>> {
        self.cdm
            .request::<serde_json::Value>(
                "parse_license",
                Some(serde_json::json!({
                    "session_id": self.session_id,
                    "license_message": STANDARD.encode(license),
                })),
            )
            .await?;

        let data = self
            .cdm
            .call::<KeysResponse>(
                "get_keys/CONTENT",
                Some(serde_json::json!({ "session_id": self.session_id })),
            )
            .await?;

        let key = data
            .keys
            .into_iter()
            .find(|x| x.r#type == "CONTENT")
            .ok_or_else(|| Error::Cdm("license carries no content key".to_owned()))?;
        debug!("content key for kid {}", key.key_id);

        hex::decode(&key.key).map_err(|x| Error::Cdm(format!("invalid content key: {}", x)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.cdm
                .request::<serde_json::Value>(&format!("close/{}", self.session_id), None)
                .await?;
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OpenResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge_b64: String,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    keys: Vec<KeyResponse>,
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    key_id: String,
    key: String,
    r#type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    fn ok(data: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 200,
            "message": "Success",
            "data": data,
        }))
    }

    #[tokio::test]
    async fn full_session() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/android/open"))
            .and(header("X-Secret-Key", "secret"))
            .respond_with(ok(serde_json::json!({
                "session_id": "abcd",
                "device": { "system_id": 4464, "security_level": 3 },
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/android/get_license_challenge/STREAMING"))
            .and(body_partial_json(serde_json::json!({ "session_id": "abcd" })))
            .respond_with(ok(serde_json::json!({ "challenge_b64": STANDARD.encode(b"chl") })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/android/parse_license"))
            .and(body_partial_json(serde_json::json!({
                "license_message": STANDARD.encode(b"lic"),
            })))
            .respond_with(ok(serde_json::Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/android/get_keys/CONTENT"))
            .respond_with(ok(serde_json::json!({
                "keys": [
                    { "key_id": "00".repeat(16), "key": "ab".repeat(16), "type": "SIGNING", "permissions": [] },
                    { "key_id": "11".repeat(16), "key": "cd".repeat(16), "type": "CONTENT", "permissions": [] },
                ],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/android/close/abcd"))
            .respond_with(ok(serde_json::Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        let cdm = RemoteCdm::new(Client::new(), server.uri(), "android", "secret");
        let header = ProtectionHeader::new("", "ERERERERERERERERERERAA==").unwrap();
        let mut session = cdm.open().await.unwrap();

        assert_eq!(session.generate_challenge(&header).await.unwrap(), b"chl");
        assert_eq!(
            session.derive_content_key(b"lic").await.unwrap(),
            vec![0xcd; 16]
        );

        session.close().await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 401,
                "message": "Secret Key is Invalid",
            })))
            .mount(&server)
            .await;

        let cdm = RemoteCdm::new(Client::new(), server.uri(), "android", "wrong");
        let error = cdm.open().await.err().unwrap();

        assert!(matches!(error, Error::Cdm(x) if x.contains("Secret Key is Invalid")));
    }
}

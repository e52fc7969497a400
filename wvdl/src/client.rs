use crate::{Error, Result, config::EngineConfig};
use reqwest::{
    Client, RequestBuilder, StatusCode,
    header::{self, HeaderMap, HeaderValue},
};

/// Tokens identifying the account a download runs for.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub bearer_token: String,
    pub user_token: String,
}

impl Credentials {
    pub fn new(bearer_token: impl Into<String>, user_token: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            user_token: user_token.into(),
        }
    }

    /// Attach the authorization headers to a request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.bearer_token)
            .header("x-apple-music-user-token", &self.user_token)
    }
}

/// Build the http client shared by every request of a session.
pub fn build_client(config: &EngineConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();

    for (name, value) in [
        (header::USER_AGENT, &config.user_agent),
        (header::ORIGIN, &config.origin),
        (header::REFERER, &config.referer),
    ] {
        let value = HeaderValue::from_str(value).map_err(|x| Error::Config {
            path: name.to_string(),
            reason: x.to_string(),
        })?;
        headers.insert(name, value);
    }

    Client::builder()
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|x| Error::transport("client", x))
}

/// Turn a non 200 response into [`Error::Status`].
pub(crate) fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status != StatusCode::OK {
        return Err(Error::Status {
            url: url.to_owned(),
            status,
        });
    }

    Ok(())
}

/// Short description of a request failure for logs.
pub(crate) fn describe_reqwest_error(error: &reqwest::Error) -> String {
    if error.is_connect() {
        return "connection error".to_owned();
    } else if error.is_timeout() {
        return "timeout".to_owned();
    }

    match error.status() {
        Some(StatusCode::GATEWAY_TIMEOUT) => "gateway timeout".to_owned(),
        Some(StatusCode::SERVICE_UNAVAILABLE) => "service unavailable".to_owned(),
        Some(StatusCode::TOO_MANY_REQUESTS) => "too many requests".to_owned(),
        Some(status) => format!("HTTP {}", status),
        None => error.to_string(),
    }
}

//! Blocking HTTP helpers shared by the cover-art providers.

use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::HttpConfig;
use crate::providers::RawImage;

/// Failure of one HTTP exchange. Providers log these and degrade to "no results".
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to read response: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("empty response body")]
    EmptyBody,
}

/// `ureq` agent with bounded timeouts and a download size cap.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    max_download_bytes: usize,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.read_timeout_ms))
            .timeout_write(Duration::from_millis(config.read_timeout_ms))
            .user_agent(&config.user_agent)
            .build();
        Self {
            agent,
            max_download_bytes: config.max_download_bytes,
        }
    }

    fn call(&self, url: &str, accept: &str) -> Result<ureq::Response, HttpError> {
        let response = self
            .agent
            .get(url)
            .set("Accept", accept)
            .call()
            .map_err(|error| match error {
                ureq::Error::Status(code, _) => HttpError::Status(code),
                ureq::Error::Transport(transport) => HttpError::Transport(transport.to_string()),
            })?;
        if !(200..300).contains(&response.status()) {
            return Err(HttpError::Status(response.status()));
        }
        Ok(response)
    }

    fn read_limited(&self, response: ureq::Response) -> Result<Vec<u8>, HttpError> {
        let limit = self.max_download_bytes;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() > limit {
            return Err(HttpError::BodyTooLarge(limit));
        }
        Ok(bytes)
    }

    /// Fetches `url` and decodes the body into the provider's response schema.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let response = self.call(url, "application/json")?;
        let body = self.read_limited(response)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Downloads one image body, keeping the declared content type for validation.
    pub fn download(&self, url: &str) -> Result<RawImage, HttpError> {
        let response = self.call(url, "image/*")?;
        let content_type = response
            .header("Content-Type")
            .map(|value| value.trim().to_ascii_lowercase());
        let bytes = self.read_limited(response)?;
        if bytes.is_empty() {
            return Err(HttpError::EmptyBody);
        }
        Ok(RawImage {
            url: url.to_string(),
            content_type,
            bytes,
        })
    }
}

/// Builds `base?key=value&...` with every value percent-encoded.
pub fn request_url(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    if params.is_empty() {
        return url;
    }

    url.push('?');
    for (index, (key, value)) in params.iter().enumerate() {
        if index > 0 {
            url.push('&');
        }
        url.push_str(key);
        url.push('=');
        url.push_str(urlencoding::encode(value).as_ref());
    }
    url
}

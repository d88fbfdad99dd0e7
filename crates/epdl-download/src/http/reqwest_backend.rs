//! Production HTTP backend using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};

use epdl_core::DownloadError;

use super::{HttpBackend, HttpRequest, HttpResponse};

/// reqwest-backed transport.
///
/// Only the connect phase has a client-level timeout, so multi-gigabyte
/// bodies are never cut off by a total deadline. Silence limits are applied
/// per request through [`super::send_within`].
#[derive(Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DownloadError::other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DownloadError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(range) = request.range {
            builder = builder.header(RANGE, range.header_value());
        }

        let response = builder.send().await.map_err(|e| {
            let status = e.status().map(|s| s.as_u16());
            match status {
                Some(code) => DownloadError::network_with_status(e.to_string(), code),
                None => DownloadError::network(e.to_string()),
            }
        })?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DownloadError::network(e.to_string())))
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            content_range,
            body,
        })
    }
}

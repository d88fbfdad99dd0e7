//! HTTP backend abstraction.
//!
//! Fetch strategies talk to a [`HttpBackend`] trait object so tests can
//! inject scripted transports. The production implementation is
//! [`ReqwestBackend`].

mod reqwest_backend;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};

use epdl_core::{DownloadError, HeaderList};

pub use reqwest_backend::ReqwestBackend;

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// An inclusive byte span for `Range` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` means "to the end of the resource".
    pub end: Option<u64>,
}

impl ByteRange {
    #[must_use]
    pub const fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    #[must_use]
    pub const fn bounded(start: u64, end_inclusive: u64) -> Self {
        Self {
            start,
            end: Some(end_inclusive),
        }
    }

    #[must_use]
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Number of bytes in a bounded range.
    #[must_use]
    pub const fn len(&self) -> Option<u64> {
        match self.end {
            Some(end) => Some(end - self.start + 1),
            None => None,
        }
    }
}

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderList,
    pub range: Option<ByteRange>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, headers: HeaderList) -> Self {
        Self {
            url: url.into(),
            headers,
            range: None,
        }
    }

    #[must_use]
    pub const fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// Response head plus a streamed body.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Raw `Content-Range` header, if any.
    pub content_range: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Build a response from an in-memory body.
    #[must_use]
    pub fn from_bytes(status: u16, body: Bytes) -> Self {
        let len = body.len() as u64;
        Self {
            status,
            content_length: Some(len),
            content_range: None,
            body: Box::pin(stream::once(async move { Ok(body) })),
        }
    }

    #[must_use]
    pub fn with_content_range(mut self, value: impl Into<String>) -> Self {
        self.content_range = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.content_length = length;
        self
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// Full resource size: the `/total` of `Content-Range` for partial
    /// responses, `Content-Length` for complete ones.
    #[must_use]
    pub fn total_length(&self) -> Option<u64> {
        if self.is_partial() {
            self.content_range.as_deref().and_then(parse_content_range_total)
        } else {
            self.content_length
        }
    }

    /// Fail the body with a network error when no chunk arrives within `idle`.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        let body = self.body;
        self.body = Box::pin(stream::unfold(Some(body), move |state| async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(chunk)) => Some((chunk, Some(body))),
                Ok(None) => None,
                Err(_) => Some((Err(read_timed_out(idle)), None)),
            }
        }));
        self
    }

    /// Collect the whole body.
    pub async fn bytes(mut self) -> Result<Bytes, DownloadError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Collect the body as UTF-8 text (lossy).
    pub async fn text(self) -> Result<String, DownloadError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_timed_out(idle: Duration) -> DownloadError {
    DownloadError::network(format!("read timed out after {}ms", idle.as_millis()))
}

/// Send `request`, allowing the server at most `idle` of silence before the
/// response head and between body chunks.
pub async fn send_within(
    backend: &dyn HttpBackend,
    request: HttpRequest,
    idle: Duration,
) -> Result<HttpResponse, DownloadError> {
    let response = tokio::time::timeout(idle, backend.send(request))
        .await
        .map_err(|_| read_timed_out(idle))??;
    Ok(response.with_idle_timeout(idle))
}

/// Parse `bytes 0-1023/4096` into `4096`. Unknown totals (`*`) yield `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Transport used by fetch strategies.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Send a GET request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DownloadError>;
}

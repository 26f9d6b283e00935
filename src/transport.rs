//! The HTTP transport seam and its default `reqwest` implementation.
//!
//! The upload engine only speaks through [`HttpTransport`]; hosts with their
//! own HTTP stack implement the trait and hand the engine an `Arc` of it.
//! Cancellation of an in-flight request is realized by dropping the future
//! returned from [`HttpTransport::send`].
use crate::error::{Error, RequestSnapshot, ResponseSnapshot, Result};

use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use url::Url;

/// HTTP methods the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Post,
    Patch,
    Head,
    Delete,
}

impl Method {
    /// The method name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer for bytes handed to the transport while a request body is sent.
pub type BodyProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// A single outbound request.
#[derive(Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    body_progress: Option<BodyProgress>,
}

impl HttpRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            body_progress: None,
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn set_header<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Attach a body.
    pub fn set_body(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    /// The attached body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Install an observer called with the running byte count as the body
    /// is handed to the transport.
    pub fn set_body_progress(&mut self, observer: BodyProgress) {
        self.body_progress = Some(observer);
    }

    /// The installed body progress observer, if any.
    pub fn body_progress(&self) -> Option<&BodyProgress> {
        self.body_progress.as_ref()
    }

    pub(crate) fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            method: self.method,
            url: self.url.clone(),
        }
    }
}

impl Debug for HttpRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpResponse {
    /// Create a response with no headers and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    pub fn set_header<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
    }

    /// Set the body text.
    pub fn set_body<T: Into<String>>(&mut self, body: T) {
        self.body = body.into();
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is in the 2xx class.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Response body decoded as text.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Dispatches requests on behalf of the upload engine.
///
/// Implementations must not retry on their own; the engine's retry
/// controller owns that policy.
pub trait HttpTransport: Send + Sync {
    /// Send `request` and resolve to the response.
    ///
    /// Dropping the returned future cancels the request.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// Size of the frames a body is split into for progress reporting.
const PROGRESS_FRAME: usize = 64 * 1024;

/// [`HttpTransport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already configured client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let snapshot = request.snapshot();
            let method = match request.method() {
                Method::Post => reqwest::Method::POST,
                Method::Patch => reqwest::Method::PATCH,
                Method::Head => reqwest::Method::HEAD,
                Method::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self.inner.request(method, request.url().clone());
            for (name, value) in request.headers() {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body().cloned() {
                builder = builder.header(reqwest::header::CONTENT_LENGTH, body.len());
                builder = match request.body_progress().cloned() {
                    Some(observer) => {
                        let frames = futures::stream::iter(frames(body, observer));
                        builder.body(reqwest::Body::wrap_stream(frames))
                    }
                    None => builder.body(body),
                };
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::transport(snapshot.clone(), e))?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response
                .text()
                .await
                .map_err(|e| Error::transport(snapshot, e))?;
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Split `body` into frames, reporting the running total to `observer` as
/// each frame is yielded to the transport.
fn frames(
    body: Bytes,
    observer: BodyProgress,
) -> impl Iterator<Item = std::io::Result<Bytes>> {
    let total = body.len();
    let mut sent = 0usize;
    std::iter::from_fn(move || {
        if sent >= total {
            return None;
        }
        let end = usize::min(sent + PROGRESS_FRAME, total);
        let frame = body.slice(sent..end);
        sent = end;
        observer(sent as u64);
        Some(Ok(frame))
    })
}

//! Options controlling one logical upload.
use crate::config;
use crate::error::{BoxError, Error, Result};
use crate::fingerprint::{DefaultFingerprinter, Fingerprinter};
use crate::metadata::Metadata;
use crate::store::UrlStore;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

use futures::future::BoxFuture;
use std::fmt::{self, Debug, Formatter};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The wire dialect spoken to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Stable protocol v1, negotiated with `Tus-Resumable: 1.0.0`.
    #[default]
    V1,
    /// The IETF interop draft, negotiated with
    /// `Upload-Draft-Interop-Version: 5`.
    IetfDraft,
}

impl Protocol {
    /// The version header every request carries.
    pub(crate) fn version_header(&self) -> (&'static str, &'static str) {
        match self {
            Self::V1 => ("Tus-Resumable", config::PROTOCOL_VERSION),
            Self::IetfDraft => ("Upload-Draft-Interop-Version", config::DRAFT_INTEROP_VERSION),
        }
    }

    pub(crate) fn is_draft(&self) -> bool {
        matches!(self, Self::IetfDraft)
    }
}

/// Callback invoked with `(bytes_sent, bytes_total)`.
pub type OnProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;
/// Callback invoked with `(chunk_size, bytes_accepted, bytes_total)`.
pub type OnChunkComplete = Arc<dyn Fn(u64, u64, Option<u64>) + Send + Sync>;
/// Callback invoked once when the upload completes.
pub type OnSuccess = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when the upload fails terminally.
pub type OnError = Arc<dyn Fn(&Error) + Send + Sync>;
/// Callback invoked when the resource URL becomes known.
pub type OnUploadUrlAvailable = Arc<dyn Fn(&Url) + Send + Sync>;
/// Asynchronous hook awaited before each request is dispatched.
///
/// The hook mutates the request synchronously and returns a future for any
/// asynchronous tail work; the engine awaits it before sending.
pub type OnBeforeRequest = Arc<
    dyn Fn(&mut HttpRequest) -> BoxFuture<'static, ::std::result::Result<(), BoxError>>
        + Send
        + Sync,
>;
/// Asynchronous hook awaited after each response is received.
pub type OnAfterResponse = Arc<
    dyn Fn(&HttpRequest, &HttpResponse) -> BoxFuture<'static, ::std::result::Result<(), BoxError>>
        + Send
        + Sync,
>;
/// Predicate overriding the default retry decision.
pub type OnShouldRetry = Arc<dyn Fn(&Error, usize) -> bool + Send + Sync>;

/// The callbacks a host can install on an upload.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub(crate) on_progress: Option<OnProgress>,
    pub(crate) on_chunk_complete: Option<OnChunkComplete>,
    pub(crate) on_success: Option<OnSuccess>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_upload_url_available: Option<OnUploadUrlAvailable>,
    pub(crate) on_before_request: Option<OnBeforeRequest>,
    pub(crate) on_after_response: Option<OnAfterResponse>,
    pub(crate) on_should_retry: Option<OnShouldRetry>,
}

/// Immutable configuration of one logical upload.
///
/// Construct with [`UploadOptions::new`] and refine with the with-style
/// setters.
#[derive(Clone)]
pub struct UploadOptions {
    pub(crate) endpoint: Option<Url>,
    pub(crate) upload_url: Option<Url>,
    pub(crate) metadata: Metadata,
    pub(crate) upload_size: Option<u64>,
    pub(crate) chunk_size: Option<u64>,
    pub(crate) retry_delays: Vec<Duration>,
    pub(crate) parallel_uploads: usize,
    pub(crate) parallel_boundaries: Option<Vec<Range<u64>>>,
    pub(crate) store_fingerprint: bool,
    pub(crate) remove_fingerprint_on_success: bool,
    pub(crate) override_patch_method: bool,
    pub(crate) upload_data_during_creation: bool,
    pub(crate) add_request_id: bool,
    pub(crate) upload_length_deferred: bool,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) protocol: Protocol,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) url_store: Arc<dyn UrlStore>,
    pub(crate) fingerprinter: Arc<dyn Fingerprinter>,
    pub(crate) callbacks: Callbacks,
}

impl UploadOptions {
    /// Options with defaults: protocol v1, one upload lane, fingerprint
    /// storage enabled, and the standard retry schedule.
    pub fn new(transport: Arc<dyn HttpTransport>, url_store: Arc<dyn UrlStore>) -> Self {
        Self {
            endpoint: None,
            upload_url: None,
            metadata: Metadata::new(),
            upload_size: None,
            chunk_size: None,
            retry_delays: config::DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            parallel_uploads: 1,
            parallel_boundaries: None,
            store_fingerprint: true,
            remove_fingerprint_on_success: false,
            override_patch_method: false,
            upload_data_during_creation: false,
            add_request_id: false,
            upload_length_deferred: false,
            headers: Vec::new(),
            protocol: Protocol::V1,
            transport,
            url_store,
            fingerprinter: Arc::new(DefaultFingerprinter),
            callbacks: Callbacks::default(),
        }
    }

    /// Base URL new upload resources are created against.
    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Pre-known resource URL to resume against.
    pub fn upload_url(mut self, upload_url: Url) -> Self {
        self.upload_url = Some(upload_url);
        self
    }

    /// Metadata sent with the creation request.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Explicit total size, overriding the source's reported size.
    pub fn upload_size(mut self, size: u64) -> Self {
        self.upload_size = Some(size);
        self
    }

    /// Maximum bytes per transfer request. Unset means a single request
    /// carries the whole remainder.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Delay schedule for retries. An empty schedule disables retrying.
    pub fn retry_delays<I>(mut self, delays: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        self.retry_delays = delays.into_iter().collect();
        self
    }

    /// Split the upload into `count` concurrent partial uploads.
    pub fn parallel_uploads(mut self, count: usize) -> Self {
        self.parallel_uploads = count;
        self
    }

    /// Explicit `[start, end)` part boundaries for parallel mode.
    pub fn parallel_boundaries(mut self, boundaries: Vec<Range<u64>>) -> Self {
        self.parallel_boundaries = Some(boundaries);
        self
    }

    /// Whether to persist the upload URL under the input's fingerprint.
    pub fn store_fingerprint(mut self, enabled: bool) -> Self {
        self.store_fingerprint = enabled;
        self
    }

    /// Whether to delete the stored record once the upload succeeds.
    pub fn remove_fingerprint_on_success(mut self, enabled: bool) -> Self {
        self.remove_fingerprint_on_success = enabled;
        self
    }

    /// Send transfer requests as `POST` with `X-HTTP-Method-Override:
    /// PATCH`, for proxies that reject `PATCH`.
    pub fn override_patch_method(mut self, enabled: bool) -> Self {
        self.override_patch_method = enabled;
        self
    }

    /// Ship the first chunk inside the creation request.
    pub fn upload_data_during_creation(mut self, enabled: bool) -> Self {
        self.upload_data_during_creation = enabled;
        self
    }

    /// Attach a fresh `X-Request-ID` UUID to every request.
    pub fn add_request_id(mut self, enabled: bool) -> Self {
        self.add_request_id = enabled;
        self
    }

    /// Defer the total length until the source is exhausted.
    pub fn upload_length_deferred(mut self, enabled: bool) -> Self {
        self.upload_length_deferred = enabled;
        self
    }

    /// Add a header to every request.
    pub fn header<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Select the wire dialect.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Replace the default fingerprinter.
    pub fn fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Observe overall progress as `(bytes_sent, bytes_total)`.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.callbacks.on_progress = Some(Arc::new(callback));
        self
    }

    /// Observe acknowledged chunks as `(chunk_size, bytes_accepted,
    /// bytes_total)`.
    pub fn on_chunk_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.callbacks.on_chunk_complete = Some(Arc::new(callback));
        self
    }

    /// Observe successful completion.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_success = Some(Arc::new(callback));
        self
    }

    /// Observe terminal errors.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    /// Observe the resource URL as soon as it is known.
    pub fn on_upload_url_available<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.callbacks.on_upload_url_available = Some(Arc::new(callback));
        self
    }

    /// Hook awaited before each request; may mutate the request.
    pub fn on_before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpRequest) -> BoxFuture<'static, ::std::result::Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.on_before_request = Some(Arc::new(hook));
        self
    }

    /// Hook awaited after each response.
    pub fn on_after_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpRequest, &HttpResponse) -> BoxFuture<'static, ::std::result::Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.on_after_response = Some(Arc::new(hook));
        self
    }

    /// Predicate deciding whether an error is retried, replacing the
    /// default classification.
    pub fn on_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error, usize) -> bool + Send + Sync + 'static,
    {
        self.callbacks.on_should_retry = Some(Arc::new(predicate));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.endpoint.is_none() && self.upload_url.is_none() {
            return Err(Error::config(
                "either an endpoint or an upload URL is required",
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(Error::config("chunk_size must be positive"));
        }
        if self.parallel_uploads == 0 {
            return Err(Error::config("parallel_uploads must be at least 1"));
        }
        if self.parallel_uploads > 1 {
            if self.upload_url.is_some() {
                return Err(Error::config(
                    "parallel uploads cannot target a fixed upload URL",
                ));
            }
            if self.upload_size.is_some() {
                return Err(Error::config(
                    "parallel uploads take their size from the source; upload_size is not allowed",
                ));
            }
            if self.upload_length_deferred {
                return Err(Error::config("parallel uploads require a known length"));
            }
        }
        if let Some(boundaries) = &self.parallel_boundaries {
            if self.parallel_uploads <= 1 {
                return Err(Error::config(
                    "parallel_boundaries require parallel_uploads greater than 1",
                ));
            }
            if boundaries.len() != self.parallel_uploads {
                return Err(Error::config(
                    "parallel_boundaries length must match parallel_uploads",
                ));
            }
        }
        Ok(())
    }
}

impl Debug for UploadOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("upload_url", &self.upload_url.as_ref().map(Url::as_str))
            .field("upload_size", &self.upload_size)
            .field("chunk_size", &self.chunk_size)
            .field("retry_delays", &self.retry_delays)
            .field("parallel_uploads", &self.parallel_uploads)
            .field("protocol", &self.protocol)
            .field("upload_length_deferred", &self.upload_length_deferred)
            .finish_non_exhaustive()
    }
}

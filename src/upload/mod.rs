//! The upload driver.
//!
//! [`Upload`] owns the state of one logical upload and drives it through
//! creation, resumption, chunked transfer, retry, and (optionally) parallel
//! segmentation. All state mutation happens on the task that awaits
//! [`Upload::start`]; a clonable [`AbortHandle`] cancels a running drive
//! from elsewhere.
use crate::error::{Error, ErrorKind, Result};
use crate::options::UploadOptions;
use crate::request;
use crate::retry;
use crate::source::{SourceHandle, UploadSource};
use crate::store::{PersistedRecord, StoreKey};
use crate::transport::{HttpRequest, HttpResponse, Method};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use url::Url;

mod parallel;
mod single;

/// A stored upload found by [`Upload::find_previous_uploads`].
///
/// Hand it back via [`Upload::resume_from_previous_upload`] to continue
/// where the record left off.
#[derive(Debug, Clone)]
pub struct PreviousUpload {
    /// Key naming the stored record.
    pub key: StoreKey,
    /// The stored record itself.
    pub record: PersistedRecord,
}

/// Cancels a running upload from outside the driving task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Cancel the upload. Idempotent; in-flight requests are dropped, the
    /// pending retry timer (if any) is cleared, and no further events fire
    /// until the next [`Upload::start`].
    pub fn abort(&self) {
        self.token.cancel();
    }
}

#[derive(Debug, Default)]
pub(crate) struct DriverState {
    pub(crate) url: Option<Url>,
    pub(crate) offset: u64,
    pub(crate) size: Option<u64>,
    pub(crate) fingerprint: Option<String>,
    pub(crate) url_store_key: Option<StoreKey>,
    pub(crate) retry_attempt: usize,
    pub(crate) offset_before_retry: u64,
    pub(crate) parallel_urls: Option<Vec<Option<Url>>>,
}

/// One logical upload.
pub struct Upload {
    pub(crate) options: UploadOptions,
    pub(crate) source: SourceHandle,
    pub(crate) state: DriverState,
    pub(crate) cancel: CancellationToken,
    /// Parallel children share the parent's source and must not close it.
    pub(crate) owns_source: bool,
}

impl Upload {
    /// Create a driver over `source`, validating the options.
    pub fn new<S>(source: S, options: UploadOptions) -> Result<Self>
    where
        S: UploadSource + 'static,
    {
        Self::from_handle(SourceHandle::new(source), options)
    }

    pub(crate) fn from_handle(source: SourceHandle, options: UploadOptions) -> Result<Self> {
        options.validate()?;
        let state = DriverState {
            url: options.upload_url.clone(),
            ..DriverState::default()
        };
        Ok(Self {
            options,
            source,
            state,
            cancel: CancellationToken::new(),
            owns_source: true,
        })
    }

    /// The resource URL, once created or resumed.
    pub fn url(&self) -> Option<&Url> {
        self.state.url.as_ref()
    }

    /// The last server-acknowledged byte count.
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    /// The total upload size, once known.
    pub fn size(&self) -> Option<u64> {
        self.state.size
    }

    /// A handle that cancels the drive started after this call.
    ///
    /// Handles are tied to one run; take a fresh one after each
    /// [`Upload::start`].
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    /// Drive the upload to completion.
    ///
    /// Resumes from whatever state the driver holds: a fresh driver
    /// fingerprints its input and checks the URL store for an earlier
    /// attempt, an interrupted one re-enters at the stored URL and offset.
    /// Failed attempts are retried along the configured delay schedule;
    /// acknowledged progress between attempts resets the budget.
    // Returns a boxed future (rather than `async fn`) so the recursive
    // call through `perform_parallel`'s child uploads doesn't leave the
    // compiler unable to prove this future is `Send`: an opaque
    // `impl Future` here would make that proof depend on itself.
    pub fn start(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                self.cancel = CancellationToken::new();
            }
            self.ensure_fingerprint().await;
            self.restore_from_store().await;

            loop {
                let error = match self.perform().await {
                    Ok(()) => return Ok(()),
                    Err(e) => e,
                };
                if self.cancel.is_cancelled() || error.kind() == ErrorKind::Aborted {
                    return Err(Error::aborted());
                }
                if self.state.offset > self.state.offset_before_retry {
                    self.state.retry_attempt = 0;
                }
                if retry::should_retry(&error, self.state.retry_attempt, &self.options) {
                    let delay = self.options.retry_delays[self.state.retry_attempt];
                    self.state.retry_attempt += 1;
                    self.state.offset_before_retry = self.state.offset;
                    tracing::warn!(
                        attempt = self.state.retry_attempt,
                        ?delay,
                        error = %error,
                        "upload attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Error::aborted()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                self.emit_error(&error);
                return Err(error);
            }
        })
    }

    /// Cancel the upload and optionally delete its server-side resources.
    ///
    /// With `should_terminate`, every known resource URL (the upload itself
    /// and, in parallel mode, each partial upload) is deleted and the
    /// stored record is removed. The byte source stays open so a later
    /// [`Upload::start`] can pick up again.
    pub async fn abort(&mut self, should_terminate: bool) -> Result<()> {
        self.cancel.cancel();
        if !should_terminate {
            return Ok(());
        }
        let part_urls: Vec<Url> = self
            .state
            .parallel_urls
            .iter()
            .flatten()
            .flatten()
            .cloned()
            .collect();
        for url in part_urls {
            terminate(&url, &self.options).await?;
        }
        if let Some(url) = self.state.url.clone() {
            terminate(&url, &self.options).await?;
        }
        self.drop_persisted_record().await;
        Ok(())
    }

    /// All stored uploads whose fingerprint matches this driver's input.
    pub async fn find_previous_uploads(&mut self) -> Result<Vec<PreviousUpload>> {
        self.ensure_fingerprint().await;
        let Some(fingerprint) = self.state.fingerprint.clone() else {
            return Ok(Vec::new());
        };
        let found = self
            .options
            .url_store
            .find_by_fingerprint(&fingerprint)
            .await?;
        Ok(found
            .into_iter()
            .map(|(key, record)| PreviousUpload { key, record })
            .collect())
    }

    /// Adopt a stored upload: populates the resource URL (or part URLs)
    /// and the store key. Performs no IO; the next [`Upload::start`]
    /// resumes against the stored resource.
    pub fn resume_from_previous_upload(&mut self, previous: &PreviousUpload) -> Result<()> {
        self.restore_from_record(previous.key.clone(), &previous.record)
    }

    async fn ensure_fingerprint(&mut self) {
        if self.state.fingerprint.is_some() {
            return;
        }
        let fingerprint = self
            .options
            .fingerprinter
            .fingerprint(
                self.source.identity(),
                self.source.size(),
                self.options.endpoint.as_ref(),
            )
            .await;
        if fingerprint.is_none() {
            tracing::debug!("input has no fingerprint, persistent resumption disabled");
        }
        self.state.fingerprint = fingerprint;
    }

    /// Pick up a record stored by an earlier run, if any. Best effort: a
    /// failing or corrupt store only disables resumption.
    async fn restore_from_store(&mut self) {
        if !self.options.store_fingerprint
            || self.state.url.is_some()
            || self.state.parallel_urls.is_some()
            || self.state.url_store_key.is_some()
        {
            return;
        }
        let Some(fingerprint) = self.state.fingerprint.clone() else {
            return;
        };
        let found = match self.options.url_store.find_by_fingerprint(&fingerprint).await {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(error = %error, "url store lookup failed, starting fresh");
                return;
            }
        };
        if let Some((key, record)) = found.into_iter().next() {
            tracing::debug!(key = %key, "found stored upload for this input");
            if let Err(error) = self.restore_from_record(key, &record) {
                tracing::warn!(error = %error, "stored record is unusable, starting fresh");
            }
        }
    }

    fn restore_from_record(&mut self, key: StoreKey, record: &PersistedRecord) -> Result<()> {
        if let Some(urls) = &record.parallel_upload_urls {
            let parsed = urls
                .iter()
                .map(|u| Url::parse(u).map(Some))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Error::config(format!("stored part URL is invalid: {e}")))?;
            self.state.parallel_urls = Some(parsed);
        } else if let Some(url) = &record.upload_url {
            let parsed =
                Url::parse(url).map_err(|e| Error::config(format!("stored URL is invalid: {e}")))?;
            self.state.url = Some(parsed);
        }
        self.state.url_store_key = Some(key);
        Ok(())
    }

    async fn perform(&mut self) -> Result<()> {
        if self.options.parallel_uploads > 1 || self.state.parallel_urls.is_some() {
            self.perform_parallel().await
        } else {
            self.perform_single().await
        }
    }

    pub(crate) fn resolve_size(&mut self) -> Result<()> {
        if self.options.upload_length_deferred {
            self.state.size = None;
            return Ok(());
        }
        match self.options.upload_size.or(self.source.size()) {
            Some(size) => {
                self.state.size = Some(size);
                Ok(())
            }
            None => Err(Error::config(
                "upload size is unknown: set upload_size, use a sized source, or defer the length",
            )),
        }
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::aborted())
        } else {
            Ok(())
        }
    }

    /// Send a request, racing it against cancellation. Dropping the send
    /// future aborts the in-flight request at the transport.
    pub(crate) async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.check_abort()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::aborted()),
            response = request::send(&self.options, request) => response,
        }
    }

    /// Persist the contiguous-upload record, once: requires fingerprint
    /// storage enabled, a fingerprint, and no record stored yet.
    pub(crate) async fn persist_record(&mut self) -> Result<()> {
        if !self.options.store_fingerprint || self.state.url_store_key.is_some() {
            return Ok(());
        }
        let Some(fingerprint) = self.state.fingerprint.clone() else {
            return Ok(());
        };
        let mut record = PersistedRecord::new(self.state.size, self.options.metadata.clone());
        record.upload_url = self.state.url.as_ref().map(Url::to_string);
        let key = self.options.url_store.add_upload(&fingerprint, record).await?;
        tracing::debug!(key = %key, "stored upload record");
        self.state.url_store_key = Some(key);
        Ok(())
    }

    /// Persist the parallel-upload record in a single write, once every
    /// part URL is known.
    pub(crate) async fn persist_parallel_record(&mut self, urls: &[Url]) -> Result<()> {
        if !self.options.store_fingerprint || self.state.url_store_key.is_some() {
            return Ok(());
        }
        let Some(fingerprint) = self.state.fingerprint.clone() else {
            return Ok(());
        };
        let mut record = PersistedRecord::new(self.state.size, self.options.metadata.clone());
        record.parallel_upload_urls = Some(urls.iter().map(Url::to_string).collect());
        let key = self.options.url_store.add_upload(&fingerprint, record).await?;
        tracing::debug!(key = %key, parts = urls.len(), "stored parallel upload record");
        self.state.url_store_key = Some(key);
        Ok(())
    }

    /// Remove the stored record, best effort.
    pub(crate) async fn drop_persisted_record(&mut self) {
        if let Some(key) = self.state.url_store_key.take() {
            if let Err(error) = self.options.url_store.remove_upload(&key).await {
                tracing::warn!(key = %key, error = %error, "failed to remove stored upload record");
            }
        }
    }

    /// Terminal success: drop the record when configured, close the source,
    /// and notify the host. A failing record removal is reported after the
    /// success event; it does not un-succeed the upload.
    pub(crate) async fn finish(&mut self) -> Result<()> {
        let mut removal_error = None;
        if self.options.remove_fingerprint_on_success {
            if let Some(key) = self.state.url_store_key.take() {
                if let Err(error) = self.options.url_store.remove_upload(&key).await {
                    removal_error = Some(error);
                }
            }
        }
        if self.owns_source {
            if let Err(error) = self.source.close().await {
                tracing::warn!(error = %error, "failed to close the upload source");
            }
        }
        tracing::debug!(url = self.state.url.as_ref().map(Url::as_str), "upload complete");
        self.emit_success();
        if let Some(error) = removal_error {
            tracing::warn!(error = %error, "failed to remove stored upload record");
            self.emit_error(&error);
        }
        Ok(())
    }

    pub(crate) fn emit_progress(&self, bytes_sent: u64, bytes_total: Option<u64>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(callback) = &self.options.callbacks.on_progress {
            callback(bytes_sent, bytes_total);
        }
    }

    pub(crate) fn emit_chunk_complete(&self, chunk: u64, accepted: u64, total: Option<u64>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(callback) = &self.options.callbacks.on_chunk_complete {
            callback(chunk, accepted, total);
        }
    }

    pub(crate) fn emit_url_available(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let (Some(callback), Some(url)) = (
            &self.options.callbacks.on_upload_url_available,
            &self.state.url,
        ) {
            callback(url);
        }
    }

    pub(crate) fn emit_success(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(callback) = &self.options.callbacks.on_success {
            callback();
        }
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(callback) = &self.options.callbacks.on_error {
            callback(error);
        }
    }
}

/// Delete the server-side resource at `url`.
///
/// A 204 response succeeds; anything else is an error. When the options
/// carry a retry schedule, transient failures are retried along it. The
/// URL store is not touched; callers drop their own records on success.
pub async fn terminate(url: &Url, options: &UploadOptions) -> Result<()> {
    let mut attempt = 0usize;
    loop {
        let request = request::build_request(Method::Delete, url, options);
        let snapshot = request.snapshot();
        let result = match request::send(options, request).await {
            Ok(response) if response.status() == 204 => Ok(()),
            Ok(response) => Err(Error::http(snapshot, response.snapshot())),
            Err(error) => Err(error),
        };
        let error = match result {
            Ok(()) => {
                tracing::debug!(url = %url, "terminated upload");
                return Ok(());
            }
            Err(error) => error,
        };
        if !retry::should_retry(&error, attempt, options) {
            return Err(error);
        }
        let delay = options.retry_delays[attempt];
        attempt += 1;
        tracing::warn!(url = %url, attempt, ?delay, error = %error, "termination failed, retrying");
        tokio::time::sleep(delay).await;
    }
}

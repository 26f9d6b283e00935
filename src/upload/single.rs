//! The contiguous upload engine: create, resume, and the chunk loop.
use super::Upload;
use crate::error::{Error, RequestSnapshot, Result};
use crate::request;
use crate::transport::{HttpRequest, HttpResponse, Method};
use crate::uri;

use std::sync::Arc;

impl Upload {
    pub(crate) async fn perform_single(&mut self) -> Result<()> {
        self.resolve_size()?;
        if self.state.url.is_some() {
            self.resume().await
        } else {
            self.create().await
        }
    }

    /// Create the upload resource, announcing either the total length or a
    /// deferred length, and optionally shipping the first chunk along.
    async fn create(&mut self) -> Result<()> {
        let Some(endpoint) = self.options.endpoint.clone() else {
            return Err(Error::config("cannot create an upload without an endpoint"));
        };
        self.state.offset = 0;
        let mut request = request::build_request(Method::Post, &endpoint, &self.options);
        match self.state.size {
            Some(size) => request.set_header("Upload-Length", size.to_string()),
            None => request.set_header("Upload-Defer-Length", "1"),
        }
        if let Some(value) = self.options.metadata.to_header_value() {
            request.set_header("Upload-Metadata", value);
        }

        let with_data = self.options.upload_data_during_creation
            && !self.options.upload_length_deferred
            && self.state.size != Some(0);
        if with_data {
            self.append_chunk(&mut request, 0).await?;
        } else if self.options.protocol.is_draft() {
            request.set_header("Upload-Complete", "?0");
        }

        let snapshot = request.snapshot();
        let response = self.dispatch(request).await?;
        if !response.is_success() {
            return Err(Error::http(snapshot, response.snapshot()));
        }
        let location = response.header("Location").ok_or_else(|| {
            Error::protocol(
                "creation response is missing the Location header",
                snapshot.clone(),
                Some(response.snapshot()),
            )
        })?;
        let url = uri::resolve_location(&endpoint, location).map_err(|e| {
            Error::protocol(
                format!("cannot resolve Location {location:?}: {e}"),
                snapshot.clone(),
                Some(response.snapshot()),
            )
        })?;
        tracing::debug!(url = %url, "created upload resource");
        self.state.url = Some(url);
        self.emit_url_available();

        if self.state.size == Some(0) {
            return self.finish().await;
        }
        self.persist_record().await?;

        if with_data && self.handle_transfer_response(&snapshot, &response).await? {
            return Ok(());
        }
        self.send_loop().await
    }

    /// Fetch the acknowledged offset from the stored resource and continue
    /// from there. A locked resource (423) surfaces as a retryable error;
    /// a gone resource drops the record and falls back to creation when an
    /// endpoint is configured.
    async fn resume(&mut self) -> Result<()> {
        let Some(url) = self.state.url.clone() else {
            return Err(Error::config("no upload URL to resume against"));
        };
        let request = request::build_request(Method::Head, &url, &self.options);
        let snapshot = request.snapshot();
        let response = self.dispatch(request).await?;
        let status = response.status();

        if status == 423 {
            return Err(Error::http(snapshot, response.snapshot()));
        }
        if (400..500).contains(&status) {
            tracing::debug!(status, url = %url, "stored upload is gone, dropping the record");
            self.drop_persisted_record().await;
            if self.options.endpoint.is_some() {
                self.state.url = None;
                return self.create().await;
            }
            return Err(Error::protocol(
                "upload no longer exists and no endpoint is configured to recreate it",
                snapshot,
                Some(response.snapshot()),
            ));
        }
        if !response.is_success() {
            return Err(Error::http(snapshot, response.snapshot()));
        }

        let offset = request::require_header_u64(&snapshot, &response, "Upload-Offset")?;
        if !self.options.upload_length_deferred && !self.options.protocol.is_draft() {
            let length = request::require_header_u64(&snapshot, &response, "Upload-Length")?;
            self.state.size = Some(length);
        }
        self.emit_url_available();
        self.persist_record().await?;

        self.state.offset = offset;
        if self.state.size == Some(offset) {
            self.emit_progress(offset, self.state.size);
            return self.finish().await;
        }
        tracing::debug!(offset, url = %url, "resuming upload");
        self.send_loop().await
    }

    /// Transfer chunks until the acknowledged offset reaches the total
    /// size. Cancellation short-circuits between the slice and the next
    /// outbound request.
    async fn send_loop(&mut self) -> Result<()> {
        loop {
            self.check_abort()?;
            let Some(url) = self.state.url.clone() else {
                return Err(Error::config("upload URL missing before transfer"));
            };
            let method = if self.options.override_patch_method {
                Method::Post
            } else {
                Method::Patch
            };
            let mut request = request::build_request(method, &url, &self.options);
            if self.options.override_patch_method {
                request.set_header("X-HTTP-Method-Override", "PATCH");
            }
            request.set_header("Upload-Offset", self.state.offset.to_string());
            self.append_chunk(&mut request, self.state.offset).await?;
            self.check_abort()?;

            let snapshot = request.snapshot();
            let response = self.dispatch(request).await?;
            if !response.is_success() {
                return Err(Error::http(snapshot, response.snapshot()));
            }
            if self.handle_transfer_response(&snapshot, &response).await? {
                return Ok(());
            }
        }
    }

    /// Slice `[start, end)` out of the source and attach it to `request`.
    ///
    /// Resolves a deferred length when the source ends inside this chunk,
    /// and rejects a source that contradicts the announced size: retrying
    /// such an upload would loop forever.
    async fn append_chunk(&mut self, request: &mut HttpRequest, start: u64) -> Result<()> {
        request.set_header("Content-Type", "application/offset+octet-stream");
        let end = match (self.options.chunk_size, self.state.size) {
            (Some(chunk), Some(size)) => Some(u64::min(start + chunk, size)),
            (Some(chunk), None) => Some(start + chunk),
            (None, Some(size)) => Some(size),
            (None, None) => None,
        };
        let slice = self
            .source
            .slice(start, end)
            .await
            .map_err(Error::source)?;
        let len = slice.body.len() as u64;

        if slice.done {
            match self.state.size {
                None if self.options.upload_length_deferred => {
                    let total = start + len;
                    tracing::debug!(total, "source exhausted, announcing deferred length");
                    self.state.size = Some(total);
                    request.set_header("Upload-Length", total.to_string());
                }
                Some(size) if start + len != size => {
                    return Err(Error::size_mismatch(size, start + len));
                }
                _ => {}
            }
        }

        if len > 0 {
            if self.options.protocol.is_draft() {
                request.set_header("Upload-Complete", if slice.done { "?1" } else { "?0" });
            }
            if let Some(callback) = self.options.callbacks.on_progress.clone() {
                let total = self.state.size;
                let cancel = self.cancel.clone();
                request.set_body_progress(Arc::new(move |sent| {
                    if !cancel.is_cancelled() {
                        callback(start + sent, total);
                    }
                }));
            }
            request.set_body(slice.body);
        }
        Ok(())
    }

    /// Reconcile the server-acknowledged offset from a transfer (or
    /// creation-with-data) response. Returns `true` once the upload is
    /// complete.
    async fn handle_transfer_response(
        &mut self,
        request: &RequestSnapshot,
        response: &HttpResponse,
    ) -> Result<bool> {
        let previous = self.state.offset;
        let offset = request::require_header_u64(request, response, "Upload-Offset")?;
        self.emit_progress(offset, self.state.size);
        self.emit_chunk_complete(offset.saturating_sub(previous), offset, self.state.size);
        self.state.offset = offset;
        if self.state.size == Some(offset) {
            self.finish().await?;
            return Ok(true);
        }
        Ok(false)
    }
}

//! Splitting one upload into concurrent partial uploads.
//!
//! Each part is driven by an ordinary [`Upload`] over a window of the
//! parent's source, created as a partial upload. Part URLs and per-part
//! progress flow back over a channel; once every part resolves, a final
//! creation request concatenates them in boundary order.
use super::Upload;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::options::UploadOptions;
use crate::request;
use crate::transport::Method;
use crate::uri;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt as _};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Split `[0, total)` into `count` contiguous parts; any remainder rides
/// in the last part.
pub(crate) fn default_boundaries(total: u64, count: usize) -> Vec<Range<u64>> {
    let part = total / count as u64;
    (0..count)
        .map(|i| {
            let start = i as u64 * part;
            let end = if i + 1 == count {
                total
            } else {
                (i as u64 + 1) * part
            };
            start..end
        })
        .collect()
}

enum PartEvent {
    UrlAvailable(usize, Url),
    Progress(usize, u64),
}

impl Upload {
    pub(crate) async fn perform_parallel(&mut self) -> Result<()> {
        self.resolve_size()?;
        let Some(total) = self.state.size else {
            return Err(Error::config(
                "parallel uploads require a source with a known size",
            ));
        };
        let resumed = self.state.parallel_urls.clone();
        let count = resumed
            .as_ref()
            .map_or(self.options.parallel_uploads, Vec::len)
            .max(1);
        let boundaries = self
            .options
            .parallel_boundaries
            .clone()
            .unwrap_or_else(|| default_boundaries(total, count));
        if boundaries.len() != count {
            return Err(Error::config(
                "stored part URLs do not match the configured boundaries",
            ));
        }
        tracing::debug!(parts = count, total, "starting parallel upload");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut parts = FuturesUnordered::new();
        for (index, range) in boundaries.iter().cloned().enumerate() {
            let mut options = self.part_options(index, &tx);
            let prior_url = resumed.as_ref().and_then(|urls| urls[index].clone());
            options.upload_url = prior_url;
            let mut child = Upload::from_handle(self.source.window(range), options)?;
            child.cancel = self.cancel.child_token();
            child.owns_source = false;
            // Boxed: the child future re-enters `start`, which would
            // otherwise give this future an infinite type.
            let part: BoxFuture<'static, Result<(usize, Option<Url>)>> = Box::pin(async move {
                child.start().await?;
                Ok((index, child.state.url))
            });
            parts.push(part);
        }
        drop(tx);

        let mut part_urls: Vec<Option<Url>> = resumed.unwrap_or_else(|| vec![None; count]);
        let mut progress = vec![0u64; count];
        let mut completed = 0usize;
        while completed < count {
            tokio::select! {
                Some(event) = rx.recv() => {
                    self.handle_part_event(event, &mut part_urls, &mut progress, total).await?;
                }
                Some(result) = parts.next() => {
                    let (index, _) = result?;
                    tracing::debug!(part = index, "partial upload finished");
                    completed += 1;
                }
            }
        }
        while let Ok(event) = rx.try_recv() {
            self.handle_part_event(event, &mut part_urls, &mut progress, total).await?;
        }

        let urls = part_urls
            .into_iter()
            .map(|url| {
                url.ok_or_else(|| Error::config("a partial upload finished without reporting its URL"))
            })
            .collect::<Result<Vec<Url>>>()?;
        self.concatenate(&urls, total).await
    }

    /// Issue the final creation request that stitches the parts together.
    async fn concatenate(&mut self, urls: &[Url], total: u64) -> Result<()> {
        let Some(endpoint) = self.options.endpoint.clone() else {
            return Err(Error::config("cannot concatenate parts without an endpoint"));
        };
        self.check_abort()?;
        let mut request = request::build_request(Method::Post, &endpoint, &self.options);
        let list = urls.iter().map(Url::as_str).collect::<Vec<_>>().join(" ");
        request.set_header("Upload-Concat", format!("final;{list}"));
        if let Some(value) = self.options.metadata.to_header_value() {
            request.set_header("Upload-Metadata", value);
        }
        let snapshot = request.snapshot();
        let response = self.dispatch(request).await?;
        if !response.is_success() {
            return Err(Error::http(snapshot, response.snapshot()));
        }
        let location = response.header("Location").ok_or_else(|| {
            Error::protocol(
                "concatenation response is missing the Location header",
                snapshot.clone(),
                Some(response.snapshot()),
            )
        })?;
        let url = uri::resolve_location(&endpoint, location).map_err(|e| {
            Error::protocol(
                format!("cannot resolve Location {location:?}: {e}"),
                snapshot,
                Some(response.snapshot()),
            )
        })?;
        tracing::debug!(url = %url, "concatenated partial uploads");
        self.state.url = Some(url);
        self.state.offset = total;
        self.finish().await
    }

    async fn handle_part_event(
        &mut self,
        event: PartEvent,
        part_urls: &mut Vec<Option<Url>>,
        progress: &mut [u64],
        total: u64,
    ) -> Result<()> {
        match event {
            PartEvent::UrlAvailable(index, url) => {
                part_urls[index] = Some(url);
                self.state.parallel_urls = Some(part_urls.clone());
                if part_urls.iter().all(Option::is_some) {
                    let urls: Vec<Url> = part_urls.iter().flatten().cloned().collect();
                    self.persist_parallel_record(&urls).await?;
                }
            }
            PartEvent::Progress(index, sent) => {
                // Monotone per part, so the aggregate never regresses.
                progress[index] = progress[index].max(sent);
                let aggregate: u64 = progress.iter().sum();
                self.emit_progress(aggregate, Some(total));
            }
        }
        Ok(())
    }

    /// Options for the part at `index`: a single-lane partial upload that
    /// reports its URL and progress to the parent instead of the host.
    fn part_options(&self, index: usize, tx: &mpsc::UnboundedSender<PartEvent>) -> UploadOptions {
        let mut options = self.options.clone();
        options.parallel_uploads = 1;
        options.parallel_boundaries = None;
        options.metadata = Metadata::new();
        options.store_fingerprint = false;
        options.remove_fingerprint_on_success = false;
        options.upload_url = None;
        options.upload_size = None;
        options
            .headers
            .push(("Upload-Concat".to_string(), "partial".to_string()));

        let progress_tx = tx.clone();
        options.callbacks.on_progress = Some(Arc::new(move |sent, _| {
            let _ = progress_tx.send(PartEvent::Progress(index, sent));
        }));
        let url_tx = tx.clone();
        options.callbacks.on_upload_url_available = Some(Arc::new(move |url: &Url| {
            let _ = url_tx.send(PartEvent::UrlAvailable(index, url.clone()));
        }));
        options.callbacks.on_chunk_complete = None;
        options.callbacks.on_success = None;
        options.callbacks.on_error = None;
        options
    }
}

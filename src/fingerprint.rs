//! Input fingerprinting for persistent resumption.
//!
//! A fingerprint is the stable string identifier the URL store keys records
//! by. It must be identical across process restarts for the same input, or
//! resumption never finds the stored upload.
use futures::future::{ready, BoxFuture};
use url::Url;

/// Computes the fingerprint of an upload's input.
///
/// Returning `None` is non-fatal; it disables persistent resumption for
/// the run.
pub trait Fingerprinter: Send + Sync {
    /// Derive a fingerprint from the source's identity and size and the
    /// configured endpoint. The hook may be asynchronous; it is awaited
    /// before any network activity.
    fn fingerprint<'a>(
        &'a self,
        identity: Option<&'a str>,
        size: Option<u64>,
        endpoint: Option<&'a Url>,
    ) -> BoxFuture<'a, Option<String>>;
}

/// Default fingerprinter combining source identity, size, and endpoint.
///
/// Sources without an identity produce no fingerprint, which disables
/// persistence rather than risking collisions between unrelated inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFingerprinter;

impl Fingerprinter for DefaultFingerprinter {
    fn fingerprint<'a>(
        &'a self,
        identity: Option<&'a str>,
        size: Option<u64>,
        endpoint: Option<&'a Url>,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(ready(identity.map(|id| {
            let size = size.map_or_else(|| "-".to_string(), |s| s.to_string());
            let endpoint = endpoint.map_or("", Url::as_str);
            format!("tus-{id}-{size}-{endpoint}")
        })))
    }
}

//! # Description
//!
//! A client for the [tus] resumable upload protocol.
//!
//! The crate ingests a byte source together with metadata, creates a
//! server-side upload resource, and transfers the bytes in chunks so the
//! transfer survives network interruptions, process restarts, and
//! server-side locking, resuming at the exact offset the server last
//! acknowledged. It speaks protocol v1 and the IETF interop draft dialect,
//! and optionally splits one logical upload into concurrent partial
//! uploads the server concatenates afterwards.
//!
//! [tus]: https://tus.io
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tus_upload::{BytesSource, MemoryUrlStore, ReqwestTransport, Upload, UploadOptions};
//!
//! # async fn run() -> tus_upload::Result<()> {
//! let options = UploadOptions::new(
//!     Arc::new(ReqwestTransport::new()),
//!     Arc::new(MemoryUrlStore::new()),
//! )
//! .endpoint(url::Url::parse("https://tusd.tusdemo.net/files/").unwrap())
//! .chunk_size(5 * 1024 * 1024)
//! .on_progress(|sent, total| println!("{sent}/{total:?}"));
//!
//! let source = BytesSource::new(&b"hello world"[..]).with_identity("greeting");
//! let mut upload = Upload::new(source, options)?;
//! upload.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The HTTP transport, byte source, URL store, and fingerprinter are
//! trait seams; hosts with their own stacks implement [`HttpTransport`],
//! [`UploadSource`], [`UrlStore`], or [`Fingerprinter`] and hand the
//! driver an `Arc` of each.
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod options;
pub mod source;
pub mod store;
pub mod transport;
pub mod upload;

mod request;
mod retry;
mod uri;

pub use self::error::{BoxError, Error, ErrorKind, RequestSnapshot, ResponseSnapshot, Result};
pub use self::fingerprint::{DefaultFingerprinter, Fingerprinter};
pub use self::metadata::Metadata;
pub use self::options::{Protocol, UploadOptions};
pub use self::source::{BytesSource, FileSource, ReaderSource, Slice, UploadSource};
pub use self::store::{JsonFileUrlStore, MemoryUrlStore, PersistedRecord, StoreKey, UrlStore};
pub use self::transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use self::upload::{terminate, AbortHandle, PreviousUpload, Upload};

// https://tus.io/protocols/resumable-upload
mod config {
    /// Version announced in `Tus-Resumable`.
    pub(crate) const PROTOCOL_VERSION: &str = "1.0.0";
    /// Version announced in `Upload-Draft-Interop-Version`.
    pub(crate) const DRAFT_INTEROP_VERSION: &str = "5";
    /// Default retry schedule in milliseconds.
    pub(crate) const DEFAULT_RETRY_DELAYS_MS: [u64; 4] = [0, 1000, 3000, 5000];
}

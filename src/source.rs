//! Byte sources feeding an upload.
//!
//! A source hands the engine arbitrary `[start, end)` slices so the chunk
//! loop can re-read a range after a failed request. [`FileSource`] serves
//! seekable files, [`BytesSource`] serves in-memory buffers, and
//! [`ReaderSource`] adapts forward-only readers for deferred-length uploads
//! by buffering the unacknowledged tail.
use bytes::Bytes;
use futures::future::{ready, BoxFuture};
use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncSeekExt as _};
use tokio::sync::Mutex;

/// One slice produced by a source.
#[derive(Debug, Clone)]
pub struct Slice {
    /// The bytes in `[start, end)`, possibly shorter when the source ends.
    pub body: Bytes,
    /// Whether the source is exhausted at the end of this slice.
    pub done: bool,
}

/// Provides the bytes of one logical upload.
pub trait UploadSource: Send {
    /// Total size in bytes, or `None` when unknown.
    fn size(&self) -> Option<u64>;

    /// A stable identity string used as the fingerprint seed, or `None`
    /// when the source has no durable identity.
    fn identity(&self) -> Option<String> {
        None
    }

    /// Produce the bytes in `[start, end)`; `end == None` reads to the end
    /// of the source.
    fn slice(&mut self, start: u64, end: Option<u64>) -> BoxFuture<'_, io::Result<Slice>>;

    /// Release underlying resources. Called once after a successful upload.
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(ready(Ok(())))
    }
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct BytesSource {
    data: Bytes,
    identity: Option<String>,
}

impl BytesSource {
    /// Create a source over `data`.
    pub fn new<T: Into<Bytes>>(data: T) -> Self {
        Self {
            data: data.into(),
            identity: None,
        }
    }

    /// Attach an identity so the upload can be fingerprinted.
    pub fn with_identity<T: Into<String>>(mut self, identity: T) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl UploadSource for BytesSource {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn slice(&mut self, start: u64, end: Option<u64>) -> BoxFuture<'_, io::Result<Slice>> {
        let len = self.data.len() as u64;
        let start = start.min(len);
        let end = end.map_or(len, |e| e.min(len)).max(start);
        let body = self.data.slice(start as usize..end as usize);
        Box::pin(ready(Ok(Slice {
            body,
            done: end == len,
        })))
    }
}

/// A source over a file on disk.
///
/// The identity combines the canonical path, length, and modification time
/// so edits to the file produce a different fingerprint.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
    identity: String,
}

impl FileSource {
    /// Open `path` for uploading.
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let canonical = tokio::fs::canonicalize(path.as_ref()).await?;
        let file = File::open(&canonical).await?;
        let meta = file.metadata().await?;
        let len = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let identity = format!("{}-{len}-{mtime}", canonical.display());
        Ok(Self {
            file,
            len,
            identity,
        })
    }
}

impl UploadSource for FileSource {
    fn size(&self) -> Option<u64> {
        Some(self.len)
    }

    fn identity(&self) -> Option<String> {
        Some(self.identity.clone())
    }

    fn slice(&mut self, start: u64, end: Option<u64>) -> BoxFuture<'_, io::Result<Slice>> {
        Box::pin(async move {
            let len = self.len;
            let start = start.min(len);
            let end = end.map_or(len, |e| e.min(len)).max(start);
            self.file.seek(SeekFrom::Start(start)).await?;
            let mut buf = Vec::with_capacity((end - start) as usize);
            (&mut self.file).take(end - start).read_to_end(&mut buf).await?;
            let done = start + buf.len() as u64 >= len;
            Ok(Slice {
                body: Bytes::from(buf),
                done,
            })
        })
    }
}

/// How much [`ReaderSource`] reads from its reader per call.
const READ_CHUNK: usize = 16 * 1024;

/// Adapts a forward-only reader into an [`UploadSource`].
///
/// The source reports an unknown size, which makes it suitable for
/// deferred-length uploads. Bytes stay buffered from the last acknowledged
/// offset onward so a failed chunk can be replayed; slicing backwards past
/// that point is an error.
pub struct ReaderSource<R> {
    reader: R,
    buffer: Vec<u8>,
    buffer_offset: u64,
    eof: bool,
    identity: Option<String>,
}

impl<R> ReaderSource<R> {
    /// Wrap `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            buffer_offset: 0,
            eof: false,
            identity: None,
        }
    }

    /// Attach an identity so the upload can be fingerprinted.
    pub fn with_identity<T: Into<String>>(mut self, identity: T) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl<R: AsyncRead + Unpin + Send> UploadSource for ReaderSource<R> {
    fn size(&self) -> Option<u64> {
        None
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn slice(&mut self, start: u64, end: Option<u64>) -> BoxFuture<'_, io::Result<Slice>> {
        Box::pin(async move {
            if start < self.buffer_offset {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot slice backwards in a streaming source",
                ));
            }
            loop {
                let buffered_end = self.buffer_offset + self.buffer.len() as u64;
                let need_more = match end {
                    Some(e) => buffered_end < e,
                    None => true,
                };
                if self.eof || !need_more {
                    break;
                }
                let mut chunk = vec![0u8; READ_CHUNK];
                let n = self.reader.read(&mut chunk).await?;
                if n == 0 {
                    self.eof = true;
                } else {
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
            }
            // Everything before `start` is acknowledged and never re-read.
            if start > self.buffer_offset {
                let drop = ((start - self.buffer_offset) as usize).min(self.buffer.len());
                self.buffer.drain(..drop);
                self.buffer_offset += drop as u64;
            }
            let buffered_end = self.buffer_offset + self.buffer.len() as u64;
            let slice_end = end.map_or(buffered_end, |e| e.min(buffered_end)).max(start);
            let body =
                Bytes::copy_from_slice(&self.buffer[..(slice_end - self.buffer_offset) as usize]);
            let done = self.eof && slice_end == buffered_end;
            Ok(Slice { body, done })
        })
    }
}

/// Shared, range-mapped access to one boxed source.
///
/// The driver holds a handle from construction on; parallel mode clones it
/// into per-part windows so concurrent children can slice the same source.
/// Each slice call locks the source, keeping interleaved reads atomic.
#[derive(Clone)]
pub(crate) struct SourceHandle {
    shared: Arc<Mutex<Box<dyn UploadSource>>>,
    base: u64,
    len: Option<u64>,
    identity: Option<String>,
}

impl SourceHandle {
    pub(crate) fn new<S: UploadSource + 'static>(source: S) -> Self {
        let len = source.size();
        let identity = source.identity();
        Self {
            shared: Arc::new(Mutex::new(Box::new(source))),
            base: 0,
            len,
            identity,
        }
    }

    pub(crate) fn size(&self) -> Option<u64> {
        self.len
    }

    pub(crate) fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// A handle restricted to `range`, relative to this handle.
    pub(crate) fn window(&self, range: Range<u64>) -> SourceHandle {
        SourceHandle {
            shared: Arc::clone(&self.shared),
            base: self.base + range.start,
            len: Some(range.end - range.start),
            identity: None,
        }
    }

    pub(crate) async fn slice(&self, start: u64, end: Option<u64>) -> io::Result<Slice> {
        let abs_start = self.base + start;
        let window_end = self.len.map(|len| self.base + len);
        let abs_end = match (end, window_end) {
            (Some(e), Some(we)) => Some((self.base + e).min(we)),
            (Some(e), None) => Some(self.base + e),
            (None, we) => we,
        };
        let mut source = self.shared.lock().await;
        let mut slice = source.slice(abs_start, abs_end).await?;
        if let Some(len) = self.len {
            slice.done = start + slice.body.len() as u64 >= len;
        }
        Ok(slice)
    }

    pub(crate) async fn close(&self) -> io::Result<()> {
        self.shared.lock().await.close().await
    }
}

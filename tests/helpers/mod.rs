#![allow(dead_code)]
pub mod transport;
pub use self::transport::{fail, status, with_headers, MockTransport, Reply};

use futures::future::{ready, BoxFuture};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use tus_upload::{Error, Fingerprinter, MemoryUrlStore, UploadOptions};
use url::Url;

pub static TRACER: LazyLock<()> = LazyLock::new(|| {
    let level = std::env::var("LOG_LEVEL")
        .map(|l| tracing::Level::from_str(l.as_str()).unwrap())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init()
});

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Options over a mock transport and memory store, with retries disabled
/// so tests opt in to the schedules they exercise.
pub fn base_options(transport: &Arc<MockTransport>, store: &Arc<MemoryUrlStore>) -> UploadOptions {
    let _ = &*TRACER;
    UploadOptions::new(transport.clone(), store.clone()).retry_delays([])
}

/// Fingerprinter returning a fixed string, so tests can seed the store.
pub struct FixedFingerprinter(pub &'static str);

impl Fingerprinter for FixedFingerprinter {
    fn fingerprint<'a>(
        &'a self,
        _identity: Option<&'a str>,
        _size: Option<u64>,
        _endpoint: Option<&'a Url>,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(ready(Some(self.0.to_string())))
    }
}

/// Records every callback invocation for post-run assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    pub progress: Arc<Mutex<Vec<(u64, Option<u64>)>>>,
    pub chunks: Arc<Mutex<Vec<(u64, u64, Option<u64>)>>>,
    pub successes: Arc<AtomicUsize>,
    pub errors: Arc<Mutex<Vec<String>>>,
    pub urls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn install(&self, options: UploadOptions) -> UploadOptions {
        let progress = Arc::clone(&self.progress);
        let chunks = Arc::clone(&self.chunks);
        let successes = Arc::clone(&self.successes);
        let errors = Arc::clone(&self.errors);
        let urls = Arc::clone(&self.urls);
        options
            .on_progress(move |sent, total| progress.lock().unwrap().push((sent, total)))
            .on_chunk_complete(move |chunk, accepted, total| {
                chunks.lock().unwrap().push((chunk, accepted, total))
            })
            .on_success(move || {
                successes.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |e: &Error| errors.lock().unwrap().push(e.to_string()))
            .on_upload_url_available(move |u: &Url| urls.lock().unwrap().push(u.to_string()))
    }

    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn chunk_sizes(&self) -> Vec<u64> {
        self.chunks.lock().unwrap().iter().map(|c| c.0).collect()
    }

    pub fn progress_values(&self) -> Vec<(u64, Option<u64>)> {
        self.progress.lock().unwrap().clone()
    }
}

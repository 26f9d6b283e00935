mod helpers;
use self::helpers::{
    base_options, fail, status, url, with_headers, FixedFingerprinter, MockTransport, Recorder,
};

use std::sync::Arc;
use std::time::Duration;
use tus_upload::{
    terminate, BoxError, BytesSource, ErrorKind, MemoryUrlStore, Metadata, Method,
    PersistedRecord, Protocol, ReaderSource, Upload, UrlStore as _,
};

fn stack() -> (Arc<MockTransport>, Arc<MemoryUrlStore>) {
    (Arc::new(MockTransport::new()), Arc::new(MemoryUrlStore::new()))
}

#[tokio::test]
async fn happy_path_single_request() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"));
    let source = BytesSource::new(&b"hello"[..]).with_identity("greeting");
    let mut upload = Upload::new(source, options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].url, "https://h/up");
    assert_eq!(requests[0].header("Tus-Resumable"), Some("1.0.0"));
    assert_eq!(requests[0].header("Upload-Length"), Some("5"));
    assert_eq!(requests[0].header("Upload-Metadata"), None);
    assert!(requests[0].body.is_none());

    assert_eq!(requests[1].method, Method::Patch);
    assert_eq!(requests[1].url, "https://h/up/a");
    assert_eq!(requests[1].header("Upload-Offset"), Some("0"));
    assert_eq!(
        requests[1].header("Content-Type"),
        Some("application/offset+octet-stream")
    );
    assert_eq!(requests[1].body.as_deref(), Some(&b"hello"[..]));

    assert_eq!(upload.url().unwrap().as_str(), "https://h/up/a");
    assert_eq!(upload.offset(), 5);
    assert_eq!(recorder.success_count(), 1);
    assert_eq!(recorder.chunk_sizes().iter().sum::<u64>(), 5);

    let records = store.find_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1.upload_url.as_deref(), Some("https://h/up/a"));
    assert_eq!(records[0].1.size, Some(5));
}

#[tokio::test]
async fn metadata_rides_on_the_creation_request() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let mut metadata = Metadata::new();
    metadata.insert("filename", "hello.txt").unwrap();
    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .metadata(metadata);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(
        requests[0].header("Upload-Metadata"),
        Some("filename aGVsbG8udHh0")
    );
}

#[tokio::test]
async fn resume_after_crash_continues_at_the_acknowledged_offset() {
    let (transport, store) = stack();
    let record = PersistedRecord {
        size: Some(5),
        metadata: Metadata::new(),
        creation_time: "2026-08-02T00:00:00Z".to_string(),
        upload_url: Some("https://h/up/a".to_string()),
        parallel_upload_urls: None,
    };
    store.add_upload("fp-1", record).await.unwrap();

    transport.push(with_headers(
        200,
        &[("Upload-Offset", "3"), ("Upload-Length", "5")],
    ));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .fingerprinter(Arc::new(FixedFingerprinter("fp-1")));
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::Head);
    assert_eq!(requests[0].url, "https://h/up/a");
    assert_eq!(requests[1].method, Method::Patch);
    assert_eq!(requests[1].header("Upload-Offset"), Some("3"));
    assert_eq!(requests[1].body.as_deref(), Some(&b"lo"[..]));
    assert_eq!(recorder.success_count(), 1);
}

#[tokio::test]
async fn locked_upload_retries_then_surfaces_the_error() {
    let (transport, store) = stack();
    for _ in 0..3 {
        transport.push(status(423));
    }

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .upload_url(url("https://h/up/a"))
        .store_fingerprint(false)
        .retry_delays([Duration::ZERO, Duration::from_millis(10)]);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    let error = upload.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Http);
    assert_eq!(error.status(), Some(423));
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.method == Method::Head));
    assert_eq!(recorder.errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn parallel_parts_upload_then_concatenate() {
    let (transport, store) = stack();
    transport.route(
        Method::Post,
        "https://h/files",
        with_headers(201, &[("Location", "/files/p0")]),
    );
    transport.route(
        Method::Post,
        "https://h/files",
        with_headers(201, &[("Location", "/files/p1")]),
    );
    transport.route(
        Method::Post,
        "https://h/files",
        with_headers(201, &[("Location", "/files/final")]),
    );
    transport.route(
        Method::Patch,
        "https://h/files/p0",
        with_headers(204, &[("Upload-Offset", "5")]),
    );
    transport.route(
        Method::Patch,
        "https://h/files/p1",
        with_headers(204, &[("Upload-Offset", "5")]),
    );

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/files"))
        .parallel_uploads(2)
        .parallel_boundaries(vec![0..5, 5..10])
        .fingerprinter(Arc::new(FixedFingerprinter("fp-par")));
    let source = BytesSource::new(&b"0123456789"[..]).with_identity("ten-bytes");
    let mut upload = Upload::new(source, options).unwrap();
    upload.start().await.unwrap();

    // Three creations: two partial, one final concatenation.
    let creations = transport.requests_with(Method::Post);
    assert_eq!(creations.len(), 3);
    let partials: Vec<_> = creations
        .iter()
        .filter(|r| r.header("Upload-Concat") == Some("partial"))
        .collect();
    assert_eq!(partials.len(), 2);
    assert!(partials.iter().all(|r| r.header("Upload-Length") == Some("5")));

    // Each part carried its half of the source.
    let patches = transport.requests_with(Method::Patch);
    assert_eq!(patches.len(), 2);
    let first_half = patches
        .iter()
        .find(|r| r.body.as_deref() == Some(&b"01234"[..]))
        .expect("one part carries bytes [0, 5)");
    let second_half = patches
        .iter()
        .find(|r| r.body.as_deref() == Some(&b"56789"[..]))
        .expect("one part carries bytes [5, 10)");

    // The concatenation lists part URLs in boundary order.
    let concat = creations
        .iter()
        .find_map(|r| {
            r.header("Upload-Concat")
                .filter(|v| v.starts_with("final;"))
                .map(str::to_string)
        })
        .expect("a final concatenation request");
    assert_eq!(concat, format!("final;{} {}", first_half.url, second_half.url));

    assert_eq!(upload.url().unwrap().as_str(), "https://h/files/final");
    assert_eq!(recorder.success_count(), 1);

    // One record, written once all part URLs were known.
    let records = store.find_all().await.unwrap();
    assert_eq!(records.len(), 1);
    let urls = records[0].1.parallel_upload_urls.clone().unwrap();
    assert_eq!(urls, vec![first_half.url.clone(), second_half.url.clone()]);

    // Aggregate progress is monotone and reaches the total.
    let progress = recorder.progress_values();
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(progress.last().unwrap().0, 10);
}

#[tokio::test]
async fn deferred_length_announces_the_size_on_the_final_chunk() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/d")]));
    transport.push(with_headers(204, &[("Upload-Offset", "4")]));
    transport.push(with_headers(204, &[("Upload-Offset", "6")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .chunk_size(4)
        .upload_length_deferred(true);
    let source = ReaderSource::new(&b"abcdef"[..]);
    let mut upload = Upload::new(source, options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].header("Upload-Defer-Length"), Some("1"));
    assert_eq!(requests[0].header("Upload-Length"), None);

    assert_eq!(requests[1].body.as_deref(), Some(&b"abcd"[..]));
    assert_eq!(requests[1].header("Upload-Length"), None);

    assert_eq!(requests[2].header("Upload-Offset"), Some("4"));
    assert_eq!(requests[2].body.as_deref(), Some(&b"ef"[..]));
    assert_eq!(requests[2].header("Upload-Length"), Some("6"));

    assert_eq!(upload.size(), Some(6));
    assert_eq!(recorder.success_count(), 1);
}

#[tokio::test]
async fn size_mismatch_is_terminal() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/m")]));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .upload_size(100)
        .retry_delays([Duration::ZERO, Duration::ZERO]);
    let source = BytesSource::new(vec![9u8; 80]);
    let mut upload = Upload::new(source, options).unwrap();
    let error = upload.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::SizeMismatch);
    assert_eq!(
        error.to_string(),
        "source produced 80 bytes where 100 were announced"
    );
    // Creation only; the mismatch is caught before any transfer, and a
    // configured retry schedule must not reattempt it.
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn draft_dialect_negotiates_and_marks_completion() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(with_headers(204, &[("Upload-Offset", "3")]));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .protocol(Protocol::IetfDraft)
        .chunk_size(3)
        .store_fingerprint(false);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].header("Upload-Draft-Interop-Version"), Some("5"));
    assert_eq!(requests[0].header("Tus-Resumable"), None);
    assert_eq!(requests[0].header("Upload-Complete"), Some("?0"));
    assert_eq!(requests[1].header("Upload-Complete"), Some("?0"));
    assert_eq!(requests[2].header("Upload-Complete"), Some("?1"));
}

#[tokio::test]
async fn creation_can_carry_the_first_chunk() {
    let (transport, store) = stack();
    transport.push(with_headers(
        201,
        &[("Location", "/up/a"), ("Upload-Offset", "3")],
    ));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .chunk_size(3)
        .upload_data_during_creation(true);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].header("Upload-Length"), Some("5"));
    assert_eq!(
        requests[0].header("Content-Type"),
        Some("application/offset+octet-stream")
    );
    assert_eq!(requests[0].body.as_deref(), Some(&b"hel"[..]));
    assert_eq!(requests[1].header("Upload-Offset"), Some("3"));
    assert_eq!(requests[1].body.as_deref(), Some(&b"lo"[..]));
    assert_eq!(recorder.chunk_sizes(), vec![3, 2]);
}

#[tokio::test]
async fn gone_upload_falls_back_to_creation_and_replaces_the_record() {
    let (transport, store) = stack();
    let record = PersistedRecord {
        size: Some(5),
        metadata: Metadata::new(),
        creation_time: "2026-08-02T00:00:00Z".to_string(),
        upload_url: Some("https://h/up/gone".to_string()),
        parallel_upload_urls: None,
    };
    store.add_upload("fp-1", record).await.unwrap();

    transport.push(status(404));
    transport.push(with_headers(201, &[("Location", "/up/b")]));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .fingerprinter(Arc::new(FixedFingerprinter("fp-1")));
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].method, Method::Head);
    assert_eq!(requests[0].url, "https://h/up/gone");
    assert_eq!(requests[1].method, Method::Post);
    assert_eq!(requests[2].method, Method::Patch);
    assert_eq!(requests[2].url, "https://h/up/b");

    let records = store.find_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1.upload_url.as_deref(), Some("https://h/up/b"));
}

#[tokio::test]
async fn empty_upload_completes_without_transfers() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/e")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"));
    let mut upload = Upload::new(BytesSource::new(Vec::new()), options).unwrap();
    upload.start().await.unwrap();

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(recorder.success_count(), 1);
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn progress_between_attempts_replenishes_the_retry_budget() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(with_headers(204, &[("Upload-Offset", "1")]));
    transport.push(fail("connection reset"));
    transport.push(with_headers(
        200,
        &[("Upload-Offset", "1"), ("Upload-Length", "3")],
    ));
    transport.push(with_headers(204, &[("Upload-Offset", "2")]));
    transport.push(fail("connection reset"));
    transport.push(with_headers(
        200,
        &[("Upload-Offset", "2"), ("Upload-Length", "3")],
    ));
    transport.push(with_headers(204, &[("Upload-Offset", "3")]));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .chunk_size(1)
        .store_fingerprint(false)
        .retry_delays([Duration::ZERO]);
    let mut upload = Upload::new(BytesSource::new(&b"abc"[..]), options).unwrap();
    upload.start().await.unwrap();

    // Two failures survived on a single-slot schedule: each acknowledged
    // chunk reset the attempt counter.
    assert_eq!(transport.requests().len(), 8);
    assert_eq!(recorder.success_count(), 1);
    assert_eq!(recorder.chunk_sizes().iter().sum::<u64>(), 3);
}

#[tokio::test]
async fn conflict_is_retried() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(status(409));
    transport.push(with_headers(
        200,
        &[("Upload-Offset", "0"), ("Upload-Length", "5")],
    ));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .store_fingerprint(false)
        .retry_delays([Duration::ZERO]);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    assert_eq!(transport.requests().len(), 4);
}

#[tokio::test]
async fn found_previous_upload_resumes_without_a_transfer() {
    let (transport, store) = stack();
    let record = PersistedRecord {
        size: Some(5),
        metadata: Metadata::new(),
        creation_time: "2026-08-02T00:00:00Z".to_string(),
        upload_url: Some("https://h/up/a".to_string()),
        parallel_upload_urls: None,
    };
    store.add_upload("fp-1", record).await.unwrap();

    transport.push(with_headers(
        200,
        &[("Upload-Offset", "5"), ("Upload-Length", "5")],
    ));

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .store_fingerprint(false)
        .fingerprinter(Arc::new(FixedFingerprinter("fp-1")));
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();

    let previous = upload.find_previous_uploads().await.unwrap();
    assert_eq!(previous.len(), 1);
    upload.resume_from_previous_upload(&previous[0]).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Head);
    assert_eq!(recorder.success_count(), 1);
    assert_eq!(recorder.progress_values(), vec![(5, Some(5))]);
}

#[tokio::test]
async fn hooks_run_around_every_exchange() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(with_headers(204, &[("Upload-Offset", "5")]));

    let statuses: Arc<std::sync::Mutex<Vec<u16>>> = Arc::default();
    let seen = Arc::clone(&statuses);
    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .store_fingerprint(false)
        .on_before_request(|request| {
            request.set_header("Authorization", "Bearer t");
            Box::pin(async { Ok::<(), BoxError>(()) })
        })
        .on_after_response(move |_request, response| {
            seen.lock().unwrap().push(response.status());
            Box::pin(async { Ok::<(), BoxError>(()) })
        });
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    upload.start().await.unwrap();

    let requests = transport.requests();
    assert!(requests
        .iter()
        .all(|r| r.header("Authorization") == Some("Bearer t")));
    assert_eq!(*statuses.lock().unwrap(), vec![201, 204]);
}

#[tokio::test]
async fn abort_silences_events_and_cancels_the_inflight_request() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(helpers::Reply::Hang);

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/up"))
        .store_fingerprint(false);
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    let handle = upload.abort_handle();

    let (result, ()) = tokio::join!(upload.start(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Aborted);
    assert_eq!(recorder.success_count(), 0);
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn abort_with_terminate_deletes_the_resource_and_record() {
    let (transport, store) = stack();
    transport.push(with_headers(201, &[("Location", "/up/a")]));
    transport.push(fail("connection reset"));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .fingerprinter(Arc::new(FixedFingerprinter("fp-1")));
    let mut upload = Upload::new(BytesSource::new(&b"hello"[..]), options).unwrap();
    assert!(upload.start().await.is_err());
    assert_eq!(store.find_all().await.unwrap().len(), 1);

    transport.push(status(204));
    upload.abort(true).await.unwrap();

    let requests = transport.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.method, Method::Delete);
    assert_eq!(last.url, "https://h/up/a");
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn terminate_retries_transient_failures() {
    let (transport, store) = stack();
    transport.push(status(500));
    transport.push(status(204));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .retry_delays([Duration::ZERO]);
    terminate(&url("https://h/up/a"), &options).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.method == Method::Delete));
}

#[tokio::test]
async fn terminate_does_not_retry_client_errors() {
    let (transport, store) = stack();
    transport.push(status(403));

    let options = base_options(&transport, &store)
        .endpoint(url("https://h/up"))
        .retry_delays([Duration::ZERO, Duration::ZERO]);
    let error = terminate(&url("https://h/up/a"), &options).await.unwrap_err();

    assert_eq!(error.status(), Some(403));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn resumed_parallel_upload_reuses_the_stored_part_urls() {
    let (transport, store) = stack();
    let record = PersistedRecord {
        size: Some(10),
        metadata: Metadata::new(),
        creation_time: "2026-08-02T00:00:00Z".to_string(),
        upload_url: None,
        parallel_upload_urls: Some(vec![
            "https://h/files/p0".to_string(),
            "https://h/files/p1".to_string(),
        ]),
    };
    store.add_upload("fp-par", record).await.unwrap();

    transport.route(
        Method::Head,
        "https://h/files/p0",
        with_headers(200, &[("Upload-Offset", "3"), ("Upload-Length", "5")]),
    );
    transport.route(
        Method::Head,
        "https://h/files/p1",
        with_headers(200, &[("Upload-Offset", "5"), ("Upload-Length", "5")]),
    );
    transport.route(
        Method::Patch,
        "https://h/files/p0",
        with_headers(204, &[("Upload-Offset", "5")]),
    );
    transport.route(
        Method::Post,
        "https://h/files",
        with_headers(201, &[("Location", "/files/final")]),
    );

    let recorder = Recorder::default();
    let options = recorder
        .install(base_options(&transport, &store))
        .endpoint(url("https://h/files"))
        .parallel_uploads(2)
        .fingerprinter(Arc::new(FixedFingerprinter("fp-par")));
    let source = BytesSource::new(&b"0123456789"[..]).with_identity("ten-bytes");
    let mut upload = Upload::new(source, options).unwrap();
    upload.start().await.unwrap();

    // No creations besides the final concatenation; the incomplete part
    // transferred only its remainder.
    let patches = transport.requests_with(Method::Patch);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].header("Upload-Offset"), Some("3"));
    assert_eq!(patches[0].body.as_deref(), Some(&b"34"[..]));

    let concat = transport
        .requests_with(Method::Post)
        .into_iter()
        .find_map(|r| r.header("Upload-Concat").map(str::to_string))
        .unwrap();
    assert_eq!(concat, "final;https://h/files/p0 https://h/files/p1");
    assert_eq!(upload.url().unwrap().as_str(), "https://h/files/final");
    assert_eq!(recorder.success_count(), 1);
}

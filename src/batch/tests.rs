use super::*;
use crate::config::RelayConfig;
use crate::packager::ZipPackager;
use crate::test_helpers::{ScriptedResolver, payload};
use crate::transcoder::NoOpTranscoder;
use crate::utils::confine_to_root;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    orchestrator: BatchOrchestrator,
    sessions: SessionRegistry,
    resolver: Arc<ScriptedResolver>,
}

fn harness(root: &Path, resolver: ScriptedResolver, width: usize) -> Harness {
    harness_with(root, resolver, |config| config.download.max_concurrent_jobs = width)
}

fn harness_with(
    root: &Path,
    resolver: ScriptedResolver,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let mut config = Config::default();
    config.download.download_dir = root.to_path_buf();
    // Keeps the item name as the last path segment seen by the resolver
    config.download.item_url_template = "https://items.test/{id}".into();
    config.download.progress_interval = Duration::from_millis(10);
    config.relay = RelayConfig {
        max_attempts: 2,
        backoff_base: Duration::from_millis(1),
        ..RelayConfig::default()
    };
    configure(&mut config);

    let resolver = Arc::new(resolver);
    let sessions = SessionRegistry::new();
    let services = BatchServices {
        relay: StreamRelay::new(reqwest::Client::new(), resolver.clone(), config.relay.clone()),
        transcoder: Arc::new(NoOpTranscoder),
        packager: Arc::new(ZipPackager),
        sessions: sessions.clone(),
    };
    Harness {
        orchestrator: BatchOrchestrator::new(&config, services),
        sessions,
        resolver,
    }
}

/// Origin serving 64 KiB per item, with `failing` items answered 404
async fn origin(failing: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    for item in failing {
        Mock::given(method("GET"))
            .and(path(format!("/media/{item}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path_regex("^/media/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(64 * 1024).to_vec()))
        .mount(&server)
        .await;
    server
}

fn position(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("event not found in {events:#?}"))
}

fn is_status(event: &Event, text: &str) -> bool {
    matches!(event, Event::Status { message, video_index: None } if message == text)
}

#[tokio::test]
async fn three_items_with_one_transfer_failure() {
    let root = tempfile::tempdir().unwrap();
    let server = origin(&["b"]).await;
    let h = harness(root.path(), ScriptedResolver::new(server.uri()), 5);

    let mut request = BatchRequest::new(["a", "b", "c"]);
    request.playlist_title = Some("Road Trip".into());
    let events = h
        .orchestrator
        .execute(request, &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    assert!(is_status(&events[0], "Starting playlist download (3 videos)..."));

    let starts: Vec<usize> = (0..3)
        .map(|i| {
            let text = format!("Starting download for video #{}", i + 1);
            position(&events, |e| matches!(e, Event::Status { message, video_index: Some(v) } if *v == i && *message == text))
        })
        .collect();
    let terminals: Vec<usize> = (0..3)
        .map(|i| position(&events, |e| e.is_job_terminal() && e.video_index() == Some(i)))
        .collect();
    for i in 0..3 {
        assert!(starts[i] < terminals[i]);
    }
    assert!(matches!(events[terminals[0]], Event::VideoFinished { .. }));
    assert!(matches!(&events[terminals[1]], Event::Error { message, .. } if message.contains("404")));
    assert!(matches!(events[terminals[2]], Event::VideoFinished { .. }));

    let two_done = position(&events, |e| is_status(e, "2/3 videos completed"));
    let all_done = position(&events, |e| is_status(e, "3/3 videos completed"));
    let zipping = position(&events, |e| is_status(e, "Creating ZIP archive..."));
    assert!(terminals.iter().all(|&t| t < all_done));
    assert!(two_done < all_done && all_done < zipping);

    assert_eq!(events.iter().filter(|e| e.is_batch_terminal()).count(), 1);
    match events.last().unwrap() {
        Event::Completed { zip_url, archive_name, .. } => {
            assert_eq!(archive_name, "Road_Trip.zip");
            assert_eq!(zip_url, "/download/Road_Trip.zip");
        }
        other => panic!("expected completed, got {other:?}"),
    }

    let archive =
        zip::ZipArchive::new(std::fs::File::open(root.path().join("Road_Trip.zip")).unwrap())
            .unwrap();
    let mut names: Vec<_> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(names, vec!["1 - Title_a.mp4", "3 - Title_c.mp4"]);

    // Working directory removed once packaged
    assert!(h.sessions.is_empty());
    let leftovers: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(SESSION_DIR_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn failures_are_isolated_and_packaging_still_runs() {
    let root = tempfile::tempdir().unwrap();
    let server = origin(&[]).await;
    let resolver = ScriptedResolver::new(server.uri()).failing_for(["i1", "i4"]);
    let h = harness(root.path(), resolver, 3);

    let ids: Vec<String> = (0..6).map(|i| format!("i{i}")).collect();
    let events = h
        .orchestrator
        .execute(BatchRequest::new(ids), &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    let final_index = events.len() - 1;
    assert!(events[final_index].is_batch_terminal());
    assert!(matches!(events[final_index], Event::Completed { .. }));

    let job_terminals: Vec<&Event> = events[..final_index]
        .iter()
        .filter(|e| e.is_job_terminal())
        .collect();
    assert_eq!(job_terminals.len(), 6);
    let mut failed: Vec<usize> = job_terminals
        .iter()
        .filter(|e| matches!(e, Event::Error { .. }))
        .filter_map(|e| e.video_index())
        .collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![1, 4]);

    // Resolver failures are not retried by the relay
    assert_eq!(h.resolver.calls(), 6);

    let archive =
        zip::ZipArchive::new(std::fs::File::open(root.path().join("playlist.zip")).unwrap())
            .unwrap();
    assert_eq!(archive.len(), 4);
}

#[tokio::test]
async fn running_jobs_never_exceed_pool_width() {
    let root = tempfile::tempdir().unwrap();
    let server = origin(&[]).await;
    let resolver = ScriptedResolver::new(server.uri()).with_delay(Duration::from_millis(40));
    let h = harness(root.path(), resolver, 2);

    let ids: Vec<String> = (0..7).map(|i| format!("item{i}")).collect();
    let events = h
        .orchestrator
        .execute(BatchRequest::new(ids), &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    let mut running = 0i32;
    let mut peak = 0;
    for event in &events {
        match event {
            Event::Status { message, video_index: Some(_) } if message.starts_with("Starting download") => {
                running += 1;
                peak = peak.max(running);
                assert!(running <= 2, "more than 2 jobs running: {events:#?}");
            }
            e if e.is_job_terminal() => running -= 1,
            _ => {}
        }
    }
    assert_eq!(running, 0);
    assert_eq!(peak, 2);
    assert!(matches!(events.last(), Some(Event::Completed { .. })));
}

#[tokio::test]
async fn archive_names_never_collide() {
    let root = tempfile::tempdir().unwrap();
    let server = origin(&[]).await;
    let h = harness(root.path(), ScriptedResolver::new(server.uri()), 5);
    std::fs::write(root.path().join("playlist.zip"), b"older archive").unwrap();

    let events = h
        .orchestrator
        .execute(BatchRequest::new(["x"]), &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    match events.last().unwrap() {
        Event::Completed { zip_url, archive_name, .. } => {
            assert_eq!(archive_name, "playlist (1).zip");
            assert_eq!(zip_url, "/download/playlist%20%281%29.zip");
            let served = confine_to_root(root.path(), "playlist (1).zip").unwrap();
            assert!(served.is_file());
        }
        other => panic!("expected completed, got {other:?}"),
    }
    assert_eq!(
        std::fs::read(root.path().join("playlist.zip")).unwrap(),
        b"older archive"
    );
}

#[tokio::test]
async fn archive_lands_in_requested_sub_directory() {
    let root = tempfile::tempdir().unwrap();
    let server = origin(&[]).await;
    let h = harness(root.path(), ScriptedResolver::new(server.uri()), 5);

    let mut request = BatchRequest::new(["x"]);
    request.download_path = Some("music/live".into());
    let events = h
        .orchestrator
        .execute(request, &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    assert!(matches!(events.last(), Some(Event::Completed { zip_url, .. })
        if zip_url == "/download/music/live/playlist.zip"));
    assert!(root.path().join("music/live/playlist.zip").is_file());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_event() {
    let root = tempfile::tempdir().unwrap();
    let h = harness(root.path(), ScriptedResolver::new("http://127.0.0.1:9"), 5);
    let shutdown = CancellationToken::new();

    let empty = h.orchestrator.execute(BatchRequest::new(Vec::<String>::new()), &shutdown);
    assert!(matches!(empty, Err(Error::InvalidRequest(_))));

    let blank = h.orchestrator.execute(BatchRequest::new(["a", " "]), &shutdown);
    assert!(matches!(blank, Err(Error::InvalidRequest(_))));

    let mut escaping = BatchRequest::new(["a"]);
    escaping.download_path = Some("../outside".into());
    assert!(matches!(
        h.orchestrator.execute(escaping, &shutdown),
        Err(Error::InvalidRequest(_))
    ));

    assert_eq!(h.resolver.calls(), 0);
}

#[tokio::test]
async fn unusable_output_directory_yields_single_error_event() {
    let root = tempfile::tempdir().unwrap();
    // A file where the output directory should be created
    std::fs::write(root.path().join("blocked"), b"file").unwrap();
    let h = harness(root.path(), ScriptedResolver::new("http://127.0.0.1:9"), 5);

    let mut request = BatchRequest::new(["a"]);
    request.download_path = Some("blocked".into());
    let events = h
        .orchestrator
        .execute(request, &CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;

    assert_eq!(events.len(), 1, "{events:?}");
    assert!(matches!(&events[0], Event::Error { video_index: None, .. }));
}

#[tokio::test]
async fn shutdown_cancels_jobs_and_skips_packaging() {
    let root = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    // Long backoff keeps the first job busy until shutdown
    let h = harness_with(root.path(), ScriptedResolver::new(server.uri()), |config| {
        config.download.max_concurrent_jobs = 1;
        config.relay.max_attempts = 5;
        config.relay.backoff_base = Duration::from_secs(30);
    });

    let shutdown = CancellationToken::new();
    let mut stream = h
        .orchestrator
        .execute(BatchRequest::new(["a", "b", "c"]), &shutdown)
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        let retrying = matches!(&event, Event::Log { message, .. } if message.contains("retrying"));
        events.push(event);
        if retrying {
            break;
        }
    }
    shutdown.cancel();
    let rest = tokio::time::timeout(Duration::from_secs(5), stream.collect_all())
        .await
        .expect("batch must end promptly after shutdown");
    events.extend(rest);

    assert_eq!(events.iter().filter(|e| e.is_job_terminal()).count(), 3);
    assert!(!events.iter().any(|e| is_status(e, "Creating ZIP archive...")));
    assert!(matches!(events.last(), Some(Event::Error { video_index: None, .. })));
    assert!(!root.path().join("playlist.zip").exists());
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_batch() {
    let root = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    let h = harness(root.path(), ScriptedResolver::new(server.uri()), 5);

    let mut stream = h
        .orchestrator
        .execute(BatchRequest::new(["a", "b"]), &CancellationToken::new())
        .unwrap();
    // Wait until the batch is underway
    while let Some(event) = stream.next_event().await {
        if matches!(event, Event::Status { video_index: Some(_), .. }) {
            break;
        }
    }
    assert_eq!(h.sessions.len(), 1);

    drop(stream);

    for _ in 0..200 {
        if h.sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.sessions.is_empty(), "session must end after the observer left");
    assert!(!root.path().join("playlist.zip").exists());
}

//! Integration tests for the sync engine and the reference server.

use bytes::Bytes;
use databay_core::{BranchName, Catalog, DataItem, Frame, Revision};
use databay_protocol::{ErrorCode, HttpRequest, HttpResponse, LoopbackServer, Method};
use databay_server::{DataServer, ServerConfig};
use databay_sync_engine::{
    CancellationToken, DatasetClient, LoopbackTransport, RetryConfig, SyncConfig, Transport,
    TransportError,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A transport that answers the first attempt of every part upload with a 503.
struct FlakyTransport {
    server: Arc<DataServer>,
    seen: Mutex<HashSet<String>>,
    rejected: AtomicUsize,
}

impl FlakyTransport {
    fn new(server: Arc<DataServer>) -> Self {
        Self {
            server,
            seen: Mutex::new(HashSet::new()),
            rejected: AtomicUsize::new(0),
        }
    }
}

impl Transport for FlakyTransport {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.method == Method::Put && self.seen.lock().insert(request.path.clone()) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Ok(HttpResponse::error(ErrorCode::Unavailable, "try again"));
        }
        Ok(self.server.handle(request))
    }
}

fn frame(sensor: &str, path: &str, bytes: &[u8]) -> Frame {
    Frame::single(DataItem::new(sensor, path, Bytes::copy_from_slice(bytes))).unwrap()
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new(attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

#[test]
fn client_server_full_cycle() {
    let server = Arc::new(DataServer::new(ServerConfig::default()));
    let config = SyncConfig::new().with_part_size(16).with_parallelism(4);
    let client = DatasetClient::new(LoopbackTransport::new(server.clone()), config);
    client.create_dataset("drives").unwrap();
    let vc = client.dataset("drives").unwrap();
    let cancel = CancellationToken::new();

    let draft = vc
        .create_draft(&BranchName::default_branch(), "initial import")
        .unwrap();
    let mut catalog = Catalog::for_draft(draft.number);
    for segment in ["day", "night"] {
        catalog.add_segment(segment).unwrap();
        for i in 0..5u8 {
            let body = vec![i; 40 + i as usize];
            catalog
                .add_frame(segment, frame("front", &format!("{segment}/{i}.jpg"), &body))
                .unwrap();
        }
    }

    let report = vc.sync(&mut catalog, &cancel).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded(), 12);
    assert_eq!(report.segments.len(), 2);
    assert_eq!(server.stats().frames, 10);

    let commit = vc.commit_draft(draft.number, &catalog, "import").unwrap();
    assert_eq!(server.stats().commits, 1);

    let snapshot = vc.checkout(&Revision::Commit(commit.id)).unwrap();
    assert_eq!(snapshot.frame_count(), 10);
    for segment in snapshot.segments() {
        for (index, remote) in segment.frames() {
            let local = catalog.frame(segment.name(), index).unwrap();
            let downloaded = vc.download(remote, &cancel).unwrap();
            assert_eq!(downloaded.payload(), local.payload());
        }
    }
}

#[test]
fn transient_part_failures_are_retried() {
    let server = Arc::new(DataServer::new(ServerConfig::default()));
    let transport = Arc::new(FlakyTransport::new(server.clone()));
    let config = SyncConfig::new()
        .with_part_size(8)
        .with_parallelism(2)
        .with_retry(fast_retry(3));
    let client = DatasetClient::new(transport.clone(), config);
    client.create_dataset("drives").unwrap();
    let vc = client.dataset("drives").unwrap();

    let draft = vc
        .create_draft(&BranchName::default_branch(), "flaky")
        .unwrap();
    let mut catalog = Catalog::for_draft(draft.number);
    catalog.add_segment("s1").unwrap();
    for i in 0..3u8 {
        catalog
            .add_frame("s1", frame("cam", &format!("{i}.bin"), &[i; 20]))
            .unwrap();
    }

    let report = vc.sync(&mut catalog, &CancellationToken::new()).unwrap();
    assert!(report.is_complete(), "{:?}", report.outcomes);
    // 3 frames of 20 bytes in parts of 8.
    assert_eq!(server.stats().parts, 9);
    assert_eq!(vc.engine().stats().parts_uploaded, 9);
    assert_eq!(transport.rejected.load(Ordering::SeqCst), 9);

    vc.commit_draft(draft.number, &catalog, "flaky import")
        .unwrap();
}

#[test]
fn shared_api_across_datasets() {
    let server = Arc::new(DataServer::new(ServerConfig::default()));
    let client = DatasetClient::new(LoopbackTransport::new(server), SyncConfig::default());
    client.create_dataset("a").unwrap();
    client.create_dataset("b").unwrap();

    let a = client.dataset("a").unwrap();
    let b = client.dataset("b").unwrap();
    a.create_draft(&BranchName::default_branch(), "x").unwrap();
    b.create_draft(&BranchName::default_branch(), "y").unwrap();

    let names: Vec<_> = client
        .list_datasets()
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(a.list_drafts(None, None).unwrap().len(), 1);
}

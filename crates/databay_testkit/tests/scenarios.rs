//! End-to-end scenarios against the reference server.

use databay_core::{Catalog, CatalogMode, ItemKey};
use databay_protocol::ErrorCode;
use databay_sync_engine::{CancellationToken, DatasetClient, ItemOutcome, SyncError};
use databay_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn init_then_follow_up_commit() {
    let server = TestServer::new();
    let vc = server.dataset("cars");
    let cancel = CancellationToken::new();

    let d1 = vc.create_draft(&main_branch(), "init").unwrap();
    let mut catalog = populated_catalog(d1.number, &["s1"], 2, 12);
    vc.sync(&mut catalog, &cancel).unwrap();
    let c0 = vc.commit_draft(d1.number, &catalog, "C0").unwrap();
    assert_eq!(c0.parent, None);

    let d2 = vc.create_draft(&main_branch(), "more").unwrap();
    assert_eq!(d2.parent.as_ref(), Some(&c0.id));
    let mut catalog = vc
        .checkout(&databay_core::Revision::Draft(d2.number))
        .unwrap();
    catalog.add_frame("s1", sized_frame(99, 5)).unwrap();
    vc.sync(&mut catalog, &cancel).unwrap();
    let c1 = vc.commit_draft(d2.number, &catalog, "C1").unwrap();
    assert_eq!(c1.parent.as_ref(), Some(&c0.id));

    let d3 = vc.create_draft(&main_branch(), "next").unwrap();
    assert_eq!(d3.parent.as_ref(), Some(&c1.id));
    assert_eq!(server.stats().commits, 2);
}

#[test]
fn second_client_commit_is_stale() {
    let server = TestServer::new();
    let alice = server.dataset("cars");
    let bob = server.client().dataset("cars").unwrap();
    let cancel = CancellationToken::new();

    let da = alice.create_draft(&main_branch(), "alice").unwrap();
    let db = bob.create_draft(&main_branch(), "bob").unwrap();
    assert_eq!(da.parent, db.parent);

    let mut bob_catalog = populated_catalog(db.number, &["b"], 1, 4);
    bob.sync(&mut bob_catalog, &cancel).unwrap();

    let mut alice_catalog = populated_catalog(da.number, &["a"], 1, 4);
    alice.sync(&mut alice_catalog, &cancel).unwrap();
    alice.commit_draft(da.number, &alice_catalog, "alice wins").unwrap();

    let err = bob
        .commit_draft(db.number, &bob_catalog, "bob loses")
        .unwrap_err();
    assert!(matches!(err, SyncError::StaleDraft { .. }), "{err}");
    assert_eq!(err.kind(), "StaleDraft");

    // Further syncs of the stale draft are refused before any transfer.
    let parts = server.stats().parts;
    bob_catalog.add_frame("b", sized_frame(7, 4)).unwrap();
    let err = bob.sync(&mut bob_catalog, &cancel).unwrap_err();
    assert!(matches!(err, SyncError::StaleDraft { .. }));
    assert_eq!(server.stats().parts, parts);
    assert_eq!(server.stats().commits, 1);
}

#[test]
fn exhausted_part_retries_fail_one_frame_only() {
    let server = TestServer::new();
    let faulty = Arc::new(FaultyTransport::new(server.transport()).with_fault(
        FaultTarget::Part(2),
        ErrorCode::Unavailable,
        3,
    ));
    let client = DatasetClient::new(faulty.clone(), test_config());
    let vc = open_dataset(&client, "cars");
    let cancel = CancellationToken::new();

    let draft = vc.create_draft(&main_branch(), "import").unwrap();
    // 20-byte frames in 8-byte parts: three parts each.
    let mut catalog = populated_catalog(draft.number, &["s1"], 5, 20);
    let report = vc.sync(&mut catalog, &cancel).unwrap();

    assert_eq!(faulty.injected().len(), 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 5);
    let failed_key = match report.failures().next().unwrap() {
        ItemOutcome::Failed { op, error } => {
            match error {
                SyncError::TerminalItem { source, .. } => {
                    assert!(matches!(**source, SyncError::Transport { retryable: true, .. }));
                }
                other => panic!("unexpected error {other}"),
            }
            op.key.clone()
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    assert!(matches!(failed_key, ItemKey::Frame { .. }));

    match vc.commit_draft(draft.number, &catalog, "too early").unwrap_err() {
        SyncError::DraftNotReady { items } => assert_eq!(items, vec![failed_key.clone()]),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(
        vc.engine().ledger(draft.number).failed().collect::<Vec<_>>(),
        vec![&failed_key]
    );

    // The fault budget is spent; a second sync finishes the job.
    let report = vc.sync(&mut catalog, &cancel).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded(), 1);
    vc.commit_draft(draft.number, &catalog, "complete").unwrap();
}

#[test]
fn default_branch_is_protected() {
    let server = TestServer::new();
    let vc = server.dataset("cars");
    let err = vc.delete_branch(&main_branch()).unwrap_err();
    assert!(matches!(err, SyncError::ProtectedBranch { .. }));
    assert_eq!(err.kind(), "ProtectedBranch");
}

#[test]
fn branch_with_open_draft_cannot_be_deleted() {
    let server = TestServer::new();
    let vc = server.dataset("cars");
    let other = server.client().dataset("cars").unwrap();
    let dev = databay_core::BranchName::new("dev").unwrap();
    vc.create_branch(&dev, None).unwrap();

    // The draft is held by another client: the check is server-wide.
    let draft = other.create_draft(&dev, "wip").unwrap();
    let err = vc.delete_branch(&dev).unwrap_err();
    assert!(matches!(err, SyncError::BranchHasOpenDraft { .. }));

    other.close_draft(draft.number).unwrap();
    vc.delete_branch(&dev).unwrap();
    assert_eq!(vc.list_branches().unwrap().len(), 1);
}

#[test]
fn one_upload_per_frame_and_one_sync_per_draft() {
    let server = TestServer::new();
    let gated = Arc::new(GatedTransport::new(server.transport()));
    let client = DatasetClient::new(gated.clone(), test_config());
    let vc = open_dataset(&client, "cars");

    let draft = vc.create_draft(&main_branch(), "import").unwrap();
    let mut catalog = populated_catalog(draft.number, &["s1"], 1, 4);
    let mut second = catalog.clone();
    let frame = catalog.frame("s1", 0).unwrap().clone();

    thread::scope(|scope| {
        let syncing = scope.spawn(|| vc.sync(&mut catalog, &CancellationToken::new()));
        assert!(gated.wait_for_parked(1, Duration::from_secs(10)));

        let err = vc
            .engine()
            .upload_frame(draft.number, "s1", 0, &frame, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSync { .. }));

        let err = vc
            .sync(&mut second, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSync { .. }));

        gated.open();
        let report = syncing.join().unwrap().unwrap();
        assert!(report.is_complete());
    });
    assert_eq!(server.stats().frames, 1);
}

#[test]
fn handles_from_one_client_share_locks_and_drafts() {
    let server = TestServer::new();
    let gated = Arc::new(GatedTransport::new(server.transport()));
    let client = DatasetClient::new(gated.clone(), test_config());
    let first = open_dataset(&client, "cars");
    let second = client.dataset("cars").unwrap();

    let draft = first.create_draft(&main_branch(), "import").unwrap();
    let err = second.create_draft(&main_branch(), "again").unwrap_err();
    assert!(matches!(err, SyncError::DraftAlreadyOpen { .. }), "{err}");
    assert_eq!(second.open_draft(&main_branch()), Some(draft.number));

    let mut catalog = populated_catalog(draft.number, &["s1"], 1, 4);
    let mut copy = catalog.clone();
    thread::scope(|scope| {
        let syncing = scope.spawn(|| first.sync(&mut catalog, &CancellationToken::new()));
        assert!(gated.wait_for_parked(1, Duration::from_secs(10)));

        let err = second
            .sync(&mut copy, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSync { .. }), "{err}");

        gated.open();
        assert!(syncing.join().unwrap().unwrap().is_complete());
    });

    // Ledgers are shared too.
    second.skip_item(draft.number, ItemKey::frame("s1", 7));
    assert!(first.engine().ledger(draft.number).is_skipped(&ItemKey::frame("s1", 7)));
    second.commit_draft(draft.number, &catalog, "C0").unwrap();
    assert_eq!(first.open_draft(&main_branch()), None);
    assert_eq!(server.stats().frames, 1);
}

#[test]
fn relabeled_checkout_commits_without_new_parts() {
    let server = TestServer::new();
    let vc = server.dataset("cars");
    let cancel = CancellationToken::new();
    let d1 = vc.create_draft(&main_branch(), "init").unwrap();
    let mut catalog = populated_catalog(d1.number, &["s1"], 2, 12);
    vc.sync(&mut catalog, &cancel).unwrap();
    let c0 = vc.commit_draft(d1.number, &catalog, "C0").unwrap();

    let d2 = vc.create_draft(&main_branch(), "labels").unwrap();
    let mut catalog = vc
        .checkout(&databay_core::Revision::Draft(d2.number))
        .unwrap();
    catalog
        .set_label("s1", 1, serde_json::json!({"weather": "rain"}))
        .unwrap();
    let parts = server.stats().parts;
    let report = vc.sync(&mut catalog, &cancel).unwrap();
    assert_eq!(report.succeeded(), 1);
    assert_eq!(server.stats().parts, parts);

    let c1 = vc.commit_draft(d2.number, &catalog, "C1").unwrap();
    let at_c0 = vc.checkout(&databay_core::Revision::Commit(c0.id)).unwrap();
    let at_c1 = vc.checkout(&databay_core::Revision::Commit(c1.id)).unwrap();
    assert_eq!(at_c0.frame("s1", 1).unwrap().label(), &serde_json::Value::Null);
    assert_eq!(
        at_c1.frame("s1", 1).unwrap().label(),
        &serde_json::json!({"weather": "rain"})
    );
    assert_eq!(
        at_c0.frame("s1", 1).unwrap().content_checksum(),
        at_c1.frame("s1", 1).unwrap().content_checksum()
    );
}

#[test]
fn cancellation_lets_in_flight_parts_finish() {
    let server = TestServer::new();
    let gated = Arc::new(GatedTransport::new(server.transport()));
    let client = DatasetClient::new(gated.clone(), test_config());
    let vc = open_dataset(&client, "cars");
    let cancel = CancellationToken::new();

    let draft = vc.create_draft(&main_branch(), "import").unwrap();
    let mut catalog = populated_catalog(draft.number, &["s1"], 2, 20);

    let report = thread::scope(|scope| {
        let syncing = scope.spawn(|| vc.sync(&mut catalog, &cancel));
        assert!(gated.wait_for_parked(2, Duration::from_secs(10)));
        cancel.cancel();
        gated.open();
        syncing.join().unwrap().unwrap()
    });

    // The segment went through; both frames stopped after their first part.
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.cancelled(), 2);
    assert_eq!(server.stats().parts, 2);
    assert_eq!(server.stats().frames, 0);
    assert_eq!(vc.engine().ledger(draft.number).failed().count(), 2);
}

#[test]
fn checkout_matches_synced_catalog() {
    let server = TestServer::new();
    let vc = server.dataset("cars");
    let draft = vc.create_draft(&main_branch(), "import").unwrap();
    let mut catalog = populated_catalog(draft.number, &["a", "b"], 3, 9);
    vc.sync(&mut catalog, &CancellationToken::new()).unwrap();

    let remote = vc
        .engine()
        .checkout(&CatalogMode::Draft(draft.number))
        .unwrap();
    assert_eq!(remote.snapshot(), catalog.snapshot());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn synced_catalog_has_nothing_left_to_do(layout in catalog_layout_strategy()) {
        let server = TestServer::new();
        let vc = server.dataset("cars");
        let draft = vc.create_draft(&main_branch(), "prop").unwrap();
        let mut catalog = build_catalog(draft.number, &layout);
        let cancel = CancellationToken::new();

        let first = vc.sync(&mut catalog, &cancel).unwrap();
        prop_assert!(first.is_complete());
        prop_assert_eq!(first.outcomes.len(), catalog.segments().count() + catalog.frame_count());

        let second = vc.sync(&mut catalog, &cancel).unwrap();
        prop_assert!(second.outcomes.is_empty());
        prop_assert!(vc.engine().pending_items(&catalog).unwrap().is_empty());
    }
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn clients_are_thread_safe() {
    assert_send_sync::<databay_sync_engine::VersionControl<ServerTransport>>();
    assert_send_sync::<Catalog>();
}

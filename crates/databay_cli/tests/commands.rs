//! Commands run end to end against an in-process server.

use clap::Parser;
use databay_cli::{execute, Cli, CliResult, Context};
use databay_protocol::ErrorCode;
use databay_sync_engine::{CancellationToken, DatasetClient, Transport};
use databay_testkit::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn run<T: Transport>(client: &DatasetClient<T>, args: &[&str]) -> CliResult<String> {
    let mut argv = vec!["databay"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).expect("Failed to parse command line");
    let ctx = Context {
        client,
        cancel: CancellationToken::new(),
        format: cli.format,
    };
    let mut out = Vec::new();
    execute(&cli.command, &ctx, &mut out)?;
    Ok(String::from_utf8(out).expect("Output is not UTF-8"))
}

fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("cam")).unwrap();
    fs::write(dir.path().join("cam/0001.jpg"), b"first camera image..").unwrap();
    fs::write(dir.path().join("cam/0002.jpg"), b"second camera image.").unwrap();
    fs::write(dir.path().join("scan.pcd"), b"lidar points, twenty").unwrap();
    dir
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn dataset_lifecycle() {
    let server = TestServer::new();
    let client = server.client();

    let out = run(&client, &["dataset", "create", "cars"]).unwrap();
    assert_eq!(out, "created dataset cars (default branch main)\n");
    run(&client, &["dataset", "create", "bikes"]).unwrap();

    let out = run(&client, &["dataset", "list"]).unwrap();
    assert_eq!(out, "bikes\ncars\n");

    run(&client, &["dataset", "delete", "bikes"]).unwrap();
    let out = run(&client, &["--format", "json", "dataset", "list"]).unwrap();
    let listed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["name"], "cars");
}

#[test]
fn upload_commit_and_read_back() {
    let server = TestServer::new();
    let client = server.client();
    run(&client, &["dataset", "create", "cars"]).unwrap();
    let source = source_tree();

    let out = run(
        &client,
        &["upload", "cars", path(source.path()), "-s", "day", "-m", "first import"],
    )
    .unwrap();
    assert!(out.starts_with("draft #1: 3 file(s) into day, 4 item(s) synced"), "{out}");
    assert!(out.contains("committed as "));
    assert_eq!(server.stats().commits, 1);

    let out = run(&client, &["read", "cars", "main"]).unwrap();
    let paths: Vec<_> = out
        .lines()
        .map(|line| line.split('\t').nth(3).unwrap())
        .collect();
    assert_eq!(paths, ["cam/0001.jpg", "cam/0002.jpg", "scan.pcd"]);

    let target = TempDir::new().unwrap();
    run(&client, &["read", "cars", "main", "-o", path(target.path())]).unwrap();
    for file in ["cam/0001.jpg", "cam/0002.jpg", "scan.pcd"] {
        assert_eq!(
            fs::read(target.path().join("day").join(file)).unwrap(),
            fs::read(source.path().join(file)).unwrap()
        );
    }

    let out = run(&client, &["log", "cars"]).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.contains("first import"));
}

#[test]
fn failed_items_make_the_upload_incomplete() {
    let server = TestServer::new();
    let faulty = Arc::new(FaultyTransport::new(server.transport()).with_fault(
        FaultTarget::Part(2),
        ErrorCode::Unavailable,
        10,
    ));
    let client = DatasetClient::new(faulty, test_config());
    run(&client, &["dataset", "create", "cars"]).unwrap();
    let source = source_tree();

    let err = run(
        &client,
        &["upload", "cars", path(source.path()), "-s", "day", "-m", "never"],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "TerminalItem");
    assert_eq!(err.to_string(), "draft #1: 1 item(s) did not reach the server");
    assert_eq!(server.stats().commits, 0);

    // The draft stays open with the rest of the files in it.
    let out = run(&client, &["draft", "list", "cars", "--status", "open"]).unwrap();
    assert!(out.starts_with("#1\tmain\tOPEN\t"), "{out}");
}

#[test]
fn drafts_and_branches() {
    let server = TestServer::new();
    let client = server.client();
    run(&client, &["dataset", "create", "cars"]).unwrap();
    run(&client, &["branch", "create", "cars", "dev"]).unwrap();

    let out = run(&client, &["draft", "create", "cars", "wip", "-b", "dev"]).unwrap();
    assert_eq!(out, "opened draft #1 on dev\n");

    let err = run(&client, &["branch", "delete", "cars", "dev"]).unwrap_err();
    assert_eq!(err.kind(), "BranchHasOpenDraft");
    let err = run(&client, &["branch", "delete", "cars", "main"]).unwrap_err();
    assert_eq!(err.kind(), "ProtectedBranch");

    let out = run(&client, &["draft", "close", "cars", "1"]).unwrap();
    assert_eq!(out, "closed draft #1\n");
    run(&client, &["branch", "delete", "cars", "dev"]).unwrap();

    let out = run(&client, &["branch", "list", "cars"]).unwrap();
    assert_eq!(out, "main\t-\n");
}

#[test]
fn commit_command_uses_the_remote_draft() {
    let server = TestServer::new();
    let client = server.client();
    run(&client, &["dataset", "create", "cars"]).unwrap();
    let source = source_tree();

    run(&client, &["draft", "create", "cars", "staged"]).unwrap();
    run(&client, &["upload", "cars", path(source.path()), "-d", "1"]).unwrap();
    assert_eq!(server.stats().commits, 0);

    let out = run(&client, &["--format", "json", "commit", "cars", "1", "-m", "staged"]).unwrap();
    let commit: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(commit["message"], "staged");
    assert_eq!(server.stats().commits, 1);

    let err = run(&client, &["commit", "cars", "1", "-m", "again"]).unwrap_err();
    assert_eq!(err.kind(), "InvalidState");
}

#[test]
fn commit_after_a_failed_upload_is_refused() {
    let server = TestServer::new();
    let faulty = Arc::new(FaultyTransport::new(server.transport()).with_fault(
        FaultTarget::Part(2),
        ErrorCode::Unavailable,
        3,
    ));
    let client = DatasetClient::new(faulty.clone(), test_config());
    run(&client, &["dataset", "create", "cars"]).unwrap();
    let source = source_tree();

    let err = run(&client, &["upload", "cars", path(source.path())]).unwrap_err();
    assert_eq!(err.kind(), "TerminalItem");
    assert_eq!(faulty.injected().len(), 3);

    let err = run(&client, &["commit", "cars", "1", "-m", "partial"]).unwrap_err();
    assert_eq!(err.kind(), "DraftNotReady");
    assert_eq!(server.stats().commits, 0);
}

#[test]
fn ambiguous_revisions_are_rejected_before_any_request() {
    let server = TestServer::new();
    let client = server.client();
    let err = run(&client, &["log", "cars", "7"]).unwrap_err();
    assert_eq!(err.kind(), "AmbiguousReference");
}

//! Version control workflow.
//!
//! [`VersionControl`] drives the per-branch draft lifecycle of one dataset:
//!
//! ```text
//! NO_DRAFT -> DRAFT_OPEN -> DRAFT_COMMITTED
//!                        -> DRAFT_CLOSED
//! ```
//!
//! [`DatasetClient`] is the entry point: it manages datasets and hands out
//! one shared controller per dataset, so every handle to a dataset sees the
//! same draft locks, ledgers and open drafts.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::remote::{ApiClient, RemoteClient};
use crate::transport::Transport;
use databay_core::{
    Branch, BranchName, Catalog, CatalogMode, Commit, CommitId, CommitSource, Draft, DraftNumber,
    DraftStatus, Frame, ItemKey, Revision,
};
use databay_protocol::DatasetInfo;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Creates, lists and opens datasets.
pub struct DatasetClient<T: Transport> {
    api: Arc<ApiClient<T>>,
    datasets: Mutex<HashMap<String, Arc<VersionControl<T>>>>,
}

impl<T: Transport> DatasetClient<T> {
    /// Creates a client over a transport.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self {
            api: Arc::new(ApiClient::new(transport, config)),
            datasets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared API client.
    pub fn api(&self) -> &Arc<ApiClient<T>> {
        &self.api
    }

    /// Returns the token that cancels control calls of every dataset opened
    /// through this client.
    pub fn cancellation(&self) -> &CancellationToken {
        self.api.cancellation()
    }

    /// Creates a dataset with its default branch.
    pub fn create_dataset(&self, name: &str) -> SyncResult<DatasetInfo> {
        let info = self.api.create_dataset(name)?;
        info!(dataset = name, "created dataset");
        Ok(info)
    }

    /// Opens an existing dataset.
    ///
    /// Repeated calls for the same name return the same controller.
    pub fn dataset(&self, name: &str) -> SyncResult<Arc<VersionControl<T>>> {
        self.api.dataset(name)?;
        let mut datasets = self.datasets.lock();
        let vc = datasets.entry(name.to_string()).or_insert_with(|| {
            Arc::new(VersionControl::new(RemoteClient::new(self.api.clone(), name)))
        });
        Ok(Arc::clone(vc))
    }

    /// Lists datasets.
    pub fn list_datasets(&self) -> SyncResult<Vec<DatasetInfo>> {
        self.api.list_datasets()
    }

    /// Deletes a dataset with all its history.
    pub fn delete_dataset(&self, name: &str) -> SyncResult<()> {
        self.api.delete_dataset(name)?;
        self.datasets.lock().remove(name);
        info!(dataset = name, "deleted dataset");
        Ok(())
    }
}

/// Draft workflow of one dataset.
pub struct VersionControl<T: Transport> {
    engine: SyncEngine<T>,
    /// Drafts this controller opened and has not finished, by branch.
    open: Mutex<BTreeMap<BranchName, DraftNumber>>,
}

impl<T: Transport> VersionControl<T> {
    /// Creates a controller for the dataset `remote` points at.
    pub fn new(remote: RemoteClient<T>) -> Self {
        Self {
            engine: SyncEngine::new(remote),
            open: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &RemoteClient<T> {
        self.engine.remote()
    }

    /// Returns the dataset name.
    pub fn dataset(&self) -> &str {
        self.remote().dataset()
    }

    /// Returns the draft this controller holds open on `branch`.
    pub fn open_draft(&self, branch: &BranchName) -> Option<DraftNumber> {
        self.open.lock().get(branch).copied()
    }

    /// Opens a draft on `branch`, parented at its current head.
    pub fn create_draft(&self, branch: &BranchName, title: &str) -> SyncResult<Draft> {
        if let Some(number) = self.open_draft(branch) {
            // Another client may have finished it since.
            if self.remote().draft(number)?.is_open() {
                return Err(SyncError::DraftAlreadyOpen {
                    branch: branch.clone(),
                    draft: number,
                });
            }
            self.forget(number);
        }

        let draft = self.remote().create_draft(branch, title)?;
        self.open.lock().insert(branch.clone(), draft.number);
        info!(
            dataset = self.dataset(),
            draft = %draft.number,
            %branch,
            parent = ?draft.parent,
            "opened draft"
        );
        Ok(draft)
    }

    /// Pushes a draft catalog.
    pub fn sync(&self, catalog: &mut Catalog, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        self.engine.sync(catalog, cancel)
    }

    /// Excludes an item from the commit readiness check.
    pub fn skip_item(&self, draft: DraftNumber, key: ItemKey) {
        self.engine.skip_item(draft, key);
    }

    /// Commits a synced draft.
    ///
    /// Fails with `DraftNotReady` while any item of `catalog` is not on the
    /// server, and with `StaleDraft` if the branch moved since the draft was
    /// opened.
    pub fn commit_draft(
        &self,
        draft: DraftNumber,
        catalog: &Catalog,
        message: &str,
    ) -> SyncResult<Commit> {
        if catalog.draft() != Some(draft) {
            return Err(SyncError::InvalidState(format!(
                "catalog does not belong to draft #{draft}"
            )));
        }
        let _guard = self.engine.lock_draft(draft)?;
        self.commit_locked(draft, message, || self.engine.pending_items(catalog))
    }

    /// Commits a draft as it stands on the server, without a local catalog
    /// to compare against.
    ///
    /// Only items that an earlier sync through this controller left failed
    /// and not skipped block the commit. The draft must still be open and
    /// fresh.
    pub fn commit_remote_draft(&self, draft: DraftNumber, message: &str) -> SyncResult<Commit> {
        let _guard = self.engine.lock_draft(draft)?;
        self.commit_locked(draft, message, || {
            let ledger = self.engine.ledger(draft);
            Ok(ledger
                .failed()
                .filter(|key| !ledger.is_skipped(key))
                .cloned()
                .collect())
        })
    }

    fn commit_locked(
        &self,
        draft: DraftNumber,
        message: &str,
        pending: impl FnOnce() -> SyncResult<Vec<ItemKey>>,
    ) -> SyncResult<Commit> {
        let remote_draft = self.remote().draft(draft)?;
        if !remote_draft.is_open() {
            return Err(SyncError::InvalidState(format!(
                "draft #{draft} is {}",
                remote_draft.status
            )));
        }

        let pending = pending()?;
        if !pending.is_empty() {
            return Err(SyncError::DraftNotReady { items: pending });
        }
        self.engine.check_fresh(draft)?;

        let commit = self.remote().commit_draft(draft, message)?;
        self.engine.discard_ledger(draft);
        self.forget(draft);
        info!(
            dataset = self.dataset(),
            %draft,
            commit = %commit.id,
            branch = %remote_draft.branch,
            "committed draft"
        );
        Ok(commit)
    }

    /// Closes a draft without committing it.
    pub fn close_draft(&self, draft: DraftNumber) -> SyncResult<Draft> {
        let _guard = self.engine.lock_draft(draft)?;
        let closed = self.remote().close_draft(draft)?;
        self.engine.discard_ledger(draft);
        self.forget(draft);
        info!(dataset = self.dataset(), %draft, "closed draft");
        Ok(closed)
    }

    /// Creates a branch at `commit`, or at the empty root.
    pub fn create_branch(&self, name: &BranchName, commit: Option<&CommitId>) -> SyncResult<Branch> {
        let branch = self.remote().create_branch(name, commit)?;
        info!(dataset = self.dataset(), branch = %name, head = ?branch.head, "created branch");
        Ok(branch)
    }

    /// Deletes a branch. The default branch and branches with open drafts
    /// cannot be deleted.
    pub fn delete_branch(&self, name: &BranchName) -> SyncResult<()> {
        self.remote().delete_branch(name)?;
        self.open.lock().remove(name);
        info!(dataset = self.dataset(), branch = %name, "deleted branch");
        Ok(())
    }

    /// Lists branches.
    pub fn list_branches(&self) -> SyncResult<Vec<Branch>> {
        self.remote().branches()
    }

    /// Lists drafts, optionally filtered by branch and status.
    pub fn list_drafts(
        &self,
        branch: Option<&BranchName>,
        status: Option<DraftStatus>,
    ) -> SyncResult<Vec<Draft>> {
        self.remote().drafts(branch, status)
    }

    /// Resolves a revision to the contents it names.
    pub fn resolve(&self, revision: &Revision) -> SyncResult<CatalogMode> {
        match revision {
            Revision::Commit(id) => {
                self.remote().commit(id)?;
                Ok(CatalogMode::Snapshot(Some(id.clone())))
            }
            Revision::Branch(name) => Ok(CatalogMode::Snapshot(self.remote().branch(name)?.head)),
            Revision::Draft(number) => {
                self.remote().draft(*number)?;
                Ok(CatalogMode::Draft(*number))
            }
        }
    }

    /// Loads a revision into a catalog. Drafts load writable.
    pub fn checkout(&self, revision: &Revision) -> SyncResult<Catalog> {
        let mode = self.resolve(revision)?;
        self.engine.checkout(&mode)
    }

    /// Downloads a frame's item bytes.
    pub fn download(&self, frame: &Frame, cancel: &CancellationToken) -> SyncResult<Frame> {
        self.engine.download(frame, cancel)
    }

    /// Returns up to `limit` commits reachable from a revision, newest first.
    /// A draft's history starts at its parent.
    pub fn log(&self, revision: &Revision, limit: usize) -> SyncResult<Vec<Commit>> {
        let head = match revision {
            Revision::Commit(id) => Some(id.clone()),
            Revision::Branch(name) => self.remote().branch(name)?.head,
            Revision::Draft(number) => self.remote().draft(*number)?.parent,
        };
        match head {
            Some(head) => self.remote().log(&head, limit),
            None => Ok(Vec::new()),
        }
    }

    fn forget(&self, draft: DraftNumber) {
        self.open.lock().retain(|_, number| *number != draft);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::http::LoopbackTransport;
    use bytes::Bytes;
    use databay_core::DataItem;
    use databay_server::{DataServer, ServerConfig};

    type Client = DatasetClient<LoopbackTransport<Arc<DataServer>>>;

    fn client() -> Client {
        let server = Arc::new(DataServer::new(ServerConfig::default()));
        let config = SyncConfig::new().with_retry(RetryConfig::no_retry());
        DatasetClient::new(LoopbackTransport::new(server), config)
    }

    fn main_branch() -> BranchName {
        BranchName::default_branch()
    }

    fn frame(path: &str, data: &'static [u8]) -> Frame {
        Frame::single(DataItem::new("cam", path, Bytes::from_static(data))).unwrap()
    }

    #[test]
    fn dataset_lifecycle() {
        let client = client();
        client.create_dataset("cars").unwrap();
        assert!(matches!(
            client.create_dataset("cars"),
            Err(SyncError::AlreadyExists(_))
        ));
        assert_eq!(client.list_datasets().unwrap().len(), 1);

        client.delete_dataset("cars").unwrap();
        assert!(matches!(client.dataset("cars"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn second_draft_on_branch_is_refused() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();

        let draft = vc.create_draft(&main_branch(), "first").unwrap();
        let err = vc.create_draft(&main_branch(), "second").unwrap_err();
        assert!(matches!(err, SyncError::DraftAlreadyOpen { draft: d, .. } if d == draft.number));

        vc.close_draft(draft.number).unwrap();
        assert_eq!(vc.open_draft(&main_branch()), None);
        vc.create_draft(&main_branch(), "second").unwrap();
    }

    #[test]
    fn init_then_next_draft_builds_on_it() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();
        let cancel = CancellationToken::new();

        let d1 = vc.create_draft(&main_branch(), "init").unwrap();
        assert_eq!(d1.parent, None);
        let mut catalog = Catalog::for_draft(d1.number);
        catalog.add_segment("s1").unwrap();
        catalog.add_frame("s1", frame("a.jpg", b"aaaa")).unwrap();
        vc.sync(&mut catalog, &cancel).unwrap();
        let c0 = vc.commit_draft(d1.number, &catalog, "c0").unwrap();

        let d2 = vc.create_draft(&main_branch(), "more").unwrap();
        assert_eq!(d2.parent, Some(c0.id.clone()));
        let mut catalog = vc.checkout(&Revision::Draft(d2.number)).unwrap();
        assert_eq!(catalog.frame_count(), 1);
        catalog.add_frame("s1", frame("b.jpg", b"bb")).unwrap();
        vc.sync(&mut catalog, &cancel).unwrap();
        let c1 = vc.commit_draft(d2.number, &catalog, "c1").unwrap();
        assert_eq!(c1.parent, Some(c0.id.clone()));

        let log: Vec<_> = vc
            .log(&Revision::Branch(main_branch()), 10)
            .unwrap()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(log, vec!["c1", "c0"]);

        let d3 = vc.create_draft(&main_branch(), "next").unwrap();
        assert_eq!(d3.parent, Some(c1.id.clone()));

        let at_c0 = vc.checkout(&Revision::Commit(c0.id)).unwrap();
        assert!(at_c0.is_read_only());
        assert_eq!(at_c0.frame_count(), 1);
    }

    #[test]
    fn unsynced_draft_is_not_ready() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();
        let draft = vc.create_draft(&main_branch(), "init").unwrap();

        let mut catalog = Catalog::for_draft(draft.number);
        catalog.add_segment("s1").unwrap();
        catalog.add_frame("s1", frame("a.jpg", b"aaaa")).unwrap();

        match vc.commit_draft(draft.number, &catalog, "c0").unwrap_err() {
            SyncError::DraftNotReady { items } => assert_eq!(
                items,
                vec![ItemKey::segment("s1"), ItemKey::frame("s1", 0)]
            ),
            other => panic!("unexpected error {other}"),
        }

        vc.skip_item(draft.number, ItemKey::segment("s1"));
        vc.skip_item(draft.number, ItemKey::frame("s1", 0));
        // Nothing left to wait for: the commit goes through empty.
        vc.commit_draft(draft.number, &catalog, "c0").unwrap();
    }

    #[test]
    fn handles_to_a_dataset_share_one_controller() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let first = client.dataset("cars").unwrap();
        let second = client.dataset("cars").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let draft = first.create_draft(&main_branch(), "first").unwrap();
        let err = second.create_draft(&main_branch(), "second").unwrap_err();
        assert!(matches!(err, SyncError::DraftAlreadyOpen { draft: d, .. } if d == draft.number));

        let _held = first.engine().lock_draft(draft.number).unwrap();
        let mut catalog = Catalog::for_draft(draft.number);
        let err = second
            .sync(&mut catalog, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSync { .. }));
    }

    #[test]
    fn deleted_dataset_drops_its_controller() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let old = client.dataset("cars").unwrap();
        old.create_draft(&main_branch(), "first").unwrap();

        client.delete_dataset("cars").unwrap();
        client.create_dataset("cars").unwrap();
        let fresh = client.dataset("cars").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.open_draft(&main_branch()), None);
    }

    #[test]
    fn remote_draft_commit_checks_the_ledger() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();
        let draft = vc.create_draft(&main_branch(), "init").unwrap();
        let mut catalog = Catalog::for_draft(draft.number);
        catalog.add_segment("s1").unwrap();
        catalog.add_frame("s1", frame("a.jpg", b"aaaa")).unwrap();
        vc.sync(&mut catalog, &CancellationToken::new()).unwrap();

        let commit = vc.commit_remote_draft(draft.number, "c0").unwrap();
        assert_eq!(commit.message, "c0");
        let err = vc.commit_remote_draft(draft.number, "again").unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)), "{err}");
    }

    #[test]
    fn branch_rules() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();

        let err = vc.delete_branch(&main_branch()).unwrap_err();
        assert!(matches!(err, SyncError::ProtectedBranch { .. }));

        let dev = BranchName::new("dev").unwrap();
        vc.create_branch(&dev, None).unwrap();
        vc.create_draft(&dev, "wip").unwrap();
        let err = vc.delete_branch(&dev).unwrap_err();
        assert!(matches!(err, SyncError::BranchHasOpenDraft { .. }));
        assert_eq!(vc.list_branches().unwrap().len(), 2);
        assert_eq!(
            vc.list_drafts(Some(&dev), Some(DraftStatus::Open))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn resolve_revisions() {
        let client = client();
        client.create_dataset("cars").unwrap();
        let vc = client.dataset("cars").unwrap();

        assert_eq!(
            vc.resolve(&Revision::Branch(main_branch())).unwrap(),
            CatalogMode::Snapshot(None)
        );
        assert!(vc.log(&Revision::Branch(main_branch()), 5).unwrap().is_empty());

        let missing = CommitId::generate();
        assert!(vc.resolve(&Revision::Commit(missing)).is_err());
        assert!(vc
            .resolve(&Revision::Draft(DraftNumber::new(9).unwrap()))
            .is_err());
    }
}

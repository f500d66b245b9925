//! Request handlers for the API endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{DatasetState, DatasetStore};
use bytes::Bytes;
use databay_core::{
    Branch, BranchName, Commit, CommitId, Draft, DraftNumber, DraftStatus, Sensor,
};
use databay_protocol::{
    BeginUpload, CommitDraft, ContentRevision, CreateBranch, CreateDataset, CreateDraft,
    DatasetInfo, FinalizeUpload, FrameInfo, Page, PartReceipt, SegmentInfo, UpdateLabel,
    UploadSession,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Dataset store (shared across all handlers).
    pub store: Arc<DatasetStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<DatasetStore>) -> Self {
        Self { config, store }
    }
}

/// Handler for API requests, one method per endpoint.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    fn with_dataset<T>(
        &self,
        dataset: &str,
        f: impl FnOnce(&mut DatasetState) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let state = self.context.store.get(dataset)?;
        let mut guard = state.lock();
        f(&mut guard)
    }

    fn page<T: Clone>(&self, all: &[T], offset: u64, limit: u64) -> Page<T> {
        Page::slice(all, offset, limit.min(self.context.config.max_page_size))
    }

    // Datasets

    /// Creates a dataset with its default branch.
    pub fn create_dataset(&self, request: CreateDataset) -> ServerResult<DatasetInfo> {
        let info = self
            .context
            .store
            .create(request.name, self.context.config.default_branch.clone())?;
        info!(dataset = %info.name, "created dataset");
        Ok(info)
    }

    /// Lists datasets.
    pub fn list_datasets(&self, offset: u64, limit: u64) -> ServerResult<Page<DatasetInfo>> {
        Ok(self.page(&self.context.store.list(), offset, limit))
    }

    /// Returns one dataset.
    pub fn get_dataset(&self, dataset: &str) -> ServerResult<DatasetInfo> {
        self.with_dataset(dataset, |state| Ok(state.info().clone()))
    }

    /// Deletes a dataset with all its history.
    pub fn delete_dataset(&self, dataset: &str) -> ServerResult<()> {
        self.context.store.delete(dataset)?;
        info!(dataset, "deleted dataset");
        Ok(())
    }

    // Commits

    /// Returns one commit.
    pub fn get_commit(&self, dataset: &str, id: &CommitId) -> ServerResult<Commit> {
        self.with_dataset(dataset, |state| state.commit(id).cloned())
    }

    /// Lists the history ending at `head`, newest first.
    pub fn list_commits(
        &self,
        dataset: &str,
        head: &CommitId,
        offset: u64,
        limit: u64,
    ) -> ServerResult<Page<Commit>> {
        let log = self.with_dataset(dataset, |state| state.log(head))?;
        Ok(self.page(&log, offset, limit))
    }

    // Branches

    /// Lists branches.
    pub fn list_branches(&self, dataset: &str, offset: u64, limit: u64) -> ServerResult<Page<Branch>> {
        let branches = self.with_dataset(dataset, |state| Ok(state.branches()))?;
        Ok(self.page(&branches, offset, limit))
    }

    /// Returns one branch.
    pub fn get_branch(&self, dataset: &str, name: &BranchName) -> ServerResult<Branch> {
        self.with_dataset(dataset, |state| state.branch(name))
    }

    /// Creates a branch at a commit.
    pub fn create_branch(&self, dataset: &str, request: CreateBranch) -> ServerResult<Branch> {
        let branch =
            self.with_dataset(dataset, |state| state.create_branch(request.name, request.commit))?;
        info!(dataset, branch = %branch.name, "created branch");
        Ok(branch)
    }

    /// Deletes a branch.
    pub fn delete_branch(&self, dataset: &str, name: &BranchName) -> ServerResult<()> {
        self.with_dataset(dataset, |state| state.delete_branch(name))?;
        info!(dataset, branch = %name, "deleted branch");
        Ok(())
    }

    // Drafts

    /// Opens a draft on a branch.
    pub fn create_draft(&self, dataset: &str, request: CreateDraft) -> ServerResult<Draft> {
        let draft =
            self.with_dataset(dataset, |state| state.create_draft(request.branch, request.title))?;
        info!(dataset, draft = %draft.number, branch = %draft.branch, "opened draft");
        Ok(draft)
    }

    /// Lists drafts, optionally filtered.
    pub fn list_drafts(
        &self,
        dataset: &str,
        branch: Option<&BranchName>,
        status: Option<DraftStatus>,
        offset: u64,
        limit: u64,
    ) -> ServerResult<Page<Draft>> {
        let drafts = self.with_dataset(dataset, |state| Ok(state.drafts(branch, status)))?;
        Ok(self.page(&drafts, offset, limit))
    }

    /// Returns one draft.
    pub fn get_draft(&self, dataset: &str, number: DraftNumber) -> ServerResult<Draft> {
        self.with_dataset(dataset, |state| state.draft(number).cloned())
    }

    /// Closes an open draft.
    pub fn close_draft(&self, dataset: &str, number: DraftNumber) -> ServerResult<Draft> {
        let draft = self.with_dataset(dataset, |state| state.close_draft(number))?;
        info!(dataset, draft = %number, "closed draft");
        Ok(draft)
    }

    /// Commits an open draft.
    pub fn commit_draft(
        &self,
        dataset: &str,
        number: DraftNumber,
        request: CommitDraft,
    ) -> ServerResult<Commit> {
        let commit = self.with_dataset(dataset, |state| {
            state.commit_draft(number, request.message, request.committer)
        })?;
        info!(dataset, draft = %number, commit = %commit.id, "committed draft");
        Ok(commit)
    }

    // Contents

    /// Lists segments of a revision.
    pub fn list_segments(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        offset: u64,
        limit: u64,
    ) -> ServerResult<Page<SegmentInfo>> {
        let segments = self.with_dataset(dataset, |state| state.segments(revision))?;
        Ok(self.page(&segments, offset, limit))
    }

    /// Creates a segment in a draft.
    pub fn create_segment(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        request: SegmentInfo,
    ) -> ServerResult<SegmentInfo> {
        let segment = self.with_dataset(dataset, |state| state.create_segment(revision, request))?;
        debug!(dataset, %revision, segment = %segment.name, "created segment");
        Ok(segment)
    }

    /// Deletes a segment from a draft.
    pub fn delete_segment(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
    ) -> ServerResult<()> {
        self.with_dataset(dataset, |state| state.delete_segment(revision, segment))?;
        debug!(dataset, %revision, segment, "deleted segment");
        Ok(())
    }

    /// Lists frames of a segment in index order.
    pub fn list_frames(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        offset: u64,
        limit: u64,
    ) -> ServerResult<Page<FrameInfo>> {
        let frames = self.with_dataset(dataset, |state| state.frames(revision, segment))?;
        Ok(self.page(&frames, offset, limit))
    }

    /// Returns one frame.
    pub fn get_frame(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
    ) -> ServerResult<FrameInfo> {
        self.with_dataset(dataset, |state| state.frame(revision, segment, index))
    }

    /// Deletes a frame from a draft.
    pub fn delete_frame(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
    ) -> ServerResult<()> {
        self.with_dataset(dataset, |state| state.delete_frame(revision, segment, index))?;
        debug!(dataset, %revision, segment, index, "deleted frame");
        Ok(())
    }

    /// Relabels a frame of a draft without touching its object.
    pub fn update_label(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
        request: UpdateLabel,
    ) -> ServerResult<FrameInfo> {
        let frame = self.with_dataset(dataset, |state| {
            state.update_label(revision, segment, index, request)
        })?;
        debug!(dataset, %revision, segment, index, "relabeled frame");
        Ok(frame)
    }

    // Sensors

    /// Lists the sensors registered with a segment.
    pub fn list_sensors(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        offset: u64,
        limit: u64,
    ) -> ServerResult<Page<Sensor>> {
        let sensors = self.with_dataset(dataset, |state| state.sensors(revision, segment))?;
        Ok(self.page(&sensors, offset, limit))
    }

    /// Registers or replaces a sensor in a draft.
    pub fn put_sensor(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        name: &str,
        sensor: Sensor,
    ) -> ServerResult<Sensor> {
        let sensor = self.with_dataset(dataset, |state| {
            state.put_sensor(revision, segment, name, sensor)
        })?;
        debug!(dataset, %revision, segment, sensor = %sensor.name, "registered sensor");
        Ok(sensor)
    }

    /// Unregisters a sensor from a draft.
    pub fn delete_sensor(
        &self,
        dataset: &str,
        revision: &ContentRevision,
        segment: &str,
        name: &str,
    ) -> ServerResult<()> {
        self.with_dataset(dataset, |state| state.delete_sensor(revision, segment, name))?;
        debug!(dataset, %revision, segment, sensor = name, "removed sensor");
        Ok(())
    }

    // Uploads

    /// Opens an upload session for one frame.
    pub fn begin_upload(
        &self,
        dataset: &str,
        draft: DraftNumber,
        request: BeginUpload,
    ) -> ServerResult<UploadSession> {
        self.with_dataset(dataset, |state| state.begin_upload(draft, request))
    }

    /// Stores one part.
    pub fn put_part(
        &self,
        dataset: &str,
        upload_id: &str,
        part: u32,
        body: Bytes,
    ) -> ServerResult<PartReceipt> {
        if body.len() as u64 > self.context.config.max_part_size {
            return Err(ServerError::InvalidRequest(format!(
                "part of {} bytes exceeds the limit of {}",
                body.len(),
                self.context.config.max_part_size
            )));
        }
        self.with_dataset(dataset, |state| state.put_part(upload_id, part, body))
    }

    /// Assembles and verifies an upload and stores the frame.
    pub fn finalize_upload(
        &self,
        dataset: &str,
        upload_id: &str,
        request: FinalizeUpload,
    ) -> ServerResult<FrameInfo> {
        let frame = self.with_dataset(dataset, |state| state.finalize_upload(upload_id, request))?;
        debug!(dataset, index = frame.index, object = %frame.object_key, "stored frame");
        Ok(frame)
    }

    /// Returns an object's bytes.
    pub fn get_object(&self, dataset: &str, key: &str) -> ServerResult<Bytes> {
        self.with_dataset(dataset, |state| state.object(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let store = Arc::new(DatasetStore::new());
        let context = Arc::new(HandlerContext::new(config, store));
        RequestHandler::new(context)
    }

    fn create(handler: &RequestHandler, name: &str) {
        handler
            .create_dataset(CreateDataset { name: name.into() })
            .unwrap();
    }

    #[test]
    fn dataset_lifecycle() {
        let handler = create_handler(ServerConfig::default());
        create(&handler, "cars");
        create(&handler, "bikes");

        let page = handler.list_datasets(0, 10).unwrap();
        let names: Vec<_> = page.items.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["bikes", "cars"]);

        handler.delete_dataset("bikes").unwrap();
        assert!(matches!(
            handler.get_dataset("bikes"),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn pages_are_clamped() {
        let handler = create_handler(ServerConfig::default().with_max_page_size(2));
        for name in ["a", "b", "c"] {
            create(&handler, name);
        }
        let page = handler.list_datasets(0, 100).unwrap();
        assert_eq!(page.record_size, 2);
        assert_eq!(page.total_count, 3);
        assert!(!page.is_last());
    }

    #[test]
    fn drafts_filter_by_status() {
        let handler = create_handler(ServerConfig::default());
        create(&handler, "cars");
        let main = BranchName::default_branch();
        let first = handler
            .create_draft(
                "cars",
                CreateDraft {
                    branch: main.clone(),
                    title: "one".into(),
                },
            )
            .unwrap();
        handler
            .create_draft(
                "cars",
                CreateDraft {
                    branch: main.clone(),
                    title: "two".into(),
                },
            )
            .unwrap();
        handler.close_draft("cars", first.number).unwrap();

        let open = handler
            .list_drafts("cars", Some(&main), Some(DraftStatus::Open), 0, 10)
            .unwrap();
        assert_eq!(open.items.len(), 1);
        assert_eq!(open.items[0].title, "two");
    }

    #[test]
    fn oversized_part_rejected() {
        let handler = create_handler(ServerConfig::default().with_max_part_size(4));
        create(&handler, "cars");
        let err = handler
            .put_part("cars", "nope", 1, Bytes::from_static(b"12345"))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }
}

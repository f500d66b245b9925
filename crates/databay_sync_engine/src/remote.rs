//! Typed client for the DataBay HTTP API.
//!
//! [`ApiClient`] owns the transport and the retry loop. [`RemoteClient`]
//! scopes it to one dataset and exposes one method per endpoint. Control
//! calls run against the client's own cancellation token; transfer calls
//! take the caller's.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::{classify, Disposition, Plane, RetryState};
use crate::transport::Transport;
use bytes::Bytes;
use databay_core::{
    Branch, BranchName, Commit, CommitId, CommitSource, CoreError, Draft, DraftNumber, DraftStatus,
    RemoteSnapshot, Sensor,
};
use databay_protocol::{
    BeginUpload, CommitDraft, ContentRevision, CreateBranch, CreateDataset, CreateDraft,
    DatasetInfo, ErrorCode, FinalizeUpload, FrameInfo, HttpRequest, HttpResponse, Method, Page,
    PartReceipt, Query, Route, SegmentInfo, UpdateLabel, UploadSession, ACCESS_KEY_HEADER,
    OCTET_STREAM,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends requests with authentication, timeouts and retries.
pub struct ApiClient<T: Transport> {
    transport: T,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl<T: Transport> ApiClient<T> {
    /// Creates a client.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the token that stops control calls.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends a request, retrying transient failures.
    ///
    /// Gives up with [`SyncError::Cancelled`] if `cancel` fires before an
    /// attempt or during a backoff sleep, and with a retryable
    /// [`SyncError::Transport`] once the attempt budget is spent.
    pub fn execute(
        &self,
        plane: Plane,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<HttpResponse> {
        let mut request = request.with_timeout(self.config.request_timeout);
        if let Some(key) = &self.config.access_key {
            request = request.with_header(ACCESS_KEY_HEADER, key.clone());
        }
        let mut retry = RetryState::new(self.config.retry.clone());

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let outcome = self.transport.request(&request);
            match (classify(plane, &outcome), outcome) {
                (Disposition::Success, Ok(response)) => return Ok(response),
                (Disposition::Transient(reason), _) => match retry.next_delay() {
                    Some(delay) => {
                        debug!(
                            method = %request.method,
                            path = %request.path,
                            attempt = retry.attempts(),
                            ?delay,
                            %reason,
                            "retrying request"
                        );
                        if cancel.sleep(delay) {
                            return Err(SyncError::Cancelled);
                        }
                    }
                    None => {
                        warn!(
                            method = %request.method,
                            path = %request.path,
                            attempts = retry.attempts(),
                            %reason,
                            "giving up on request"
                        );
                        return Err(SyncError::transport_retryable(format!(
                            "{reason} after {} attempt(s)",
                            retry.attempts()
                        )));
                    }
                },
                (_, Ok(response)) => return Err(SyncError::from_response(&response)),
                (_, Err(err)) => return Err(SyncError::transport_fatal(err.to_string())),
            }
        }
    }

    fn control(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.execute(Plane::Control, request, &self.cancel)
    }

    pub(crate) fn get<R: DeserializeOwned>(&self, path: String) -> SyncResult<R> {
        Ok(self.control(HttpRequest::get(path))?.json()?)
    }

    pub(crate) fn send<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: String,
        body: &B,
    ) -> SyncResult<R> {
        Ok(self.control(HttpRequest::json(method, path, body)?)?.json()?)
    }

    pub(crate) fn delete(&self, path: String, cancel: &CancellationToken) -> SyncResult<()> {
        self.execute(Plane::Control, HttpRequest::delete(path), cancel)?;
        Ok(())
    }

    /// Fetches pages until the listing is exhausted or `limit` items arrived.
    pub(crate) fn list<R: DeserializeOwned + Clone>(
        &self,
        route: &Route,
        query: Query,
        limit: Option<usize>,
    ) -> SyncResult<Vec<R>> {
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page_query = query
                .clone()
                .with("offset", offset)
                .with("limit", self.config.page_size);
            let page: Page<R> = self.get(route.with_query(&page_query))?;
            let last = page.is_last();
            offset = page.next_offset();
            items.extend(page.items);
            if let Some(limit) = limit {
                if items.len() >= limit {
                    items.truncate(limit);
                    break;
                }
            }
            if last {
                break;
            }
        }
        Ok(items)
    }

    // Datasets

    /// Creates a dataset.
    pub fn create_dataset(&self, name: &str) -> SyncResult<DatasetInfo> {
        self.send(
            Method::Post,
            Route::Datasets.path(),
            &CreateDataset {
                name: name.to_string(),
            },
        )
    }

    /// Returns one dataset.
    pub fn dataset(&self, name: &str) -> SyncResult<DatasetInfo> {
        self.get(
            Route::Dataset {
                dataset: name.to_string(),
            }
            .path(),
        )
    }

    /// Lists all datasets.
    pub fn list_datasets(&self) -> SyncResult<Vec<DatasetInfo>> {
        self.list(&Route::Datasets, Query::new(), None)
    }

    /// Deletes a dataset.
    pub fn delete_dataset(&self, name: &str) -> SyncResult<()> {
        let route = Route::Dataset {
            dataset: name.to_string(),
        };
        self.delete(route.path(), &self.cancel)
    }
}

/// API calls scoped to one dataset.
pub struct RemoteClient<T: Transport> {
    api: Arc<ApiClient<T>>,
    dataset: String,
}

impl<T: Transport> Clone for RemoteClient<T> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            dataset: self.dataset.clone(),
        }
    }
}

impl<T: Transport> RemoteClient<T> {
    /// Creates a client for `dataset`.
    pub fn new(api: Arc<ApiClient<T>>, dataset: impl Into<String>) -> Self {
        Self {
            api,
            dataset: dataset.into(),
        }
    }

    /// Returns the dataset name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Returns the underlying API client.
    pub fn api(&self) -> &Arc<ApiClient<T>> {
        &self.api
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        self.api.config()
    }

    fn name(&self) -> String {
        self.dataset.clone()
    }

    /// Returns the dataset description.
    pub fn info(&self) -> SyncResult<DatasetInfo> {
        self.api.dataset(&self.dataset)
    }

    // Commits

    /// Returns up to `limit` commits ending at `head`, newest first.
    pub fn log(&self, head: &CommitId, limit: usize) -> SyncResult<Vec<Commit>> {
        let route = Route::Commits {
            dataset: self.name(),
        };
        self.api
            .list(&route, Query::new().with("head", head), Some(limit))
    }

    // Branches

    /// Lists branches.
    pub fn branches(&self) -> SyncResult<Vec<Branch>> {
        let route = Route::Branches {
            dataset: self.name(),
        };
        self.api.list(&route, Query::new(), None)
    }

    /// Returns one branch.
    pub fn branch(&self, name: &BranchName) -> SyncResult<Branch> {
        self.api.get(
            Route::Branch {
                dataset: self.name(),
                name: name.clone(),
            }
            .path(),
        )
    }

    /// Creates a branch at `commit`, or at the empty root.
    pub fn create_branch(
        &self,
        name: &BranchName,
        commit: Option<&CommitId>,
    ) -> SyncResult<Branch> {
        let route = Route::Branches {
            dataset: self.name(),
        };
        let body = CreateBranch {
            name: name.clone(),
            commit: commit.cloned(),
        };
        self.api.send(Method::Post, route.path(), &body)
    }

    /// Deletes a branch.
    pub fn delete_branch(&self, name: &BranchName) -> SyncResult<()> {
        let route = Route::Branch {
            dataset: self.name(),
            name: name.clone(),
        };
        self.api
            .delete(route.path(), self.api.cancellation())
            .map_err(|err| {
                err.refine(|code, _| match code {
                    ErrorCode::ProtectedBranch => Some(SyncError::ProtectedBranch {
                        branch: name.clone(),
                    }),
                    ErrorCode::BranchHasOpenDraft => Some(SyncError::BranchHasOpenDraft {
                        branch: name.clone(),
                    }),
                    _ => None,
                })
            })
    }

    // Drafts

    /// Lists drafts, optionally filtered by branch and status.
    pub fn drafts(
        &self,
        branch: Option<&BranchName>,
        status: Option<DraftStatus>,
    ) -> SyncResult<Vec<Draft>> {
        let route = Route::Drafts {
            dataset: self.name(),
        };
        let query = Query::new()
            .with_opt("branch", branch)
            .with_opt("status", status);
        self.api.list(&route, query, None)
    }

    /// Returns one draft.
    pub fn draft(&self, number: DraftNumber) -> SyncResult<Draft> {
        self.api.get(
            Route::Draft {
                dataset: self.name(),
                number,
            }
            .path(),
        )
    }

    /// Opens a draft on a branch.
    pub fn create_draft(&self, branch: &BranchName, title: &str) -> SyncResult<Draft> {
        let route = Route::Drafts {
            dataset: self.name(),
        };
        let body = CreateDraft {
            branch: branch.clone(),
            title: title.to_string(),
        };
        self.api.send(Method::Post, route.path(), &body)
    }

    /// Closes a draft.
    pub fn close_draft(&self, number: DraftNumber) -> SyncResult<Draft> {
        let route = Route::CloseDraft {
            dataset: self.name(),
            number,
        };
        self.api.send(Method::Post, route.path(), &serde_json::json!({}))
    }

    /// Commits a draft.
    pub fn commit_draft(&self, number: DraftNumber, message: &str) -> SyncResult<Commit> {
        let route = Route::CommitDraft {
            dataset: self.name(),
            number,
        };
        let body = CommitDraft {
            message: message.to_string(),
            committer: self.config().committer.clone(),
        };
        self.api
            .send(Method::Post, route.path(), &body)
            .map_err(|err| {
                err.refine(|code, message| {
                    (code == ErrorCode::StaleDraft).then(|| SyncError::StaleDraft {
                        draft: number,
                        detail: message.to_string(),
                    })
                })
            })
    }

    // Contents

    /// Lists the segments of a revision.
    pub fn segments(&self, revision: &ContentRevision) -> SyncResult<Vec<SegmentInfo>> {
        let route = Route::Segments {
            dataset: self.name(),
            revision: revision.clone(),
        };
        self.api.list(&route, Query::new(), None)
    }

    /// Creates a segment in a draft.
    pub fn create_segment(
        &self,
        draft: DraftNumber,
        segment: &SegmentInfo,
    ) -> SyncResult<SegmentInfo> {
        let route = Route::Segments {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
        };
        self.api
            .send(Method::Post, route.path(), segment)
            .map_err(|err| {
                err.refine(|code, _| {
                    (code == ErrorCode::DuplicateSegment).then(|| {
                        SyncError::Core(CoreError::DuplicateSegment {
                            name: segment.name.clone(),
                        })
                    })
                })
            })
    }

    /// Deletes a segment from a draft.
    pub fn delete_segment(
        &self,
        draft: DraftNumber,
        segment: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let route = Route::Segment {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
            segment: segment.to_string(),
        };
        self.api.delete(route.path(), cancel)
    }

    /// Lists the frames of a segment in index order.
    pub fn frames(
        &self,
        revision: &ContentRevision,
        segment: &str,
    ) -> SyncResult<Vec<FrameInfo>> {
        let route = Route::Frames {
            dataset: self.name(),
            revision: revision.clone(),
            segment: segment.to_string(),
        };
        self.api.list(&route, Query::new(), None)
    }

    /// Returns one frame.
    pub fn frame(
        &self,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
    ) -> SyncResult<FrameInfo> {
        self.api.get(
            Route::Frame {
                dataset: self.name(),
                revision: revision.clone(),
                segment: segment.to_string(),
                index,
            }
            .path(),
        )
    }

    /// Deletes a frame from a draft.
    pub fn delete_frame(
        &self,
        draft: DraftNumber,
        segment: &str,
        index: u64,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let route = Route::Frame {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
            segment: segment.to_string(),
            index,
        };
        self.api.delete(route.path(), cancel)
    }

    /// Replaces the label of a stored frame in a draft.
    pub fn update_label(
        &self,
        draft: DraftNumber,
        segment: &str,
        index: u64,
        request: &UpdateLabel,
        cancel: &CancellationToken,
    ) -> SyncResult<FrameInfo> {
        let route = Route::FrameLabel {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
            segment: segment.to_string(),
            index,
        };
        let request = HttpRequest::json(Method::Put, route.path(), request)?;
        Ok(self.api.execute(Plane::Control, request, cancel)?.json()?)
    }

    // Sensors

    /// Lists the sensors registered with a segment.
    pub fn sensors(&self, revision: &ContentRevision, segment: &str) -> SyncResult<Vec<Sensor>> {
        let route = Route::Sensors {
            dataset: self.name(),
            revision: revision.clone(),
            segment: segment.to_string(),
        };
        self.api.list(&route, Query::new(), None)
    }

    /// Registers or replaces a sensor of a segment in a draft.
    pub fn put_sensor(
        &self,
        draft: DraftNumber,
        segment: &str,
        sensor: &Sensor,
        cancel: &CancellationToken,
    ) -> SyncResult<Sensor> {
        let route = Route::Sensor {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
            segment: segment.to_string(),
            name: sensor.name.clone(),
        };
        let request = HttpRequest::json(Method::Put, route.path(), sensor)?;
        Ok(self.api.execute(Plane::Control, request, cancel)?.json()?)
    }

    /// Unregisters a sensor of a segment in a draft.
    pub fn delete_sensor(
        &self,
        draft: DraftNumber,
        segment: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let route = Route::Sensor {
            dataset: self.name(),
            revision: ContentRevision::Draft(draft),
            segment: segment.to_string(),
            name: name.to_string(),
        };
        self.api.delete(route.path(), cancel)
    }

    /// Lists segment names, sensors and frame checksums of a revision.
    pub fn snapshot(&self, revision: &ContentRevision) -> SyncResult<RemoteSnapshot> {
        let mut snapshot = RemoteSnapshot::new();
        for segment in self.segments(revision)? {
            snapshot.insert_segment(segment.name.clone());
            for sensor in self.sensors(revision, &segment.name)? {
                snapshot.insert_sensor(segment.name.clone(), sensor);
            }
            for frame in self.frames(revision, &segment.name)? {
                snapshot.insert_frame(segment.name.clone(), frame.index, frame.checksum);
            }
        }
        Ok(snapshot)
    }

    // Uploads

    /// Opens an upload session.
    pub fn begin_upload(
        &self,
        draft: DraftNumber,
        request: &BeginUpload,
        cancel: &CancellationToken,
    ) -> SyncResult<UploadSession> {
        let route = Route::Uploads {
            dataset: self.name(),
            draft,
        };
        let request = HttpRequest::json(Method::Post, route.path(), request)?;
        Ok(self.api.execute(Plane::Control, request, cancel)?.json()?)
    }

    /// Uploads one part. Part numbers start at 1.
    pub fn put_part(
        &self,
        upload_id: &str,
        part: u32,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> SyncResult<PartReceipt> {
        let route = Route::UploadPart {
            dataset: self.name(),
            upload_id: upload_id.to_string(),
            part,
        };
        let request = HttpRequest::new(Method::Put, route.path())
            .with_header("Content-Type", OCTET_STREAM)
            .with_body(body);
        Ok(self.api.execute(Plane::Data, request, cancel)?.json()?)
    }

    /// Completes an upload session.
    pub fn finalize_upload(
        &self,
        upload_id: &str,
        request: &FinalizeUpload,
        cancel: &CancellationToken,
    ) -> SyncResult<FrameInfo> {
        let route = Route::FinalizeUpload {
            dataset: self.name(),
            upload_id: upload_id.to_string(),
        };
        let request = HttpRequest::json(Method::Post, route.path(), request)?;
        Ok(self.api.execute(Plane::Data, request, cancel)?.json()?)
    }

    /// Downloads an object.
    pub fn object(&self, key: &str, cancel: &CancellationToken) -> SyncResult<Bytes> {
        let route = Route::Object {
            dataset: self.name(),
            key: key.to_string(),
        };
        Ok(self
            .api
            .execute(Plane::Data, HttpRequest::get(route.path()), cancel)?
            .body)
    }
}

impl<T: Transport> CommitSource for RemoteClient<T> {
    type Error = SyncError;

    fn commit(&self, id: &CommitId) -> SyncResult<Commit> {
        self.api.get(
            Route::Commit {
                dataset: self.name(),
                id: id.clone(),
            }
            .path(),
        )
    }
}

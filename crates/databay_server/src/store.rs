//! In-memory dataset state.
//!
//! Each dataset sits behind its own mutex, so every operation on one dataset
//! is atomic with respect to the others. Commit contents are shared with
//! `Arc` and copied into a draft only when the draft is created.

use crate::error::{ServerError, ServerResult};
use bytes::{Bytes, BytesMut};
use databay_core::{
    Branch, BranchName, Checksum, Commit, CommitId, CoreError, Draft, DraftNumber, DraftStatus,
    Sensor,
};
use databay_protocol::{
    BeginUpload, ContentRevision, DatasetInfo, FinalizeUpload, FrameInfo, PartReceipt, SegmentInfo,
    UpdateLabel, UploadSession,
};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Segments, sensors and frames of one revision.
#[derive(Debug, Clone, Default)]
pub(crate) struct Contents {
    segments: BTreeMap<String, StoredSegment>,
}

impl Contents {
    fn segment(&self, name: &str) -> ServerResult<&StoredSegment> {
        self.segments
            .get(name)
            .ok_or_else(|| ServerError::not_found(format!("segment {name}")))
    }

    fn segment_mut(&mut self, name: &str) -> ServerResult<&mut StoredSegment> {
        self.segments
            .get_mut(name)
            .ok_or_else(|| ServerError::not_found(format!("segment {name}")))
    }
}

#[derive(Debug, Clone, Default)]
struct StoredSegment {
    description: Option<String>,
    fusion: bool,
    sensors: BTreeMap<String, Sensor>,
    frames: BTreeMap<u64, FrameInfo>,
}

impl StoredSegment {
    fn check_sensor(&self, segment: &str, sensor: &str) -> ServerResult<()> {
        if self.fusion && !self.sensors.contains_key(sensor) {
            return Err(CoreError::UnknownSensor {
                segment: segment.to_string(),
                sensor: sensor.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StoredDraft {
    draft: Draft,
    contents: Contents,
}

#[derive(Debug)]
struct StoredCommit {
    commit: Commit,
    contents: Arc<Contents>,
}

#[derive(Debug)]
struct Upload {
    draft: DraftNumber,
    request: BeginUpload,
    object_key: String,
    parts: BTreeMap<u32, Bytes>,
}

/// State of one dataset.
#[derive(Debug)]
pub(crate) struct DatasetState {
    info: DatasetInfo,
    commits: HashMap<CommitId, StoredCommit>,
    branches: BTreeMap<BranchName, Option<CommitId>>,
    drafts: BTreeMap<DraftNumber, StoredDraft>,
    next_draft: u64,
    uploads: HashMap<String, Upload>,
    objects: HashMap<String, Bytes>,
}

impl DatasetState {
    fn new(name: String, default_branch: BranchName) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(default_branch.clone(), None);
        Self {
            info: DatasetInfo {
                name,
                default_branch,
            },
            commits: HashMap::new(),
            branches,
            drafts: BTreeMap::new(),
            next_draft: 1,
            uploads: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    pub(crate) fn info(&self) -> &DatasetInfo {
        &self.info
    }

    // Commits

    pub(crate) fn commit(&self, id: &CommitId) -> ServerResult<&Commit> {
        self.commits
            .get(id)
            .map(|c| &c.commit)
            .ok_or_else(|| ServerError::not_found(format!("commit {id}")))
    }

    /// Walks parent links from `head`, newest first.
    pub(crate) fn log(&self, head: &CommitId) -> ServerResult<Vec<Commit>> {
        let mut log = Vec::new();
        let mut cursor = Some(head.clone());
        while let Some(id) = cursor {
            let commit = self.commit(&id)?;
            cursor = commit.parent.clone();
            log.push(commit.clone());
        }
        Ok(log)
    }

    // Branches

    pub(crate) fn branch(&self, name: &BranchName) -> ServerResult<Branch> {
        self.branches
            .get(name)
            .map(|head| Branch {
                name: name.clone(),
                head: head.clone(),
            })
            .ok_or_else(|| ServerError::not_found(format!("branch {name}")))
    }

    pub(crate) fn branches(&self) -> Vec<Branch> {
        self.branches
            .iter()
            .map(|(name, head)| Branch {
                name: name.clone(),
                head: head.clone(),
            })
            .collect()
    }

    pub(crate) fn create_branch(
        &mut self,
        name: BranchName,
        commit: Option<CommitId>,
    ) -> ServerResult<Branch> {
        if self.branches.contains_key(&name) {
            return Err(ServerError::BranchExists(name));
        }
        if let Some(id) = &commit {
            self.commit(id)?;
        }
        self.branches.insert(name.clone(), commit.clone());
        Ok(Branch { name, head: commit })
    }

    pub(crate) fn delete_branch(&mut self, name: &BranchName) -> ServerResult<()> {
        self.branch(name)?;
        if *name == self.info.default_branch {
            return Err(ServerError::ProtectedBranch(name.clone()));
        }
        let count = self
            .drafts
            .values()
            .filter(|d| d.draft.is_open() && d.draft.branch == *name)
            .count();
        if count > 0 {
            return Err(ServerError::BranchHasOpenDraft {
                branch: name.clone(),
                count,
            });
        }
        self.branches.remove(name);
        Ok(())
    }

    // Drafts

    pub(crate) fn draft(&self, number: DraftNumber) -> ServerResult<&Draft> {
        self.drafts
            .get(&number)
            .map(|d| &d.draft)
            .ok_or_else(|| ServerError::not_found(format!("draft #{number}")))
    }

    pub(crate) fn drafts(
        &self,
        branch: Option<&BranchName>,
        status: Option<DraftStatus>,
    ) -> Vec<Draft> {
        self.drafts
            .values()
            .map(|d| &d.draft)
            .filter(|d| branch.map_or(true, |b| d.branch == *b))
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect()
    }

    pub(crate) fn create_draft(&mut self, branch: BranchName, title: String) -> ServerResult<Draft> {
        let parent = self.branch(&branch)?.head;
        let contents = match &parent {
            Some(id) => self
                .commits
                .get(id)
                .map(|c| Contents::clone(&c.contents))
                .ok_or_else(|| ServerError::Internal(format!("branch head {id} has no commit")))?,
            None => Contents::default(),
        };

        let number = DraftNumber::new(self.next_draft)?;
        self.next_draft += 1;
        let draft = Draft {
            number,
            branch,
            parent,
            title,
            status: DraftStatus::Open,
        };
        self.drafts.insert(
            number,
            StoredDraft {
                draft: draft.clone(),
                contents,
            },
        );
        Ok(draft)
    }

    pub(crate) fn close_draft(&mut self, number: DraftNumber) -> ServerResult<Draft> {
        let stored = self.open_draft_mut(number)?;
        stored.draft.status = DraftStatus::Closed;
        let draft = stored.draft.clone();
        self.uploads.retain(|_, u| u.draft != number);
        Ok(draft)
    }

    /// Turns an open draft into a commit and advances its branch.
    ///
    /// The branch head must still be the draft's parent.
    pub(crate) fn commit_draft(
        &mut self,
        number: DraftNumber,
        message: String,
        committer: String,
    ) -> ServerResult<Commit> {
        let (branch, base) = {
            let draft = &self.open_draft_mut(number)?.draft;
            (draft.branch.clone(), draft.parent.clone())
        };
        let head = self.branch(&branch)?.head;
        if head != base {
            return Err(ServerError::StaleDraft {
                draft: number,
                base,
                head,
            });
        }

        let stored = self.open_draft_mut(number)?;
        stored.draft.status = DraftStatus::Committed;
        let contents = Arc::new(std::mem::take(&mut stored.contents));

        let commit = Commit {
            id: CommitId::generate(),
            parent: base,
            message,
            committer,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        self.commits.insert(
            commit.id.clone(),
            StoredCommit {
                commit: commit.clone(),
                contents,
            },
        );
        self.branches.insert(branch, Some(commit.id.clone()));
        self.uploads.retain(|_, u| u.draft != number);
        Ok(commit)
    }

    fn open_draft_mut(&mut self, number: DraftNumber) -> ServerResult<&mut StoredDraft> {
        let stored = self
            .drafts
            .get_mut(&number)
            .ok_or_else(|| ServerError::not_found(format!("draft #{number}")))?;
        if !stored.draft.is_open() {
            return Err(ServerError::DraftNotOpen(number));
        }
        Ok(stored)
    }

    // Contents

    fn contents(&self, revision: &ContentRevision) -> ServerResult<&Contents> {
        match revision {
            ContentRevision::Draft(number) => self
                .drafts
                .get(number)
                .map(|d| &d.contents)
                .ok_or_else(|| ServerError::not_found(format!("draft #{number}"))),
            ContentRevision::Commit(id) => self
                .commits
                .get(id)
                .map(|c| c.contents.as_ref())
                .ok_or_else(|| ServerError::not_found(format!("commit {id}"))),
        }
    }

    fn contents_mut(&mut self, revision: &ContentRevision) -> ServerResult<&mut Contents> {
        match revision {
            ContentRevision::Draft(number) => Ok(&mut self.open_draft_mut(*number)?.contents),
            ContentRevision::Commit(id) => Err(ServerError::InvalidRequest(format!(
                "commit {id} is immutable"
            ))),
        }
    }

    pub(crate) fn segments(&self, revision: &ContentRevision) -> ServerResult<Vec<SegmentInfo>> {
        Ok(self
            .contents(revision)?
            .segments
            .iter()
            .map(|(name, segment)| SegmentInfo {
                name: name.clone(),
                description: segment.description.clone(),
                fusion: segment.fusion,
            })
            .collect())
    }

    pub(crate) fn create_segment(
        &mut self,
        revision: &ContentRevision,
        info: SegmentInfo,
    ) -> ServerResult<SegmentInfo> {
        let contents = self.contents_mut(revision)?;
        if contents.segments.contains_key(&info.name) {
            return Err(ServerError::DuplicateSegment(info.name));
        }
        contents.segments.insert(
            info.name.clone(),
            StoredSegment {
                description: info.description.clone(),
                fusion: info.fusion,
                ..StoredSegment::default()
            },
        );
        Ok(info)
    }

    pub(crate) fn delete_segment(
        &mut self,
        revision: &ContentRevision,
        name: &str,
    ) -> ServerResult<()> {
        self.contents_mut(revision)?
            .segments
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ServerError::not_found(format!("segment {name}")))
    }

    pub(crate) fn sensors(
        &self,
        revision: &ContentRevision,
        segment: &str,
    ) -> ServerResult<Vec<Sensor>> {
        Ok(self
            .contents(revision)?
            .segment(segment)?
            .sensors
            .values()
            .cloned()
            .collect())
    }

    /// Registers a sensor, replacing one of the same name.
    pub(crate) fn put_sensor(
        &mut self,
        revision: &ContentRevision,
        segment: &str,
        name: &str,
        sensor: Sensor,
    ) -> ServerResult<Sensor> {
        if sensor.name != name {
            return Err(ServerError::InvalidRequest(format!(
                "sensor {:?} sent to the address of {name:?}",
                sensor.name
            )));
        }
        if sensor.name.is_empty() {
            return Err(CoreError::InvalidSensor {
                name: sensor.name,
                reason: "name is empty".to_string(),
            }
            .into());
        }
        self.contents_mut(revision)?
            .segment_mut(segment)?
            .sensors
            .insert(sensor.name.clone(), sensor.clone());
        Ok(sensor)
    }

    /// Unregisters a sensor. A fusion segment refuses while frames use it.
    pub(crate) fn delete_sensor(
        &mut self,
        revision: &ContentRevision,
        segment: &str,
        name: &str,
    ) -> ServerResult<()> {
        let stored = self.contents_mut(revision)?.segment_mut(segment)?;
        let in_use = stored
            .frames
            .values()
            .any(|frame| frame.items.iter().any(|item| item.sensor == name));
        if stored.fusion && in_use {
            return Err(CoreError::SensorInUse {
                segment: segment.to_string(),
                sensor: name.to_string(),
            }
            .into());
        }
        stored
            .sensors
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ServerError::not_found(format!("sensor {name} of segment {segment}")))
    }

    pub(crate) fn frames(
        &self,
        revision: &ContentRevision,
        segment: &str,
    ) -> ServerResult<Vec<FrameInfo>> {
        Ok(self
            .contents(revision)?
            .segment(segment)?
            .frames
            .values()
            .cloned()
            .collect())
    }

    pub(crate) fn frame(
        &self,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
    ) -> ServerResult<FrameInfo> {
        self.contents(revision)?
            .segments
            .get(segment)
            .and_then(|s| s.frames.get(&index))
            .cloned()
            .ok_or_else(|| ServerError::not_found(format!("frame {segment}[{index}]")))
    }

    pub(crate) fn delete_frame(
        &mut self,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
    ) -> ServerResult<()> {
        self.contents_mut(revision)?
            .segments
            .get_mut(segment)
            .and_then(|s| s.frames.remove(&index))
            .map(|_| ())
            .ok_or_else(|| ServerError::not_found(format!("frame {segment}[{index}]")))
    }

    /// Replaces the label of a stored frame, keeping its object.
    pub(crate) fn update_label(
        &mut self,
        revision: &ContentRevision,
        segment: &str,
        index: u64,
        request: UpdateLabel,
    ) -> ServerResult<FrameInfo> {
        let key = format!("{segment}[{index}]");
        let frame = self
            .contents_mut(revision)?
            .segment_mut(segment)?
            .frames
            .get_mut(&index)
            .ok_or_else(|| ServerError::not_found(format!("frame {key}")))?;
        if frame.frame_id != request.frame_id || frame.content_checksum != request.content_checksum
        {
            return Err(ServerError::ChecksumMismatch(format!(
                "{key}: stored items differ, upload the whole frame"
            )));
        }
        if frame.content_checksum.with_label(&request.label) != request.checksum {
            return Err(ServerError::ChecksumMismatch(key));
        }
        frame.label = request.label;
        frame.checksum = request.checksum;
        Ok(frame.clone())
    }

    // Uploads

    pub(crate) fn begin_upload(
        &mut self,
        draft: DraftNumber,
        request: BeginUpload,
    ) -> ServerResult<UploadSession> {
        let contents = self.contents_mut(&ContentRevision::Draft(draft))?;
        if !contents.segments.contains_key(&request.segment) {
            return Err(ServerError::not_found(format!("segment {}", request.segment)));
        }

        let upload_id = Uuid::new_v4().simple().to_string();
        let object_key = Uuid::new_v4().simple().to_string();
        self.uploads.insert(
            upload_id.clone(),
            Upload {
                draft,
                request,
                object_key: object_key.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(UploadSession {
            upload_id,
            object_key,
        })
    }

    pub(crate) fn put_part(
        &mut self,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ServerResult<PartReceipt> {
        if part_number == 0 {
            return Err(ServerError::InvalidRequest("part numbers start at 1".into()));
        }
        let upload = self.upload_mut(upload_id)?;
        let receipt = PartReceipt {
            part_number,
            size: body.len() as u64,
            etag: etag(&body),
        };
        upload.parts.insert(part_number, body);
        Ok(receipt)
    }

    /// Assembles the parts, verifies the checksum and stores the frame.
    pub(crate) fn finalize_upload(
        &mut self,
        upload_id: &str,
        request: FinalizeUpload,
    ) -> ServerResult<FrameInfo> {
        let upload = self.upload_mut(upload_id)?;
        let payload = assemble(upload, &request.parts)?;
        let key = format!("{}[{}]", upload.request.segment, upload.request.index);

        let mut slices = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let end = item.offset.checked_add(item.size);
            match end {
                Some(end) if end <= payload.len() as u64 => slices.push((
                    item.sensor.as_str(),
                    item.remote_path.as_str(),
                    &payload[item.offset as usize..end as usize],
                )),
                _ => {
                    return Err(ServerError::InvalidRequest(format!(
                        "item {} lies outside the uploaded object",
                        item.remote_path
                    )))
                }
            }
        }
        let content = Checksum::of_items(slices);
        if content.with_label(&request.label) != upload.request.checksum {
            return Err(ServerError::ChecksumMismatch(key));
        }

        let info = FrameInfo {
            index: upload.request.index,
            frame_id: request.frame_id,
            checksum: upload.request.checksum,
            content_checksum: content,
            object_key: upload.object_key.clone(),
            items: request.items,
            label: request.label,
        };
        let draft = upload.draft;
        let segment = upload.request.segment.clone();
        let object_key = upload.object_key.clone();

        let stored = self
            .contents_mut(&ContentRevision::Draft(draft))?
            .segment_mut(&segment)?;
        for item in &info.items {
            stored.check_sensor(&segment, &item.sensor)?;
        }
        stored.frames.insert(info.index, info.clone());
        self.objects.insert(object_key, payload);
        self.uploads.remove(upload_id);
        Ok(info)
    }

    fn upload_mut(&mut self, upload_id: &str) -> ServerResult<&mut Upload> {
        let upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ServerError::not_found(format!("upload {upload_id}")))?;
        let number = upload.draft;
        match self.drafts.get(&number) {
            Some(d) if d.draft.is_open() => {}
            _ => return Err(ServerError::DraftNotOpen(number)),
        }
        self.uploads
            .get_mut(upload_id)
            .ok_or_else(|| ServerError::not_found(format!("upload {upload_id}")))
    }

    pub(crate) fn object(&self, key: &str) -> ServerResult<Bytes> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| ServerError::not_found(format!("object {key}")))
    }
}

fn etag(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn assemble(upload: &Upload, receipts: &[PartReceipt]) -> ServerResult<Bytes> {
    if receipts.len() != upload.parts.len() {
        return Err(ServerError::InvalidRequest(format!(
            "upload has {} part(s), finalize lists {}",
            upload.parts.len(),
            receipts.len()
        )));
    }
    let mut payload = BytesMut::with_capacity(upload.request.size as usize);
    for (expected, (receipt, (number, body))) in
        (1u32..).zip(receipts.iter().zip(upload.parts.iter()))
    {
        if receipt.part_number != expected || *number != expected {
            return Err(ServerError::InvalidRequest(format!(
                "part {expected} is missing"
            )));
        }
        if receipt.etag != etag(body) {
            return Err(ServerError::InvalidRequest(format!(
                "part {expected} does not match its receipt"
            )));
        }
        payload.extend_from_slice(body);
    }
    if payload.len() as u64 != upload.request.size {
        return Err(ServerError::InvalidRequest(format!(
            "received {} byte(s), expected {}",
            payload.len(),
            upload.request.size
        )));
    }
    Ok(payload.freeze())
}

/// All datasets.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: RwLock<BTreeMap<String, Arc<Mutex<DatasetState>>>>,
}

impl DatasetStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(&self, name: String, default_branch: BranchName) -> ServerResult<DatasetInfo> {
        if name.is_empty() || name.contains('/') {
            return Err(ServerError::InvalidRequest(format!(
                "invalid dataset name {name:?}"
            )));
        }
        let mut datasets = self.datasets.write();
        if datasets.contains_key(&name) {
            return Err(ServerError::DatasetExists(name));
        }
        let state = DatasetState::new(name.clone(), default_branch);
        let info = state.info.clone();
        datasets.insert(name, Arc::new(Mutex::new(state)));
        Ok(info)
    }

    pub(crate) fn delete(&self, name: &str) -> ServerResult<()> {
        self.datasets
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ServerError::not_found(format!("dataset {name}")))
    }

    pub(crate) fn list(&self) -> Vec<DatasetInfo> {
        self.datasets
            .read()
            .values()
            .map(|d| d.lock().info.clone())
            .collect()
    }

    pub(crate) fn get(&self, name: &str) -> ServerResult<Arc<Mutex<DatasetState>>> {
        self.datasets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::not_found(format!("dataset {name}")))
    }

    /// Returns the number of datasets.
    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    /// Returns true if there are no datasets.
    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use databay_core::{DataItem, Frame};
    use databay_protocol::item_infos;
    use serde_json::json;

    fn dataset() -> DatasetState {
        DatasetState::new("cars".into(), BranchName::default_branch())
    }

    fn main_branch() -> BranchName {
        BranchName::default_branch()
    }

    fn segment_info(name: &str) -> SegmentInfo {
        SegmentInfo {
            name: name.into(),
            description: None,
            fusion: false,
        }
    }

    fn upload_frame(
        state: &mut DatasetState,
        draft: DraftNumber,
        segment: &str,
        index: u64,
        frame: &Frame,
    ) -> ServerResult<FrameInfo> {
        let payload = frame.payload().unwrap();
        let session = state.begin_upload(
            draft,
            BeginUpload {
                segment: segment.into(),
                index,
                size: payload.len() as u64,
                checksum: frame.checksum(),
            },
        )?;
        let mid = payload.len() / 2;
        let parts = vec![
            state.put_part(&session.upload_id, 1, payload.slice(..mid))?,
            state.put_part(&session.upload_id, 2, payload.slice(mid..))?,
        ];
        state.finalize_upload(
            &session.upload_id,
            FinalizeUpload {
                frame_id: frame.frame_id(),
                items: item_infos(frame),
                label: frame.label().clone(),
                parts,
            },
        )
    }

    #[test]
    fn first_draft_has_root_parent() {
        let mut state = dataset();
        let draft = state.create_draft(main_branch(), "init".into()).unwrap();
        assert_eq!(draft.parent, None);
        assert_eq!(draft.number.get(), 1);
    }

    #[test]
    fn commit_advances_branch_and_copies_contents() {
        let mut state = dataset();
        let d1 = state.create_draft(main_branch(), "init".into()).unwrap();
        let rev = ContentRevision::Draft(d1.number);
        state
            .create_segment(&rev, segment_info("s1"))
            .unwrap();
        let c0 = state.commit_draft(d1.number, "c0".into(), "me".into()).unwrap();
        assert_eq!(state.branch(&main_branch()).unwrap().head, Some(c0.id.clone()));

        let d2 = state.create_draft(main_branch(), "next".into()).unwrap();
        assert_eq!(d2.parent, Some(c0.id.clone()));
        let segments = state.segments(&ContentRevision::Draft(d2.number)).unwrap();
        assert_eq!(segments.len(), 1);

        let c1 = state.commit_draft(d2.number, "c1".into(), "me".into()).unwrap();
        assert_eq!(c1.parent, Some(c0.id.clone()));
        let log: Vec<_> = state.log(&c1.id).unwrap().into_iter().map(|c| c.message).collect();
        assert_eq!(log, vec!["c1", "c0"]);
    }

    #[test]
    fn second_committer_is_stale() {
        let mut state = dataset();
        let a = state.create_draft(main_branch(), "a".into()).unwrap();
        let b = state.create_draft(main_branch(), "b".into()).unwrap();
        state.commit_draft(a.number, "a".into(), "alice".into()).unwrap();
        assert!(matches!(
            state.commit_draft(b.number, "b".into(), "bob".into()),
            Err(ServerError::StaleDraft { .. })
        ));
    }

    #[test]
    fn closed_draft_rejects_writes() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        state.close_draft(d.number).unwrap();
        let err = state
            .create_segment(
                &ContentRevision::Draft(d.number),
                segment_info("s"),
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::DraftNotOpen(_)));
        assert!(matches!(
            state.commit_draft(d.number, "m".into(), "me".into()),
            Err(ServerError::DraftNotOpen(_))
        ));
    }

    #[test]
    fn branch_deletion_rules() {
        let mut state = dataset();
        assert!(matches!(
            state.delete_branch(&main_branch()),
            Err(ServerError::ProtectedBranch(_))
        ));

        let dev = BranchName::new("dev").unwrap();
        state.create_branch(dev.clone(), None).unwrap();
        let d = state.create_draft(dev.clone(), "wip".into()).unwrap();
        assert!(matches!(
            state.delete_branch(&dev),
            Err(ServerError::BranchHasOpenDraft { count: 1, .. })
        ));

        state.close_draft(d.number).unwrap();
        state.delete_branch(&dev).unwrap();
        assert!(state.branch(&dev).is_err());
    }

    #[test]
    fn upload_stores_frame_and_object() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        let rev = ContentRevision::Draft(d.number);
        state
            .create_segment(&rev, segment_info("s1"))
            .unwrap();

        let frame = Frame::new(
            vec![
                DataItem::new("cam", "0001.jpg", &b"jpeg-bytes"[..]),
                DataItem::new("lidar", "0001.bin", &b"points"[..]),
            ],
            json!({"box2d": []}),
        )
        .unwrap();
        let info = upload_frame(&mut state, d.number, "s1", 0, &frame).unwrap();
        assert_eq!(info.checksum, frame.checksum());

        let stored = state.frame(&rev, "s1", 0).unwrap();
        assert_eq!(state.object(&stored.object_key).unwrap(), frame.payload().unwrap());
        assert!(state.uploads.is_empty());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        state
            .create_segment(
                &ContentRevision::Draft(d.number),
                segment_info("s1"),
            )
            .unwrap();

        let session = state
            .begin_upload(
                d.number,
                BeginUpload {
                    segment: "s1".into(),
                    index: 0,
                    size: 3,
                    checksum: Checksum::from_bytes([0; 32]),
                },
            )
            .unwrap();
        let receipt = state
            .put_part(&session.upload_id, 1, Bytes::from_static(b"abc"))
            .unwrap();
        let err = state
            .finalize_upload(
                &session.upload_id,
                FinalizeUpload {
                    frame_id: Uuid::new_v4(),
                    items: vec![databay_protocol::ItemInfo {
                        sensor: "cam".into(),
                        remote_path: "a.jpg".into(),
                        size: 3,
                        offset: 0,
                        timestamp: None,
                    }],
                    label: json!(null),
                    parts: vec![receipt],
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::ChecksumMismatch(_)));
    }

    #[test]
    fn missing_part_is_rejected() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        state
            .create_segment(
                &ContentRevision::Draft(d.number),
                segment_info("s1"),
            )
            .unwrap();
        let session = state
            .begin_upload(
                d.number,
                BeginUpload {
                    segment: "s1".into(),
                    index: 0,
                    size: 6,
                    checksum: Checksum::from_bytes([0; 32]),
                },
            )
            .unwrap();
        let second = state
            .put_part(&session.upload_id, 2, Bytes::from_static(b"def"))
            .unwrap();
        let err = state
            .finalize_upload(
                &session.upload_id,
                FinalizeUpload {
                    frame_id: Uuid::new_v4(),
                    items: vec![],
                    label: json!(null),
                    parts: vec![second],
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn label_update_keeps_the_object() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        let rev = ContentRevision::Draft(d.number);
        state.create_segment(&rev, segment_info("s1")).unwrap();
        let frame = Frame::single(DataItem::new("cam", "0001.jpg", &b"jpeg"[..])).unwrap();
        let stored = upload_frame(&mut state, d.number, "s1", 0, &frame).unwrap();

        let relabeled = frame.clone().with_label(json!({"classification": "car"}));
        let info = state
            .update_label(&rev, "s1", 0, UpdateLabel::of(&relabeled))
            .unwrap();
        assert_eq!(info.checksum, relabeled.checksum());
        assert_eq!(info.object_key, stored.object_key);
        assert_eq!(state.frame(&rev, "s1", 0).unwrap().label, *relabeled.label());

        let mut forged = UpdateLabel::of(&relabeled);
        forged.label = json!("other");
        assert!(matches!(
            state.update_label(&rev, "s1", 0, forged),
            Err(ServerError::ChecksumMismatch(_))
        ));

        let other = Frame::single(DataItem::new("cam", "0001.jpg", &b"png"[..])).unwrap();
        assert!(matches!(
            state.update_label(&rev, "s1", 0, UpdateLabel::of(&other)),
            Err(ServerError::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn fusion_segment_enforces_its_sensors() {
        let mut state = dataset();
        let d = state.create_draft(main_branch(), "x".into()).unwrap();
        let rev = ContentRevision::Draft(d.number);
        let info = SegmentInfo {
            fusion: true,
            ..segment_info("drive")
        };
        state.create_segment(&rev, info).unwrap();
        let frame = Frame::single(DataItem::new("cam", "0001.jpg", &b"jpeg"[..])).unwrap();

        let err = upload_frame(&mut state, d.number, "drive", 0, &frame).unwrap_err();
        assert!(matches!(err, ServerError::Core(CoreError::UnknownSensor { .. })));

        state
            .put_sensor(&rev, "drive", "cam", Sensor::new("cam"))
            .unwrap();
        upload_frame(&mut state, d.number, "drive", 0, &frame).unwrap();
        assert!(matches!(
            state.delete_sensor(&rev, "drive", "cam"),
            Err(ServerError::Core(CoreError::SensorInUse { .. }))
        ));
        assert!(matches!(
            state.put_sensor(&rev, "drive", "gps", Sensor::new("cam")),
            Err(ServerError::InvalidRequest(_))
        ));

        let c0 = state.commit_draft(d.number, "c0".into(), "me".into()).unwrap();
        let committed = state
            .sensors(&ContentRevision::Commit(c0.id), "drive")
            .unwrap();
        assert_eq!(committed, vec![Sensor::new("cam")]);
    }

    #[test]
    fn store_rejects_duplicate_dataset() {
        let store = DatasetStore::new();
        store.create("cars".into(), main_branch()).unwrap();
        assert!(matches!(
            store.create("cars".into(), main_branch()),
            Err(ServerError::DatasetExists(_))
        ));
        assert_eq!(store.len(), 1);
        store.delete("cars").unwrap();
        assert!(store.is_empty());
    }
}

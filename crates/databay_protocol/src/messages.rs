//! Request and response bodies.
//!
//! All bodies are JSON objects with camelCase field names. Part uploads and
//! object downloads are the only raw-byte bodies.

use databay_core::{
    BranchName, Checksum, CommitId, CoreError, CoreResult, DataItem, Frame, ItemSpan,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u64 = 128;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Offset of the first item.
    pub offset: u64,
    /// Number of items on this page.
    pub record_size: u64,
    /// Number of items in the whole listing.
    pub total_count: u64,
}

impl<T: Clone> Page<T> {
    /// Cuts one page out of a full listing.
    pub fn slice(all: &[T], offset: u64, limit: u64) -> Self {
        let start = (offset as usize).min(all.len());
        let end = start.saturating_add(limit as usize).min(all.len());
        let items = all[start..end].to_vec();
        Self {
            record_size: items.len() as u64,
            items,
            offset,
            total_count: all.len() as u64,
        }
    }
}

impl<T> Page<T> {
    /// Returns true if no items follow this page.
    pub fn is_last(&self) -> bool {
        self.record_size == 0 || self.offset + self.record_size >= self.total_count
    }

    /// Returns the offset of the next page.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.record_size
    }
}

/// A dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    /// Dataset name.
    pub name: String,
    /// Branch created with the dataset.
    pub default_branch: BranchName,
}

/// Body of a create-dataset request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDataset {
    /// Dataset name.
    pub name: String,
}

/// Body of a create-branch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranch {
    /// Branch name.
    pub name: BranchName,
    /// Commit the branch starts at, `None` for the empty root.
    pub commit: Option<CommitId>,
}

/// Body of a create-draft request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDraft {
    /// Branch the draft targets.
    pub branch: BranchName,
    /// Draft title.
    pub title: String,
}

/// Body of a commit-draft request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDraft {
    /// Commit message.
    pub message: String,
    /// Who commits.
    pub committer: String,
}

/// A segment in a listing, and the body of a create-segment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    /// Segment name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Frames may only use registered sensors.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fusion: bool,
}

/// One data item of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    /// Sensor name.
    pub sensor: String,
    /// Path inside the segment.
    pub remote_path: String,
    /// Size in bytes.
    pub size: u64,
    /// Offset inside the frame object.
    pub offset: u64,
    /// Capture timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl From<&ItemSpan<'_>> for ItemInfo {
    fn from(span: &ItemSpan<'_>) -> Self {
        Self {
            sensor: span.item.sensor().to_string(),
            remote_path: span.item.remote_path().to_string(),
            size: span.item.size(),
            offset: span.offset,
            timestamp: span.item.timestamp(),
        }
    }
}

/// Lists the items of a frame with their payload offsets.
pub fn item_infos(frame: &Frame) -> Vec<ItemInfo> {
    frame.layout().iter().map(ItemInfo::from).collect()
}

/// A stored frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    /// Index within the segment.
    pub index: u64,
    /// Client-generated frame ID.
    pub frame_id: Uuid,
    /// Checksum over items and label.
    pub checksum: Checksum,
    /// Digest of the items alone.
    pub content_checksum: Checksum,
    /// Key of the object holding the concatenated item bytes.
    pub object_key: String,
    /// Items in order.
    pub items: Vec<ItemInfo>,
    /// Annotation.
    #[serde(default)]
    pub label: serde_json::Value,
}

impl FrameInfo {
    /// Rebuilds a catalog frame without its payload.
    ///
    /// Fails if the checksum does not follow from the content digest and
    /// the label.
    pub fn to_frame(&self) -> CoreResult<Frame> {
        let items = self
            .items
            .iter()
            .map(|i| DataItem::remote(&i.sensor, &i.remote_path, i.size, i.timestamp))
            .collect();
        let frame = Frame::from_remote(
            self.frame_id,
            items,
            self.label.clone(),
            self.content_checksum,
            Some(self.object_key.clone()),
        )?;
        if frame.checksum() != self.checksum {
            return Err(CoreError::invalid_frame(format!(
                "frame {} has checksum {}, its content and label give {}",
                self.index,
                self.checksum,
                frame.checksum()
            )));
        }
        Ok(frame)
    }
}

/// Body of a begin-upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginUpload {
    /// Target segment.
    pub segment: String,
    /// Target frame index.
    pub index: u64,
    /// Total payload size.
    pub size: u64,
    /// Declared checksum.
    pub checksum: Checksum,
}

/// An open upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Upload ID, used in part and finalize routes.
    pub upload_id: String,
    /// Object key the frame will be stored under.
    pub object_key: String,
}

/// Server acknowledgement of one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartReceipt {
    /// Part number, starting at 1.
    pub part_number: u32,
    /// Bytes received.
    pub size: u64,
    /// Hex SHA-256 of the part.
    pub etag: String,
}

/// Body of a finalize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUpload {
    /// Client-generated frame ID.
    pub frame_id: Uuid,
    /// Items with their offsets in the object.
    pub items: Vec<ItemInfo>,
    /// Annotation.
    #[serde(default)]
    pub label: serde_json::Value,
    /// Receipts of every part, in part order.
    pub parts: Vec<PartReceipt>,
}

/// Body of a label update. The frame keeps its stored items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLabel {
    /// ID of the frame being relabeled.
    pub frame_id: Uuid,
    /// Digest of the stored items, as known to the client.
    pub content_checksum: Checksum,
    /// New annotation.
    #[serde(default)]
    pub label: serde_json::Value,
    /// Checksum of the relabeled frame.
    pub checksum: Checksum,
}

impl UpdateLabel {
    /// Describes the label of `frame`.
    pub fn of(frame: &Frame) -> Self {
        Self {
            frame_id: frame.frame_id(),
            content_checksum: frame.content_checksum(),
            label: frame.label().clone(),
            checksum: frame.checksum(),
        }
    }
}

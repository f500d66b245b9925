//! Frames and their data items.

use crate::error::{CoreError, CoreResult};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// SHA-256 digest of a frame's items and annotation.
///
/// Two frames with equal checksums are treated as unchanged by the diff, so
/// their payloads are never re-uploaded.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Creates a checksum from raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the checksum of a frame from its parts.
    ///
    /// Equal to `Checksum::of_items(items).with_label(label)`.
    pub fn of_frame<'a, I>(items: I, label: &serde_json::Value) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a [u8])>,
    {
        Self::of_items(items).with_label(label)
    }

    /// Computes the content digest of a frame's items.
    ///
    /// Each item contributes its sensor name, remote path, length and data.
    pub fn of_items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a [u8])>,
    {
        let mut hasher = Sha256::new();
        for (sensor, remote_path, data) in items {
            hasher.update(sensor.as_bytes());
            hasher.update([0u8]);
            hasher.update(remote_path.as_bytes());
            hasher.update([0u8]);
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(data);
        }
        Self(hasher.finalize().into())
    }

    /// Combines a content digest with an annotation into a frame checksum.
    ///
    /// A frame without its bytes can still be relabeled: the new checksum
    /// only needs the stored content digest.
    #[must_use]
    pub fn with_label(&self, label: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        // Display of a `Value` is its compact JSON encoding.
        hasher.update(label.to_string().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses the lowercase or uppercase hex form.
    pub fn from_hex(s: &str) -> CoreResult<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(CoreError::invalid_frame(format!("bad checksum {s:?}")));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| CoreError::invalid_frame(format!("bad checksum {s:?}")))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}…)", &self.to_hex()[..12])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Checksum {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::from_hex(&value)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.to_hex()
    }
}

/// One piece of sensor or media data inside a frame.
///
/// Items created locally carry their bytes. Items described by a remote
/// snapshot only carry metadata until their payload is downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    sensor: String,
    remote_path: String,
    timestamp: Option<f64>,
    size: u64,
    data: Option<Bytes>,
}

impl DataItem {
    /// Creates a local item with its bytes.
    pub fn new(sensor: impl Into<String>, remote_path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            sensor: sensor.into(),
            remote_path: remote_path.into(),
            timestamp: None,
            size: data.len() as u64,
            data: Some(data),
        }
    }

    /// Creates an item known only by its remote metadata.
    pub fn remote(
        sensor: impl Into<String>,
        remote_path: impl Into<String>,
        size: u64,
        timestamp: Option<f64>,
    ) -> Self {
        Self {
            sensor: sensor.into(),
            remote_path: remote_path.into(),
            timestamp,
            size,
            data: None,
        }
    }

    /// Sets the capture timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches downloaded bytes to a remote item.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        self.size = data.len() as u64;
        self.data = Some(data);
        self
    }

    /// Returns the sensor name.
    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    /// Returns the path of the item inside its segment.
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Returns the capture timestamp.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Returns the size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the bytes if they are held locally.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    fn validate(&self) -> CoreResult<()> {
        if self.sensor.is_empty() {
            return Err(CoreError::invalid_frame("sensor name is empty"));
        }
        if self.remote_path.is_empty() {
            return Err(CoreError::invalid_frame(format!(
                "item of sensor {:?} has an empty remote path",
                self.sensor
            )));
        }
        if self.remote_path.contains('\\') {
            return Err(CoreError::invalid_frame(format!(
                "remote path {:?} is not POSIX style",
                self.remote_path
            )));
        }
        Ok(())
    }
}

/// Placement of one item inside a frame's upload payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSpan<'a> {
    /// The item.
    pub item: &'a DataItem,
    /// Byte offset inside the payload.
    pub offset: u64,
}

/// An ordered sequence of data items plus an annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    frame_id: Uuid,
    items: Vec<DataItem>,
    label: serde_json::Value,
    content: Checksum,
    checksum: Checksum,
    object_key: Option<String>,
}

impl Frame {
    /// Creates a local frame. Every item must carry its bytes.
    pub fn new(items: Vec<DataItem>, label: serde_json::Value) -> CoreResult<Self> {
        validate_items(&items)?;
        if let Some(item) = items.iter().find(|i| i.data.is_none()) {
            return Err(CoreError::invalid_frame(format!(
                "item {:?} has no data",
                item.remote_path
            )));
        }
        let content = Checksum::of_items(items.iter().map(|i| {
            (
                i.sensor.as_str(),
                i.remote_path.as_str(),
                i.data.as_deref().unwrap_or_default(),
            )
        }));
        Ok(Self {
            frame_id: Uuid::new_v4(),
            checksum: content.with_label(&label),
            items,
            label,
            content,
            object_key: None,
        })
    }

    /// Creates a frame with a single item and no annotation.
    pub fn single(item: DataItem) -> CoreResult<Self> {
        Self::new(vec![item], serde_json::Value::Null)
    }

    /// Rebuilds a frame from a remote snapshot entry and the content digest
    /// of its items.
    pub fn from_remote(
        frame_id: Uuid,
        items: Vec<DataItem>,
        label: serde_json::Value,
        content: Checksum,
        object_key: Option<String>,
    ) -> CoreResult<Self> {
        validate_items(&items)?;
        Ok(Self {
            frame_id,
            items,
            checksum: content.with_label(&label),
            label,
            content,
            object_key,
        })
    }

    /// Returns the same frame with another annotation.
    ///
    /// The frame keeps its ID, items and object key, so a synced frame only
    /// sends the new label.
    #[must_use]
    pub fn with_label(mut self, label: serde_json::Value) -> Self {
        self.set_label(label);
        self
    }

    pub(crate) fn set_label(&mut self, label: serde_json::Value) {
        self.checksum = self.content.with_label(&label);
        self.label = label;
    }

    /// Returns the client-generated frame ID.
    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    /// Returns the items in order.
    pub fn items(&self) -> &[DataItem] {
        &self.items
    }

    /// Returns the annotation.
    pub fn label(&self) -> &serde_json::Value {
        &self.label
    }

    /// Returns the checksum over items and label.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Returns the digest of the items alone.
    pub fn content_checksum(&self) -> Checksum {
        self.content
    }

    /// Returns the remote object key once uploaded.
    pub fn object_key(&self) -> Option<&str> {
        self.object_key.as_deref()
    }

    pub(crate) fn set_object_key(&mut self, key: String) {
        self.object_key = Some(key);
    }

    /// Returns the total payload size in bytes.
    pub fn payload_size(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }

    /// Returns each item with its offset in the upload payload.
    pub fn layout(&self) -> Vec<ItemSpan<'_>> {
        let mut offset = 0;
        self.items
            .iter()
            .map(|item| {
                let span = ItemSpan { item, offset };
                offset += item.size;
                span
            })
            .collect()
    }

    /// Returns the concatenated item bytes, or `None` if any item is held
    /// remotely only.
    pub fn payload(&self) -> Option<Bytes> {
        match self.items.as_slice() {
            [single] => single.data.clone(),
            items => {
                let mut buf = BytesMut::with_capacity(self.payload_size() as usize);
                for item in items {
                    buf.extend_from_slice(item.data.as_ref()?);
                }
                Some(buf.freeze())
            }
        }
    }
}

fn validate_items(items: &[DataItem]) -> CoreResult<()> {
    if items.is_empty() {
        return Err(CoreError::invalid_frame("frame has no items"));
    }
    let mut sensors = HashSet::new();
    for item in items {
        item.validate()?;
        if !sensors.insert(item.sensor.as_str()) {
            return Err(CoreError::invalid_frame(format!(
                "sensor {:?} appears twice in one frame",
                item.sensor
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checksum_tracks_content() {
        let a = Frame::single(DataItem::new("cam", "0001.jpg", &b"abc"[..])).unwrap();
        let b = Frame::single(DataItem::new("cam", "0001.jpg", &b"abc"[..])).unwrap();
        let c = Frame::single(DataItem::new("cam", "0001.jpg", &b"abd"[..])).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_ne!(a.frame_id(), b.frame_id());
    }

    #[test]
    fn checksum_covers_label() {
        let item = DataItem::new("cam", "0001.jpg", &b"abc"[..]);
        let plain = Frame::new(vec![item.clone()], json!(null)).unwrap();
        let labeled = Frame::new(vec![item], json!({"box2d": [1, 2, 3, 4]})).unwrap();
        assert_ne!(plain.checksum(), labeled.checksum());
    }

    #[test]
    fn rejects_windows_paths() {
        let err = Frame::single(DataItem::new("cam", "dir\\0001.jpg", &b"x"[..])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFrame { .. }));
    }

    #[test]
    fn rejects_duplicate_sensor() {
        let err = Frame::new(
            vec![
                DataItem::new("lidar", "a.bin", &b"1"[..]),
                DataItem::new("lidar", "b.bin", &b"2"[..]),
            ],
            json!(null),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidFrame { .. }));
    }

    #[test]
    fn layout_and_payload() {
        let frame = Frame::new(
            vec![
                DataItem::new("cam", "a.jpg", &b"hello"[..]).with_timestamp(1.5),
                DataItem::new("lidar", "a.bin", &b"world!"[..]),
            ],
            json!(null),
        )
        .unwrap();

        let offsets: Vec<_> = frame.layout().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 5]);
        assert_eq!(frame.payload_size(), 11);
        assert_eq!(frame.payload().unwrap(), Bytes::from_static(b"helloworld!"));
    }

    #[test]
    fn remote_frames_have_no_payload() {
        let content = Checksum::from_bytes([7u8; 32]);
        let frame = Frame::from_remote(
            Uuid::new_v4(),
            vec![DataItem::remote("cam", "a.jpg", 10, None)],
            json!(null),
            content,
            Some("objects/a".into()),
        )
        .unwrap();
        assert!(frame.payload().is_none());
        assert_eq!(frame.content_checksum(), content);
        assert_eq!(frame.checksum(), content.with_label(&json!(null)));
        assert_eq!(frame.object_key(), Some("objects/a"));
    }

    #[test]
    fn relabel_without_payload_matches_local_frame() {
        let local = Frame::single(DataItem::new("cam", "a.jpg", &b"abc"[..])).unwrap();
        let remote = Frame::from_remote(
            local.frame_id(),
            vec![DataItem::remote("cam", "a.jpg", 3, None)],
            json!(null),
            local.content_checksum(),
            Some("objects/a".into()),
        )
        .unwrap();
        assert_eq!(remote.checksum(), local.checksum());

        let label = json!({"classification": "truck"});
        let relabeled = remote.with_label(label.clone());
        assert_eq!(relabeled.checksum(), local.clone().with_label(label).checksum());
        assert_eq!(relabeled.object_key(), Some("objects/a"));
        assert_eq!(relabeled.frame_id(), local.frame_id());
        assert_eq!(relabeled.content_checksum(), local.content_checksum());
    }

    #[test]
    fn checksum_hex_roundtrip() {
        let checksum = Checksum::from_bytes([0xab; 32]);
        assert_eq!(Checksum::from_hex(&checksum.to_hex()).unwrap(), checksum);
        assert!(Checksum::from_hex("zz").is_err());
    }
}

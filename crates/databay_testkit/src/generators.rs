//! Property-based test generators using proptest.

use bytes::Bytes;
use databay_core::{Catalog, DataItem, DraftNumber, Frame};
use proptest::prelude::*;
use std::collections::BTreeMap;

const SENSORS: [&str; 3] = ["cam", "lidar", "radar"];

/// Segment name to frames, in index order.
pub type CatalogLayout = BTreeMap<String, Vec<Frame>>;

/// Strategy for valid segment names.
pub fn segment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}").expect("Invalid regex")
}

/// Strategy for item payloads, empty ones included.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..48)
}

/// Strategy for frames of one to three sensors with an optional label.
pub fn frame_strategy() -> impl Strategy<Value = Frame> {
    let sensors = prop::sample::subsequence(SENSORS.to_vec(), 1..=SENSORS.len());
    (sensors, prop::option::of(0u32..100))
        .prop_flat_map(|(sensors, label)| {
            let payloads = prop::collection::vec(payload_strategy(), sensors.len());
            (Just(sensors), payloads, Just(label))
        })
        .prop_map(|(sensors, payloads, label)| {
            let items = sensors
                .iter()
                .zip(payloads)
                .enumerate()
                .map(|(i, (sensor, payload))| {
                    DataItem::new(*sensor, format!("{sensor}/{i}.bin"), Bytes::from(payload))
                })
                .collect();
            let label = label.map_or(serde_json::Value::Null, |n| serde_json::json!({ "objects": n }));
            Frame::new(items, label).expect("Generated frame is valid")
        })
}

/// Strategy for up to four segments of up to five frames each.
pub fn catalog_layout_strategy() -> impl Strategy<Value = CatalogLayout> {
    prop::collection::btree_map(
        segment_name_strategy(),
        prop::collection::vec(frame_strategy(), 0..5),
        0..4,
    )
}

/// Builds a draft catalog from a layout.
pub fn build_catalog(draft: DraftNumber, layout: &CatalogLayout) -> Catalog {
    let mut catalog = Catalog::for_draft(draft);
    for (name, frames) in layout {
        catalog
            .add_segment(name.as_str())
            .expect("Failed to add segment");
        for frame in frames {
            catalog
                .add_frame(name, frame.clone())
                .expect("Failed to add frame");
        }
    }
    catalog
}

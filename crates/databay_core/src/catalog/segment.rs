//! Segments and their sensor registries.

use crate::catalog::frame::Frame;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sensor registered with a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    /// Sensor name, matched against the sensor of each data item.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Sensor {
    /// Creates a sensor without description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, ordered group of frames.
///
/// Frame indices are positions in an append-only vector. Removing a frame
/// leaves a hole so the indices of the remaining frames never shift.
///
/// Every segment keeps a sensor registry. In a fusion segment the registry
/// is binding: each data item must name a registered sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    name: String,
    description: Option<String>,
    fusion: bool,
    sensors: BTreeMap<String, Sensor>,
    frames: Vec<Option<Frame>>,
}

impl Segment {
    pub(crate) fn new(name: String, fusion: bool) -> CoreResult<Self> {
        validate_name(&name)?;
        Ok(Self {
            name,
            description: None,
            fusion,
            sensors: BTreeMap::new(),
            frames: Vec::new(),
        })
    }

    /// Returns the segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns true if items must name registered sensors.
    pub fn is_fusion(&self) -> bool {
        self.fusion
    }

    /// Returns a registered sensor.
    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        self.sensors.get(name)
    }

    /// Iterates over registered sensors in name order.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    /// Returns the number of frames.
    pub fn len(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }

    /// Returns true if the segment has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.is_none())
    }

    /// Returns the index the next appended frame will get.
    pub fn next_index(&self) -> u64 {
        self.frames.len() as u64
    }

    /// Returns the frame at `index`.
    pub fn frame(&self, index: u64) -> Option<&Frame> {
        self.frames.get(index as usize).and_then(Option::as_ref)
    }

    /// Iterates over `(index, frame)` pairs in index order.
    pub fn frames(&self) -> impl Iterator<Item = (u64, &Frame)> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i as u64, f)))
    }

    pub(crate) fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub(crate) fn put_sensor(&mut self, sensor: Sensor) -> CoreResult<()> {
        if sensor.name.is_empty() {
            return Err(CoreError::InvalidSensor {
                name: sensor.name,
                reason: "name is empty".to_string(),
            });
        }
        self.sensors.insert(sensor.name.clone(), sensor);
        Ok(())
    }

    pub(crate) fn remove_sensor(&mut self, name: &str) -> CoreResult<Sensor> {
        if !self.sensors.contains_key(name) {
            return Err(self.unknown_sensor(name));
        }
        let in_use = self
            .frames()
            .any(|(_, frame)| frame.items().iter().any(|item| item.sensor() == name));
        if self.fusion && in_use {
            return Err(CoreError::SensorInUse {
                segment: self.name.clone(),
                sensor: name.to_string(),
            });
        }
        self.sensors
            .remove(name)
            .ok_or_else(|| self.unknown_sensor(name))
    }

    /// Fails unless every item of `frame` may live in this segment.
    pub(crate) fn check_sensors(&self, frame: &Frame) -> CoreResult<()> {
        if !self.fusion {
            return Ok(());
        }
        match frame
            .items()
            .iter()
            .find(|item| !self.sensors.contains_key(item.sensor()))
        {
            Some(item) => Err(self.unknown_sensor(item.sensor())),
            None => Ok(()),
        }
    }

    fn unknown_sensor(&self, sensor: &str) -> CoreError {
        CoreError::UnknownSensor {
            segment: self.name.clone(),
            sensor: sensor.to_string(),
        }
    }

    pub(crate) fn push(&mut self, frame: Frame) -> u64 {
        self.frames.push(Some(frame));
        (self.frames.len() - 1) as u64
    }

    pub(crate) fn place(&mut self, index: u64, frame: Frame) {
        let index = index as usize;
        if index >= self.frames.len() {
            self.frames.resize_with(index + 1, || None);
        }
        self.frames[index] = Some(frame);
    }

    pub(crate) fn remove(&mut self, index: u64) -> CoreResult<Frame> {
        self.frames
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or_else(|| CoreError::FrameNotFound {
                segment: self.name.clone(),
                index,
            })
    }

    pub(crate) fn replace(&mut self, index: u64, frame: Frame) -> CoreResult<Frame> {
        Ok(std::mem::replace(self.frame_mut(index)?, frame))
    }

    pub(crate) fn frame_mut(&mut self, index: u64) -> CoreResult<&mut Frame> {
        let name = &self.name;
        self.frames
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| CoreError::FrameNotFound {
                segment: name.clone(),
                index,
            })
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') || name.contains('\\') {
        "name may not contain path separators"
    } else if name.chars().any(char::is_control) {
        "name may not contain control characters"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidSegmentName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

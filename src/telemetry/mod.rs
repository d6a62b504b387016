//! Joint-state telemetry store.
//!
//! Holds the latest known value of every joint seen in the session. Updates
//! merge into the mapping; a joint absent from an update keeps its value.

use chrono::{DateTime, Utc};

use crate::protocol::JointState;

#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    joints: JointState,
    revision: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite each joint present in `update`, keep the rest.
    ///
    /// Returns the number of joints in the update.
    pub fn merge(&mut self, update: &JointState) -> usize {
        for (name, value) in update {
            self.joints.insert(name.clone(), *value);
        }
        self.revision += 1;
        self.updated_at = Some(Utc::now());
        update.len()
    }

    /// Owned copy of the current mapping.
    pub fn snapshot(&self) -> JointState {
        self.joints.clone()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.joints.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Incremented on every merge and reset.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Forget every joint.
    pub fn reset(&mut self) {
        self.joints.clear();
        self.revision += 1;
        self.updated_at = None;
    }
}

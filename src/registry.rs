// src/registry.rs
//
// Per-device pending-update flags:
//
//   NoUpdate --arm(ref)--> Pending
//   Pending  --consume_if_pending--> NoUpdate (returns ref)
//   NoUpdate --consume_if_pending--> NoUpdate (returns None)
//   Pending  --arm(ref2)--> Pending (ref overwritten)

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::OtaError;
use crate::slots::Slots;
use crate::types::DeviceId;

/// Where a device fetches its firmware from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    /// A file published in the artifact store, served by this process.
    Stored {
        file_name: String,
        source_url: Option<String>,
    },
    /// A URL handed to the device verbatim.
    Remote { url: String },
}

impl ArtifactRef {
    pub fn is_empty(&self) -> bool {
        match self {
            ArtifactRef::Stored { file_name, .. } => file_name.is_empty(),
            ArtifactRef::Remote { url } => url.is_empty(),
        }
    }

    /// Download URL for the device. Stored files resolve against `base`
    /// (scheme and authority, no trailing slash) or stay root-relative.
    pub fn location(&self, base: Option<&str>) -> String {
        match self {
            ArtifactRef::Stored { file_name, .. } => {
                format!("{}/{file_name}", base.unwrap_or_default())
            }
            ArtifactRef::Remote { url } => url.clone(),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            ArtifactRef::Stored { source_url: None, .. } => "upload",
            ArtifactRef::Stored { source_url: Some(_), .. } => "mirror",
            ArtifactRef::Remote { .. } => "link",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub pending: bool,
    pub artifact: ArtifactRef,
    pub armed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct UpdateRegistry {
    records: Slots<UpdateRecord>,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `device` as having `artifact` pending, replacing any earlier
    /// pending reference.
    pub fn arm(&self, device: &DeviceId, artifact: ArtifactRef) -> Result<(), OtaError> {
        if artifact.is_empty() {
            return Err(OtaError::invalid("artifact reference is empty"));
        }
        let record = UpdateRecord {
            pending: true,
            artifact,
            armed_at: Utc::now(),
        };
        let replaced = self.records.upsert(device.as_str(), |r| {
            let replaced = r.as_ref().is_some_and(|old| old.pending);
            *r = Some(record);
            replaced
        });
        if replaced {
            info!("update re-armed for {device}, previous pending update replaced");
        } else {
            info!("update stored for {device}");
        }
        Ok(())
    }

    /// Check-and-clear. Exactly one caller observes each arm.
    pub fn consume_if_pending(&self, device: &DeviceId) -> Option<ArtifactRef> {
        let artifact = self
            .records
            .with_existing(device.as_str(), |r| {
                if r.pending {
                    r.pending = false;
                    Some(r.artifact.clone())
                } else {
                    None
                }
            })
            .flatten();
        if artifact.is_some() {
            info!("update triggered for {device}");
        }
        artifact
    }

    #[cfg(test)]
    pub(crate) fn get(&self, device: &DeviceId) -> Option<UpdateRecord> {
        self.records.with_existing(device.as_str(), |r| r.clone())
    }

    pub fn snapshot(&self) -> Vec<(String, UpdateRecord)> {
        self.records.snapshot()
    }
}

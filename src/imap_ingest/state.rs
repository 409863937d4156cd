//! Persisted watermarks so restarts don't re-walk entire mailboxes
//! (spec.md 4.E). One JSON file under the data directory, read at startup
//! and rewritten after every successful fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionState {
    /// Highest UID imported from the primary folder so far.
    pub primary_last_uid: Option<u32>,
    /// UIDVALIDITY seen for the primary folder; a mismatch means UIDs were
    /// reassigned and `primary_last_uid` can no longer be trusted.
    pub primary_uid_validity: Option<u32>,
    /// Per-folder watermark for the secondary polling loop, defaulting to
    /// now - 24h the first time a folder is seen.
    pub folder_watermarks: HashMap<String, DateTime<Utc>>,
}

impl IngestionState {
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        std::fs::write(path, bytes)
    }
}

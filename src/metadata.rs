//! Point-in-time snapshot of the live session set, used only to decide which
//! accounts to reconnect after a restart.

use crate::error::Result;
use crate::types::SessionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadataRecord {
    pub account_id: String,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Replaces the whole snapshot.
    async fn save(&self, records: &[SessionMetadataRecord]) -> Result<()>;

    /// Absent snapshot loads as empty.
    async fn load(&self) -> Result<Vec<SessionMetadataRecord>>;
}

pub struct JsonFileMetadataStore {
    path: PathBuf,
    // Saves share one temp file; only one may write it at a time.
    write_lock: Mutex<()>,
}

impl JsonFileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "metadata.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn save(&self, records: &[SessionMetadataRecord]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(records)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<SessionMetadataRecord>> {
        let raw = {
            let _guard = self.write_lock.lock().await;
            match tokio::fs::read(&self.path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            }
        };
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }
}

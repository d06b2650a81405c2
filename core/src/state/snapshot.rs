//! On-disk snapshot format for one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::RunRecord;
use crate::error::StoreError;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub run: RunRecord,
}

impl RunSnapshot {
    pub fn new(run: RunRecord) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            run,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::Serde(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Writes through a temporary file so readers never see a partial snapshot.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

//! Run store: the durable record of runs, tasks and attempts.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::{ExecutionAttempt, RunRecord, RunStatus, RunSummary, TaskUpdate};
use crate::error::StoreError;

/// Persistence for run records.
///
/// Writes are scoped to one task so concurrent tasks of a wave never
/// overwrite each other.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError>;

    async fn update_task(
        &self,
        run_id: &str,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError>;

    async fn append_attempt(
        &self,
        run_id: &str,
        attempt: ExecutionAttempt,
    ) -> Result<(), StoreError>;

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError>;

    /// `RunNotFound` for unknown ids, `RunExpired` past retention.
    async fn load_run(&self, run_id: &str) -> Result<RunRecord, StoreError>;

    /// Newest first.
    async fn list_runs(&self) -> Result<Vec<RunSummary>, StoreError>;

    /// Drops expired runs and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

pub type RunStoreHandle = Arc<dyn RunStore>;

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Retention in hours; 0 keeps runs forever.
pub fn retention_from_hours(hours: u64) -> Option<Duration> {
    match hours {
        0 => None,
        h => Some(Duration::hours(h.min(MAX_RETENTION_HOURS) as i64)),
    }
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, RunRecord>,
    tombstones: HashSet<String>,
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryRunStore {
    state: RwLock<MemoryState>,
    retention: Option<Duration>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    async fn with_run<F>(&self, run_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RunRecord) -> Result<(), StoreError>,
    {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        f(run)
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&record.run_id) || state.tombstones.contains(&record.run_id) {
            return Err(StoreError::RunExists(record.run_id));
        }
        state.runs.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn update_task(
        &self,
        run_id: &str,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        self.with_run(run_id, |run| run.apply_update(task_id, update))
            .await
    }

    async fn append_attempt(
        &self,
        run_id: &str,
        attempt: ExecutionAttempt,
    ) -> Result<(), StoreError> {
        self.with_run(run_id, |run| run.push_attempt(attempt)).await
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        self.with_run(run_id, |run| {
            run.finish(status);
            Ok(())
        })
        .await
    }

    async fn load_run(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let state = self.state.read().await;
        match state.runs.get(run_id) {
            Some(run) if run.is_expired(self.retention, Utc::now()) => {
                Err(StoreError::RunExpired(run_id.to_string()))
            }
            Some(run) => Ok(run.clone()),
            None if state.tombstones.contains(run_id) => {
                Err(StoreError::RunExpired(run_id.to_string()))
            }
            None => Err(StoreError::RunNotFound(run_id.to_string())),
        }
    }

    async fn list_runs(&self) -> Result<Vec<RunSummary>, StoreError> {
        let state = self.state.read().await;
        let mut runs: Vec<RunSummary> = state.runs.values().map(RunRecord::summary).collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .runs
            .values()
            .filter(|run| run.is_expired(self.retention, now))
            .map(|run| run.run_id.clone())
            .collect();
        for run_id in &expired {
            state.runs.remove(run_id);
            state.tombstones.insert(run_id.clone());
        }
        Ok(expired.len())
    }
}

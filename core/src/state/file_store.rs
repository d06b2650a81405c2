//! Directory-backed run store: one JSON snapshot per run.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::snapshot::RunSnapshot;
use super::store::RunStore;
use super::types::{ExecutionAttempt, RunRecord, RunStatus, RunSummary, TaskUpdate};
use crate::error::StoreError;

const TOMBSTONE_DIR: &str = ".expired";

/// Stores `<dir>/<run_id>.json`; the directory is created on first write.
///
/// Every mutation is read-modify-write under one lock, so concurrent task
/// updates of the same run serialize cleanly.
pub struct FileRunStore {
    dir: PathBuf,
    retention: Option<Duration>,
    lock: Mutex<()>,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !run_id.is_empty()
            && run_id != "."
            && run_id != ".."
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid || run_id.starts_with('.') {
            return Err(StoreError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    fn tombstone_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(TOMBSTONE_DIR).join(run_id)
    }

    async fn read(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let path = self.run_path(run_id)?;
        match RunSnapshot::load(&path).await {
            Ok(snapshot) => Ok(snapshot.run),
            Err(StoreError::Io(_)) if !path.exists() => {
                if self.tombstone_path(run_id).exists() {
                    Err(StoreError::RunExpired(run_id.to_string()))
                } else {
                    Err(StoreError::RunNotFound(run_id.to_string()))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, run: RunRecord) -> Result<(), StoreError> {
        let path = self.run_path(&run.run_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        RunSnapshot::new(run).save(&path).await
    }

    async fn modify<F>(&self, run_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RunRecord) -> Result<(), StoreError> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut run = self.read(run_id).await?;
        f(&mut run)?;
        self.write(run).await
    }

    async fn read_all(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match RunSnapshot::load(&path).await {
                Ok(snapshot) => runs.push(snapshot.run),
                Err(e) => tracing::warn!("skipping unreadable run snapshot {}: {}", path.display(), e),
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.run_path(&record.run_id)?;
        if path.exists() || self.tombstone_path(&record.run_id).exists() {
            return Err(StoreError::RunExists(record.run_id));
        }
        tracing::debug!(run_id = %record.run_id, dir = %self.dir.display(), "creating run snapshot");
        self.write(record).await
    }

    async fn update_task(
        &self,
        run_id: &str,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<(), StoreError> {
        self.modify(run_id, |run| run.apply_update(task_id, update))
            .await
    }

    async fn append_attempt(
        &self,
        run_id: &str,
        attempt: ExecutionAttempt,
    ) -> Result<(), StoreError> {
        self.modify(run_id, |run| run.push_attempt(attempt)).await
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        self.modify(run_id, |run| {
            run.finish(status);
            Ok(())
        })
        .await
    }

    async fn load_run(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let run = self.read(run_id).await?;
        if run.is_expired(self.retention, Utc::now()) {
            return Err(StoreError::RunExpired(run_id.to_string()));
        }
        Ok(run)
    }

    async fn list_runs(&self) -> Result<Vec<RunSummary>, StoreError> {
        let mut runs: Vec<RunSummary> = self
            .read_all()
            .await?
            .iter()
            .map(RunRecord::summary)
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let mut purged = 0;
        for run in self.read_all().await? {
            if !run.is_expired(self.retention, now) {
                continue;
            }
            let path = self.run_path(&run.run_id)?;
            tokio::fs::create_dir_all(self.dir.join(TOMBSTONE_DIR)).await?;
            tokio::fs::write(self.tombstone_path(&run.run_id), b"").await?;
            tokio::fs::remove_file(&path).await?;
            tracing::info!(run_id = %run.run_id, "purged expired run");
            purged += 1;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::retention_from_hours;
    use crate::state::{AttemptOutcome, BackendUsed, TaskStatus};
    use crate::backend::BackendRole;
    use crate::stdio::StdioTask;

    fn run(id: &str) -> RunRecord {
        RunRecord::new(
            id,
            None,
            &[StdioTask::new("a", "codex", "x"), StdioTask::new("b", "codex", "y")],
            vec![vec!["a".into(), "b".into()]],
        )
    }

    #[tokio::test]
    async fn directory_is_created_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runs");
        let store = FileRunStore::new(&dir);
        assert!(store.list_runs().await.unwrap().is_empty());
        assert!(!dir.exists());

        store.create_run(run("r1")).await.unwrap();
        assert!(dir.join("r1.json").exists());
    }

    #[tokio::test]
    async fn updates_persist_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(tmp.path());
        store.create_run(run("r1")).await.unwrap();
        store
            .update_task("r1", "a", TaskUpdate::status(TaskStatus::Ready))
            .await
            .unwrap();
        store
            .update_task("r1", "a", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();
        store
            .append_attempt(
                "r1",
                ExecutionAttempt {
                    task_id: "a".into(),
                    attempt_number: 1,
                    round: 0,
                    backend_used: BackendUsed {
                        role: BackendRole::Primary,
                        name: "codex".into(),
                    },
                    outcome: AttemptOutcome::Success,
                    duration_ms: 5,
                    output: Some("ok".into()),
                    actions: vec![],
                    error: None,
                    error_code: None,
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store
            .update_task(
                "r1",
                "a",
                TaskUpdate::status(TaskStatus::Succeeded).with_output(Some("ok".into())),
            )
            .await
            .unwrap();
        store.finish_run("r1", RunStatus::PartiallyFailed).await.unwrap();

        let reopened = FileRunStore::new(tmp.path());
        let loaded = reopened.load_run("r1").await.unwrap();
        let a = loaded.task("a").unwrap();
        assert_eq!(a.status, TaskStatus::Succeeded);
        assert_eq!(a.attempts.len(), 1);
        assert_eq!(a.output.as_deref(), Some("ok"));
        assert_eq!(loaded.status, RunStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn concurrent_task_updates_do_not_clobber() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileRunStore::new(tmp.path()));
        store.create_run(run("r1")).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_task("r1", "a", TaskUpdate::status(TaskStatus::Ready))
                    .await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_task("r1", "b", TaskUpdate::status(TaskStatus::Blocked))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let loaded = store.load_run("r1").await.unwrap();
        assert_eq!(loaded.task("a").unwrap().status, TaskStatus::Ready);
        assert_eq!(loaded.task("b").unwrap().status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn purge_leaves_tombstones() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(tmp.path()).with_retention(retention_from_hours(1));
        let mut old = run("old");
        old.started_at = Utc::now() - Duration::hours(3);
        store.create_run(old).await.unwrap();
        store.create_run(run("new")).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(matches!(
            store.load_run("old").await,
            Err(StoreError::RunExpired(_))
        ));
        assert!(matches!(
            store.load_run("missing").await,
            Err(StoreError::RunNotFound(_))
        ));
        let listed = store.list_runs().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id, "new");
    }

    #[tokio::test]
    async fn path_like_run_ids_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(tmp.path());
        assert!(matches!(
            store.load_run("../etc/passwd").await,
            Err(StoreError::InvalidRunId(_))
        ));
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::EventsOutConfig;

/// Sender side of the JSONL tee. Cheap to clone.
#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    drop_when_full: bool,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            if self.tx.try_send(line).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        } else if self.tx.send(line).await.is_err() {
            // writer closed
        }
    }

    /// Drops this sender and waits for the writer to drain, once every other
    /// clone is gone.
    pub async fn shutdown(self) {
        let handle = self.writer.lock().await.take();
        let dropped = self.dropped_count();
        drop(self.tx);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "events_out dropped lines because the channel was full");
        }
    }
}

/// Spawns the writer task. `path = "stdout:"` writes to standard output.
pub async fn start_events_out(cfg: &EventsOutConfig) -> Result<Option<EventsOutTx>, String> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if cfg.path == "stdout:" {
        Box::new(tokio::io::stdout())
    } else {
        let path = std::path::Path::new(&cfg.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("events_out: cannot create {}: {e}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| format!("events_out: cannot open {}: {e}", cfg.path))?;
        Box::new(file)
    };

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if writer.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = writer.flush().await;
    });

    Ok(Some(EventsOutTx {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        drop_when_full: cfg.drop_when_full,
        writer: Arc::new(Mutex::new(Some(handle))),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_tee_starts_nothing() {
        let cfg = EventsOutConfig::default();
        assert!(start_events_out(&cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lines_are_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let cfg = EventsOutConfig {
            enabled: true,
            path: path.display().to_string(),
            channel_capacity: 16,
            drop_when_full: false,
        };
        let tx = start_events_out(&cfg).await.unwrap().unwrap();
        tx.send_line(r#"{"type":"run.start"}"#.to_string()).await;
        tx.send_line("{\"type\":\"run.end\"}\n".to_string()).await;
        tx.shutdown().await;

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\"type\":\"run.start\"}\n{\"type\":\"run.end\"}\n");
    }
}

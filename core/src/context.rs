use crate::config::AppConfig;
use crate::error::CliError;
use crate::events_out::{start_events_out, EventsOutTx};

/// Loaded configuration plus the process-wide `events_out` tee.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    events_out: Option<EventsOutTx>,
}

impl AppContext {
    pub async fn new(cfg: AppConfig) -> Result<Self, CliError> {
        let events_out = start_events_out(&cfg.events_out)
            .await
            .map_err(CliError::Config)?;
        Ok(Self { cfg, events_out })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn events_out(&self) -> Option<EventsOutTx> {
        self.events_out.clone()
    }

    pub fn with_config(&self, cfg: AppConfig) -> Self {
        Self {
            cfg,
            events_out: self.events_out.clone(),
        }
    }

    /// Flushes the `events_out` tee. Call once every engine is done.
    pub async fn shutdown(self) {
        if let Some(out) = self.events_out {
            out.shutdown().await;
        }
    }
}

use std::sync::Arc;

use taskmux_core::api::{AiServiceConfig, BackendHandle, BackendResolver, CodeCliConfig};

use super::{AiServiceBackend, CodeCliBackend};

/// Builds backends lazily from task backend names: `http(s)://` names map
/// to the AI service backend, everything else to a local code CLI.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackendResolver {
    codecli: CodeCliConfig,
    aiservice: AiServiceConfig,
}

impl DefaultBackendResolver {
    pub fn new(codecli: CodeCliConfig, aiservice: AiServiceConfig) -> Self {
        Self { codecli, aiservice }
    }
}

pub fn is_http_backend(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

impl BackendResolver for DefaultBackendResolver {
    fn resolve(&self, name: &str) -> Option<BackendHandle> {
        if is_http_backend(name) {
            return match AiServiceBackend::new(name.trim(), &self.aiservice) {
                Ok(b) => Some(Arc::new(b)),
                Err(e) => {
                    tracing::warn!(backend = name, error = %e, "ai service backend unavailable");
                    None
                }
            };
        }
        let backend = CodeCliBackend::for_name(name, &self.codecli);
        if backend.is_none() {
            tracing::debug!(backend = name, "no executable found for backend");
        }
        backend.map(|b| Arc::new(b) as BackendHandle)
    }
}

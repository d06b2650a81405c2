use std::collections::HashMap;
use std::sync::Arc;

use super::{BackendHandle, BackendRole};
use crate::executor::types::FallbackConfig;

/// Builds backends for names without an explicit registration.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<BackendHandle>;
}

/// One link of a fallback chain. `backend` is `None` when the name could not
/// be resolved; running such a link yields `BackendError::Unavailable`.
#[derive(Clone)]
pub struct ChainLink {
    pub role: BackendRole,
    pub name: String,
    pub backend: Option<BackendHandle>,
}

impl std::fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLink")
            .field("role", &self.role)
            .field("name", &self.name)
            .field("resolved", &self.backend.is_some())
            .finish()
    }
}

/// Primary capability plus the optional fallback tried after it in every round.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    pub primary: ChainLink,
    pub fallback: Option<ChainLink>,
}

impl FallbackChain {
    pub fn links(&self) -> impl Iterator<Item = &ChainLink> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }

    pub fn len(&self) -> usize {
        1 + usize::from(self.fallback.is_some())
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Maps backend names to capabilities and fallbacks.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, BackendHandle>,
    resolver: Option<Arc<dyn BackendResolver>>,
    fallbacks: HashMap<String, String>,
    default_fallback: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under `backend.name()`.
    pub fn with_backend(mut self, backend: BackendHandle) -> Self {
        self.register(backend);
        self
    }

    pub fn register(&mut self, backend: BackendHandle) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn BackendResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_fallback(mut self, backend: impl Into<String>, fallback: impl Into<String>) -> Self {
        self.fallbacks.insert(backend.into(), fallback.into());
        self
    }

    pub fn with_default_fallback(mut self, fallback: Option<String>) -> Self {
        self.default_fallback = fallback.filter(|s| !s.trim().is_empty());
        self
    }

    /// Applies `executor.fallback`; a disabled section clears every fallback.
    pub fn with_fallback_config(mut self, cfg: &FallbackConfig) -> Self {
        if !cfg.enabled {
            self.fallbacks.clear();
            self.default_fallback = None;
            return self;
        }
        for (backend, fallback) in &cfg.per_backend {
            self.fallbacks.insert(backend.clone(), fallback.clone());
        }
        self.with_default_fallback(cfg.default_backend.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Explicit registrations first, then the resolver.
    pub fn resolve(&self, name: &str) -> Option<BackendHandle> {
        if let Some(backend) = self.backends.get(name) {
            return Some(backend.clone());
        }
        self.resolver.as_ref().and_then(|r| r.resolve(name))
    }

    /// Fallback for `name`, never `name` itself.
    pub fn fallback_name_for(&self, name: &str) -> Option<&str> {
        self.fallbacks
            .get(name)
            .or(self.default_fallback.as_ref())
            .map(String::as_str)
            .filter(|fallback| *fallback != name)
    }

    pub fn chain_for(&self, name: &str, fallback_enabled: bool) -> FallbackChain {
        let primary = ChainLink {
            role: BackendRole::Primary,
            name: name.to_string(),
            backend: self.resolve(name),
        };
        let fallback = if fallback_enabled {
            self.fallback_name_for(name).map(|fallback| ChainLink {
                role: BackendRole::Fallback,
                name: fallback.to_string(),
                backend: self.resolve(fallback),
            })
        } else {
            None
        };
        if primary.backend.is_none() {
            tracing::warn!(backend = %name, "backend is not registered");
        }
        FallbackChain { primary, fallback }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendOutput, BackendRequest};
    use crate::error::BackendError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Backend for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _request: &BackendRequest) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput::text(self.0))
        }
    }

    struct EchoResolver;

    impl BackendResolver for EchoResolver {
        fn resolve(&self, name: &str) -> Option<BackendHandle> {
            (name == "dynamic").then(|| Arc::new(Named("dynamic")) as BackendHandle)
        }
    }

    #[test]
    fn explicit_registration_wins_over_resolver() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(Named("codex")))
            .with_resolver(Arc::new(EchoResolver));
        assert_eq!(registry.resolve("codex").unwrap().name(), "codex");
        assert_eq!(registry.resolve("dynamic").unwrap().name(), "dynamic");
        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn chain_uses_per_backend_then_default_fallback() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(Named("codex")))
            .with_backend(Arc::new(Named("rules")))
            .with_backend(Arc::new(Named("local")))
            .with_fallback("codex", "local")
            .with_default_fallback(Some("rules".into()));

        let chain = registry.chain_for("codex", true);
        assert_eq!(chain.fallback.as_ref().unwrap().name, "local");

        let chain = registry.chain_for("gemini", true);
        assert!(chain.primary.backend.is_none());
        assert_eq!(chain.fallback.as_ref().unwrap().name, "rules");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn fallback_never_points_at_itself() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(Named("rules")))
            .with_default_fallback(Some("rules".into()));
        let chain = registry.chain_for("rules", true);
        assert!(chain.fallback.is_none());
    }

    #[test]
    fn disabled_fallback_gives_single_link() {
        let registry = BackendRegistry::new().with_default_fallback(Some("rules".into()));
        assert!(registry.chain_for("codex", false).fallback.is_none());

        let cfg = FallbackConfig {
            enabled: false,
            ..FallbackConfig::default()
        };
        let registry = registry.with_fallback_config(&cfg);
        assert!(registry.chain_for("codex", true).fallback.is_none());
    }
}

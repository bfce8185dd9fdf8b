//! Maps a configuration's provider kind to a concrete [`Provider`].
//!
//! Registries are plain values: build one, register factories, pass it to
//! whatever constructs providers. Nothing here is process-global.

use std::collections::HashMap;
use std::sync::Arc;

use unified_stream_types::{Error, ProviderConfig, ProviderKind};

use crate::provider::Provider;
use crate::transport::Transport;

/// Builds an unconfigured provider over a transport.
pub type ProviderFactory = Arc<dyn Fn(Arc<dyn Transport>) -> Box<dyn Provider> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "openai")]
        registry.register(ProviderKind::OpenAi, |transport| {
            Box::new(crate::providers::openai::OpenAiProvider::new(transport))
        });
        #[cfg(feature = "gemini")]
        registry.register(ProviderKind::Gemini, |transport| {
            Box::new(crate::providers::gemini::GeminiProvider::new(transport))
        });
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(Arc<dyn Transport>) -> Box<dyn Provider> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds, in no particular order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.factories.keys().copied().collect()
    }

    /// Build and initialize the provider `config.provider` names.
    pub fn create(
        &self,
        config: ProviderConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Box<dyn Provider>, Error> {
        let kind = config.provider;
        let factory = self.factories.get(&kind).ok_or_else(|| {
            Error::validation(format!(
                "no provider registered for '{}'",
                kind.as_str()
            ))
        })?;
        let mut provider = factory(transport);
        provider.initialize(config)?;
        Ok(provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

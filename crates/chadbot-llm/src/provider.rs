//! LLM provider abstraction and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use chadbot_core::chat::{ChatMessage, ToolCall, ToolDescriptor};
use chadbot_core::error::{RouterError, RouterResult};

/// A completion returned by a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// Assistant text (may be empty when the model only calls tools).
    pub content: String,
    /// Tool calls the model wants executed, in emission order.
    pub tool_calls: Vec<ToolCall>,
}

impl ProviderResponse {
    /// A plain text completion with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// One LLM backend.
///
/// Implementations translate the transcript and tool descriptors into their
/// wire format and back. Transport-level failures should be reported as
/// [`RouterError::Provider`]; the router aborts the turn on them.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used to select this provider.
    fn name(&self) -> &str;

    /// Requests one completion for the transcript with the given tools.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> RouterResult<ProviderResponse>;
}

/// Registry of providers with a default fallback.
///
/// The first registered provider becomes the default unless
/// [`set_default`](Self::set_default) names another one. Selecting an
/// unknown name falls back to the default; an empty registry yields
/// [`RouterError::NoProviderAvailable`].
#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own name. Re-registering a name
    /// replaces the previous provider.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        let mut inner = self.inner.write();
        if inner.default_name.is_none() {
            inner.default_name = Some(name.clone());
        }
        if inner.providers.insert(name.clone(), provider).is_some() {
            warn!(provider = %name, "Replaced existing LLM provider");
        } else {
            debug!(provider = %name, "Registered LLM provider");
        }
    }

    /// Makes `name` the default. Returns false when no such provider exists.
    pub fn set_default(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.providers.contains_key(name) {
            inner.default_name = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Selects by name, falling back to the default for unknown or empty
    /// names.
    pub fn select(&self, name: &str) -> RouterResult<Arc<dyn Provider>> {
        let inner = self.inner.read();
        if !name.is_empty()
            && let Some(provider) = inner.providers.get(name)
        {
            return Ok(Arc::clone(provider));
        }
        if !name.is_empty() {
            debug!(requested = %name, "Unknown provider requested, using default");
        }
        inner
            .default_name
            .as_ref()
            .and_then(|n| inner.providers.get(n))
            .cloned()
            .ok_or(RouterError::NoProviderAvailable)
    }

    /// Registered provider names.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(&'static str);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDescriptor],
        ) -> RouterResult<ProviderResponse> {
            Ok(ProviderResponse::text(self.0))
        }
    }

    #[test]
    fn empty_registry_has_no_provider() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.select("anything"),
            Err(RouterError::NoProviderAvailable)
        ));
    }

    #[test]
    fn first_registered_is_default() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedProvider("alpha")));
        registry.register(Arc::new(FixedProvider("beta")));

        assert_eq!(registry.select("").unwrap().name(), "alpha");
        assert_eq!(registry.select("beta").unwrap().name(), "beta");
        // Unknown names fall back to the default.
        assert_eq!(registry.select("gamma").unwrap().name(), "alpha");
    }

    #[test]
    fn set_default_switches_fallback() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedProvider("alpha")));
        registry.register(Arc::new(FixedProvider("beta")));

        assert!(registry.set_default("beta"));
        assert_eq!(registry.select("").unwrap().name(), "beta");
        assert!(!registry.set_default("gamma"));
    }
}

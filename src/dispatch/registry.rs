use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::credentials::ProviderType;
use crate::dispatch::dezgo::DezgoProvider;
use crate::dispatch::google::GoogleProvider;
use crate::dispatch::grok::GrokProvider;
use crate::dispatch::openai::OpenAiProvider;
use crate::dispatch::{ImageProvider, ProviderContext};
use crate::error::ProviderError;

/// Builds a provider from the shared context.
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderContext) -> Arc<dyn ImageProvider> + Send + Sync>;

/// Name → provider factory. Built-ins are registered up front; extensions
/// can be added at runtime under any name.
///
/// Instances are built on first use and reused afterwards, so a provider's
/// internal state (e.g. Google's token cache) lives as long as the registry.
pub struct ProviderRegistry {
    ctx: ProviderContext,
    constructors: RwLock<HashMap<String, ProviderConstructor>>,
    instances: RwLock<HashMap<String, Arc<dyn ImageProvider>>>,
}

fn builtin(kind: ProviderType) -> ProviderConstructor {
    match kind {
        ProviderType::OpenAi => Arc::new(|ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(OpenAiProvider::new(ctx))
        }),
        ProviderType::Dezgo => Arc::new(|ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(DezgoProvider::new(ctx))
        }),
        ProviderType::Google => Arc::new(|ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(GoogleProvider::new(ctx))
        }),
        ProviderType::Grok => Arc::new(|ctx: &ProviderContext| -> Arc<dyn ImageProvider> {
            Arc::new(GrokProvider::new(ctx))
        }),
    }
}

impl ProviderRegistry {
    /// Empty registry; see `with_defaults` for the built-ins.
    pub fn new(ctx: ProviderContext) -> Self {
        Self {
            ctx,
            constructors: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults(ctx: ProviderContext) -> Self {
        let registry = Self::new(ctx);
        for kind in ProviderType::ALL {
            registry.insert(kind.as_str(), builtin(kind));
        }
        registry
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    pub fn create_provider(&self, name: &str) -> Result<Arc<dyn ImageProvider>, ProviderError> {
        let key = name.trim().to_lowercase();

        if let Some(existing) = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(existing.clone());
        }

        let ctor = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let Some(ctor) = ctor else {
            return Err(ProviderError::UnknownProvider {
                name: name.to_string(),
                valid: self.registered_providers(),
            });
        };

        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have built it while the lock was released.
        let provider = instances
            .entry(key)
            .or_insert_with(|| ctor(&self.ctx))
            .clone();
        Ok(provider)
    }

    pub fn registered_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_provider_registered(&self, name: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&name.trim().to_lowercase())
    }

    /// Registers (or replaces) a constructor. A replaced name also drops its
    /// cached instance.
    pub fn register_provider<F>(&self, name: &str, ctor: F)
    where
        F: Fn(&ProviderContext) -> Arc<dyn ImageProvider> + Send + Sync + 'static,
    {
        let key = name.trim().to_lowercase();
        if self.is_provider_registered(&key) {
            tracing::warn!(provider = %key, "provider already registered, overwriting");
        }
        self.insert(&key, Arc::new(ctor));
    }

    fn insert(&self, key: &str, ctor: ProviderConstructor) {
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), ctor);
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

use super::context::LogSettings;
use crate::cache::CacheStore;
use crate::connection::DataSource;
use crate::connection::config::DaoConfig;
use crate::hooks::HookRegistry;
use crate::id::IdGenerator;
use crate::sql::{InMemoryQueryRegistry, QueryRegistry};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Runtime that `Dao::spawn_call` schedules work on.
#[derive(Debug, Clone)]
pub struct Executor {
    id: String,
    handle: Handle,
}

impl Executor {
    pub fn new(id: impl Into<String>, handle: Handle) -> Self {
        Self {
            id: id.into(),
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Collaborators an interface is compiled against.
///
/// ```ignore
/// let env = DaoEnv::new(data_source)
///     .with_query_registry(Arc::new(registry))
///     .with_config(DaoConfig::new().batch_size(500))
///     .with_id_generator("uuid", Arc::new(UuidGenerator));
/// ```
pub struct DaoEnv {
    data_source: Arc<dyn DataSource>,
    registry: Arc<dyn QueryRegistry>,
    executor: Option<Executor>,
    cache: Option<Arc<dyn CacheStore>>,
    hooks: HookRegistry,
    id_generators: HashMap<String, Arc<dyn IdGenerator>>,
    config: DaoConfig,
}

impl DaoEnv {
    pub fn new(data_source: Arc<dyn DataSource>) -> Self {
        Self {
            data_source,
            registry: Arc::new(InMemoryQueryRegistry::new("default")),
            executor: None,
            cache: None,
            hooks: HookRegistry::new(),
            id_generators: HashMap::new(),
            config: DaoConfig::default(),
        }
    }

    pub fn with_query_registry(mut self, registry: Arc<dyn QueryRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: DaoConfig) -> Self {
        self.config = config;
        self
    }

    /// Store shared by the cached methods; a local LRU store is created when unset.
    pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_id_generator(mut self, name: impl Into<String>, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generators.insert(name.into(), generator);
        self
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn data_source(&self) -> &dyn DataSource {
        self.data_source.as_ref()
    }

    pub fn query_registry(&self) -> &dyn QueryRegistry {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &DaoConfig {
        &self.config
    }

    pub fn cache_store(&self) -> Option<Arc<dyn CacheStore>> {
        self.cache.clone()
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn id_generator(&self, name: &str) -> Option<Arc<dyn IdGenerator>> {
        self.id_generators.get(name).cloned()
    }

    pub fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    /// Log settings used when neither the call context nor the method sets any.
    pub fn log_defaults(&self) -> LogSettings {
        LogSettings::from_config(&self.config)
    }
}

impl fmt::Debug for DaoEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaoEnv")
            .field("data_source", &self.data_source.identity())
            .field("registry", &self.registry.identity())
            .field("executor", &self.executor.as_ref().map(Executor::id))
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}

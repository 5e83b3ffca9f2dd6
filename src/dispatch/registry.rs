use super::{Dao, DaoEnv};
use crate::core::Result;
use crate::descriptor::InterfaceDescriptor;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

lazy_static! {
    static ref GLOBAL_REGISTRY: DaoRegistry = DaoRegistry::new();
}

/// Identity a compiled interface is memoized under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileKey {
    pub interface: String,
    /// Same-named declarations with different content compile separately.
    pub shape: Uuid,
    pub data_source: String,
    pub query_registry: String,
    pub executor: String,
}

impl CompileKey {
    pub fn new(interface: &InterfaceDescriptor, env: &DaoEnv) -> Self {
        Self {
            interface: interface.name.clone(),
            shape: interface.fingerprint(),
            data_source: env.data_source().identity(),
            query_registry: env.query_registry().identity(),
            executor: env
                .executor()
                .map(|e| e.id().to_string())
                .unwrap_or_else(|| "default".to_string()),
        }
    }
}

/// Memo of compiled interfaces.
///
/// Two callers racing on the same key may both compile; the first to publish
/// wins and both get its `Dao`.
#[derive(Default)]
pub struct DaoRegistry {
    daos: RwLock<HashMap<CompileKey, Dao>>,
}

impl DaoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static DaoRegistry {
        &GLOBAL_REGISTRY
    }

    /// The `Dao` compiled for this interface and environment, compiling it on first use.
    pub fn get_or_compile(&self, interface: &InterfaceDescriptor, env: Arc<DaoEnv>) -> Result<Dao> {
        let key = CompileKey::new(interface, &env);
        if let Some(dao) = self.daos.read()?.get(&key) {
            return Ok(dao.clone());
        }

        // Compile outside the lock; configuration errors are not memoized.
        let compiled = Dao::compile(interface, env)?;
        let mut daos = self.daos.write()?;
        let dao = daos.entry(key).or_insert(compiled);
        Ok(dao.clone())
    }

    pub fn get(&self, key: &CompileKey) -> Result<Option<Dao>> {
        Ok(self.daos.read()?.get(key).cloned())
    }

    /// Drops every memoized `Dao`; handles already given out stay usable.
    pub fn clear(&self) -> Result<()> {
        self.daos.write()?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.daos.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

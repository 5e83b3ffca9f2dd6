use crate::cache::CacheStore;
use crate::compiler::ExecutionFn;
use crate::descriptor::MethodDescriptor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A compiled method: its descriptor and decorated execution function.
#[derive(Clone)]
pub struct MethodEntry {
    descriptor: Arc<MethodDescriptor>,
    func: ExecutionFn,
    arity: usize,
}

impl MethodEntry {
    pub(crate) fn new(descriptor: Arc<MethodDescriptor>, func: ExecutionFn, arity: usize) -> Self {
        Self {
            descriptor,
            func,
            arity,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Number of arguments a call must pass.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn func(&self) -> &ExecutionFn {
        &self.func
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name())
            .field("arity", &self.arity)
            .finish()
    }
}

/// Frozen method name to entry mapping of one compiled interface.
pub struct MethodTable {
    interface: Arc<str>,
    entries: Vec<MethodEntry>,
    index: HashMap<Arc<str>, usize>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl MethodTable {
    pub(crate) fn new(
        interface: Arc<str>,
        entries: Vec<MethodEntry>,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (Arc::clone(&e.descriptor.name), i))
            .collect();
        Self {
            interface,
            entries,
            index,
            cache,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn entry(&self, position: usize) -> Option<&MethodEntry> {
        self.entries.get(position)
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.position(name).and_then(|i| self.entry(i))
    }

    pub fn entries(&self) -> &[MethodEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("interface", &self.interface)
            .field("entries", &self.entries)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

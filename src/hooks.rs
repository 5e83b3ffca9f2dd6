use crate::core::{Arg, Result};
use crate::result::Output;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of the method a hook is observing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub interface: Arc<str>,
    pub method: Arc<str>,
}

/// Before/after interceptor attached to methods by name.
pub trait Hook: Send + Sync {
    /// An error aborts the call before the statement runs.
    fn before(&self, call: &CallInfo, args: &[Arg]) -> Result<()> {
        let _ = (call, args);
        Ok(())
    }

    fn after(&self, call: &CallInfo, args: &[Arg], outcome: &Result<Output>) {
        let _ = (call, args, outcome);
    }
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        self.hooks.insert(name.into(), hook);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.get(name).cloned()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

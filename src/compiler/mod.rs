// ============================================================================
// Interface Compiler
// ============================================================================
//
// Runs once per interface: every method is classified, its query finalized,
// its arguments planned, and the result wrapped into one decorated execution
// function. Nothing here is consulted again at call time.
//
// ============================================================================

pub mod binding;
pub mod classify;
pub mod crud;
pub(crate) mod decorate;
pub(crate) mod synth;
pub mod template;

pub use binding::{BindingStrategy, ParameterBindingPlan};
pub use classify::{
    AffectedShape, Classification, MethodCategory, ResultStrategy, RowShape, SinglePolicy, classify,
};
pub use crud::{CrudIdentitySpec, CrudTemplates, IdShape};
pub use template::{MacroSlot, QueryPlan, RenderedQuery};

use crate::cache::{CacheStore, LocalCacheStore};
use crate::core::{Arg, DaoError, Result, TypeShape};
use crate::descriptor::{InterfaceDescriptor, MethodBody, MethodDescriptor, extract};
use crate::dispatch::{CallContext, Dao, DaoEnv, MethodEntry, MethodTable};
use crate::result::Output;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, event};

/// One dispatched call as seen by an execution function.
pub struct Invocation {
    pub dao: Dao,
    pub ctx: CallContext,
    pub args: Arc<[Arg]>,
}

/// A compiled method body, decorated or not.
pub type ExecutionFn = Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Output>> + Send + Sync>;

/// Compiles `interface` against the collaborators in `env`.
pub(crate) fn compile(interface: &InterfaceDescriptor, env: &Arc<DaoEnv>) -> Result<MethodTable> {
    let started = Instant::now();
    env.config()
        .validate()
        .map_err(|e| DaoError::config(format!("{}: {}", interface.name, e)))?;

    let methods = extract(interface, env.query_registry())?;
    check_interface_rules(interface, &methods)?;

    let crud = if interface.crud {
        Some(Arc::new(CrudIdentitySpec::resolve(interface, env)?))
    } else {
        None
    };

    let cache: Option<Arc<dyn CacheStore>> = methods
        .iter()
        .any(|m| m.metadata.cache.is_some() || m.metadata.refresh_cache)
        .then(|| {
            env.cache_store().unwrap_or_else(|| {
                Arc::new(LocalCacheStore::new(env.config().cache_capacity)) as Arc<dyn CacheStore>
            })
        });

    let mut entries = Vec::with_capacity(methods.len());
    for method in methods {
        let base = synthesize(&method, env, crud.as_ref())?;
        let func = decorate::decorate(base, &method, env, cache.as_ref())?;
        let arity = match method.body {
            MethodBody::Crud(_) => 1,
            _ => method.params.len(),
        };
        log::trace!("compiled {}", method.qualified_name());
        entries.push(MethodEntry::new(Arc::new(method), func, arity));
    }

    event!(
        Level::DEBUG,
        interface = %interface.name,
        methods = entries.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "interface compiled"
    );
    Ok(MethodTable::new(Arc::from(interface.name.as_str()), entries, cache))
}

/// Rules that span methods: read-only interfaces take no writes, and only
/// read-only interfaces may cache.
fn check_interface_rules(interface: &InterfaceDescriptor, methods: &[MethodDescriptor]) -> Result<()> {
    for method in methods {
        let fail = |msg: &str| DaoError::config(format!("{}: {}", method.qualified_name(), msg));
        if interface.read_only && !method.is_read() {
            return Err(fail("write method on a read-only interface"));
        }
        if method.metadata.cache.is_none() {
            continue;
        }
        if !interface.read_only {
            return Err(fail("caching is only allowed on read-only interfaces"));
        }
        if method.params.iter().any(|p| p.ty.is_functional()) {
            return Err(fail("cached methods cannot take mapper, filter or extractor arguments"));
        }
        if matches!(method.return_type.unwrap_optional(), TypeShape::Stream(_)) {
            return Err(fail("stream results cannot be cached"));
        }
    }
    Ok(())
}

fn synthesize(
    method: &MethodDescriptor,
    env: &Arc<DaoEnv>,
    crud: Option<&Arc<CrudIdentitySpec>>,
) -> Result<ExecutionFn> {
    match &method.body {
        MethodBody::Custom(body) => Ok(synth::custom(Arc::clone(body))),
        MethodBody::Crud(op) => {
            let spec = crud.ok_or_else(|| {
                DaoError::config(format!("{}: interface is not CRUD", method.qualified_name()))
            })?;
            crud::synthesize(*op, Arc::clone(spec), Arc::clone(env))
        }
        MethodBody::Statement => {
            let classification = classify(method, crud.map(Arc::as_ref))?;
            let plan = QueryPlan::finalize(method, &classification, env.config(), crud.map(Arc::as_ref))?;
            let binding = ParameterBindingPlan::build(method, &plan)?;
            Ok(synth::synthesize(synth::StatementMethod {
                category: classification.category,
                strategy: classification.strategy,
                plan,
                binding,
                env: Arc::clone(env),
                crud: crud.cloned(),
            }))
        }
    }
}

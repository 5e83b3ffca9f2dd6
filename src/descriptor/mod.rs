//! Declarative interface and method descriptions, and their extraction into
//! the immutable form the compiler consumes.

mod interface;
mod method;

pub use interface::{InterfaceDefaults, InterfaceDescriptor};
pub use method::{
    CacheDirective, CrudOp, CustomFn, MacroKind, MethodBody, MethodDecl, MethodDescriptor,
    MethodMetadata, OperationKind, OutParameter, ParamDescriptor, ParamDirective,
    PerfLogDirective, Propagation, QuerySource, SqlLogDirective, StatementKind,
    TransactionDirective,
};

use crate::core::{DaoError, Result};
use crate::sql::QueryRegistry;
use std::collections::HashSet;
use std::sync::Arc;

/// Turns the declared methods of `interface` into descriptors.
///
/// Registry references are resolved to their text, registry tuning fills
/// attributes the method leaves unset, and interface defaults are merged in.
/// Built-in CRUD methods are appended when the interface asks for them.
pub fn extract(
    interface: &InterfaceDescriptor,
    registry: &dyn QueryRegistry,
) -> Result<Vec<MethodDescriptor>> {
    let interface_name: Arc<str> = Arc::from(interface.name.as_str());
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(interface.methods.len());

    let generated = interface
        .crud
        .then(|| {
            CrudOp::ALL
                .into_iter()
                .filter(|op| !interface.read_only || op.is_read())
                .map(MethodDecl::crud)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for decl in interface.methods.iter().chain(generated.iter()) {
        if !seen.insert(decl.name.as_str()) {
            return Err(DaoError::config(format!(
                "{}.{}: duplicate method name",
                interface.name, decl.name
            )));
        }
        out.push(extract_method(&interface_name, interface, decl, registry)?);
    }

    Ok(out)
}

fn extract_method(
    interface_name: &Arc<str>,
    interface: &InterfaceDescriptor,
    decl: &MethodDecl,
    registry: &dyn QueryRegistry,
) -> Result<MethodDescriptor> {
    let mut metadata = decl.metadata.clone();
    let qualified = format!("{}.{}", interface.name, decl.name);

    let query_text = match &metadata.query {
        None => None,
        Some(QuerySource::Inline(text)) => Some(text.clone()),
        Some(QuerySource::Registry(id)) => {
            let registered = registry.lookup(id).ok_or_else(|| {
                DaoError::config(format!(
                    "{}: query '{}' not found in registry '{}'",
                    qualified,
                    id,
                    registry.identity()
                ))
            })?;
            metadata.timeout = metadata.timeout.or(registered.timeout);
            metadata.fetch_size = metadata.fetch_size.or(registered.fetch_size);
            metadata.batch_size = metadata.batch_size.or(registered.batch_size);
            Some(registered.text)
        }
    };

    if let Some(text) = &query_text
        && text.trim().is_empty()
    {
        return Err(DaoError::config(format!("{}: empty query text", qualified)));
    }

    if matches!(decl.body, MethodBody::Statement) && query_text.is_none() {
        return Err(DaoError::config(format!("{}: no query text", qualified)));
    }

    let defaults = &interface.defaults;
    metadata.transaction = metadata.transaction.or(defaults.transaction);
    metadata.sql_log = metadata.sql_log.or(defaults.sql_log);
    metadata.perf_log = metadata.perf_log.or(defaults.perf_log);

    let reads = match (&decl.body, metadata.statement) {
        (MethodBody::Crud(op), _) => op.is_read(),
        (MethodBody::Custom(_), _) => false,
        (_, kind) => kind == Some(StatementKind::Select),
    };
    if metadata.cache.is_none() && reads {
        metadata.cache = defaults.cache.clone();
    }

    let mut hooks = defaults.hooks.clone();
    for hook in &metadata.hooks {
        if !hooks.contains(hook) {
            hooks.push(hook.clone());
        }
    }
    metadata.hooks = hooks;

    Ok(MethodDescriptor {
        interface: Arc::clone(interface_name),
        name: Arc::from(decl.name.as_str()),
        params: decl.params.clone(),
        return_type: decl.return_type.clone(),
        metadata,
        body: decl.body.clone(),
        query_text,
    })
}

use super::{ExecutionFn, Invocation};
use crate::cache::CacheStore;
use crate::connection::config::DaoConfig;
use crate::core::{Arg, DaoError, Result, Value};
use crate::descriptor::{CacheDirective, MethodDescriptor, Propagation, TransactionDirective};
use crate::dispatch::{DaoEnv, LogSettings};
use crate::hooks::{CallInfo, Hook};
use crate::result::Output;
use crate::transaction::Transaction;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Level, event};

/// Wraps `base` with the method's cross-cutting behavior.
///
/// Layers, innermost first: hooks, transaction boundary, logging, cache.
pub(crate) fn decorate(
    base: ExecutionFn,
    method: &MethodDescriptor,
    env: &Arc<DaoEnv>,
    cache: Option<&Arc<dyn CacheStore>>,
) -> Result<ExecutionFn> {
    let meta = &method.metadata;
    let mut func = base;

    if !meta.hooks.is_empty() {
        let hooks = meta
            .hooks
            .iter()
            .map(|name| {
                env.hooks().get(name).ok_or_else(|| {
                    DaoError::config(format!(
                        "{}: unknown hook '{}'",
                        method.qualified_name(),
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let call = CallInfo {
            interface: Arc::clone(&method.interface),
            method: Arc::clone(&method.name),
        };
        func = with_hooks(func, call, hooks);
    }

    if let Some(directive) = meta.transaction {
        func = with_transaction(func, directive, Arc::clone(env));
    }

    let mut settings = env.log_defaults();
    if let Some(sql) = meta.sql_log {
        settings.sql_enabled = sql.enabled;
        if let Some(max) = sql.max_len {
            settings.max_sql_len = max;
        }
    }
    if let Some(perf) = meta.perf_log {
        settings.slow_sql = perf.min_sql_time;
        settings.slow_dao = perf.min_dao_time;
    }
    let overlay = (meta.sql_log.is_some() || meta.perf_log.is_some()).then_some(settings);
    func = with_logging(func, method.qualified_name(), overlay, env.log_defaults());

    if let Some(store) = cache {
        if let Some(directive) = &meta.cache {
            func = with_cache(
                func,
                method.qualified_name(),
                directive.clone(),
                Arc::clone(store),
                env.config(),
            );
        }
        if meta.refresh_cache {
            func = with_refresh(func, Arc::clone(store));
        }
    }

    Ok(func)
}

// ============================================================================
// Hooks
// ============================================================================

fn with_hooks(inner: ExecutionFn, call: CallInfo, hooks: Vec<Arc<dyn Hook>>) -> ExecutionFn {
    let hooks: Arc<[Arc<dyn Hook>]> = hooks.into();
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let inner = Arc::clone(&inner);
        let hooks = Arc::clone(&hooks);
        let call = call.clone();
        Box::pin(async move {
            // A call made from inside a hooked call fires no hooks of its own.
            if inv.ctx.in_hooked_call() {
                return inner(inv).await;
            }
            for hook in hooks.iter() {
                hook.before(&call, &inv.args)?;
            }
            let args = Arc::clone(&inv.args);
            let outcome = inner(Invocation {
                ctx: inv.ctx.entering_hooks(),
                ..inv
            })
            .await;
            for hook in hooks.iter().rev() {
                hook.after(&call, &args, &outcome);
            }
            outcome
        })
    })
}

// ============================================================================
// Transaction boundary
// ============================================================================

fn with_transaction(inner: ExecutionFn, directive: TransactionDirective, env: Arc<DaoEnv>) -> ExecutionFn {
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let inner = Arc::clone(&inner);
        let env = Arc::clone(&env);
        Box::pin(async move {
            match directive.propagation {
                Propagation::Supports => inner(inv).await,
                Propagation::NotSupported => {
                    inner(Invocation {
                        ctx: inv.ctx.without_transaction(),
                        ..inv
                    })
                    .await
                }
                Propagation::Required if inv.ctx.transaction().is_some() => inner(inv).await,
                Propagation::Required | Propagation::RequiresNew => {
                    let tx = Transaction::begin(env.data_source(), directive.isolation).await?;
                    let ctx = inv.ctx.with_transaction(Arc::clone(&tx));
                    let result = inner(Invocation { ctx, ..inv }).await;
                    finish(&tx, result).await
                }
            }
        })
    })
}

/// Commits on success; on failure rolls back and returns the original error.
async fn finish(tx: &Transaction, result: Result<Output>) -> Result<Output> {
    match result {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback_if_not_committed().await {
                event!(Level::WARN, "rollback of {} failed: {}", tx.id(), rollback);
            }
            Err(err)
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

fn with_logging(
    inner: ExecutionFn,
    name: String,
    overlay: Option<LogSettings>,
    defaults: LogSettings,
) -> ExecutionFn {
    let name: Arc<str> = name.into();
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let inner = Arc::clone(&inner);
        let name = Arc::clone(&name);
        Box::pin(async move {
            let settings = overlay.unwrap_or_else(|| inv.ctx.log_or(defaults));
            let ctx = inv.ctx.with_log(settings);
            let started = Instant::now();
            let result = inner(Invocation { ctx, ..inv }).await;
            let elapsed = started.elapsed();
            if elapsed >= settings.slow_dao {
                log::info!("[DAO-PERF]: {} ms, {}", elapsed.as_millis(), name);
            }
            result
        })
    })
}

// ============================================================================
// Cache
// ============================================================================

/// `Interface.method:` followed by the JSON of the argument values.
pub(crate) fn cache_key(name: &str, args: &[Arg]) -> Result<String> {
    let values = args.iter().map(Arg::value).collect::<Result<Vec<Value>>>()?;
    Ok(format!("{}:{}", name, serde_json::to_string(&values)?))
}

fn fits(directive: &CacheDirective, output: &Output) -> bool {
    match output {
        Output::Stream(_) => false,
        other => other
            .size()
            .is_none_or(|n| n >= directive.min_size && n <= directive.max_size),
    }
}

fn with_cache(
    inner: ExecutionFn,
    name: String,
    directive: CacheDirective,
    store: Arc<dyn CacheStore>,
    config: &DaoConfig,
) -> ExecutionFn {
    let name: Arc<str> = name.into();
    let live: Duration = directive.live_time.unwrap_or(config.cache_live_time);
    let idle: Duration = directive.max_idle_time.unwrap_or(config.cache_max_idle_time);
    let directive = Arc::new(directive);
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let inner = Arc::clone(&inner);
        let name = Arc::clone(&name);
        let store = Arc::clone(&store);
        let directive = Arc::clone(&directive);
        Box::pin(async move {
            let key = cache_key(&name, &inv.args)?;
            match store.get(&key) {
                Ok(Some(hit)) => {
                    log::trace!("cache hit {}", key);
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(err) => event!(Level::WARN, "cache read of {} failed: {}", key, err),
            }

            let output = inner(inv).await?;
            if fits(&directive, &output)
                && let Err(err) = store.put(&key, &output, live, idle)
            {
                event!(Level::WARN, "cache write of {} failed: {}", key, err);
            }
            Ok(output)
        })
    })
}

fn with_refresh(inner: ExecutionFn, store: Arc<dyn CacheStore>) -> ExecutionFn {
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let inner = Arc::clone(&inner);
        let store = Arc::clone(&store);
        Box::pin(async move {
            store.clear()?;
            inner(inv).await
        })
    })
}

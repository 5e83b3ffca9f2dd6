// ============================================================================
// Dispatcher
// ============================================================================
//
// A `Dao` holds the frozen method table of one compiled interface and routes
// calls to the precomputed entries. No analysis happens here.
//
// ============================================================================

pub mod context;
mod env;
mod registry;
mod table;

pub use context::{CallContext, LogSettings};
pub use env::{DaoEnv, Executor};
pub use registry::{CompileKey, DaoRegistry};
pub use table::{MethodEntry, MethodTable};

use crate::compiler::{self, Invocation};
use crate::connection::IsolationLevel;
use crate::core::{Arg, DaoError, Result};
use crate::descriptor::InterfaceDescriptor;
use crate::result::Output;
use crate::transaction::Transaction;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

struct DaoInner {
    table: MethodTable,
    env: Arc<DaoEnv>,
}

/// Runtime implementation of a compiled interface. Cheap to clone.
#[derive(Clone)]
pub struct Dao {
    inner: Arc<DaoInner>,
}

impl Dao {
    /// Compiles `interface` without memoization. Most callers want
    /// [`DaoRegistry::get_or_compile`].
    pub fn compile(interface: &InterfaceDescriptor, env: Arc<DaoEnv>) -> Result<Self> {
        let table = compiler::compile(interface, &env)?;
        Ok(Self {
            inner: Arc::new(DaoInner { table, env }),
        })
    }

    pub fn interface(&self) -> &str {
        self.inner.table.interface()
    }

    pub fn table(&self) -> &MethodTable {
        &self.inner.table
    }

    pub fn env(&self) -> &Arc<DaoEnv> {
        &self.inner.env
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.inner.table.entries().iter().map(MethodEntry::name)
    }

    /// Whether both handles share one compiled table.
    pub fn ptr_eq(&self, other: &Dao) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Handle bound to one method, skipping the name lookup on each call.
    pub fn method(&self, name: &str) -> Result<MethodHandle> {
        let position = self.position(name)?;
        Ok(MethodHandle {
            dao: self.clone(),
            position,
        })
    }

    pub async fn call(&self, name: &str, args: impl Into<Arc<[Arg]>>) -> Result<Output> {
        self.call_with(&CallContext::new(), name, args).await
    }

    /// Calls `name` inside `ctx`, e.g. within an explicit transaction.
    pub async fn call_with(
        &self,
        ctx: &CallContext,
        name: &str,
        args: impl Into<Arc<[Arg]>>,
    ) -> Result<Output> {
        let position = self.position(name)?;
        self.invoke(position, ctx.clone(), args.into()).await
    }

    /// Runs the call on the bound executor, or the current runtime when none is bound.
    pub fn spawn_call(&self, name: &str, args: impl Into<Arc<[Arg]>>) -> JoinHandle<Result<Output>> {
        let dao = self.clone();
        let name = name.to_string();
        let args: Arc<[Arg]> = args.into();
        let task = async move { dao.call(&name, args).await };
        match self.inner.env.executor() {
            Some(executor) => executor.handle().spawn(task),
            None => tokio::spawn(task),
        }
    }

    /// Begins a transaction on this interface's data source. Place it in a
    /// [`CallContext`] to run calls inside it.
    pub async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<Arc<Transaction>> {
        Transaction::begin(self.inner.env.data_source(), isolation).await
    }

    /// Empties the result cache shared by this interface's methods.
    pub fn clear_cache(&self) -> Result<()> {
        match self.inner.table.cache() {
            Some(cache) => cache.clear(),
            None => Ok(()),
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.inner.table.position(name).ok_or_else(|| {
            DaoError::UnknownMethod(self.interface().to_string(), name.to_string())
        })
    }

    async fn invoke(&self, position: usize, ctx: CallContext, args: Arc<[Arg]>) -> Result<Output> {
        let entry = self
            .inner
            .table
            .entry(position)
            .ok_or_else(|| DaoError::ExecutionError(format!("no method at {}", position)))?;
        if args.len() != entry.arity() {
            return Err(DaoError::ExecutionError(format!(
                "{}.{} takes {} arguments, got {}",
                self.interface(),
                entry.name(),
                entry.arity(),
                args.len()
            )));
        }

        let span = tracing::info_span!("dao_call", interface = %self.interface(), method = %entry.name());
        let invocation = Invocation {
            dao: self.clone(),
            ctx,
            args,
        };
        (entry.func())(invocation).instrument(span).await
    }
}

impl fmt::Debug for Dao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("interface", &self.interface())
            .field("methods", &self.inner.table.len())
            .finish()
    }
}

/// One method of a `Dao`, resolved once.
#[derive(Clone, Debug)]
pub struct MethodHandle {
    dao: Dao,
    position: usize,
}

impl MethodHandle {
    pub fn name(&self) -> &str {
        self.dao
            .inner
            .table
            .entry(self.position)
            .map(MethodEntry::name)
            .unwrap_or_default()
    }

    pub async fn call(&self, args: impl Into<Arc<[Arg]>>) -> Result<Output> {
        self.dao.invoke(self.position, CallContext::new(), args.into()).await
    }

    pub async fn call_with(&self, ctx: &CallContext, args: impl Into<Arc<[Arg]>>) -> Result<Output> {
        self.dao.invoke(self.position, ctx.clone(), args.into()).await
    }
}

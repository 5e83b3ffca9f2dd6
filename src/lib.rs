// ============================================================================
// daokit Library
// ============================================================================

pub mod cache;
pub mod compiler;
pub mod connection;
pub mod core;
pub mod descriptor;
pub mod dispatch;
pub mod hooks;
pub mod id;
pub mod result;
pub mod sql;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{
    Arg, ContainerKind, DaoError, EntityCell, EntityShape, FieldShape, FromValue, Record, Result,
    Row, TypeShape, Value,
};
pub use crate::result::{DataSet, Output, RowView};

pub use crate::connection::config::DaoConfig;
pub use crate::connection::{Connection, DataSource, IsolationLevel, Statement, StatementOptions};

pub use crate::descriptor::{
    CacheDirective, InterfaceDescriptor, MacroKind, MethodDecl, OperationKind, PerfLogDirective,
    Propagation, SqlLogDirective, StatementKind, TransactionDirective,
};
pub use crate::dispatch::{CallContext, Dao, DaoEnv, DaoRegistry, Executor, MethodHandle};
pub use crate::transaction::Transaction;

use std::sync::Arc;

/// Returns the `Dao` for `interface` bound to `env`, compiling it on first use.
///
/// Compiled interfaces are memoized in [`DaoRegistry::global`] under the
/// interface name and the identities of the data source, query registry and
/// executor.
///
/// ```ignore
/// let dao = daokit::dao(&accounts, Arc::new(DaoEnv::new(data_source)))?;
/// let found = dao.call("get", [Arg::val(42i64)]).await?;
/// ```
pub fn dao(interface: &InterfaceDescriptor, env: Arc<DaoEnv>) -> Result<Dao> {
    DaoRegistry::global().get_or_compile(interface, env)
}

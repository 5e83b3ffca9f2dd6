// ============================================================================
// Transaction Management Module
// ============================================================================
//
// A transaction owns one connection for its lifetime. Statements issued
// inside it lease that connection; statements outside acquire their own.
//
// ============================================================================

pub mod state;

pub use state::{TransactionId, TransactionState};

use crate::connection::{Connection, DataSource, IsolationLevel};
use crate::core::{DaoError, Result};
use crate::dispatch::CallContext;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct Transaction {
    id: TransactionId,
    isolation: IsolationLevel,
    connection: Arc<AsyncMutex<Box<dyn Connection>>>,
    state: Mutex<TransactionState>,
}

impl Transaction {
    /// Acquires a connection from `data_source` and begins a transaction on it.
    pub async fn begin(data_source: &dyn DataSource, isolation: IsolationLevel) -> Result<Arc<Self>> {
        let mut connection = data_source.acquire().await?;
        connection.begin(isolation).await?;

        let id = TransactionId::next();
        log::debug!("began {} on '{}' ({:?})", id, data_source.identity(), isolation);

        Ok(Arc::new(Self {
            id,
            isolation,
            connection: Arc::new(AsyncMutex::new(connection)),
            state: Mutex::new(TransactionState::Active),
        }))
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> Result<TransactionState> {
        Ok(*self.state.lock()?)
    }

    pub fn is_active(&self) -> bool {
        self.state().map(|s| s.is_active()).unwrap_or(false)
    }

    pub async fn commit(&self) -> Result<()> {
        self.state()?.finish(self.id, TransactionState::Committed)?;
        self.connection.lock().await.commit().await?;
        self.mark(TransactionState::Committed)?;
        log::debug!("committed {}", self.id);
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.state()?.finish(self.id, TransactionState::RolledBack)?;
        let result = self.connection.lock().await.rollback().await;
        self.mark(TransactionState::RolledBack)?;
        log::debug!("rolled back {}", self.id);
        result
    }

    fn mark(&self, to: TransactionState) -> Result<()> {
        let mut state = self.state.lock()?;
        *state = state.finish(self.id, to)?;
        Ok(())
    }

    /// Rolls back unless the transaction already finished.
    pub async fn rollback_if_not_committed(&self) -> Result<()> {
        if self.state()?.is_active() {
            self.rollback().await
        } else {
            Ok(())
        }
    }

    pub(crate) async fn lease(&self) -> Result<Lease> {
        let state = self.state()?;
        if !state.is_active() {
            return Err(DaoError::TransactionError(format!(
                "{} is not active ({:?})",
                self.id, state
            )));
        }
        Ok(Lease::Shared(Arc::clone(&self.connection).lock_owned().await))
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("state", &self.state())
            .finish()
    }
}

/// A connection borrowed for the duration of one statement or stream.
pub(crate) enum Lease {
    /// Acquired for this statement; released on drop.
    Owned(Box<dyn Connection>),
    /// The ambient transaction's connection, held exclusively until drop.
    Shared(OwnedMutexGuard<Box<dyn Connection>>),
}

impl Lease {
    /// The ambient transaction's connection if there is one, otherwise a fresh one.
    pub(crate) async fn acquire(data_source: &dyn DataSource, ctx: &CallContext) -> Result<Self> {
        match ctx.transaction() {
            Some(tx) => tx.lease().await,
            None => Ok(Lease::Owned(data_source.acquire().await?)),
        }
    }

    pub(crate) fn connection(&mut self) -> &mut dyn Connection {
        match self {
            Lease::Owned(conn) => conn.as_mut(),
            Lease::Shared(guard) => guard.as_mut(),
        }
    }
}

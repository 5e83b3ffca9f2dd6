// ============================================================================
// Transaction State
// ============================================================================
//
// A transaction moves Active -> Committed or Active -> RolledBack exactly once.
//
// ============================================================================

use crate::core::{DaoError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transaction number, used in log lines and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        TransactionId(NEXT_TX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Checks that `self` may move to `to`; only an active transaction can finish.
    pub(crate) fn finish(self, id: TransactionId, to: TransactionState) -> Result<TransactionState> {
        match (self, to) {
            (TransactionState::Active, TransactionState::Committed | TransactionState::RolledBack) => Ok(to),
            (from, to) => Err(DaoError::TransactionError(format!(
                "{} cannot move from {:?} to {:?}",
                id, from, to
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert!(b > a);
        assert!(b.to_string().starts_with("tx#"));
    }

    #[test]
    fn test_only_active_finishes() {
        let id = TransactionId::next();
        let done = TransactionState::Active.finish(id, TransactionState::Committed).unwrap();
        assert_eq!(done, TransactionState::Committed);
        assert!(done.finish(id, TransactionState::RolledBack).is_err());
        assert!(TransactionState::Active.finish(id, TransactionState::Active).is_err());
    }
}

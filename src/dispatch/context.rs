use crate::connection::config::DaoConfig;
use crate::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;

/// Logging thresholds in force for the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub sql_enabled: bool,
    pub max_sql_len: usize,
    pub slow_sql: Duration,
    pub slow_dao: Duration,
}

impl LogSettings {
    pub fn from_config(config: &DaoConfig) -> Self {
        Self {
            sql_enabled: config.sql_log_enabled,
            max_sql_len: config.max_sql_log_len,
            slow_sql: config.min_execution_time_for_sql_log,
            slow_dao: config.min_execution_time_for_dao_log,
        }
    }

    /// `sql` cut to the configured length.
    pub fn clip<'a>(&self, sql: &'a str) -> &'a str {
        if sql.len() <= self.max_sql_len {
            return sql;
        }
        let mut end = self.max_sql_len;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        &sql[..end]
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::from_config(&DaoConfig::default())
    }
}

/// State carried through one call chain.
///
/// Contexts are values: decorators derive a child and pass it inward, so
/// whatever they change is gone once the inner call returns.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    transaction: Option<Arc<Transaction>>,
    in_hooked_call: bool,
    log: Option<LogSettings>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose statements run inside `tx`.
    pub fn in_transaction(tx: Arc<Transaction>) -> Self {
        Self::new().with_transaction(tx)
    }

    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.transaction.as_ref()
    }

    pub fn with_transaction(mut self, tx: Arc<Transaction>) -> Self {
        self.transaction = Some(tx);
        self
    }

    pub fn without_transaction(mut self) -> Self {
        self.transaction = None;
        self
    }

    pub fn in_hooked_call(&self) -> bool {
        self.in_hooked_call
    }

    pub(crate) fn entering_hooks(mut self) -> Self {
        self.in_hooked_call = true;
        self
    }

    pub fn log(&self) -> Option<LogSettings> {
        self.log
    }

    pub(crate) fn log_or(&self, defaults: LogSettings) -> LogSettings {
        self.log.unwrap_or(defaults)
    }

    pub fn with_log(mut self, settings: LogSettings) -> Self {
        self.log = Some(settings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_respects_char_boundary() {
        let settings = LogSettings {
            max_sql_len: 8,
            ..LogSettings::default()
        };
        assert_eq!(settings.clip("SELECT 1"), "SELECT 1");
        assert_eq!(settings.clip("SELECT 'é'"), "SELECT '");
    }

    #[test]
    fn test_child_context_does_not_leak() {
        let parent = CallContext::new();
        let child = parent.clone().entering_hooks().with_log(LogSettings {
            sql_enabled: true,
            ..LogSettings::default()
        });
        assert!(child.in_hooked_call());
        assert!(!parent.in_hooked_call());
        assert!(parent.log().is_none());
    }
}

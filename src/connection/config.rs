use crate::sql::{Dialect, NamingPolicy};
use std::time::Duration;

/// Compile-time defaults for every interface compiled against a data source.
///
/// Method and registry directives override these per method.
#[derive(Debug, Clone)]
pub struct DaoConfig {
    /// Chunk size for batch operations without an explicit batch size
    pub batch_size: usize,

    /// Fetch size for list, stream and data-set queries
    pub big_result_fetch_size: usize,

    /// Statement timeout when neither method nor registry sets one
    pub query_timeout: Option<Duration>,

    /// Pagination clause flavour for generated queries
    pub dialect: Dialect,

    /// Property-to-column naming for generated queries
    pub naming: NamingPolicy,

    /// Log SQL text of every statement
    pub sql_log_enabled: bool,

    /// Longest SQL text written to the log
    pub max_sql_log_len: usize,

    /// Statements slower than this are logged
    pub min_execution_time_for_sql_log: Duration,

    /// Calls slower than this are logged
    pub min_execution_time_for_dao_log: Duration,

    /// Entries kept by the default local cache store
    pub cache_capacity: usize,

    /// Default time-to-live of cached results
    pub cache_live_time: Duration,

    /// Default idle expiry of cached results
    pub cache_max_idle_time: Duration,
}

impl DaoConfig {
    pub fn new() -> Self {
        Self {
            batch_size: 200,
            big_result_fetch_size: 1000,
            query_timeout: None,
            dialect: Dialect::Limit,
            naming: NamingPolicy::SnakeCase,
            sql_log_enabled: false,
            max_sql_log_len: 1024,
            min_execution_time_for_sql_log: Duration::from_millis(1000),
            min_execution_time_for_dao_log: Duration::from_millis(1000),
            cache_capacity: 1024,
            cache_live_time: Duration::from_secs(30 * 60),
            cache_max_idle_time: Duration::from_secs(3 * 60),
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn big_result_fetch_size(mut self, size: usize) -> Self {
        self.big_result_fetch_size = size;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    pub fn sql_log(mut self, enabled: bool) -> Self {
        self.sql_log_enabled = enabled;
        self
    }

    pub fn max_sql_log_len(mut self, len: usize) -> Self {
        self.max_sql_log_len = len;
        self
    }

    pub fn slow_sql_threshold(mut self, threshold: Duration) -> Self {
        self.min_execution_time_for_sql_log = threshold;
        self
    }

    pub fn slow_dao_threshold(mut self, threshold: Duration) -> Self {
        self.min_execution_time_for_dao_log = threshold;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn cache_live_time(mut self, live: Duration) -> Self {
        self.cache_live_time = live;
        self
    }

    pub fn cache_max_idle_time(mut self, idle: Duration) -> Self {
        self.cache_max_idle_time = idle;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }

        if self.big_result_fetch_size == 0 {
            return Err("big_result_fetch_size must be > 0".to_string());
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be > 0".to_string());
        }

        if self.cache_max_idle_time > self.cache_live_time {
            return Err("cache_max_idle_time cannot exceed cache_live_time".to_string());
        }

        Ok(())
    }
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaoConfig::default();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.big_result_fetch_size, 1000);
        assert_eq!(config.dialect, Dialect::Limit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DaoConfig::new()
            .batch_size(50)
            .dialect(Dialect::FetchFirst)
            .query_timeout(Duration::from_secs(5))
            .sql_log(true);

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.dialect, Dialect::FetchFirst);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert!(config.sql_log_enabled);
    }

    #[test]
    fn test_validate() {
        assert!(DaoConfig::new().batch_size(0).validate().is_err());
        assert!(DaoConfig::new().cache_capacity(0).validate().is_err());

        let idle_over_live = DaoConfig::new()
            .cache_live_time(Duration::from_secs(10))
            .cache_max_idle_time(Duration::from_secs(20));
        assert!(idle_over_live.validate().is_err());
    }
}

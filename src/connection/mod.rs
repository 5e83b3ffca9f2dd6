pub mod config;

use crate::core::{DaoError, Record, Result, Row, Value};
use crate::result::DataSet;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Whatever the data source is configured with.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDirection {
    #[default]
    Forward,
    Reverse,
    Unknown,
}

/// Per-statement tuning applied when the statement is prepared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOptions {
    pub query_timeout: Option<Duration>,
    pub fetch_size: Option<usize>,
    /// Upper bound on rows the driver needs to produce.
    pub max_rows: Option<usize>,
    pub fetch_direction: FetchDirection,
    /// Columns whose store-assigned values should be returned after an insert.
    pub generated_key_columns: Vec<String>,
}

/// Rows produced by a query, pulled on demand.
pub struct RowSource {
    columns: Vec<String>,
    rows: BoxStream<'static, Result<Row>>,
}

impl RowSource {
    pub fn new(columns: Vec<String>, rows: BoxStream<'static, Result<Row>>) -> Self {
        Self { columns, rows }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::new(columns, futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        self.rows.next().await.transpose()
    }

    /// Reads up to `limit` rows (all rows when `None`).
    pub async fn take(&mut self, limit: Option<usize>) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while limit.is_none_or(|l| out.len() < l) {
            match self.next_row().await? {
                Some(row) => out.push(row),
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn into_dataset(mut self) -> Result<DataSet> {
        let rows = self.take(None).await?;
        Ok(DataSet::new(self.columns, rows))
    }

    pub fn into_parts(self) -> (Vec<String>, BoxStream<'static, Result<Row>>) {
        (self.columns, self.rows)
    }
}

impl fmt::Debug for RowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSource")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Result of an update or of one batch round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// One count per executed parameter set.
    pub counts: Vec<u64>,
    /// Generated key rows, in insertion order, when requested.
    pub generated_keys: Vec<Row>,
}

impl UpdateOutcome {
    pub fn single(count: u64) -> Self {
        Self {
            counts: vec![count],
            generated_keys: Vec::new(),
        }
    }

    pub fn affected(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Result of a stored-procedure call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    pub result_sets: Vec<DataSet>,
    pub out_parameters: Record,
    pub affected: u64,
}

/// A prepared statement. Parameter indexes are 1-based.
#[async_trait]
pub trait Statement: Send {
    fn sql(&self) -> &str;

    fn bind(&mut self, index: usize, value: Value) -> Result<()>;

    fn register_out_parameter(&mut self, index: usize, name: &str) -> Result<()> {
        let _ = (index, name);
        Err(DaoError::ExecutionError(
            "statement does not support output parameters".into(),
        ))
    }

    /// Closes the current parameter set and starts a new one.
    fn add_batch(&mut self) -> Result<()>;

    async fn execute_query(&mut self) -> Result<RowSource>;

    async fn execute_update(&mut self) -> Result<UpdateOutcome>;

    /// Sends every accumulated parameter set in one round trip.
    async fn execute_batch(&mut self) -> Result<UpdateOutcome>;

    async fn execute_call(&mut self) -> Result<CallOutcome> {
        Err(DaoError::ExecutionError(
            "statement does not support procedure calls".into(),
        ))
    }
}

/// A live connection to the relational store.
#[async_trait]
pub trait Connection: Send {
    async fn prepare(&mut self, sql: &str, options: &StatementOptions) -> Result<Box<dyn Statement>>;

    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Source of connections; its identity takes part in the compile cache key.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn identity(&self) -> String;

    async fn acquire(&self) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_row_source_take_limits() {
        let mut rows = RowSource::from_rows(
            vec!["id".into()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]],
        );
        assert_eq!(rows.take(Some(2)).await.unwrap().len(), 2);
        assert_eq!(rows.take(None).await.unwrap().len(), 1);
        assert!(rows.next_row().await.unwrap().is_none());
    }

    #[test]
    fn test_update_outcome_affected() {
        let outcome = UpdateOutcome {
            counts: vec![1, 0, 2],
            generated_keys: Vec::new(),
        };
        assert_eq!(outcome.affected(), 3);
    }
}

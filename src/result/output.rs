use std::fmt;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use crate::core::{DaoError, FromValue, Result, Value};
use super::DataSet;

/// Lazily materialized rows; holds its connection until dropped or exhausted.
pub type RecordStream = BoxStream<'static, Result<Value>>;

/// What a dispatched call hands back.
pub enum Output {
    Value(Value),
    Table(DataSet),
    Stream(RecordStream),
}

impl Output {
    pub fn unit() -> Self {
        Self::Value(Value::Null)
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Table(_) => Err(DaoError::TypeMismatch(
                "expected a value, got a data set".into(),
            )),
            Self::Stream(_) => Err(DaoError::TypeMismatch(
                "expected a value, got a stream".into(),
            )),
        }
    }

    /// Converts a value output into a Rust type.
    pub fn get<T: FromValue>(self) -> Result<T> {
        T::from_value(self.into_value()?)
    }

    pub fn into_table(self) -> Result<DataSet> {
        match self {
            Self::Table(ds) => Ok(ds),
            other => Err(DaoError::TypeMismatch(format!(
                "expected a data set, got {}",
                other.kind()
            ))),
        }
    }

    pub fn into_stream(self) -> Result<RecordStream> {
        match self {
            Self::Stream(s) => Ok(s),
            Self::Value(Value::List(items)) => {
                Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
            }
            other => Err(DaoError::TypeMismatch(format!(
                "expected a stream, got {}",
                other.kind()
            ))),
        }
    }

    /// Drains a stream output into a list.
    pub async fn collect(self) -> Result<Vec<Value>> {
        match self {
            Self::Value(Value::List(items)) => Ok(items),
            other => other.into_stream()?.try_collect().await,
        }
    }

    /// Element count for collection and tabular outputs.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Value(v) => v.size(),
            Self::Table(ds) => Some(ds.row_count()),
            Self::Stream(_) => None,
        }
    }

    pub fn try_clone(&self) -> Option<Output> {
        match self {
            Self::Value(v) => Some(Self::Value(v.clone())),
            Self::Table(ds) => Some(Self::Table(ds.clone())),
            Self::Stream(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "a value",
            Self::Table(_) => "a data set",
            Self::Stream(_) => "a stream",
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Table(ds) => f.debug_tuple("Table").field(ds).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Value> for Output {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

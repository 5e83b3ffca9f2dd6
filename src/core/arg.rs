use std::fmt;
use std::sync::{Arc, RwLock};
use crate::core::{DaoError, Record, Result, Value};
use crate::result::{DataSet, RowView};

pub type RowMapper = Arc<dyn Fn(&RowView<'_>) -> Result<Value> + Send + Sync>;
pub type RowFilter = Arc<dyn Fn(&RowView<'_>) -> bool + Send + Sync>;
pub type ResultExtractor = Arc<dyn Fn(DataSet) -> Result<Value> + Send + Sync>;

/// Shared, mutable entity handed to a write method so generated ids can be
/// written back onto the caller's instance.
#[derive(Debug, Clone, Default)]
pub struct EntityCell(Arc<RwLock<Record>>);

impl EntityCell {
    pub fn new(record: Record) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    pub fn snapshot(&self) -> Result<Record> {
        Ok(self.0.read()?.clone())
    }

    pub fn get(&self, field: &str) -> Result<Value> {
        Ok(self.0.read()?.get(field).cloned().unwrap_or(Value::Null))
    }

    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        self.0.write()?.set(field, value);
        Ok(())
    }
}

/// One call argument.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Entity(EntityCell),
    Entities(Vec<EntityCell>),
    Mapper(RowMapper),
    Filter(RowFilter),
    Extractor(ResultExtractor),
}

impl Arg {
    pub fn val(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn mapper<F>(f: F) -> Self
    where
        F: Fn(&RowView<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Mapper(Arc::new(f))
    }

    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&RowView<'_>) -> bool + Send + Sync + 'static,
    {
        Self::Filter(Arc::new(f))
    }

    pub fn extractor<F>(f: F) -> Self
    where
        F: Fn(DataSet) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Extractor(Arc::new(f))
    }

    /// Current data value of the argument; entity cells are snapshotted.
    pub fn value(&self) -> Result<Value> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Entity(cell) => Ok(Value::Record(cell.snapshot()?)),
            Self::Entities(cells) => cells
                .iter()
                .map(|c| c.snapshot().map(Value::Record))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            _ => Err(DaoError::TypeMismatch(
                "functional argument has no data value".into(),
            )),
        }
    }

    pub fn as_mapper(&self) -> Option<&RowMapper> {
        match self {
            Self::Mapper(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> Option<&RowFilter> {
        match self {
            Self::Filter(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_extractor(&self) -> Option<&ResultExtractor> {
        match self {
            Self::Extractor(e) => Some(e),
            _ => None,
        }
    }

    /// Entity cells behind this argument, element-aligned with its value.
    pub fn cells(&self) -> Option<Vec<EntityCell>> {
        match self {
            Self::Entity(cell) => Some(vec![cell.clone()]),
            Self::Entities(cells) => Some(cells.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Entity(c) => f.debug_tuple("Entity").field(c).finish(),
            Self::Entities(c) => f.debug_tuple("Entities").field(&c.len()).finish(),
            Self::Mapper(_) => f.write_str("Mapper(..)"),
            Self::Filter(_) => f.write_str("Filter(..)"),
            Self::Extractor(_) => f.write_str("Extractor(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Self::Value(v.into())
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Self::Value(v.into())
    }
}

impl From<Record> for Arg {
    fn from(v: Record) -> Self {
        Self::Value(v.into())
    }
}

impl From<EntityCell> for Arg {
    fn from(c: EntityCell) -> Self {
        Self::Entity(c)
    }
}

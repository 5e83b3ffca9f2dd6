use crate::core::{Result, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Produces ids for entities inserted with an unset id.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<Value>;
}

/// Monotonic integer ids.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicI64,
}

impl SequenceGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceGenerator {
    fn generate(&self) -> Result<Value> {
        Ok(Value::Integer(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Random v4 UUIDs in hyphenated text form.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Result<Value> {
        Ok(Value::Text(uuid::Uuid::new_v4().to_string()))
    }
}

use crate::core::{DaoError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Query text plus tuning attributes stored under an id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegisteredQuery {
    pub text: String,
    pub timeout: Option<Duration>,
    pub fetch_size: Option<usize>,
    pub batch_size: Option<usize>,
}

impl RegisteredQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Lookup of queries referenced by id from method metadata.
pub trait QueryRegistry: Send + Sync {
    fn identity(&self) -> String;

    fn lookup(&self, id: &str) -> Option<RegisteredQuery>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryEntry {
    Text(String),
    Detailed {
        sql: String,
        timeout_ms: Option<u64>,
        fetch_size: Option<usize>,
        batch_size: Option<usize>,
    },
}

/// Registry held in memory, filled by code or loaded from a JSON document.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueryRegistry {
    name: String,
    queries: HashMap<String, RegisteredQuery>,
}

impl InMemoryQueryRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queries: HashMap::new(),
        }
    }

    pub fn query(mut self, id: impl Into<String>, query: RegisteredQuery) -> Self {
        self.queries.insert(id.into(), query);
        self
    }

    pub fn sql(self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.query(id, RegisteredQuery::new(text))
    }

    /// Loads `{"id": "SQL"}` or `{"id": {"sql": "...", "timeout_ms": 500, ...}}`.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let entries: HashMap<String, QueryEntry> = serde_json::from_str(json)?;
        let mut registry = Self::new(name);
        for (id, entry) in entries {
            let query = match entry {
                QueryEntry::Text(text) => RegisteredQuery::new(text),
                QueryEntry::Detailed {
                    sql,
                    timeout_ms,
                    fetch_size,
                    batch_size,
                } => RegisteredQuery {
                    text: sql,
                    timeout: timeout_ms.map(Duration::from_millis),
                    fetch_size,
                    batch_size,
                },
            };
            if query.text.trim().is_empty() {
                return Err(DaoError::ParseError(format!("query '{}' has empty text", id)));
            }
            registry.queries.insert(id, query);
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl QueryRegistry for InMemoryQueryRegistry {
    fn identity(&self) -> String {
        self.name.clone()
    }

    fn lookup(&self, id: &str) -> Option<RegisteredQuery> {
        self.queries.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let registry = InMemoryQueryRegistry::from_json(
            "main",
            r#"{
                "countAll": "SELECT COUNT(*) FROM account",
                "slow": {"sql": "SELECT * FROM audit", "timeout_ms": 250, "fetch_size": 50}
            }"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("countAll").unwrap().text, "SELECT COUNT(*) FROM account");
        let slow = registry.lookup("slow").unwrap();
        assert_eq!(slow.timeout, Some(Duration::from_millis(250)));
        assert_eq!(slow.fetch_size, Some(50));
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_from_json_rejects_empty_text() {
        let err = InMemoryQueryRegistry::from_json("main", r#"{"x": ""}"#).unwrap_err();
        assert!(matches!(err, DaoError::ParseError(_)));
    }
}

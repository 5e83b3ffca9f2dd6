use crate::core::{DaoError, Result};
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    // Quoted literals, comments and `::` casts are matched so they can be skipped.
    static ref PARAMETER_PATTERN: Regex = Regex::new(
        r#"'(?:[^']|'')*'|"[^"]*"|--[^\n]*|::|\?|:([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)|#\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}"#
    ).expect("parameter pattern is valid");

    static ref PARSED_SQL_CACHE: Mutex<LruCache<String, Arc<ParsedSql>>> =
        Mutex::new(LruCache::new(NonZeroUsize::MIN.saturating_add(1023)));
}

/// Parameter structure of one SQL text.
///
/// Named placeholders (`:name`, `#{name}`) are rewritten to `?` so every
/// statement reaches the driver in positional form; `named_parameters` keeps
/// the name bound to each slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    sql: String,
    parameterized: String,
    named_parameters: Vec<String>,
    parameter_count: usize,
    slot_offsets: Vec<usize>,
}

impl ParsedSql {
    /// Parses `sql`, reusing a previous parse of the same text.
    pub fn parse(sql: &str) -> Result<Arc<ParsedSql>> {
        if let Some(hit) = PARSED_SQL_CACHE.lock()?.get(sql) {
            return Ok(Arc::clone(hit));
        }

        let parsed = Arc::new(Self::parse_uncached(sql)?);
        PARSED_SQL_CACHE
            .lock()?
            .put(sql.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    fn parse_uncached(sql: &str) -> Result<Self> {
        let mut parameterized = String::with_capacity(sql.len());
        let mut named_parameters = Vec::new();
        let mut slot_offsets = Vec::new();
        let mut positional = 0usize;
        let mut last = 0usize;

        for caps in PARAMETER_PATTERN.captures_iter(sql) {
            let Some(whole) = caps.get(0) else { continue };
            let name = caps.get(1).or_else(|| caps.get(2));

            if whole.as_str() == "?" {
                parameterized.push_str(&sql[last..whole.start()]);
                slot_offsets.push(parameterized.len());
                parameterized.push('?');
                positional += 1;
            } else if let Some(name) = name {
                parameterized.push_str(&sql[last..whole.start()]);
                slot_offsets.push(parameterized.len());
                parameterized.push('?');
                named_parameters.push(name.as_str().to_string());
            } else {
                parameterized.push_str(&sql[last..whole.end()]);
            }
            last = whole.end();
        }
        parameterized.push_str(&sql[last..]);

        if positional > 0 && !named_parameters.is_empty() {
            return Err(DaoError::ParseError(format!(
                "SQL mixes '?' and named parameters: {}",
                sql
            )));
        }

        Ok(Self {
            sql: sql.to_string(),
            parameterized,
            parameter_count: positional + named_parameters.len(),
            named_parameters,
            slot_offsets,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The text with every placeholder in `?` form.
    pub fn parameterized_sql(&self) -> &str {
        &self.parameterized
    }

    /// Name bound to each slot, in slot order; empty for positional SQL.
    pub fn named_parameters(&self) -> &[String] {
        &self.named_parameters
    }

    /// Distinct names in first-appearance order.
    pub fn distinct_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in &self.named_parameters {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }

    /// Parameterized text with slot `index` (0-based) replaced by `count`
    /// comma-separated `?`, or by `NULL` when `count` is zero.
    pub fn expand_slot(&self, index: usize, count: usize) -> Option<String> {
        let offset = *self.slot_offsets.get(index)?;
        let replacement = if count == 0 {
            "NULL".to_string()
        } else {
            vec!["?"; count].join(", ")
        };
        let mut out = String::with_capacity(self.parameterized.len() + replacement.len());
        out.push_str(&self.parameterized[..offset]);
        out.push_str(&replacement);
        out.push_str(&self.parameterized[offset + 1..]);
        Some(out)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn is_named(&self) -> bool {
        !self.named_parameters.is_empty()
    }
}

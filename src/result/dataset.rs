use serde::Serialize;
use crate::core::{Record, Row, Value};

/// Tabular result: column labels plus raw rows, materialized eagerly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl DataSet {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(label))
    }

    pub fn get(&self, row: usize, label: &str) -> Option<&Value> {
        let col = self.column_index(label)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        self.rows.get(index).map(|row| RowView::new(&self.columns, row))
    }

    pub fn column_values(&self, label: &str) -> Vec<Value> {
        match self.column_index(label) {
            Some(col) => self
                .rows
                .iter()
                .map(|r| r.get(col).cloned().unwrap_or(Value::Null))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Each row as a record keyed by column label.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| RowView::new(&self.columns, row).to_record())
            .collect()
    }
}

/// Borrowed view of one row together with its column labels.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn new(columns: &'a [String], values: &'a [Value]) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    pub fn get_by_label(&self, label: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(label))
            .and_then(|i| self.values.get(i))
    }

    pub fn to_record(&self) -> Record {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lookup() {
        let ds = DataSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(2), Value::from("b")],
            ],
        );
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.get(1, "NAME"), Some(&Value::from("b")));
        assert_eq!(ds.column_values("id"), vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(ds.records()[0].get("name"), Some(&Value::from("a")));
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use daokit::connection::{CallOutcome, RowSource, UpdateOutcome};
use daokit::{
    Connection, DaoError, DataSource, EntityShape, FieldShape, IsolationLevel, Result, Row,
    Statement, StatementOptions, TypeShape, Value,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Canned response for statements whose SQL contains a fragment.
#[derive(Debug, Clone)]
pub enum Script {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Affected(u64),
    Call(CallOutcome),
    Fail(String),
}

impl Script {
    pub fn rows(columns: &[&str], rows: Vec<Row>) -> Self {
        Script::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

/// One thing the mock saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire(u64),
    Begin(u64),
    Commit(u64),
    Rollback(u64),
    Query { conn: u64, sql: String, params: Vec<Value>, options: StatementOptions },
    Update { conn: u64, sql: String, params: Vec<Value> },
    Batch { conn: u64, sql: String, sets: usize },
    Call { conn: u64, sql: String, params: Vec<Value> },
}

#[derive(Default)]
struct State {
    scripts: Vec<(String, Script)>,
    events: Vec<Event>,
    /// Fails the Nth batch round trip (1-based).
    fail_batch: Option<usize>,
    batches: usize,
    next_key: i64,
    /// Writes acknowledged outside a transaction or by a committed one.
    committed: u64,
    pending: BTreeMap<u64, u64>,
}

/// Scripted data source that records every interaction.
#[derive(Clone)]
pub struct MockDb {
    name: String,
    state: Arc<Mutex<State>>,
    connections: Arc<AtomicU64>,
}

impl MockDb {
    pub fn new(name: &str) -> Self {
        let state = State {
            next_key: 100,
            ..State::default()
        };
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(state)),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shared(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Statements containing `fragment` answer with `script`; later scripts win.
    pub fn script(&self, fragment: &str, script: Script) {
        self.state.lock().unwrap().scripts.insert(0, (fragment.to_string(), script));
    }

    pub fn fail_batch(&self, nth: usize) {
        self.state.lock().unwrap().fail_batch = Some(nth);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn queries(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Query { .. }))
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries().len()
    }

    /// Round trips that carried statement work.
    pub fn round_trips(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::Query { .. } | Event::Update { .. } | Event::Batch { .. } | Event::Call { .. }
                )
            })
            .count()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(_)))
    }

    pub fn committed_writes(&self) -> u64 {
        self.state.lock().unwrap().committed
    }

    pub fn last_query(&self) -> Option<Event> {
        self.queries().pop()
    }
}

#[async_trait]
impl DataSource for MockDb {
    fn identity(&self) -> String {
        self.name.clone()
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let id = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().unwrap().events.push(Event::Acquire(id));
        Ok(Box::new(MockConnection {
            id,
            in_tx: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    id: u64,
    in_tx: bool,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&mut self, sql: &str, options: &StatementOptions) -> Result<Box<dyn Statement>> {
        Ok(Box::new(MockStatement {
            conn: self.id,
            in_tx: self.in_tx,
            sql: sql.to_string(),
            options: options.clone(),
            current: BTreeMap::new(),
            sets: Vec::new(),
            outs: Vec::new(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn begin(&mut self, _isolation: IsolationLevel) -> Result<()> {
        self.in_tx = true;
        let mut state = self.state.lock().unwrap();
        state.pending.insert(self.id, 0);
        state.events.push(Event::Begin(self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_tx = false;
        let mut state = self.state.lock().unwrap();
        let pending = state.pending.remove(&self.id).unwrap_or(0);
        state.committed += pending;
        state.events.push(Event::Commit(self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_tx = false;
        let mut state = self.state.lock().unwrap();
        state.pending.remove(&self.id);
        state.events.push(Event::Rollback(self.id));
        Ok(())
    }
}

struct MockStatement {
    conn: u64,
    in_tx: bool,
    sql: String,
    options: StatementOptions,
    current: BTreeMap<usize, Value>,
    sets: Vec<Vec<Value>>,
    outs: Vec<(usize, String)>,
    state: Arc<Mutex<State>>,
}

impl MockStatement {
    fn script(&self) -> Option<Script> {
        let state = self.state.lock().unwrap();
        state
            .scripts
            .iter()
            .find(|(fragment, _)| self.sql.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
    }

    fn params(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.current).into_values().collect()
    }

    fn record_write(&self, rows: u64) {
        let mut state = self.state.lock().unwrap();
        if self.in_tx {
            *state.pending.entry(self.conn).or_insert(0) += rows;
        } else {
            state.committed += rows;
        }
    }

    fn generated_keys(&self, n: usize) -> Vec<Row> {
        if self.options.generated_key_columns.is_empty() {
            return Vec::new();
        }
        let mut state = self.state.lock().unwrap();
        (0..n)
            .map(|_| {
                state.next_key += 1;
                vec![Value::Integer(state.next_key)]
            })
            .collect()
    }
}

#[async_trait]
impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.current.insert(index, value);
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize, name: &str) -> Result<()> {
        self.outs.push((index, name.to_string()));
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        let set = self.params();
        self.sets.push(set);
        Ok(())
    }

    async fn execute_query(&mut self) -> Result<RowSource> {
        let params = self.params();
        self.state.lock().unwrap().events.push(Event::Query {
            conn: self.conn,
            sql: self.sql.clone(),
            params,
            options: self.options.clone(),
        });
        match self.script() {
            Some(Script::Rows { columns, rows }) => Ok(RowSource::from_rows(columns, rows)),
            Some(Script::Fail(msg)) => Err(DaoError::ExecutionError(msg)),
            _ => Ok(RowSource::from_rows(Vec::new(), Vec::new())),
        }
    }

    async fn execute_update(&mut self) -> Result<UpdateOutcome> {
        let params = self.params();
        self.state.lock().unwrap().events.push(Event::Update {
            conn: self.conn,
            sql: self.sql.clone(),
            params,
        });
        let count = match self.script() {
            Some(Script::Affected(n)) => n,
            Some(Script::Fail(msg)) => return Err(DaoError::ExecutionError(msg)),
            _ => 1,
        };
        self.record_write(count);
        Ok(UpdateOutcome {
            counts: vec![count],
            generated_keys: self.generated_keys(1),
        })
    }

    async fn execute_batch(&mut self) -> Result<UpdateOutcome> {
        let sets = std::mem::take(&mut self.sets);
        let failed = {
            let mut state = self.state.lock().unwrap();
            state.batches += 1;
            state.events.push(Event::Batch {
                conn: self.conn,
                sql: self.sql.clone(),
                sets: sets.len(),
            });
            state.fail_batch == Some(state.batches)
        };
        if failed {
            return Err(DaoError::ExecutionError("batch rejected".into()));
        }
        self.record_write(sets.len() as u64);
        Ok(UpdateOutcome {
            counts: vec![1; sets.len()],
            generated_keys: self.generated_keys(sets.len()),
        })
    }

    async fn execute_call(&mut self) -> Result<CallOutcome> {
        let params = self.params();
        self.state.lock().unwrap().events.push(Event::Call {
            conn: self.conn,
            sql: self.sql.clone(),
            params,
        });
        match self.script() {
            Some(Script::Call(outcome)) => Ok(outcome),
            Some(Script::Rows { columns, rows }) => Ok(CallOutcome {
                result_sets: vec![daokit::DataSet::new(columns, rows)],
                ..CallOutcome::default()
            }),
            Some(Script::Fail(msg)) => Err(DaoError::ExecutionError(msg)),
            _ => Ok(CallOutcome::default()),
        }
    }
}

pub fn account_shape() -> Arc<EntityShape> {
    EntityShape::new("Account", "account")
        .field(FieldShape::new("id", TypeShape::Integer).id())
        .field(FieldShape::new("first_name", TypeShape::Text))
        .field(FieldShape::new("city", TypeShape::Text))
        .build()
}

pub fn row(values: Vec<Value>) -> Row {
    values
}

use super::binding::{ParameterBindingPlan, RowHandlers};
use super::classify::{AffectedShape, MethodCategory, ResultStrategy, RowShape, SinglePolicy};
use super::crud::CrudIdentitySpec;
use super::template::QueryPlan;
use super::{ExecutionFn, Invocation};
use crate::connection::{CallOutcome, IsolationLevel, RowSource, Statement, StatementOptions, UpdateOutcome};
use crate::core::{Arg, ContainerKind, DaoError, EntityShape, Record, Result, Row, RowMapper, Value};
use crate::descriptor::{CustomFn, OutParameter};
use crate::dispatch::{CallContext, DaoEnv, LogSettings};
use crate::result::{DataSet, Output, RowView};
use crate::transaction::{Lease, Transaction};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Level, event};

// ============================================================================
// Statement execution
// ============================================================================

/// Rows of one executed query. Keeps its statement and connection lease
/// alive until dropped.
pub(crate) struct Cursor {
    rows: RowSource,
    _statement: Option<Box<dyn Statement>>,
    _lease: Option<Lease>,
}

impl Cursor {
    fn detached(rows: RowSource) -> Self {
        Self {
            rows,
            _statement: None,
            _lease: None,
        }
    }

    pub(crate) fn columns(&self) -> &[String] {
        self.rows.columns()
    }

    pub(crate) async fn next_row(&mut self) -> Result<Option<Row>> {
        self.rows.next_row().await
    }
}

fn log_statement(settings: &LogSettings, sql: &str, elapsed: Duration) {
    if settings.sql_enabled {
        log::debug!("[SQL]: {}", settings.clip(sql));
    }
    if elapsed >= settings.slow_sql {
        log::info!("[SQL-PERF]: {} ms, {}", elapsed.as_millis(), settings.clip(sql));
    }
}

async fn prepare(
    lease: &mut Lease,
    sql: &str,
    options: &StatementOptions,
    params: Vec<(usize, Value)>,
) -> Result<Box<dyn Statement>> {
    let mut statement = lease.connection().prepare(sql, options).await?;
    for (index, value) in params {
        statement.bind(index, value)?;
    }
    Ok(statement)
}

pub(crate) async fn open_cursor(
    env: &DaoEnv,
    ctx: &CallContext,
    sql: &str,
    options: &StatementOptions,
    params: Vec<(usize, Value)>,
) -> Result<Cursor> {
    let settings = ctx.log_or(env.log_defaults());
    let mut lease = Lease::acquire(env.data_source(), ctx).await?;
    let started = Instant::now();
    let mut statement = prepare(&mut lease, sql, options, params).await?;
    let rows = statement.execute_query().await?;
    log_statement(&settings, sql, started.elapsed());

    Ok(Cursor {
        rows,
        _statement: Some(statement),
        _lease: Some(lease),
    })
}

pub(crate) async fn execute_update(
    env: &DaoEnv,
    ctx: &CallContext,
    sql: &str,
    options: &StatementOptions,
    params: Vec<(usize, Value)>,
) -> Result<UpdateOutcome> {
    let settings = ctx.log_or(env.log_defaults());
    let mut lease = Lease::acquire(env.data_source(), ctx).await?;
    let started = Instant::now();
    let mut statement = prepare(&mut lease, sql, options, params).await?;
    let outcome = statement.execute_update().await?;
    log_statement(&settings, sql, started.elapsed());
    Ok(outcome)
}

async fn execute_call(
    env: &DaoEnv,
    ctx: &CallContext,
    sql: &str,
    options: &StatementOptions,
    params: Vec<(usize, Value)>,
    out_parameters: &[OutParameter],
) -> Result<CallOutcome> {
    let settings = ctx.log_or(env.log_defaults());
    let mut lease = Lease::acquire(env.data_source(), ctx).await?;
    let started = Instant::now();
    let mut statement = prepare(&mut lease, sql, options, params).await?;
    for out in out_parameters {
        statement.register_out_parameter(out.position, &out.name)?;
    }
    let outcome = statement.execute_call().await?;
    log_statement(&settings, sql, started.elapsed());
    Ok(outcome)
}

async fn run_chunk(
    lease: &mut Lease,
    sql: &str,
    options: &StatementOptions,
    chunk: &[Vec<(usize, Value)>],
) -> Result<UpdateOutcome> {
    let mut statement = lease.connection().prepare(sql, options).await?;
    for set in chunk {
        for (index, value) in set {
            statement.bind(*index, value.clone())?;
        }
        statement.add_batch()?;
    }
    statement.execute_batch().await
}

async fn run_chunks(
    lease: &mut Lease,
    settings: &LogSettings,
    sql: &str,
    options: &StatementOptions,
    sets: &[Vec<(usize, Value)>],
    batch_size: usize,
) -> Result<UpdateOutcome> {
    let mut total = UpdateOutcome::default();
    for (chunk, params) in sets.chunks(batch_size).enumerate() {
        let started = Instant::now();
        let outcome = run_chunk(lease, sql, options, params)
            .await
            .map_err(|source| DaoError::BatchFailed {
                chunk,
                source: Box::new(source),
            })?;
        log_statement(settings, sql, started.elapsed());
        total.counts.extend(outcome.counts);
        total.generated_keys.extend(outcome.generated_keys);
    }
    Ok(total)
}

/// Sends `sets` in chunks of `batch_size`, one round trip per chunk.
///
/// More than one chunk outside a caller transaction runs inside a
/// transaction of its own, so a failing chunk undoes the earlier ones.
pub(crate) async fn execute_batched(
    env: &DaoEnv,
    ctx: &CallContext,
    sql: &str,
    options: &StatementOptions,
    sets: Vec<Vec<(usize, Value)>>,
    batch_size: usize,
) -> Result<UpdateOutcome> {
    if sets.is_empty() {
        return Ok(UpdateOutcome::default());
    }
    let settings = ctx.log_or(env.log_defaults());
    let batch_size = batch_size.max(1);
    let chunks = sets.len().div_ceil(batch_size);

    if chunks == 1 || ctx.transaction().is_some() {
        let mut lease = Lease::acquire(env.data_source(), ctx).await?;
        return run_chunks(&mut lease, &settings, sql, options, &sets, batch_size).await;
    }

    let tx = Transaction::begin(env.data_source(), IsolationLevel::Default).await?;
    let result = {
        let mut lease = tx.lease().await?;
        run_chunks(&mut lease, &settings, sql, options, &sets, batch_size).await
    };

    match result {
        Ok(outcome) => {
            tx.commit().await?;
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback_if_not_committed().await {
                event!(Level::WARN, "rollback of {} after failed batch failed: {}", tx.id(), rollback);
            }
            Err(err)
        }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Maps plain columns onto entity fields. Dotted labels belong to nested
/// entities and are skipped here.
pub(crate) fn map_entity(entity: &EntityShape, view: &RowView<'_>) -> Result<Record> {
    let mut record = Record::new();
    for (label, value) in view.columns().iter().zip(view.values()) {
        if label.contains('.') {
            continue;
        }
        if let Some(field) = entity.field_for_label(label)
            && field.is_persistent()
        {
            record.set(field.name.clone(), field.ty.coerce(value.clone())?);
        }
    }
    Ok(record)
}

pub(crate) fn map_row(shape: &RowShape, view: &RowView<'_>, mapper: Option<&RowMapper>) -> Result<Value> {
    match shape {
        RowShape::Mapped => match mapper {
            Some(mapper) => mapper(view),
            None => Err(DaoError::ExecutionError("row mapper argument missing".into())),
        },
        RowShape::Column(ty) => ty.coerce(view.get(0).cloned().unwrap_or(Value::Null)),
        RowShape::Entity(entity) => map_entity(entity, view).map(Value::Record),
        RowShape::Record => Ok(Value::Record(view.to_record())),
    }
}

fn rejected(handlers: &RowHandlers, view: &RowView<'_>) -> bool {
    handlers.filter.as_ref().is_some_and(|keep| !keep(view))
}

/// Field `name` of a record or map value; dotted names walk nested records.
pub(crate) fn field_of(value: &Value, name: &str) -> Option<Value> {
    let mut current = value.clone();
    for part in name.split('.') {
        current = match &current {
            Value::Record(record) => record.get(part).cloned()?,
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(part))
                .map(|(_, v)| v.clone())?,
            _ => return None,
        };
    }
    Some(current)
}

// ============================================================================
// Materialization
// ============================================================================

async fn first_rows(
    cursor: &mut Cursor,
    handlers: &RowHandlers,
    limit: usize,
    mut map: impl FnMut(&RowView<'_>) -> Result<Value>,
) -> Result<Vec<Value>> {
    let columns = cursor.columns().to_vec();
    let mut out = Vec::new();
    while out.len() < limit {
        let Some(row) = cursor.next_row().await? else {
            break;
        };
        let view = RowView::new(&columns, &row);
        if rejected(handlers, &view) {
            continue;
        }
        out.push(map(&view)?);
    }
    Ok(out)
}

fn duplicate() -> DaoError {
    DaoError::DuplicateResult("more than one row matched".into())
}

async fn collect_rows(cursor: &mut Cursor, handlers: &RowHandlers) -> Result<Vec<Row>> {
    let columns = cursor.columns().to_vec();
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row().await? {
        if !rejected(handlers, &RowView::new(&columns, &row)) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn lazy_stream(cursor: Cursor, shape: RowShape, handlers: RowHandlers) -> Output {
    struct State {
        cursor: Cursor,
        columns: Vec<String>,
        shape: RowShape,
        handlers: RowHandlers,
    }

    let columns = cursor.columns().to_vec();
    let state = State {
        cursor,
        columns,
        shape,
        handlers,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            let row = match st.cursor.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => return None,
                Err(err) => return Some((Err(err), st)),
            };
            let view = RowView::new(&st.columns, &row);
            if rejected(&st.handlers, &view) {
                continue;
            }
            let item = map_row(&st.shape, &view, st.handlers.mapper.as_ref());
            return Some((item, st));
        }
    });
    Output::Stream(stream.boxed())
}

/// Turns query rows into the declared return value.
///
/// `eager` drains streams up front; set when the rows are read on a
/// transaction's connection, which must be free again before commit.
pub(crate) async fn materialize(
    strategy: &ResultStrategy,
    mut cursor: Cursor,
    handlers: RowHandlers,
    eager: bool,
) -> Result<Output> {
    match strategy {
        ResultStrategy::Scalar { ty, optional, unique } => {
            let limit = if *unique { 2 } else { 1 };
            let found = first_rows(&mut cursor, &handlers, limit, |view| {
                ty.coerce(view.get(0).cloned().unwrap_or(Value::Null))
            })
            .await?;
            if found.len() > 1 {
                return Err(duplicate());
            }
            Ok(match found.into_iter().next() {
                Some(v) if !v.is_null() => v,
                _ if *optional => Value::Null,
                _ => ty.zero_value(),
            }
            .into())
        }
        ResultStrategy::Single { row, policy } => {
            let limit = if *policy == SinglePolicy::ExactlyOneOrFail { 2 } else { 1 };
            let mapper = handlers.mapper.clone();
            let found =
                first_rows(&mut cursor, &handlers, limit, |view| map_row(row, view, mapper.as_ref()))
                    .await?;
            single_outcome(found, *policy)
        }
        ResultStrategy::Collection { row, container } => {
            let mapper = handlers.mapper.clone();
            let items =
                first_rows(&mut cursor, &handlers, usize::MAX, |view| map_row(row, view, mapper.as_ref()))
                    .await?;
            let items = if *container == ContainerKind::Set {
                let mut seen = HashSet::new();
                items.into_iter().filter(|v| seen.insert(v.clone())).collect()
            } else {
                items
            };
            Ok(Value::List(items).into())
        }
        ResultStrategy::Stream { row } => {
            if !eager {
                return Ok(lazy_stream(cursor, row.clone(), handlers));
            }
            let mapper = handlers.mapper.clone();
            let items =
                first_rows(&mut cursor, &handlers, usize::MAX, |view| map_row(row, view, mapper.as_ref()))
                    .await?;
            Ok(Output::Stream(futures::stream::iter(items.into_iter().map(Ok)).boxed()))
        }
        ResultStrategy::Tabular => {
            let columns = cursor.columns().to_vec();
            let rows = collect_rows(&mut cursor, &handlers).await?;
            Ok(Output::Table(DataSet::new(columns, rows)))
        }
        ResultStrategy::Extracted => {
            let columns = cursor.columns().to_vec();
            let rows = collect_rows(&mut cursor, &handlers).await?;
            let extractor = handlers
                .extractor
                .as_ref()
                .ok_or_else(|| DaoError::ExecutionError("result extractor argument missing".into()))?;
            Ok(extractor(DataSet::new(columns, rows))?.into())
        }
        ResultStrategy::Existence => {
            let found = first_rows(&mut cursor, &handlers, 1, |_| Ok(Value::Null)).await?;
            Ok(Value::Boolean(!found.is_empty()).into())
        }
        ResultStrategy::GroupedMap { key, row } => {
            let mapper = handlers.mapper.clone();
            let items =
                first_rows(&mut cursor, &handlers, usize::MAX, |view| map_row(row, view, mapper.as_ref()))
                    .await?;
            group_by(items, key).map(Output::Value)
        }
        ResultStrategy::MergedByKeys { keys, entity, single } => {
            let merged = merge_by_keys(&mut cursor, &handlers, entity, keys).await?;
            match single {
                None => Ok(Value::List(merged.into_iter().map(Value::Record).collect()).into()),
                Some(policy) => {
                    single_outcome(merged.into_iter().map(Value::Record).collect(), *policy)
                }
            }
        }
        other => Err(DaoError::ExecutionError(format!(
            "{:?} does not read rows",
            other
        ))),
    }
}

fn single_outcome(found: Vec<Value>, policy: SinglePolicy) -> Result<Output> {
    if policy == SinglePolicy::ExactlyOneOrFail && found.len() > 1 {
        return Err(duplicate());
    }
    match found.into_iter().next() {
        Some(v) => Ok(v.into()),
        None if policy == SinglePolicy::FirstOrFail => {
            Err(DaoError::NoResult("query returned no rows".into()))
        }
        None => Ok(Output::unit()),
    }
}

fn group_by(items: Vec<Value>, key: &str) -> Result<Value> {
    let mut index: HashMap<Value, usize> = HashMap::new();
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        let k = field_of(&item, key).ok_or_else(|| {
            DaoError::TypeMismatch(format!("grouped row has no property '{}'", key))
        })?;
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    Ok(Value::Map(
        groups.into_iter().map(|(k, v)| (k, Value::List(v))).collect(),
    ))
}

/// Join fetch: rows sharing `keys` collapse into one entity, and
/// `field.column` labels fill that field's nested entity.
async fn merge_by_keys(
    cursor: &mut Cursor,
    handlers: &RowHandlers,
    entity: &EntityShape,
    keys: &[String],
) -> Result<Vec<Record>> {
    let columns = cursor.columns().to_vec();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut merged: Vec<Record> = Vec::new();

    while let Some(row) = cursor.next_row().await? {
        let view = RowView::new(&columns, &row);
        if rejected(handlers, &view) {
            continue;
        }
        let base = map_entity(entity, &view)?;
        let key: Vec<Value> = keys
            .iter()
            .map(|k| base.get(k).cloned().unwrap_or(Value::Null))
            .collect();
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                index.insert(key, merged.len());
                merged.push(base);
                merged.len() - 1
            }
        };

        for (field_name, sub) in nested_records(entity, &view)? {
            let Some(field) = entity.get_field(&field_name) else {
                continue;
            };
            let target = &mut merged[slot];
            if field.ty.unwrap_optional().is_collection() {
                let mut items = match target.remove(&field_name) {
                    Some(Value::List(items)) => items,
                    _ => Vec::new(),
                };
                let sub = Value::Record(sub);
                if !items.contains(&sub) {
                    items.push(sub);
                }
                target.set(field_name, Value::List(items));
            } else if target.get(&field_name).is_none_or(Value::is_null) {
                target.set(field_name, Value::Record(sub));
            }
        }
    }
    Ok(merged)
}

/// Nested records keyed by owning field, built from `field.column` labels.
/// Sub-records whose columns are all null are dropped.
fn nested_records(entity: &EntityShape, view: &RowView<'_>) -> Result<Vec<(String, Record)>> {
    let mut out: Vec<(String, Record)> = Vec::new();
    for (label, value) in view.columns().iter().zip(view.values()) {
        let Some((prefix, rest)) = label.split_once('.') else {
            continue;
        };
        let Some(field) = entity.field_for_label(prefix) else {
            continue;
        };
        let Some(nested) = field.nested_entity() else {
            continue;
        };
        let Some(sub_field) = nested.field_for_label(rest) else {
            continue;
        };
        let value = sub_field.ty.coerce(value.clone())?;
        match out.iter_mut().find(|(name, _)| *name == field.name) {
            Some((_, record)) => record.set(sub_field.name.clone(), value),
            None => out.push((
                field.name.clone(),
                Record::new().with(sub_field.name.clone(), value),
            )),
        }
    }
    out.retain(|(_, record)| record.values().any(|v| !v.is_null()));
    Ok(out)
}

// ============================================================================
// Synthesized functions
// ============================================================================

/// Everything a statement-backed method needs at call time.
pub(crate) struct StatementMethod {
    pub category: MethodCategory,
    pub strategy: ResultStrategy,
    pub plan: QueryPlan,
    pub binding: ParameterBindingPlan,
    pub env: Arc<DaoEnv>,
    pub crud: Option<Arc<CrudIdentitySpec>>,
}

pub(crate) fn synthesize(method: StatementMethod) -> ExecutionFn {
    let method = Arc::new(method);
    Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let method = Arc::clone(&method);
        Box::pin(async move { method.execute(&inv.ctx, &inv.args).await })
    })
}

/// Wraps a hand-written body; it receives the `Dao` so it can call siblings.
pub(crate) fn custom(body: CustomFn) -> ExecutionFn {
    Arc::new(move |inv: Invocation| body(inv.dao, inv.ctx, inv.args))
}

fn affected(shape: AffectedShape, outcome: &UpdateOutcome) -> Value {
    match shape {
        AffectedShape::Unit => Value::Null,
        AffectedShape::Count => Value::Integer(outcome.affected() as i64),
        AffectedShape::Flag => Value::Boolean(outcome.affected() > 0),
        AffectedShape::Counts => {
            Value::List(outcome.counts.iter().map(|c| Value::Integer(*c as i64)).collect())
        }
    }
}

impl StatementMethod {
    async fn execute(&self, ctx: &CallContext, args: &[Arg]) -> Result<Output> {
        let rendered = self.plan.render(args)?;
        let handlers = self.binding.handlers(args);

        if self.category.is_batch() {
            let sets = self.binding.bind_batch(&rendered, args)?;
            let outcome = execute_batched(
                &self.env,
                ctx,
                rendered.sql(),
                &self.plan.options,
                sets,
                self.plan.batch_size,
            )
            .await?;
            return match &self.strategy {
                ResultStrategy::GeneratedIds => self.returned_ids(args, &outcome),
                ResultStrategy::Affected(shape) => Ok(affected(*shape, &outcome).into()),
                other => Err(DaoError::ExecutionError(format!("{:?} after a batch", other))),
            };
        }

        let params = self.binding.bind(&rendered, args)?;

        if self.category.is_select() {
            let cursor =
                open_cursor(&self.env, ctx, rendered.sql(), &self.plan.options, params).await?;
            return materialize(&self.strategy, cursor, handlers, ctx.transaction().is_some()).await;
        }

        if self.category.is_call() {
            let outcome = execute_call(
                &self.env,
                ctx,
                rendered.sql(),
                &self.plan.options,
                params,
                &self.plan.out_parameters,
            )
            .await?;
            return match &self.strategy {
                ResultStrategy::OutParameters => Ok(Value::Record(outcome.out_parameters).into()),
                ResultStrategy::Affected(shape) => {
                    Ok(affected(*shape, &UpdateOutcome::single(outcome.affected)).into())
                }
                strategy => {
                    let first = outcome.result_sets.into_iter().next().unwrap_or_else(DataSet::empty);
                    let cursor = Cursor::detached(RowSource::from_rows(first.columns, first.rows));
                    materialize(strategy, cursor, handlers, true).await
                }
            };
        }

        let outcome =
            execute_update(&self.env, ctx, rendered.sql(), &self.plan.options, params).await?;
        match &self.strategy {
            ResultStrategy::GeneratedId => self.returned_ids(args, &outcome).and_then(|ids| {
                let ids = ids.into_value()?;
                Ok(ids.as_list().and_then(|l| l.first().cloned()).unwrap_or(Value::Null).into())
            }),
            ResultStrategy::Affected(shape) => Ok(affected(*shape, &outcome).into()),
            other => Err(DaoError::ExecutionError(format!("{:?} after an update", other))),
        }
    }

    /// Ids of the inserted entities: the caller's where set, otherwise the
    /// generated keys, written back onto the caller's entities.
    fn returned_ids(&self, args: &[Arg], outcome: &UpdateOutcome) -> Result<Output> {
        let crud = self
            .crud
            .as_ref()
            .ok_or_else(|| DaoError::ExecutionError("no identity for generated ids".into()))?;
        let source = &args[self.binding.entity_arg().unwrap_or(0)];
        let records = match source.value()? {
            Value::List(items) => items,
            single => vec![single],
        };
        let cells = source.cells().unwrap_or_default();

        let mut ids = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let current = record.as_record().map(|r| crud.get_id(r)).unwrap_or(Value::Null);
            if !crud.is_default_id(&current) {
                ids.push(current);
                continue;
            }
            let generated = crud.id_from_keys(outcome.generated_keys.get(i))?;
            if let Some(cell) = cells.get(i)
                && !generated.is_null()
            {
                crud.set_id(cell, &generated)?;
            }
            ids.push(generated);
        }
        Ok(Value::List(ids).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldShape, TypeShape};

    fn cursor(columns: &[&str], rows: Vec<Row>) -> Cursor {
        Cursor::detached(RowSource::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    fn no_handlers() -> RowHandlers {
        RowHandlers::default()
    }

    #[tokio::test]
    async fn test_scalar_zero_value_and_duplicates() {
        let strategy = ResultStrategy::Scalar { ty: TypeShape::Integer, optional: false, unique: true };
        let out = materialize(&strategy, cursor(&["n"], vec![]), no_handlers(), false).await.unwrap();
        assert_eq!(out.into_value().unwrap(), Value::Integer(0));

        let two = cursor(&["n"], vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        let err = materialize(&strategy, two, no_handlers(), false).await.unwrap_err();
        assert!(matches!(err, DaoError::DuplicateResult(_)));
    }

    #[tokio::test]
    async fn test_single_first_or_fail() {
        let strategy = ResultStrategy::Single { row: RowShape::Record, policy: SinglePolicy::FirstOrFail };
        let err = materialize(&strategy, cursor(&["id"], vec![]), no_handlers(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DaoError::NoResult(_)));
    }

    #[tokio::test]
    async fn test_set_deduplicates_and_filter_applies() {
        let strategy = ResultStrategy::Collection {
            row: RowShape::Column(TypeShape::Text),
            container: ContainerKind::Set,
        };
        let rows = vec![
            vec![Value::from("a")],
            vec![Value::from("b")],
            vec![Value::from("a")],
            vec![Value::from("skip")],
        ];
        let handlers = RowHandlers {
            filter: Some(Arc::new(|view: &RowView<'_>| {
                view.get(0).and_then(Value::as_str) != Some("skip")
            })),
            ..RowHandlers::default()
        };
        let out = materialize(&strategy, cursor(&["name"], rows), handlers, false).await.unwrap();
        assert_eq!(
            out.into_value().unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[tokio::test]
    async fn test_group_by_key() {
        let strategy = ResultStrategy::GroupedMap { key: "city".into(), row: RowShape::Record };
        let rows = vec![
            vec![Value::from("Oslo"), Value::Integer(1)],
            vec![Value::from("Rome"), Value::Integer(2)],
            vec![Value::from("Oslo"), Value::Integer(3)],
        ];
        let out = materialize(&strategy, cursor(&["city", "id"], rows), no_handlers(), false)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        let Value::Map(groups) = out else { panic!("expected map") };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Value::from("Oslo"));
        assert_eq!(groups[0].1.size(), Some(2));
    }

    #[tokio::test]
    async fn test_merge_by_keys_collects_children() {
        let device = EntityShape::new("Device", "device")
            .field(FieldShape::new("id", TypeShape::Integer).id())
            .field(FieldShape::new("model", TypeShape::Text))
            .build();
        let user = EntityShape::new("User", "users")
            .field(FieldShape::new("id", TypeShape::Integer).id())
            .field(FieldShape::new("name", TypeShape::Text))
            .field(FieldShape::new("devices", TypeShape::list(TypeShape::entity(&device))))
            .build();

        let rows = vec![
            vec![Value::Integer(1), Value::from("ann"), Value::Integer(10), Value::from("x1")],
            vec![Value::Integer(1), Value::from("ann"), Value::Integer(11), Value::from("x2")],
            vec![Value::Integer(2), Value::from("bob"), Value::Null, Value::Null],
        ];
        let strategy = ResultStrategy::MergedByKeys {
            keys: vec!["id".into()],
            entity: user,
            single: None,
        };
        let out = materialize(
            &strategy,
            cursor(&["id", "name", "devices.id", "devices.model"], rows),
            no_handlers(),
            false,
        )
        .await
        .unwrap()
        .into_value()
        .unwrap();

        let users = out.as_list().unwrap();
        assert_eq!(users.len(), 2);
        let ann = users[0].as_record().unwrap();
        assert_eq!(ann.get("devices").unwrap().size(), Some(2));
        assert!(users[1].as_record().unwrap().get("devices").is_none());
    }

    #[tokio::test]
    async fn test_lazy_stream_maps_rows() {
        let strategy = ResultStrategy::Stream { row: RowShape::Column(TypeShape::Integer) };
        let rows = vec![vec![Value::from("1")], vec![Value::from("2")]];
        let out = materialize(&strategy, cursor(&["n"], rows), no_handlers(), false).await.unwrap();
        assert!(matches!(out, Output::Stream(_)));
        assert_eq!(out.collect().await.unwrap(), vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_field_of_nested() {
        let value = Value::Record(
            Record::new().with("addr", Record::new().with("city", "Oslo")),
        );
        assert_eq!(field_of(&value, "addr.city"), Some(Value::from("Oslo")));
        assert_eq!(field_of(&value, "addr.zip"), None);
    }
}

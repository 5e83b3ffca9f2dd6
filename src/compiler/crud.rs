use super::binding::bind_record;
use super::synth::{execute_batched, execute_update, map_entity, open_cursor};
use super::{ExecutionFn, Invocation};
use crate::connection::StatementOptions;
use crate::connection::config::DaoConfig;
use crate::core::{
    Arg, DaoError, EntityCell, EntityShape, FieldShape, Record, Result, Row, TypeShape, Value,
};
use crate::descriptor::{CrudOp, InterfaceDescriptor};
use crate::dispatch::{CallContext, DaoEnv};
use crate::id::IdGenerator;
use crate::result::{Output, RowView};
use crate::sql::{
    Condition, ParsedSql, delete_sql, exists_sql, insert_sql, select_sql, update_sql,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    /// One id field; ids are plain values.
    Scalar,
    /// Several id fields described by an id entity.
    Composite,
    /// Several id fields passed as a record or map.
    MapLike,
}

/// Canonical statements of a CRUD interface, parsed once.
#[derive(Debug, Clone)]
pub struct CrudTemplates {
    pub get: Arc<ParsedSql>,
    pub exists: Arc<ParsedSql>,
    pub insert_with_id: Arc<ParsedSql>,
    pub insert_without_id: Arc<ParsedSql>,
    /// Absent when the entity has no updatable non-id field.
    pub update_by_id: Option<Arc<ParsedSql>>,
    pub delete_by_id: Arc<ParsedSql>,
}

type IdGetter = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
type IdSetter = Arc<dyn Fn(&EntityCell, &Value) -> Result<()> + Send + Sync>;

/// Identity facts of a CRUD entity, computed once per interface.
pub struct CrudIdentitySpec {
    pub entity: Arc<EntityShape>,
    pub id_type: TypeShape,
    pub id_shape: IdShape,
    pub id_props: Vec<String>,
    pub id_columns: Vec<String>,
    pub columns: Vec<String>,
    pub generator: Option<Arc<dyn IdGenerator>>,
    pub templates: CrudTemplates,
    getter: IdGetter,
    setter: IdSetter,
}

impl fmt::Debug for CrudIdentitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudIdentitySpec")
            .field("entity", &self.entity.name())
            .field("id_shape", &self.id_shape)
            .field("id_props", &self.id_props)
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

fn column_of(config: &DaoConfig, field: &FieldShape) -> String {
    field
        .column
        .clone()
        .unwrap_or_else(|| config.naming.column_name(&field.name))
}

fn id_condition(columns: &[String], props: &[String]) -> Condition {
    Condition::and(
        columns
            .iter()
            .zip(props)
            .map(|(c, p)| Condition::eq(c.clone(), p.clone()))
            .collect(),
    )
}

impl CrudIdentitySpec {
    /// Resolves the identity of `interface`'s entity and builds its templates.
    pub fn resolve(interface: &InterfaceDescriptor, env: &DaoEnv) -> Result<Self> {
        let fail = |msg: String| DaoError::config(format!("{}: {}", interface.name, msg));
        let entity = interface
            .entity
            .clone()
            .ok_or_else(|| fail("CRUD interface declares no entity".into()))?;
        let id_type = interface
            .id_type
            .clone()
            .ok_or_else(|| fail("CRUD interface declares no id type".into()))?;
        let config = env.config();

        let id_fields: Vec<&FieldShape> = entity.id_fields().collect();
        if id_fields.is_empty() {
            return Err(fail(format!("entity {} has no id field", entity.name())));
        }

        let id_shape = match (id_fields.as_slice(), &id_type) {
            ([field], ty) if field.ty.unwrap_optional() == ty.unwrap_optional() => IdShape::Scalar,
            ([field], ty) => {
                return Err(fail(format!(
                    "id type {} does not match id field {}: {}",
                    ty, field.name, field.ty
                )));
            }
            (fields, TypeShape::Entity(id_entity)) => {
                if let Some(missing) = fields.iter().find(|f| id_entity.get_field(&f.name).is_none()) {
                    return Err(fail(format!(
                        "id type {} has no field {}",
                        id_entity.name(),
                        missing.name
                    )));
                }
                IdShape::Composite
            }
            (_, TypeShape::Record | TypeShape::Any | TypeShape::Map(..)) => IdShape::MapLike,
            (_, ty) => {
                return Err(fail(format!(
                    "id type {} cannot hold a composite id",
                    ty
                )));
            }
        };

        let generator = match &interface.id_generator {
            None => None,
            Some(name) => {
                if id_shape != IdShape::Scalar {
                    return Err(fail("id generators need a single id field".into()));
                }
                Some(
                    env.id_generator(name)
                        .ok_or_else(|| fail(format!("unknown id generator '{}'", name)))?,
                )
            }
        };

        let id_props: Vec<String> = id_fields.iter().map(|f| f.name.clone()).collect();
        let id_columns: Vec<String> = id_fields.iter().map(|f| column_of(config, f)).collect();
        let persistent: Vec<&FieldShape> = entity.persistent_fields().collect();
        let columns: Vec<String> = persistent.iter().map(|f| column_of(config, f)).collect();
        let by_id = id_condition(&id_columns, &id_props);
        let table = entity.table();

        let insertable: Vec<&FieldShape> = persistent.iter().copied().filter(|f| f.insertable).collect();
        let insert_of = |fields: Vec<&FieldShape>| {
            let cols: Vec<String> = fields.iter().map(|f| column_of(config, f)).collect();
            let params: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
            insert_sql(table, &cols, &params)
        };
        let sets: Vec<(String, String)> = persistent
            .iter()
            .filter(|f| f.updatable && !f.id)
            .map(|f| (column_of(config, f), f.name.clone()))
            .collect();

        let templates = CrudTemplates {
            get: ParsedSql::parse(&select_sql(&columns, table, &by_id))?,
            exists: ParsedSql::parse(&exists_sql(config.dialect, table, &by_id))?,
            insert_with_id: ParsedSql::parse(&insert_of(insertable.clone()))?,
            insert_without_id: ParsedSql::parse(&insert_of(
                insertable.into_iter().filter(|f| !f.id).collect(),
            ))?,
            update_by_id: if sets.is_empty() {
                None
            } else {
                Some(ParsedSql::parse(&update_sql(table, &sets, &by_id))?)
            },
            delete_by_id: ParsedSql::parse(&delete_sql(table, &by_id))?,
        };

        let (getter, setter) = id_accessors(id_shape, &id_props);

        Ok(Self {
            entity,
            id_type,
            id_shape,
            id_props,
            id_columns,
            columns,
            generator,
            templates,
            getter,
            setter,
        })
    }

    /// Id of `record`: the value itself for scalar ids, a record of the id
    /// fields otherwise.
    pub fn get_id(&self, record: &Record) -> Value {
        (self.getter)(record)
    }

    pub fn set_id(&self, cell: &EntityCell, id: &Value) -> Result<()> {
        (self.setter)(cell, id)
    }

    /// True when every id field holds its type's zero-value.
    pub fn is_default_id(&self, id: &Value) -> bool {
        match (self.id_shape, id) {
            (IdShape::Scalar, v) => v.is_default(),
            (_, Value::Record(r)) => self
                .id_props
                .iter()
                .all(|p| r.get(p).is_none_or(Value::is_default)),
            (_, other) => other.is_default(),
        }
    }

    /// Named parameters for the by-id templates.
    pub fn id_params(&self, id: &Value) -> Result<Record> {
        if self.id_shape == IdShape::Scalar {
            let prop = &self.id_props[0];
            return match id {
                Value::Record(r) => Ok(Record::new().with(prop.clone(), r.get(prop).cloned().unwrap_or(Value::Null))),
                v => Ok(Record::new().with(prop.clone(), v.clone())),
            };
        }
        let lookup = |prop: &str| -> Option<Value> {
            match id {
                Value::Record(r) => r.get(prop).cloned(),
                Value::Map(pairs) => pairs
                    .iter()
                    .find(|(k, _)| k.as_str() == Some(prop))
                    .map(|(_, v)| v.clone()),
                _ => None,
            }
        };
        let mut params = Record::new();
        for prop in &self.id_props {
            let value = lookup(prop).ok_or_else(|| {
                DaoError::TypeMismatch(format!(
                    "{} id is missing field '{}'",
                    self.entity.name(),
                    prop
                ))
            })?;
            params.set(prop.clone(), value);
        }
        Ok(params)
    }

    /// Id assembled from a generated-keys row; null when the driver returned none.
    pub fn id_from_keys(&self, keys: Option<&Row>) -> Result<Value> {
        let Some(keys) = keys.filter(|k| !k.is_empty()) else {
            event!(
                Level::WARN,
                "no generated keys returned for {} insert",
                self.entity.name()
            );
            return Ok(Value::Null);
        };
        let typed = |i: usize, prop: &str| -> Result<Value> {
            let raw = keys.get(i).cloned().unwrap_or(Value::Null);
            match self.entity.get_field(prop) {
                Some(field) => field.ty.coerce(raw),
                None => Ok(raw),
            }
        };
        if self.id_shape == IdShape::Scalar {
            return typed(0, &self.id_props[0]);
        }
        let mut id = Record::new();
        for (i, prop) in self.id_props.iter().enumerate() {
            id.set(prop.clone(), typed(i, prop)?);
        }
        Ok(Value::Record(id))
    }

    fn map_row(&self, columns: &[String], row: &Row) -> Result<Record> {
        map_entity(&self.entity, &RowView::new(columns, row))
    }
}

fn id_accessors(shape: IdShape, props: &[String]) -> (IdGetter, IdSetter) {
    if shape == IdShape::Scalar {
        let prop = props[0].clone();
        let set_prop = prop.clone();
        return (
            Arc::new(move |r: &Record| r.get(&prop).cloned().unwrap_or(Value::Null)),
            Arc::new(move |cell: &EntityCell, id: &Value| cell.set(&set_prop, id.clone())),
        );
    }
    let names = props.to_vec();
    let set_names = names.clone();
    (
        Arc::new(move |r: &Record| Value::Record(r.project(&names))),
        Arc::new(move |cell: &EntityCell, id: &Value| {
            let Value::Record(id) = id else {
                return Err(DaoError::TypeMismatch(format!(
                    "composite id must be a record, got {}",
                    id.type_name()
                )));
            };
            for name in &set_names {
                if let Some(v) = id.get(name) {
                    cell.set(name, v.clone())?;
                }
            }
            Ok(())
        }),
    )
}

// ============================================================================
// CRUD execution
// ============================================================================

struct CrudMethod {
    op: CrudOp,
    spec: Arc<CrudIdentitySpec>,
    env: Arc<DaoEnv>,
    options: StatementOptions,
    batch_size: usize,
}

/// Execution function for one built-in CRUD operation.
pub(crate) fn synthesize(op: CrudOp, spec: Arc<CrudIdentitySpec>, env: Arc<DaoEnv>) -> Result<ExecutionFn> {
    if matches!(op, CrudOp::Update | CrudOp::BatchUpdate) && spec.templates.update_by_id.is_none() {
        return Err(DaoError::config(format!(
            "{}: entity {} has no updatable field",
            op.method_name(),
            spec.entity.name()
        )));
    }
    let config = env.config();
    let method = Arc::new(CrudMethod {
        op,
        options: StatementOptions {
            query_timeout: config.query_timeout,
            ..StatementOptions::default()
        },
        batch_size: config.batch_size,
        spec,
        env,
    });
    Ok(Arc::new(move |inv: Invocation| -> BoxFuture<'static, Result<Output>> {
        let method = Arc::clone(&method);
        Box::pin(async move {
            let arg = inv.args.first().ok_or_else(|| {
                DaoError::ExecutionError(format!("{} takes one argument", method.op.method_name()))
            })?;
            method.execute(&inv.ctx, arg).await
        })
    }))
}

fn records_of(value: Value) -> Result<Vec<Record>> {
    let items = match value {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Record(r) => Ok(r),
            other => Err(DaoError::TypeMismatch(format!(
                "expected an entity, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn ids_of(value: Value) -> Vec<Value> {
    match value {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

fn count(n: u64) -> Output {
    Value::Integer(n as i64).into()
}

impl CrudMethod {
    async fn execute(&self, ctx: &CallContext, arg: &Arg) -> Result<Output> {
        let spec = &self.spec;
        let templates = &spec.templates;
        match self.op {
            CrudOp::Insert => self.insert(ctx, arg).await,
            CrudOp::BatchInsert => self.batch_insert(ctx, arg).await,
            CrudOp::Get => {
                let params = bind_record(&templates.get, &spec.id_params(&arg.value()?)?);
                let options = StatementOptions {
                    fetch_size: Some(1),
                    max_rows: Some(1),
                    ..self.options.clone()
                };
                let mut cursor =
                    open_cursor(&self.env, ctx, templates.get.parameterized_sql(), &options, params).await?;
                let columns = cursor.columns().to_vec();
                match cursor.next_row().await? {
                    Some(row) => Ok(Value::Record(spec.map_row(&columns, &row)?).into()),
                    None => Ok(Output::unit()),
                }
            }
            CrudOp::Exists => {
                let params = bind_record(&templates.exists, &spec.id_params(&arg.value()?)?);
                let options = StatementOptions {
                    fetch_size: Some(1),
                    max_rows: Some(1),
                    ..self.options.clone()
                };
                let mut cursor =
                    open_cursor(&self.env, ctx, templates.exists.parameterized_sql(), &options, params)
                        .await?;
                Ok(Value::Boolean(cursor.next_row().await?.is_some()).into())
            }
            CrudOp::BatchGet => self.batch_get(ctx, ids_of(arg.value()?)).await,
            CrudOp::Update => {
                let template = self.update_template()?;
                let record = records_of(arg.value()?)?.into_iter().next().unwrap_or_default();
                let outcome = execute_update(
                    &self.env,
                    ctx,
                    template.parameterized_sql(),
                    &self.options,
                    bind_record(template, &record),
                )
                .await?;
                Ok(count(outcome.affected()))
            }
            CrudOp::BatchUpdate => {
                let template = self.update_template()?;
                let sets = records_of(arg.value()?)?
                    .iter()
                    .map(|r| bind_record(template, r))
                    .collect();
                let outcome = execute_batched(
                    &self.env,
                    ctx,
                    template.parameterized_sql(),
                    &self.options,
                    sets,
                    self.batch_size,
                )
                .await?;
                Ok(count(outcome.affected()))
            }
            CrudOp::Delete | CrudOp::DeleteById => {
                let id = match self.op {
                    CrudOp::Delete => {
                        let record = records_of(arg.value()?)?.into_iter().next().unwrap_or_default();
                        spec.get_id(&record)
                    }
                    _ => arg.value()?,
                };
                let template = &templates.delete_by_id;
                let outcome = execute_update(
                    &self.env,
                    ctx,
                    template.parameterized_sql(),
                    &self.options,
                    bind_record(template, &spec.id_params(&id)?),
                )
                .await?;
                Ok(count(outcome.affected()))
            }
            CrudOp::BatchDelete => {
                let template = &templates.delete_by_id;
                let mut sets = Vec::new();
                for record in records_of(arg.value()?)? {
                    sets.push(bind_record(template, &spec.id_params(&spec.get_id(&record))?));
                }
                let outcome = execute_batched(
                    &self.env,
                    ctx,
                    template.parameterized_sql(),
                    &self.options,
                    sets,
                    self.batch_size,
                )
                .await?;
                Ok(count(outcome.affected()))
            }
        }
    }

    fn update_template(&self) -> Result<&Arc<ParsedSql>> {
        self.spec
            .templates
            .update_by_id
            .as_ref()
            .ok_or_else(|| DaoError::ExecutionError("entity has no updatable field".into()))
    }

    /// Caller-supplied id, then the configured generator, then store-assigned keys.
    async fn insert(&self, ctx: &CallContext, arg: &Arg) -> Result<Output> {
        let spec = &self.spec;
        let mut record = records_of(arg.value()?)?.into_iter().next().unwrap_or_default();
        let cell = arg.cells().and_then(|c| c.into_iter().next());
        let id = spec.get_id(&record);

        if !spec.is_default_id(&id) || spec.generator.is_some() {
            let id = match (&spec.generator, spec.is_default_id(&id)) {
                (Some(generator), true) => {
                    let generated = generator.generate()?;
                    record.set(spec.id_props[0].clone(), generated.clone());
                    if let Some(cell) = &cell {
                        spec.set_id(cell, &generated)?;
                    }
                    generated
                }
                _ => id,
            };
            let template = &spec.templates.insert_with_id;
            execute_update(
                &self.env,
                ctx,
                template.parameterized_sql(),
                &self.options,
                bind_record(template, &record),
            )
            .await?;
            return Ok(id.into());
        }

        let template = &spec.templates.insert_without_id;
        let options = StatementOptions {
            generated_key_columns: spec.id_columns.clone(),
            ..self.options.clone()
        };
        let outcome = execute_update(
            &self.env,
            ctx,
            template.parameterized_sql(),
            &options,
            bind_record(template, &record),
        )
        .await?;
        let id = spec.id_from_keys(outcome.generated_keys.first())?;
        if let Some(cell) = &cell
            && !id.is_null()
        {
            spec.set_id(cell, &id)?;
        }
        Ok(id.into())
    }

    /// The whole batch takes one path, decided by a single pass over the input.
    async fn batch_insert(&self, ctx: &CallContext, arg: &Arg) -> Result<Output> {
        let spec = &self.spec;
        let mut records = records_of(arg.value()?)?;
        let cells = arg.cells().unwrap_or_default();
        let any_set = records.iter().any(|r| !spec.is_default_id(&spec.get_id(r)));

        if any_set || spec.generator.is_some() {
            let mut ids = Vec::with_capacity(records.len());
            for (i, record) in records.iter_mut().enumerate() {
                let id = spec.get_id(record);
                let id = match &spec.generator {
                    Some(generator) if !any_set => {
                        let generated = generator.generate()?;
                        record.set(spec.id_props[0].clone(), generated.clone());
                        if let Some(cell) = cells.get(i) {
                            spec.set_id(cell, &generated)?;
                        }
                        generated
                    }
                    _ => id,
                };
                ids.push(id);
            }
            let template = &spec.templates.insert_with_id;
            let sets = records.iter().map(|r| bind_record(template, r)).collect();
            execute_batched(
                &self.env,
                ctx,
                template.parameterized_sql(),
                &self.options,
                sets,
                self.batch_size,
            )
            .await?;
            return Ok(Value::List(ids).into());
        }

        let template = &spec.templates.insert_without_id;
        let options = StatementOptions {
            generated_key_columns: spec.id_columns.clone(),
            ..self.options.clone()
        };
        let sets = records.iter().map(|r| bind_record(template, r)).collect();
        let outcome = execute_batched(
            &self.env,
            ctx,
            template.parameterized_sql(),
            &options,
            sets,
            self.batch_size,
        )
        .await?;

        let mut ids = Vec::with_capacity(records.len());
        for i in 0..records.len() {
            let id = spec.id_from_keys(outcome.generated_keys.get(i))?;
            if let Some(cell) = cells.get(i)
                && !id.is_null()
            {
                spec.set_id(cell, &id)?;
            }
            ids.push(id);
        }
        Ok(Value::List(ids).into())
    }

    /// Loads entities by id in chunks; the result follows the input order and
    /// skips ids with no row.
    async fn batch_get(&self, ctx: &CallContext, ids: Vec<Value>) -> Result<Output> {
        let spec = &self.spec;
        let mut found: HashMap<Value, Record> = HashMap::new();
        let options = StatementOptions {
            fetch_size: Some(self.batch_size),
            ..self.options.clone()
        };

        for (chunk_no, chunk) in ids.chunks(self.batch_size.max(1)).enumerate() {
            let mut params = Record::new();
            let condition = if spec.id_shape == IdShape::Scalar {
                let names: Vec<String> = (0..chunk.len()).map(|i| format!("id_{}", i)).collect();
                for (name, id) in names.iter().zip(chunk) {
                    params.set(name.clone(), spec.id_params(id)?.values().next().cloned().unwrap_or(Value::Null));
                }
                Condition::in_list(spec.id_columns[0].clone(), names)
            } else {
                let mut alternatives = Vec::with_capacity(chunk.len());
                for (i, id) in chunk.iter().enumerate() {
                    let id_params = spec.id_params(id)?;
                    let mut parts = Vec::with_capacity(spec.id_props.len());
                    for (column, prop) in spec.id_columns.iter().zip(&spec.id_props) {
                        let name = format!("k{}_{}", i, prop);
                        params.set(name.clone(), id_params.get(prop).cloned().unwrap_or(Value::Null));
                        parts.push(Condition::eq(column.clone(), name));
                    }
                    alternatives.push(Condition::and(parts));
                }
                Condition::or(alternatives)
            };

            let parsed = ParsedSql::parse(&select_sql(&spec.columns, spec.entity.table(), &condition))?;
            log::trace!("batch_get chunk {} of {} ids", chunk_no, chunk.len());
            let mut cursor = open_cursor(
                &self.env,
                ctx,
                parsed.parameterized_sql(),
                &options,
                bind_record(&parsed, &params),
            )
            .await?;
            let columns = cursor.columns().to_vec();
            while let Some(row) = cursor.next_row().await? {
                let record = spec.map_row(&columns, &row)?;
                found.insert(self.lookup_key(&spec.get_id(&record)), record);
            }
        }

        let ordered = ids
            .iter()
            .filter_map(|id| found.get(&self.lookup_key(id)).cloned())
            .map(Value::Record)
            .collect();
        Ok(Value::List(ordered).into())
    }

    /// Normalizes an id so ids from rows and from the caller compare equal.
    fn lookup_key(&self, id: &Value) -> Value {
        match self.spec.id_params(id) {
            Ok(params) if self.spec.id_shape == IdShape::Scalar => {
                params.values().next().cloned().unwrap_or(Value::Null)
            }
            Ok(params) => Value::Record(params),
            Err(_) => id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DaoEnv;
    use crate::id::SequenceGenerator;
    use crate::core::{FieldShape, TypeShape};

    struct NoSource;

    #[async_trait::async_trait]
    impl crate::connection::DataSource for NoSource {
        fn identity(&self) -> String {
            "none".into()
        }

        async fn acquire(&self) -> Result<Box<dyn crate::connection::Connection>> {
            Err(DaoError::ExecutionError("no connections".into()))
        }
    }

    fn account() -> Arc<EntityShape> {
        EntityShape::new("Account", "account")
            .field(FieldShape::new("id", TypeShape::Integer).id())
            .field(FieldShape::new("firstName", TypeShape::Text))
            .field(FieldShape::new("createdAt", TypeShape::Text).not_updatable())
            .build()
    }

    fn env() -> DaoEnv {
        DaoEnv::new(Arc::new(NoSource))
    }

    #[test]
    fn test_templates() {
        let interface = InterfaceDescriptor::new("AccountDao")
            .entity(account(), TypeShape::Integer)
            .crud();
        let spec = CrudIdentitySpec::resolve(&interface, &env()).unwrap();
        let t = &spec.templates;
        assert_eq!(
            t.get.sql(),
            "SELECT id, first_name, created_at FROM account WHERE id = :id"
        );
        assert_eq!(t.exists.sql(), "SELECT 1 FROM account WHERE id = :id LIMIT 1");
        assert_eq!(
            t.insert_without_id.sql(),
            "INSERT INTO account (first_name, created_at) VALUES (:firstName, :createdAt)"
        );
        assert_eq!(
            t.update_by_id.as_ref().unwrap().sql(),
            "UPDATE account SET first_name = :firstName WHERE id = :id"
        );
        assert_eq!(t.delete_by_id.sql(), "DELETE FROM account WHERE id = :id");
        assert_eq!(spec.id_shape, IdShape::Scalar);
        assert_eq!(spec.id_columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_id_type_mismatch_is_configuration_error() {
        let interface = InterfaceDescriptor::new("AccountDao")
            .entity(account(), TypeShape::Text)
            .crud();
        let err = CrudIdentitySpec::resolve(&interface, &env()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_generator_is_configuration_error() {
        let interface = InterfaceDescriptor::new("AccountDao")
            .entity(account(), TypeShape::Integer)
            .id_generator("seq")
            .crud();
        assert!(CrudIdentitySpec::resolve(&interface, &env()).unwrap_err().is_configuration());

        let env = env().with_id_generator("seq", Arc::new(SequenceGenerator::default()));
        assert!(CrudIdentitySpec::resolve(&interface, &env).unwrap().generator.is_some());
    }

    #[test]
    fn test_composite_identity() {
        let key = EntityShape::new("MemberKey", "member")
            .field(FieldShape::new("groupId", TypeShape::Integer))
            .field(FieldShape::new("userId", TypeShape::Integer))
            .build();
        let member = EntityShape::new("Member", "member")
            .field(FieldShape::new("groupId", TypeShape::Integer).id())
            .field(FieldShape::new("userId", TypeShape::Integer).id())
            .field(FieldShape::new("role", TypeShape::Text))
            .build();
        let interface = InterfaceDescriptor::new("MemberDao")
            .entity(member, TypeShape::entity(&key))
            .crud();
        let spec = CrudIdentitySpec::resolve(&interface, &env()).unwrap();
        assert_eq!(spec.id_shape, IdShape::Composite);
        assert_eq!(
            spec.templates.delete_by_id.sql(),
            "DELETE FROM member WHERE group_id = :groupId AND user_id = :userId"
        );

        let record = Record::new().with("groupId", 1i64).with("userId", 0i64).with("role", "x");
        let id = spec.get_id(&record);
        assert!(!spec.is_default_id(&id));
        assert!(spec.is_default_id(&Value::Record(Record::new().with("groupId", 0i64))));

        let keys: Row = vec![Value::Integer(4), Value::Integer(5)];
        let from_keys = spec.id_from_keys(Some(&keys)).unwrap();
        assert_eq!(
            from_keys,
            Value::Record(Record::new().with("groupId", 4i64).with("userId", 5i64))
        );

        let cell = EntityCell::new(record);
        spec.set_id(&cell, &from_keys).unwrap();
        assert_eq!(cell.get("userId").unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_missing_keys_give_null() {
        let interface = InterfaceDescriptor::new("AccountDao")
            .entity(account(), TypeShape::Integer)
            .crud();
        let spec = CrudIdentitySpec::resolve(&interface, &env()).unwrap();
        assert_eq!(spec.id_from_keys(None).unwrap(), Value::Null);
        assert_eq!(
            spec.id_from_keys(Some(&vec![Value::from("7")])).unwrap(),
            Value::Integer(7)
        );
    }
}

use crate::core::{ContainerKind, DaoError, EntityShape, Result, TypeShape};
use crate::descriptor::{MethodDescriptor, OperationKind, StatementKind};
use crate::sql::NamingPolicy;
use std::sync::Arc;

use super::crud::CrudIdentitySpec;

/// Semantic category of a statement-backed method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodCategory {
    FindFirst,
    FindOnlyOne,
    List,
    Stream,
    Query,
    Exists,
    QueryForSingle,
    QueryForUnique,
    Insert,
    BatchInsert,
    Update,
    BatchUpdate,
    Delete,
    BatchDelete,
    Call,
    CallWithOutParameters,
}

impl MethodCategory {
    pub fn is_select(&self) -> bool {
        matches!(
            self,
            Self::FindFirst
                | Self::FindOnlyOne
                | Self::List
                | Self::Stream
                | Self::Query
                | Self::Exists
                | Self::QueryForSingle
                | Self::QueryForUnique
        )
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::BatchInsert | Self::BatchUpdate | Self::BatchDelete)
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call | Self::CallWithOutParameters)
    }
}

/// Row-count policy of single-row fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinglePolicy {
    /// First row, or null/zero when there is none.
    FirstOrNull,
    /// First row; no row is an error.
    FirstOrFail,
    /// The only row; more than one is an error, none yields null/zero.
    ExactlyOneOrFail,
}

/// How one result row becomes one element.
#[derive(Debug, Clone, PartialEq)]
pub enum RowShape {
    /// The caller's row mapper decides.
    Mapped,
    /// First column, converted to the scalar type.
    Column(TypeShape),
    Entity(Arc<EntityShape>),
    /// All columns as a record.
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectedShape {
    Unit,
    Count,
    Flag,
    /// One count per batch element.
    Counts,
}

/// How raw execution results become the declared return value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultStrategy {
    Scalar { ty: TypeShape, optional: bool, unique: bool },
    Single { row: RowShape, policy: SinglePolicy },
    Collection { row: RowShape, container: ContainerKind },
    Stream { row: RowShape },
    Tabular,
    /// `Map<key, List<row>>` keyed by one property of each mapped row.
    GroupedMap { key: String, row: RowShape },
    /// Join fetch: rows sharing the key properties merge into one entity.
    MergedByKeys { keys: Vec<String>, entity: Arc<EntityShape>, single: Option<SinglePolicy> },
    Extracted,
    Existence,
    Affected(AffectedShape),
    GeneratedId,
    GeneratedIds,
    OutParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: MethodCategory,
    pub strategy: ResultStrategy,
}

impl Classification {
    fn new(category: MethodCategory, strategy: ResultStrategy) -> Self {
        Self { category, strategy }
    }
}

const EXISTS_PREFIXES: [&str; 3] = ["exists", "exist", "has"];
const UNIQUE_PREFIXES: [&str; 4] = ["find_only_one", "find_unique", "get_only_one", "query_for_unique"];

/// Whether `name`, read as snake case, is `prefix` or starts with `prefix_`.
fn name_has_prefix(name: &str, prefixes: &[&str]) -> bool {
    let snake = NamingPolicy::SnakeCase.column_name(name);
    prefixes.iter().any(|p| {
        snake == *p || snake.strip_prefix(p).is_some_and(|rest| rest.starts_with('_'))
    })
}

struct Trailing {
    mapper: bool,
    extractor: bool,
}

/// Derives category and result strategy for a statement-backed method.
pub fn classify(method: &MethodDescriptor, crud: Option<&CrudIdentitySpec>) -> Result<Classification> {
    let fail = |msg: String| DaoError::config(format!("{}: {}", method.qualified_name(), msg));

    let kind = method
        .statement()
        .ok_or_else(|| fail("no statement kind declared".into()))?;
    let trailing = Trailing {
        mapper: method.params.iter().any(|p| p.ty == TypeShape::RowMapper),
        extractor: method.params.iter().any(|p| p.ty == TypeShape::ResultExtractor),
    };
    let meta = &method.metadata;

    if meta.batch && !kind.is_write() {
        return Err(fail(format!("batch execution is not supported for {:?}", kind)));
    }
    if (meta.merged_by.is_some() || meta.group_by.is_some()) && kind.is_write() {
        return Err(fail("merge and grouping apply to queries only".into()));
    }

    match kind {
        StatementKind::Select => {
            let strategy = select_strategy(method, meta.op, &trailing).map_err(fail)?;
            Ok(Classification::new(select_category(meta.op, &strategy), strategy))
        }
        StatementKind::Insert | StatementKind::Update | StatementKind::Delete => {
            if trailing.mapper || trailing.extractor
                || method.params.iter().any(|p| p.ty == TypeShape::RowFilter)
            {
                return Err(fail("write methods take no row mapper, filter or extractor".into()));
            }
            classify_write(method, kind, crud).map_err(fail)
        }
        StatementKind::Call => classify_call(method, &trailing).map_err(fail),
    }
}

fn select_category(op: OperationKind, strategy: &ResultStrategy) -> MethodCategory {
    match strategy {
        ResultStrategy::Existence => MethodCategory::Exists,
        ResultStrategy::Scalar { unique: true, .. } => MethodCategory::QueryForUnique,
        ResultStrategy::Scalar { .. } => MethodCategory::QueryForSingle,
        ResultStrategy::Single { policy: SinglePolicy::ExactlyOneOrFail, .. } => {
            MethodCategory::FindOnlyOne
        }
        ResultStrategy::Single { .. } => MethodCategory::FindFirst,
        ResultStrategy::MergedByKeys { single: Some(SinglePolicy::ExactlyOneOrFail), .. } => {
            MethodCategory::FindOnlyOne
        }
        ResultStrategy::MergedByKeys { single: Some(_), .. } => MethodCategory::FindFirst,
        ResultStrategy::Stream { .. } => MethodCategory::Stream,
        ResultStrategy::Tabular | ResultStrategy::Extracted => MethodCategory::Query,
        _ if op == OperationKind::Query => MethodCategory::Query,
        _ => MethodCategory::List,
    }
}

fn row_shape(element: &TypeShape, mapper: bool) -> std::result::Result<RowShape, String> {
    if mapper {
        return Ok(RowShape::Mapped);
    }
    match element {
        t if t.is_scalar() => Ok(RowShape::Column(t.clone())),
        TypeShape::Entity(e) => Ok(RowShape::Entity(Arc::clone(e))),
        TypeShape::Record | TypeShape::Any | TypeShape::Map(..) => Ok(RowShape::Record),
        other => Err(format!("cannot map a row to {}", other)),
    }
}

fn merged_entity(element: &TypeShape) -> std::result::Result<Arc<EntityShape>, String> {
    element
        .as_entity()
        .cloned()
        .ok_or_else(|| format!("merged_by requires an entity element, found {}", element))
}

/// Strategy for a single-row select; scalars without a mapper read the first column.
fn single_strategy(
    method: &MethodDescriptor,
    ret: &TypeShape,
    unique: bool,
    mapper: bool,
) -> std::result::Result<ResultStrategy, String> {
    let optional = matches!(ret, TypeShape::Optional(_));
    let inner = ret.unwrap_optional();

    if !mapper && inner.is_scalar() {
        return Ok(ResultStrategy::Scalar {
            ty: inner.clone(),
            optional,
            unique,
        });
    }

    let policy = if unique {
        SinglePolicy::ExactlyOneOrFail
    } else if !optional && matches!(inner, TypeShape::Entity(_) | TypeShape::Record) {
        SinglePolicy::FirstOrFail
    } else {
        SinglePolicy::FirstOrNull
    };

    if let Some(keys) = &method.metadata.merged_by {
        return Ok(ResultStrategy::MergedByKeys {
            keys: keys.clone(),
            entity: merged_entity(inner)?,
            single: Some(policy),
        });
    }

    Ok(ResultStrategy::Single {
        row: row_shape(inner, mapper)?,
        policy,
    })
}

fn collection_strategy(
    method: &MethodDescriptor,
    container: ContainerKind,
    element: &TypeShape,
    mapper: bool,
) -> std::result::Result<ResultStrategy, String> {
    if let Some(keys) = &method.metadata.merged_by {
        return Ok(ResultStrategy::MergedByKeys {
            keys: keys.clone(),
            entity: merged_entity(element)?,
            single: None,
        });
    }
    let container = match container {
        ContainerKind::Collection => ContainerKind::List,
        other => other,
    };
    Ok(ResultStrategy::Collection {
        row: row_shape(element, mapper)?,
        container,
    })
}

fn select_strategy(
    method: &MethodDescriptor,
    op: OperationKind,
    trailing: &Trailing,
) -> std::result::Result<ResultStrategy, String> {
    let ret = &method.return_type;
    let mapper = trailing.mapper;

    if trailing.extractor {
        return match op {
            OperationKind::Default | OperationKind::Query => Ok(ResultStrategy::Extracted),
            other => Err(format!("{:?} cannot be combined with a result extractor", other)),
        };
    }

    match op {
        OperationKind::Exists => match ret {
            TypeShape::Boolean => Ok(ResultStrategy::Existence),
            other => Err(format!("exists requires a boolean return, found {}", other)),
        },
        OperationKind::FindFirst | OperationKind::FindOnlyOne => {
            if ret.is_collection() || matches!(ret, TypeShape::Stream(_) | TypeShape::DataSet | TypeShape::Unit | TypeShape::Map(..)) {
                return Err(format!("{:?} requires a single-value return, found {}", op, ret));
            }
            single_strategy(method, ret, op == OperationKind::FindOnlyOne, mapper)
        }
        OperationKind::QueryForSingle | OperationKind::QueryForUnique => {
            let inner = ret.unwrap_optional();
            if !inner.is_scalar() && !matches!(inner, TypeShape::Any) {
                return Err(format!("{:?} requires a scalar return, found {}", op, ret));
            }
            Ok(ResultStrategy::Scalar {
                ty: inner.clone(),
                optional: matches!(ret, TypeShape::Optional(_)),
                unique: op == OperationKind::QueryForUnique,
            })
        }
        OperationKind::List => match ret {
            TypeShape::Collection(ContainerKind::Collection, _) => Err(format!(
                "list requires a concrete List or Set return, found {}",
                ret
            )),
            TypeShape::Collection(container, element) => {
                collection_strategy(method, *container, element, mapper)
            }
            TypeShape::Array(element) => {
                collection_strategy(method, ContainerKind::List, element, mapper)
            }
            other => Err(format!("list requires a collection return, found {}", other)),
        },
        OperationKind::Stream => match ret {
            TypeShape::Stream(element) => Ok(ResultStrategy::Stream {
                row: row_shape(element, mapper)?,
            }),
            other => Err(format!("stream requires a stream return, found {}", other)),
        },
        OperationKind::Query => match ret {
            TypeShape::DataSet => Ok(ResultStrategy::Tabular),
            other => Err(format!("query requires a data set return, found {}", other)),
        },
        OperationKind::Update
        | OperationKind::LargeUpdate
        | OperationKind::ExecuteAndGetOutParameters => {
            Err(format!("{:?} is not valid for a select statement", op))
        }
        OperationKind::Default => infer_select(method, ret, mapper),
    }
}

fn infer_select(
    method: &MethodDescriptor,
    ret: &TypeShape,
    mapper: bool,
) -> std::result::Result<ResultStrategy, String> {
    let name = method.name.as_ref();
    if *ret == TypeShape::Boolean && !mapper && name_has_prefix(name, &EXISTS_PREFIXES) {
        return Ok(ResultStrategy::Existence);
    }

    match ret {
        TypeShape::Unit => Err("select methods must return a value".into()),
        TypeShape::DataSet => Ok(ResultStrategy::Tabular),
        TypeShape::Stream(element) => Ok(ResultStrategy::Stream {
            row: row_shape(element, mapper)?,
        }),
        TypeShape::Collection(container, element) => {
            collection_strategy(method, *container, element, mapper)
        }
        TypeShape::Array(element) => collection_strategy(method, ContainerKind::List, element, mapper),
        TypeShape::Map(_, value) => {
            let key = method
                .metadata
                .group_by
                .clone()
                .ok_or_else(|| "map returns require a group_by key".to_string())?;
            let element = value
                .element()
                .ok_or_else(|| format!("grouped values must be collections, found {}", value))?;
            Ok(ResultStrategy::GroupedMap {
                key,
                row: row_shape(element, mapper)?,
            })
        }
        TypeShape::RowMapper | TypeShape::RowFilter | TypeShape::ResultExtractor => {
            Err(format!("{} is not a valid return type", ret))
        }
        _ => single_strategy(method, ret, name_has_prefix(name, &UNIQUE_PREFIXES), mapper),
    }
}

fn affected_shape(ret: &TypeShape, batch: bool) -> std::result::Result<AffectedShape, String> {
    match ret {
        TypeShape::Unit => Ok(AffectedShape::Unit),
        TypeShape::Integer => Ok(AffectedShape::Count),
        TypeShape::Boolean => Ok(AffectedShape::Flag),
        TypeShape::Collection(_, e) | TypeShape::Array(e) if batch && **e == TypeShape::Integer => {
            Ok(AffectedShape::Counts)
        }
        other => Err(format!("write methods return (), i64 or bool, found {}", other)),
    }
}

/// The statement parameters: everything that is neither a macro nor functional.
fn statement_params(method: &MethodDescriptor) -> impl Iterator<Item = &TypeShape> {
    method
        .params
        .iter()
        .filter(|p| !p.is_macro() && !p.ty.is_functional())
        .map(|p| &p.ty)
}

fn is_crud_entity(ty: &TypeShape, crud: &CrudIdentitySpec) -> bool {
    ty.as_entity().is_some_and(|e| **e == *crud.entity)
}

fn classify_write(
    method: &MethodDescriptor,
    kind: StatementKind,
    crud: Option<&CrudIdentitySpec>,
) -> std::result::Result<Classification, String> {
    let meta = &method.metadata;
    if !matches!(
        meta.op,
        OperationKind::Default | OperationKind::Update | OperationKind::LargeUpdate
    ) {
        return Err(format!("{:?} is not valid for a {:?} statement", meta.op, kind));
    }
    let ret = &method.return_type;
    let params: Vec<&TypeShape> = statement_params(method).collect();

    if meta.batch {
        let element = params
            .first()
            .and_then(|p| p.element())
            .ok_or("batch methods take a collection as their first argument")?;
        let category = match kind {
            StatementKind::Insert => MethodCategory::BatchInsert,
            StatementKind::Update => MethodCategory::BatchUpdate,
            _ => MethodCategory::BatchDelete,
        };
        let returns_ids = kind == StatementKind::Insert
            && crud.is_some_and(|c| {
                is_crud_entity(element, c)
                    && ret.element().is_some_and(|e| *e == c.id_type)
            });
        let strategy = if returns_ids {
            ResultStrategy::GeneratedIds
        } else {
            ResultStrategy::Affected(affected_shape(ret, true)?)
        };
        return Ok(Classification::new(category, strategy));
    }

    let category = match kind {
        StatementKind::Insert => MethodCategory::Insert,
        StatementKind::Update => MethodCategory::Update,
        _ => MethodCategory::Delete,
    };
    let returns_id = kind == StatementKind::Insert
        && params.len() == 1
        && crud.is_some_and(|c| is_crud_entity(params[0], c) && *ret == c.id_type);
    let strategy = if returns_id {
        ResultStrategy::GeneratedId
    } else {
        ResultStrategy::Affected(affected_shape(ret, false)?)
    };
    Ok(Classification::new(category, strategy))
}

fn classify_call(method: &MethodDescriptor, trailing: &Trailing) -> std::result::Result<Classification, String> {
    let meta = &method.metadata;
    let category = if meta.out_parameters.is_empty() {
        MethodCategory::Call
    } else {
        MethodCategory::CallWithOutParameters
    };

    let strategy = match meta.op {
        OperationKind::ExecuteAndGetOutParameters => {
            if meta.out_parameters.is_empty() {
                return Err("no output parameters declared".into());
            }
            match method.return_type {
                TypeShape::Record | TypeShape::Any | TypeShape::Map(..) => ResultStrategy::OutParameters,
                ref other => {
                    return Err(format!("output parameters are returned as a record, found {}", other));
                }
            }
        }
        OperationKind::Update | OperationKind::LargeUpdate => {
            ResultStrategy::Affected(affected_shape(&method.return_type, false)?)
        }
        OperationKind::Default
            if matches!(
                method.return_type,
                TypeShape::Unit | TypeShape::Integer | TypeShape::Boolean
            ) && !trailing.mapper =>
        {
            ResultStrategy::Affected(affected_shape(&method.return_type, false)?)
        }
        // Anything else reads the first result set like a query would.
        op => select_strategy(method, op, trailing)?,
    };
    Ok(Classification::new(category, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InterfaceDescriptor, MethodDecl, extract};
    use crate::sql::InMemoryQueryRegistry;

    fn describe(decl: MethodDecl) -> MethodDescriptor {
        let interface = InterfaceDescriptor::new("TestDao").method(decl);
        extract(&interface, &InMemoryQueryRegistry::new("r"))
            .unwrap()
            .remove(0)
    }

    fn account() -> Arc<EntityShape> {
        use crate::core::FieldShape;
        EntityShape::new("Account", "account")
            .field(FieldShape::new("id", TypeShape::Integer).id())
            .field(FieldShape::new("name", TypeShape::Text))
            .build()
    }

    #[test]
    fn test_exists_by_name_prefix() {
        let m = describe(
            MethodDecl::select("existsByName", "SELECT 1 FROM account WHERE name = :name")
                .bind("name", TypeShape::Text, "name")
                .returns(TypeShape::Boolean),
        );
        let c = classify(&m, None).unwrap();
        assert_eq!(c.category, MethodCategory::Exists);
        assert_eq!(c.strategy, ResultStrategy::Existence);

        let plain = describe(MethodDecl::select("isActive", "SELECT active FROM t").returns(TypeShape::Boolean));
        let c = classify(&plain, None).unwrap();
        assert_eq!(c.category, MethodCategory::QueryForSingle);
    }

    #[test]
    fn test_unique_prefix_on_scalar_and_entity() {
        let m = describe(MethodDecl::select("findOnlyOneName", "SELECT name FROM t").returns(TypeShape::Text));
        assert_eq!(
            classify(&m, None).unwrap().strategy,
            ResultStrategy::Scalar { ty: TypeShape::Text, optional: false, unique: true }
        );

        let e = account();
        let m = describe(
            MethodDecl::select("find_unique_by_name", "SELECT * FROM account")
                .returns(TypeShape::optional(TypeShape::entity(&e))),
        );
        let c = classify(&m, None).unwrap();
        assert_eq!(c.category, MethodCategory::FindOnlyOne);
    }

    #[test]
    fn test_single_entity_policies() {
        let e = account();
        let required = describe(MethodDecl::select("byName", "SELECT * FROM account").returns(TypeShape::entity(&e)));
        assert!(matches!(
            classify(&required, None).unwrap().strategy,
            ResultStrategy::Single { policy: SinglePolicy::FirstOrFail, .. }
        ));

        let optional = describe(
            MethodDecl::select("byName", "SELECT * FROM account")
                .returns(TypeShape::optional(TypeShape::entity(&e))),
        );
        assert!(matches!(
            classify(&optional, None).unwrap().strategy,
            ResultStrategy::Single { policy: SinglePolicy::FirstOrNull, .. }
        ));
    }

    #[test]
    fn test_list_op_requires_concrete_container() {
        let abstract_ret = describe(
            MethodDecl::select("all", "SELECT name FROM t")
                .op(OperationKind::List)
                .returns(TypeShape::Collection(ContainerKind::Collection, Box::new(TypeShape::Text))),
        );
        assert!(classify(&abstract_ret, None).unwrap_err().is_configuration());

        let inferred = describe(
            MethodDecl::select("all", "SELECT name FROM t")
                .returns(TypeShape::Collection(ContainerKind::Collection, Box::new(TypeShape::Text))),
        );
        assert_eq!(
            classify(&inferred, None).unwrap().strategy,
            ResultStrategy::Collection {
                row: RowShape::Column(TypeShape::Text),
                container: ContainerKind::List
            }
        );
    }

    #[test]
    fn test_incompatible_op_rejected() {
        let m = describe(
            MethodDecl::select("count", "SELECT COUNT(*) FROM t")
                .op(OperationKind::Exists)
                .returns(TypeShape::Integer),
        );
        assert!(classify(&m, None).unwrap_err().is_configuration());

        let m = describe(
            MethodDecl::update("touch", "UPDATE t SET x = 1")
                .op(OperationKind::List)
                .returns(TypeShape::Integer),
        );
        assert!(classify(&m, None).unwrap_err().is_configuration());
    }

    #[test]
    fn test_mapper_and_extractor() {
        let mapped = describe(
            MethodDecl::select("names", "SELECT name FROM t")
                .mapper()
                .returns(TypeShape::list(TypeShape::Any)),
        );
        assert_eq!(
            classify(&mapped, None).unwrap().strategy,
            ResultStrategy::Collection { row: RowShape::Mapped, container: ContainerKind::List }
        );

        let extracted = describe(
            MethodDecl::select("summary", "SELECT * FROM t")
                .extractor()
                .returns(TypeShape::Any),
        );
        let c = classify(&extracted, None).unwrap();
        assert_eq!(c.category, MethodCategory::Query);
        assert_eq!(c.strategy, ResultStrategy::Extracted);
    }

    #[test]
    fn test_grouped_map_needs_key() {
        let ret = TypeShape::map(TypeShape::Text, TypeShape::list(TypeShape::Record));
        let missing = describe(MethodDecl::select("byCity", "SELECT * FROM t").returns(ret.clone()));
        assert!(classify(&missing, None).is_err());

        let grouped = describe(MethodDecl::select("byCity", "SELECT * FROM t").group_by("city").returns(ret));
        assert_eq!(
            classify(&grouped, None).unwrap().strategy,
            ResultStrategy::GroupedMap { key: "city".into(), row: RowShape::Record }
        );
    }

    #[test]
    fn test_write_returns() {
        let m = describe(
            MethodDecl::delete("purge", "DELETE FROM t WHERE id = ?")
                .param("id", TypeShape::Integer)
                .returns(TypeShape::Boolean),
        );
        let c = classify(&m, None).unwrap();
        assert_eq!(c.category, MethodCategory::Delete);
        assert_eq!(c.strategy, ResultStrategy::Affected(AffectedShape::Flag));

        let batch = describe(
            MethodDecl::update("touchAll", "UPDATE t SET x = 1 WHERE id = ?")
                .param("ids", TypeShape::list(TypeShape::Integer))
                .batch(None)
                .returns(TypeShape::list(TypeShape::Integer)),
        );
        let c = classify(&batch, None).unwrap();
        assert_eq!(c.category, MethodCategory::BatchUpdate);
        assert_eq!(c.strategy, ResultStrategy::Affected(AffectedShape::Counts));

        let bad = describe(MethodDecl::update("x", "UPDATE t SET x = 1").returns(TypeShape::Text));
        assert!(classify(&bad, None).is_err());
    }

    #[test]
    fn test_batch_requires_collection_argument() {
        let m = describe(
            MethodDecl::insert("add", "INSERT INTO t (x) VALUES (?)")
                .param("x", TypeShape::Integer)
                .batch(None),
        );
        assert!(classify(&m, None).unwrap_err().is_configuration());
    }

    #[test]
    fn test_call_with_out_parameters() {
        let m = describe(
            MethodDecl::call("stats", "{call account_stats(?, ?)}")
                .param("region", TypeShape::Text)
                .out_parameter(2, "total")
                .op(OperationKind::ExecuteAndGetOutParameters)
                .returns(TypeShape::Record),
        );
        let c = classify(&m, None).unwrap();
        assert_eq!(c.category, MethodCategory::CallWithOutParameters);
        assert_eq!(c.strategy, ResultStrategy::OutParameters);

        let rows = describe(
            MethodDecl::call("listAll", "{call list_accounts()}").returns(TypeShape::list(TypeShape::Record)),
        );
        let c = classify(&rows, None).unwrap();
        assert_eq!(c.category, MethodCategory::Call);
        assert!(matches!(c.strategy, ResultStrategy::Collection { .. }));
    }
}

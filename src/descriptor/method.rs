use crate::connection::IsolationLevel;
use crate::core::{Arg, Result, TypeShape};
use crate::dispatch::{CallContext, Dao};
use crate::result::Output;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// SQL verb declared on a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Call,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

/// Declared operation intent; `Default` defers to naming and return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationKind {
    #[default]
    Default,
    Exists,
    FindFirst,
    FindOnlyOne,
    List,
    Query,
    Stream,
    QueryForSingle,
    QueryForUnique,
    ExecuteAndGetOutParameters,
    Update,
    LargeUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Inline(String),
    /// Id looked up in the query registry during extraction.
    Registry(String),
}

/// How a macro argument is woven into the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroKind {
    /// Plain string conversion of the value.
    Plain,
    /// Comma-separated literal rendering of a list.
    List,
    /// One named placeholder per list element.
    BindList,
}

/// Per-parameter binding directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamDirective {
    /// Inferred from the parameter type and the query.
    Auto,
    /// Bind to the named placeholder.
    Bind(String),
    /// Bind fields of a structured argument; `prefix.field` names when prefixed.
    BindObject { prefix: Option<String> },
    /// Positional IN-list expansion: one `?` per element.
    Expand,
    /// Textual substitution of `placeholder` before parameter parsing.
    Macro { placeholder: String, kind: MacroKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub ty: TypeShape,
    pub directive: ParamDirective,
}

impl ParamDescriptor {
    pub fn is_macro(&self) -> bool {
        matches!(self.directive, ParamDirective::Macro { .. })
    }
}

/// Transaction propagation applied around a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// Run in the caller's transaction if there is one.
    Supports,
    /// Join the caller's transaction or begin one.
    Required,
    /// Suspend the caller's transaction and begin a fresh one.
    RequiresNew,
    /// Suspend the caller's transaction and run without one.
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDirective {
    pub propagation: Propagation,
    pub isolation: IsolationLevel,
}

impl TransactionDirective {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            isolation: IsolationLevel::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
    pub live_time: Option<Duration>,
    pub max_idle_time: Option<Duration>,
    /// Collection results smaller than this are not stored.
    pub min_size: usize,
    /// Collection results larger than this are not stored.
    pub max_size: usize,
}

impl Default for CacheDirective {
    fn default() -> Self {
        Self {
            live_time: None,
            max_idle_time: None,
            min_size: 0,
            max_size: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlLogDirective {
    pub enabled: bool,
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfLogDirective {
    pub min_sql_time: Duration,
    pub min_dao_time: Duration,
}

/// Stored-procedure output slot (1-based position in the call text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParameter {
    pub position: usize,
    pub name: String,
}

pub type CustomFn =
    Arc<dyn Fn(Dao, CallContext, Arc<[Arg]>) -> BoxFuture<'static, Result<Output>> + Send + Sync>;

/// Built-in CRUD operations generated for identity-bearing interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudOp {
    Insert,
    BatchInsert,
    Get,
    Exists,
    BatchGet,
    Update,
    BatchUpdate,
    Delete,
    DeleteById,
    BatchDelete,
}

impl CrudOp {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::Exists | Self::BatchGet)
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::BatchInsert => "batch_insert",
            Self::Get => "get",
            Self::Exists => "exists",
            Self::BatchGet => "batch_get",
            Self::Update => "update",
            Self::BatchUpdate => "batch_update",
            Self::Delete => "delete",
            Self::DeleteById => "delete_by_id",
            Self::BatchDelete => "batch_delete",
        }
    }

    pub const ALL: [CrudOp; 10] = [
        Self::Insert,
        Self::BatchInsert,
        Self::Get,
        Self::Exists,
        Self::BatchGet,
        Self::Update,
        Self::BatchUpdate,
        Self::Delete,
        Self::DeleteById,
        Self::BatchDelete,
    ];
}

#[derive(Clone)]
pub enum MethodBody {
    Statement,
    Crud(CrudOp),
    Custom(CustomFn),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statement => f.write_str("Statement"),
            Self::Crud(op) => f.debug_tuple("Crud").field(op).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Raw declarative metadata attached to a method.
#[derive(Debug, Clone, Default)]
pub struct MethodMetadata {
    pub statement: Option<StatementKind>,
    pub query: Option<QuerySource>,
    pub op: OperationKind,
    pub batch: bool,
    pub batch_size: Option<usize>,
    pub timeout: Option<Duration>,
    pub fetch_size: Option<usize>,
    pub merged_by: Option<Vec<String>>,
    pub group_by: Option<String>,
    pub out_parameters: Vec<OutParameter>,
    pub transaction: Option<TransactionDirective>,
    pub cache: Option<CacheDirective>,
    pub refresh_cache: bool,
    pub sql_log: Option<SqlLogDirective>,
    pub perf_log: Option<PerfLogDirective>,
    pub hooks: Vec<String>,
}

/// A method as declared, before extraction.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    pub return_type: TypeShape,
    pub metadata: MethodMetadata,
    pub body: MethodBody,
}

impl MethodDecl {
    fn new(name: impl Into<String>, statement: Option<StatementKind>, query: Option<QuerySource>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            return_type: TypeShape::Unit,
            metadata: MethodMetadata {
                statement,
                query,
                ..Default::default()
            },
            body: MethodBody::Statement,
        }
    }

    pub fn select(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Some(StatementKind::Select), Some(QuerySource::Inline(sql.into())))
    }

    pub fn insert(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Some(StatementKind::Insert), Some(QuerySource::Inline(sql.into())))
    }

    pub fn update(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Some(StatementKind::Update), Some(QuerySource::Inline(sql.into())))
    }

    pub fn delete(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Some(StatementKind::Delete), Some(QuerySource::Inline(sql.into())))
    }

    pub fn call(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, Some(StatementKind::Call), Some(QuerySource::Inline(sql.into())))
    }

    /// Statement text comes from the query registry under `id`.
    pub fn registered(name: impl Into<String>, statement: StatementKind, id: impl Into<String>) -> Self {
        Self::new(name, Some(statement), Some(QuerySource::Registry(id.into())))
    }

    /// Method with a hand-written body; it may call other methods of the same `Dao`.
    pub fn custom<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Dao, CallContext, Arc<[Arg]>) -> BoxFuture<'static, Result<Output>>
            + Send
            + Sync
            + 'static,
    {
        let mut decl = Self::new(name, None, None);
        decl.body = MethodBody::Custom(Arc::new(body));
        decl
    }

    pub(crate) fn crud(op: CrudOp) -> Self {
        let mut decl = Self::new(op.method_name(), None, None);
        decl.body = MethodBody::Crud(op);
        decl
    }

    fn param_with(mut self, name: impl Into<String>, ty: TypeShape, directive: ParamDirective) -> Self {
        self.params.push(ParamDescriptor {
            name: name.into(),
            ty,
            directive,
        });
        self
    }

    pub fn param(self, name: impl Into<String>, ty: TypeShape) -> Self {
        self.param_with(name, ty, ParamDirective::Auto)
    }

    /// Parameter bound to the named placeholder `bind_name`.
    pub fn bind(self, name: impl Into<String>, ty: TypeShape, bind_name: impl Into<String>) -> Self {
        self.param_with(name, ty, ParamDirective::Bind(bind_name.into()))
    }

    pub fn bind_object(self, name: impl Into<String>, ty: TypeShape, prefix: Option<&str>) -> Self {
        let prefix = prefix.map(str::to_string);
        self.param_with(name, ty, ParamDirective::BindObject { prefix })
    }

    pub fn expand(self, name: impl Into<String>, ty: TypeShape) -> Self {
        self.param_with(name, ty, ParamDirective::Expand)
    }

    /// Macro parameter; `placeholder` is wrapped in braces unless it already is.
    pub fn define(self, name: impl Into<String>, ty: TypeShape, placeholder: &str, kind: MacroKind) -> Self {
        let placeholder = if placeholder.starts_with('{') && placeholder.ends_with('}') {
            placeholder.to_string()
        } else {
            format!("{{{}}}", placeholder)
        };
        self.param_with(name, ty, ParamDirective::Macro { placeholder, kind })
    }

    pub fn mapper(self) -> Self {
        self.param_with("mapper", TypeShape::RowMapper, ParamDirective::Auto)
    }

    pub fn filter(self) -> Self {
        self.param_with("filter", TypeShape::RowFilter, ParamDirective::Auto)
    }

    pub fn extractor(self) -> Self {
        self.param_with("extractor", TypeShape::ResultExtractor, ParamDirective::Auto)
    }

    pub fn returns(mut self, ty: TypeShape) -> Self {
        self.return_type = ty;
        self
    }

    pub fn op(mut self, op: OperationKind) -> Self {
        self.metadata.op = op;
        self
    }

    pub fn batch(mut self, batch_size: Option<usize>) -> Self {
        self.metadata.batch = true;
        self.metadata.batch_size = batch_size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.metadata.timeout = Some(timeout);
        self
    }

    pub fn fetch_size(mut self, size: usize) -> Self {
        self.metadata.fetch_size = Some(size);
        self
    }

    pub fn merged_by(mut self, keys: &[&str]) -> Self {
        self.metadata.merged_by = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn group_by(mut self, key: impl Into<String>) -> Self {
        self.metadata.group_by = Some(key.into());
        self
    }

    pub fn out_parameter(mut self, position: usize, name: impl Into<String>) -> Self {
        self.metadata.out_parameters.push(OutParameter {
            position,
            name: name.into(),
        });
        self
    }

    pub fn transactional(mut self, directive: TransactionDirective) -> Self {
        self.metadata.transaction = Some(directive);
        self
    }

    pub fn cached(mut self, directive: CacheDirective) -> Self {
        self.metadata.cache = Some(directive);
        self
    }

    pub fn refresh_cache(mut self) -> Self {
        self.metadata.refresh_cache = true;
        self
    }

    pub fn sql_log(mut self, directive: SqlLogDirective) -> Self {
        self.metadata.sql_log = Some(directive);
        self
    }

    pub fn perf_log(mut self, directive: PerfLogDirective) -> Self {
        self.metadata.perf_log = Some(directive);
        self
    }

    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.metadata.hooks.push(name.into());
        self
    }
}

/// Extracted, immutable description of one method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub interface: Arc<str>,
    pub name: Arc<str>,
    pub params: Vec<ParamDescriptor>,
    pub return_type: TypeShape,
    pub metadata: MethodMetadata,
    pub body: MethodBody,
    /// Final query text after registry resolution.
    pub query_text: Option<String>,
}

impl MethodDescriptor {
    /// `Interface.method`, used in diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.interface, self.name)
    }

    pub fn statement(&self) -> Option<StatementKind> {
        self.metadata.statement
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.body, MethodBody::Custom(_))
    }

    pub fn crud_op(&self) -> Option<CrudOp> {
        match self.body {
            MethodBody::Crud(op) => Some(op),
            _ => None,
        }
    }

    /// Whether the method only reads.
    pub fn is_read(&self) -> bool {
        match (&self.body, self.metadata.statement) {
            (MethodBody::Crud(op), _) => op.is_read(),
            (MethodBody::Custom(_), _) => true,
            (_, Some(StatementKind::Select)) => true,
            _ => false,
        }
    }
}

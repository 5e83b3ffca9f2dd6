use std::fmt;
use std::sync::Arc;
use super::{DaoError, Result, Value};

pub type Row = Vec<Value>;

/// Target container of a collection-typed return or parameter.
///
/// `Collection` is the abstract "any collection" declaration; it is rejected
/// where a concrete container is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    List,
    Set,
    Collection,
}

/// Declared shape of a parameter or return type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeShape {
    Unit,
    Boolean,
    Integer,
    Float,
    Text,
    /// Untyped value; rows map to a record, single columns to a scalar.
    Any,
    /// Untyped structured object (field names known only at call time).
    Record,
    Entity(Arc<EntityShape>),
    Optional(Box<TypeShape>),
    Collection(ContainerKind, Box<TypeShape>),
    Array(Box<TypeShape>),
    Stream(Box<TypeShape>),
    DataSet,
    Map(Box<TypeShape>, Box<TypeShape>),
    RowMapper,
    RowFilter,
    ResultExtractor,
}

impl TypeShape {
    pub fn optional(inner: TypeShape) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn list(element: TypeShape) -> Self {
        Self::Collection(ContainerKind::List, Box::new(element))
    }

    pub fn set(element: TypeShape) -> Self {
        Self::Collection(ContainerKind::Set, Box::new(element))
    }

    pub fn stream(element: TypeShape) -> Self {
        Self::Stream(Box::new(element))
    }

    pub fn map(key: TypeShape, value: TypeShape) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn entity(shape: &Arc<EntityShape>) -> Self {
        Self::Entity(Arc::clone(shape))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Boolean | Self::Integer | Self::Float | Self::Text)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(..) | Self::Array(_))
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Record | Self::Entity(_) | Self::Map(..))
    }

    pub fn is_functional(&self) -> bool {
        matches!(self, Self::RowMapper | Self::RowFilter | Self::ResultExtractor)
    }

    /// Element type of a collection, array or stream.
    pub fn element(&self) -> Option<&TypeShape> {
        match self {
            Self::Collection(_, e) | Self::Array(e) | Self::Stream(e) => Some(e),
            _ => None,
        }
    }

    /// Strips one `Optional` layer.
    pub fn unwrap_optional(&self) -> &TypeShape {
        match self {
            Self::Optional(inner) => inner,
            other => other,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<EntityShape>> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// The value a declared non-optional slot holds when no row supplied one.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Integer => Value::Integer(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Collection(..) | Self::Array(_) => Value::List(Vec::new()),
            Self::Map(..) => Value::Map(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Converts a raw column value into this declared type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Any | Self::Unit | Self::DataSet => Ok(value),
            Self::Optional(inner) => inner.coerce(value),
            Self::Integer => value
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| self.mismatch(&value)),
            Self::Float => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| self.mismatch(&value)),
            Self::Boolean => match &value {
                Value::Boolean(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Boolean(*i != 0)),
                Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
                Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
                _ => Err(self.mismatch(&value)),
            },
            Self::Text => match value {
                Value::Text(_) => Ok(value),
                Value::List(_) | Value::Record(_) | Value::Map(_) => Err(self.mismatch(&value)),
                other => Ok(Value::Text(other.to_string())),
            },
            Self::Record | Self::Entity(_) => match value {
                Value::Record(_) => Ok(value),
                other => Err(self.mismatch(&other)),
            },
            Self::Collection(_, element) | Self::Array(element) | Self::Stream(element) => {
                match value {
                    Value::List(items) => items
                        .into_iter()
                        .map(|item| element.coerce(item))
                        .collect::<Result<Vec<_>>>()
                        .map(Value::List),
                    other => Err(self.mismatch(&other)),
                }
            }
            Self::Map(..) => match value {
                Value::Map(_) | Value::Record(_) => Ok(value),
                other => Err(self.mismatch(&other)),
            },
            Self::RowMapper | Self::RowFilter | Self::ResultExtractor => Err(self.mismatch(&value)),
        }
    }

    fn mismatch(&self, value: &Value) -> DaoError {
        DaoError::TypeMismatch(format!("cannot convert {} to {}", value.type_name(), self))
    }
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Boolean => write!(f, "bool"),
            Self::Integer => write!(f, "i64"),
            Self::Float => write!(f, "f64"),
            Self::Text => write!(f, "String"),
            Self::Any => write!(f, "Value"),
            Self::Record => write!(f, "Record"),
            Self::Entity(e) => write!(f, "{}", e.name()),
            Self::Optional(inner) => write!(f, "Option<{}>", inner),
            Self::Collection(ContainerKind::List, e) => write!(f, "List<{}>", e),
            Self::Collection(ContainerKind::Set, e) => write!(f, "Set<{}>", e),
            Self::Collection(ContainerKind::Collection, e) => write!(f, "Collection<{}>", e),
            Self::Array(e) => write!(f, "[{}]", e),
            Self::Stream(e) => write!(f, "Stream<{}>", e),
            Self::DataSet => write!(f, "DataSet"),
            Self::Map(k, v) => write!(f, "Map<{}, {}>", k, v),
            Self::RowMapper => write!(f, "RowMapper"),
            Self::RowFilter => write!(f, "RowFilter"),
            Self::ResultExtractor => write!(f, "ResultExtractor"),
        }
    }
}

/// One property of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub name: String,
    /// Explicit column name; derived from the naming policy when absent.
    pub column: Option<String>,
    pub ty: TypeShape,
    pub id: bool,
    pub insertable: bool,
    pub updatable: bool,
}

impl FieldShape {
    pub fn new(name: impl Into<String>, ty: TypeShape) -> Self {
        Self {
            name: name.into(),
            column: None,
            ty,
            id: false,
            insertable: true,
            updatable: true,
        }
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.insertable = false;
        self.updatable = false;
        self
    }

    pub fn not_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// Nested entity fields are filled from `field.sub` columns during join fetch.
    pub fn nested_entity(&self) -> Option<&Arc<EntityShape>> {
        match &self.ty {
            TypeShape::Entity(e) => Some(e),
            TypeShape::Optional(inner) => inner.as_entity(),
            TypeShape::Collection(_, e) => e.as_entity(),
            _ => None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.nested_entity().is_none()
    }
}

/// Persistent shape of an entity: table plus ordered fields.
#[derive(Debug, Clone)]
pub struct EntityShape {
    name: String,
    table: String,
    fields: Vec<FieldShape>,
}

impl EntityShape {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldShape) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldShape] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id_fields(&self) -> impl Iterator<Item = &FieldShape> {
        self.fields.iter().filter(|f| f.id)
    }

    pub fn persistent_fields(&self) -> impl Iterator<Item = &FieldShape> {
        self.fields.iter().filter(|f| f.is_persistent())
    }

    /// Resolves a result column label to a field: exact name, explicit column,
    /// then a case- and underscore-insensitive match.
    pub fn field_for_label(&self, label: &str) -> Option<&FieldShape> {
        if let Some(f) = self.get_field(label) {
            return Some(f);
        }
        if let Some(f) = self
            .fields
            .iter()
            .find(|f| f.column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(label)))
        {
            return Some(f);
        }
        let wanted = normalize_label(label);
        self.fields.iter().find(|f| normalize_label(&f.name) == wanted)
    }
}

impl PartialEq for EntityShape {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table == other.table
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

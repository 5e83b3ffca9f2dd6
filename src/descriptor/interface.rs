use super::method::{
    CacheDirective, MethodDecl, PerfLogDirective, SqlLogDirective, TransactionDirective,
};
use crate::core::{EntityShape, TypeShape};
use std::sync::Arc;
use uuid::Uuid;

/// Directives declared once on the interface and inherited by its methods.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDefaults {
    pub transaction: Option<TransactionDirective>,
    pub cache: Option<CacheDirective>,
    pub sql_log: Option<SqlLogDirective>,
    pub perf_log: Option<PerfLogDirective>,
    pub hooks: Vec<String>,
}

/// Declarative description of a data-access interface.
///
/// ```ignore
/// let accounts = InterfaceDescriptor::new("AccountDao")
///     .entity(account_shape, TypeShape::Integer)
///     .crud()
///     .method(
///         MethodDecl::select("findByName", "SELECT * FROM account WHERE name = :name")
///             .bind("name", TypeShape::Text, "name")
///             .returns(TypeShape::list(TypeShape::entity(&account_shape))),
///     );
/// ```
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub entity: Option<Arc<EntityShape>>,
    pub id_type: Option<TypeShape>,
    pub read_only: bool,
    pub crud: bool,
    /// Name of the registered id generator used by CRUD inserts.
    pub id_generator: Option<String>,
    pub defaults: InterfaceDefaults,
    pub methods: Vec<MethodDecl>,
}

impl InterfaceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: None,
            id_type: None,
            read_only: false,
            crud: false,
            id_generator: None,
            defaults: InterfaceDefaults::default(),
            methods: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: Arc<EntityShape>, id_type: TypeShape) -> Self {
        self.entity = Some(entity);
        self.id_type = Some(id_type);
        self
    }

    /// Generates the built-in CRUD methods for the entity.
    pub fn crud(mut self) -> Self {
        self.crud = true;
        self
    }

    /// Only read methods may be declared; results may be cached.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn id_generator(mut self, name: impl Into<String>) -> Self {
        self.id_generator = Some(name.into());
        self
    }

    pub fn transactional(mut self, directive: TransactionDirective) -> Self {
        self.defaults.transaction = Some(directive);
        self
    }

    pub fn cached(mut self, directive: CacheDirective) -> Self {
        self.defaults.cache = Some(directive);
        self
    }

    pub fn sql_log(mut self, directive: SqlLogDirective) -> Self {
        self.defaults.sql_log = Some(directive);
        self
    }

    pub fn perf_log(mut self, directive: PerfLogDirective) -> Self {
        self.defaults.perf_log = Some(directive);
        self
    }

    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.defaults.hooks.push(name.into());
        self
    }

    pub fn method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    /// Content digest of the whole declaration: entity, flags, defaults and
    /// every method's signature and directives.
    ///
    /// Custom bodies contribute only their presence, so two declarations that
    /// differ solely in a closure share a fingerprint.
    pub fn fingerprint(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{:?}", self).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count() -> MethodDecl {
        MethodDecl::select("count", "SELECT COUNT(*) FROM account").returns(TypeShape::Integer)
    }

    #[test]
    fn test_fingerprint_follows_content() {
        let a = InterfaceDescriptor::new("AccountDao").method(count());
        let b = InterfaceDescriptor::new("AccountDao").method(count());
        assert_eq!(a.fingerprint(), b.fingerprint());

        let renamed = InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("total", "SELECT COUNT(*) FROM account").returns(TypeShape::Integer),
        );
        assert_ne!(a.fingerprint(), renamed.fingerprint());
        assert_ne!(a.fingerprint(), a.clone().read_only().fingerprint());
    }
}

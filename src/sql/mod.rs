mod builder;
mod condition;
mod parsed;
mod registry;

pub use builder::{Dialect, NamingPolicy, delete_sql, exists_sql, insert_sql, select_sql, update_sql};
pub use condition::Condition;
pub use parsed::ParsedSql;
pub use registry::{InMemoryQueryRegistry, QueryRegistry, RegisteredQuery};

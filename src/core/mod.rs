pub mod arg;
pub mod error;
pub mod types;
pub mod value;

pub use arg::{Arg, EntityCell, ResultExtractor, RowFilter, RowMapper};
pub use error::{DaoError, Result};
pub use types::{ContainerKind, EntityShape, FieldShape, Row, TypeShape};
pub use value::{FromValue, Record, Value};

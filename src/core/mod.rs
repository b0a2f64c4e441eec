pub mod error;
pub mod ident;
pub mod predicate;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use ident::validate_identifier;
pub use predicate::{Assignments, BoundFilter, Condition, Filter};
pub use types::{Column, Row, Schema};
pub use value::{DataType, Value};

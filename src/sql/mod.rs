//! Safe SQL building: identifiers are regex-gated, values always bind as
//! positional parameters.

mod bind;
mod builder;

pub use bind::SqliteBindValue;
pub use builder::{BuiltQuery, QueryParams};

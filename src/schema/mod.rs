//! Entity schema model: definitions, DDL rendering, value validation.

mod core;
mod types;
pub mod value;

pub use self::core::{builtin_schemas, CORE_COLUMN_NAMES};
pub use self::types::{
    is_valid_identifier, EntitySchema, FieldDef, FieldType, IndexDef, TableOptions,
};

//! Authgate: dynamic-schema storage engine and RBAC core for an auth service.
//!
//! The engine treats a relational database (SQLite) as a configurable object
//! store: entity schemas are defined at runtime, persisted in a registry next
//! to the tables they describe, and queried through a schema-validated CRUD
//! layer. The RBAC evaluator consumes the same storage through typed stores.
//! HTTP routing, JWT issuance, and password hashing live in adapter crates.

pub mod apis;
pub mod config;
pub mod error;
pub mod manager;
pub mod rbac;
pub mod schema;
pub mod sql;
pub mod store;

pub use config::{DatabaseConfig, DatabaseType};
pub use error::{Error, ErrorKind, Result};
pub use manager::{Manager, PoolStats};
pub use rbac::RbacController;
pub use schema::{EntitySchema, FieldDef, FieldType, IndexDef, TableOptions};
pub use sql::QueryParams;
pub use store::{
    CacheStats, ChangeAction, DynamicStore, RoleBindingStore, RoleStore, Row, SchemaDependency,
    SchemaVersion, StoreFactory, UserStore,
};

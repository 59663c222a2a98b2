//! Storage layer: the dynamic store, the typed stores above it, and the
//! factory that wires them to managed pools.

mod cache;
mod dynamic;
mod factory;
mod role;
mod role_binding;
mod user;

pub use cache::{CacheStats, TtlCache};
pub use dynamic::{ChangeAction, DynamicStore, SchemaDependency, SchemaVersion};
pub use factory::StoreFactory;
pub use role::SqlRoleStore;
pub use role_binding::SqlRoleBindingStore;
pub use user::SqlUserStore;

use crate::apis::{PolicyRule, Role, RoleBinding, Subject, User, UserList};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A dynamic row: column name to tagged value. TEXT, NUMERIC, INTEGER,
/// BOOLEAN, TIMESTAMP, and JSON column values all round-trip through
/// `serde_json::Value`.
pub type Row = HashMap<String, Value>;

/// User persistence. Implemented over the dynamic store; adapters may
/// substitute their own (for example an in-memory double).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<()>;
    async fn get(&self, name: &str) -> Result<User>;
    async fn update(&self, user: &User) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<UserList>;
    async fn find_by_username(&self, username: &str) -> Result<User>;
    async fn find_by_email(&self, email: &str) -> Result<User>;
    async fn update_password(&self, name: &str, password_hash: &str) -> Result<()>;
    async fn update_status(&self, name: &str, active: bool) -> Result<()>;
    async fn list_by_role(&self, role: &str) -> Result<UserList>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn create(&self, role: &Role) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Role>;
    async fn update(&self, role: &Role) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Role>>;
    async fn find_by_verb(&self, verb: &str) -> Result<Vec<Role>>;
    async fn find_by_resource(&self, resource: &str) -> Result<Vec<Role>>;
    async fn find_by_api_group(&self, api_group: &str) -> Result<Vec<Role>>;
    async fn update_rules(&self, name: &str, rules: &[PolicyRule]) -> Result<()>;
}

#[async_trait]
pub trait RoleBindingStore: Send + Sync {
    async fn create(&self, binding: &RoleBinding) -> Result<()>;
    async fn get(&self, name: &str) -> Result<RoleBinding>;
    async fn update(&self, binding: &RoleBinding) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<RoleBinding>>;
    async fn find_by_subject(&self, kind: &str, name: &str) -> Result<Vec<RoleBinding>>;
    async fn find_by_role(&self, role: &str) -> Result<Vec<RoleBinding>>;
    async fn add_subject(&self, name: &str, subject: Subject) -> Result<()>;
    async fn remove_subject(&self, name: &str, subject: &Subject) -> Result<()>;
}

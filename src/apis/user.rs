//! User objects.

use super::meta::{ObjectMeta, TypeMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default, rename = "metadata")]
    pub metadata: ObjectMeta,
    pub spec: UserSpec,
    #[serde(default)]
    pub status: UserStatus,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        User {
            type_meta: TypeMeta::new("User"),
            metadata: ObjectMeta::named(name),
            spec: UserSpec::default(),
            status: UserStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserList {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub items: Vec<User>,
}

impl UserList {
    pub fn new(items: Vec<User>) -> Self {
        UserList {
            type_meta: TypeMeta::new("UserList"),
            items,
        }
    }
}

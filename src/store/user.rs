//! User store over the dynamic engine. The object name doubles as the row id;
//! roles and annotations live in JSON columns.

use crate::apis::{User, UserList};
use crate::error::{Error, ErrorKind, Result};
use crate::schema::value::{format_timestamp, now_timestamp, parse_timestamp};
use crate::store::{DynamicStore, Row, UserStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct SqlUserStore {
    dynamic: Arc<DynamicStore>,
}

impl SqlUserStore {
    pub fn new(dynamic: Arc<DynamicStore>) -> Self {
        SqlUserStore { dynamic }
    }

    async fn select_one(&self, column: &str, value: &str) -> Result<User> {
        let mut filter = Row::new();
        filter.insert(column.to_string(), Value::String(value.to_string()));
        let rows = self.dynamic.select("users", &filter).await?;
        match rows.into_iter().next() {
            Some(row) => row_to_user(&row),
            None => Err(ErrorKind::UserNotFound.with_reason(format!("{column} {value}"))),
        }
    }
}

#[async_trait]
impl UserStore for SqlUserStore {
    async fn create(&self, user: &User) -> Result<()> {
        let row = user_to_row(user)?;
        self.dynamic
            .insert("users", row)
            .await
            .map(|_| ())
            .map_err(|err| conflict_as_user_exists(err))
    }

    async fn get(&self, name: &str) -> Result<User> {
        self.select_one("id", name).await
    }

    async fn update(&self, user: &User) -> Result<()> {
        let existing = self.get(user.name()).await?;

        // Read-then-compare uniqueness check. A concurrent insert can still
        // win the race; the database constraint catches that case.
        if existing.spec.username != user.spec.username {
            match self.find_by_username(&user.spec.username).await {
                Ok(other) if other.name() != user.name() => {
                    return Err(ErrorKind::UserExists
                        .with_reason(format!("username '{}' already exists", user.spec.username)));
                }
                Ok(_) => {}
                Err(err) if err.kind == ErrorKind::UserNotFound => {}
                Err(err) => return Err(err),
            }
        }
        if existing.spec.email != user.spec.email {
            match self.find_by_email(&user.spec.email).await {
                Ok(other) if other.name() != user.name() => {
                    return Err(ErrorKind::UserExists
                        .with_reason(format!("email '{}' already exists", user.spec.email)));
                }
                Ok(_) => {}
                Err(err) if err.kind == ErrorKind::UserNotFound => {}
                Err(err) => return Err(err),
            }
        }

        let mut patch = Row::new();
        patch.insert(
            "username".to_string(),
            Value::String(user.spec.username.clone()),
        );
        patch.insert("email".to_string(), Value::String(user.spec.email.clone()));
        if !user.spec.roles.is_empty() {
            patch.insert("roles".to_string(), to_json_text(&user.spec.roles)?);
        }
        if let Some(last_login) = user.status.last_login {
            patch.insert(
                "last_login".to_string(),
                Value::String(format_timestamp(last_login)),
            );
        }
        patch.insert(
            "annotations".to_string(),
            to_json_text(&user.metadata.annotations)?,
        );

        self.dynamic
            .update("users", user.name(), patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::UserNotFound))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.dynamic
            .delete("users", name)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::UserNotFound))
    }

    async fn list(&self) -> Result<UserList> {
        let rows = self.dynamic.select("users", &Row::new()).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(row_to_user(row)?);
        }
        Ok(UserList::new(items))
    }

    async fn find_by_username(&self, username: &str) -> Result<User> {
        self.select_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<User> {
        self.select_one("email", email).await
    }

    async fn update_password(&self, name: &str, password_hash: &str) -> Result<()> {
        let mut patch = Row::new();
        patch.insert(
            "password_hash".to_string(),
            Value::String(password_hash.to_string()),
        );
        self.dynamic
            .update("users", name, patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::UserNotFound))
    }

    async fn update_status(&self, name: &str, active: bool) -> Result<()> {
        let mut patch = Row::new();
        patch.insert("is_active".to_string(), Value::Bool(active));
        self.dynamic
            .update("users", name, patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::UserNotFound))
    }

    async fn list_by_role(&self, role: &str) -> Result<UserList> {
        let all = self.list().await?;
        let items = all
            .items
            .into_iter()
            .filter(|user| user.spec.roles.iter().any(|r| r == role))
            .collect();
        Ok(UserList::new(items))
    }
}

fn user_to_row(user: &User) -> Result<Row> {
    let created_at = user
        .metadata
        .creation_timestamp
        .map(format_timestamp)
        .unwrap_or_else(now_timestamp);

    let mut row = Row::new();
    row.insert("id".to_string(), Value::String(user.name().to_string()));
    row.insert(
        "username".to_string(),
        Value::String(user.spec.username.clone()),
    );
    row.insert("email".to_string(), Value::String(user.spec.email.clone()));
    row.insert(
        "password_hash".to_string(),
        Value::String(user.spec.password_hash.clone()),
    );
    row.insert("is_active".to_string(), Value::Bool(user.status.active));
    row.insert("created_at".to_string(), Value::String(created_at));
    if !user.spec.roles.is_empty() {
        row.insert("roles".to_string(), to_json_text(&user.spec.roles)?);
    }
    if let Some(last_login) = user.status.last_login {
        row.insert(
            "last_login".to_string(),
            Value::String(format_timestamp(last_login)),
        );
    }
    if !user.metadata.annotations.is_empty() {
        row.insert(
            "annotations".to_string(),
            to_json_text(&user.metadata.annotations)?,
        );
    }
    Ok(row)
}

fn row_to_user(row: &Row) -> Result<User> {
    let mut user = User::new(text_field(row, "id")?);
    user.metadata.creation_timestamp = row
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| parse_timestamp(s).ok());
    user.spec.username = text_field(row, "username")?;
    user.spec.email = text_field(row, "email")?;
    user.spec.password_hash = text_field(row, "password_hash")?;
    user.status.active = row
        .get("is_active")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(roles) = row.get("roles").filter(|v| !v.is_null()) {
        user.spec.roles =
            from_json_value(roles.clone()).map_err(|err| prefix_reason(err, "roles"))?;
    }
    if let Some(last_login) = row.get("last_login").and_then(Value::as_str) {
        user.status.last_login = Some(parse_timestamp(last_login)?);
    }
    if let Some(annotations) = row.get("annotations").filter(|v| !v.is_null()) {
        user.metadata.annotations =
            from_json_value(annotations.clone()).map_err(|err| prefix_reason(err, "annotations"))?;
    }
    Ok(user)
}

// ---- shared row helpers (also used by the role and binding stores) --------

pub(crate) fn text_field(row: &Row, column: &str) -> Result<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ErrorKind::StorageOperation.with_reason(format!("column '{column}' missing or not text"))
        })
}

/// Serialize a list- or map-valued attribute into its JSON text envelope.
pub(crate) fn to_json_text<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))
}

/// Decode a JSON-envelope column that arrives either pre-parsed (coerced
/// reads) or as raw text.
pub(crate) fn from_json_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    let parsed = match value {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))?,
        other => other,
    };
    serde_json::from_value(parsed)
        .map_err(|err| ErrorKind::StorageOperation.with_reason(err.to_string()))
}

pub(crate) fn not_found_as(err: Error, kind: ErrorKind) -> Error {
    if err.kind == ErrorKind::NotFound {
        Error {
            kind,
            reason: err.reason,
            retry_after: err.retry_after,
        }
    } else {
        err
    }
}

pub(crate) fn conflict_as(err: Error, kind: ErrorKind) -> Error {
    if err.kind == ErrorKind::AlreadyExists || err.kind == ErrorKind::UniqueViolation {
        Error {
            kind,
            reason: err.reason,
            retry_after: err.retry_after,
        }
    } else {
        err
    }
}

fn conflict_as_user_exists(err: Error) -> Error {
    conflict_as(err, ErrorKind::UserExists)
}

fn prefix_reason(err: Error, prefix: &str) -> Error {
    let detail = err.reason.unwrap_or_default();
    err.kind.with_reason(format!("{prefix}: {detail}"))
}

pub(crate) fn annotations_map(annotations: &HashMap<String, String>) -> Result<Option<Value>> {
    if annotations.is_empty() {
        Ok(None)
    } else {
        to_json_text(annotations).map(Some)
    }
}

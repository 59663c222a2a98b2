//! Role-binding store: subjects persist as a JSON list, the role reference as
//! a plain `role_ref` column backed by a non-unique index.

use crate::apis::{RoleBinding, RoleRef, Subject};
use crate::error::{ErrorKind, Result};
use crate::schema::value::{format_timestamp, now_timestamp, parse_timestamp};
use crate::store::user::{annotations_map, conflict_as, from_json_value, not_found_as, text_field, to_json_text};
use crate::store::{DynamicStore, RoleBindingStore, Row};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct SqlRoleBindingStore {
    dynamic: Arc<DynamicStore>,
}

impl SqlRoleBindingStore {
    pub fn new(dynamic: Arc<DynamicStore>) -> Self {
        SqlRoleBindingStore { dynamic }
    }

    async fn select_bindings(&self, filter: &Row) -> Result<Vec<RoleBinding>> {
        let rows = self.dynamic.select("role_bindings", filter).await?;
        let mut bindings = Vec::with_capacity(rows.len());
        for row in &rows {
            bindings.push(row_to_binding(row)?);
        }
        Ok(bindings)
    }
}

#[async_trait]
impl RoleBindingStore for SqlRoleBindingStore {
    async fn create(&self, binding: &RoleBinding) -> Result<()> {
        let created_at = binding
            .metadata
            .creation_timestamp
            .map(format_timestamp)
            .unwrap_or_else(now_timestamp);

        let mut row = Row::new();
        row.insert("id".to_string(), Value::String(binding.name().to_string()));
        row.insert("name".to_string(), Value::String(binding.name().to_string()));
        row.insert(
            "role_ref".to_string(),
            Value::String(binding.role_ref.name.clone()),
        );
        row.insert("subjects".to_string(), to_json_text(&binding.subjects)?);
        row.insert("created_at".to_string(), Value::String(created_at));
        if let Some(annotations) = annotations_map(&binding.metadata.annotations)? {
            row.insert("annotations".to_string(), annotations);
        }

        self.dynamic
            .insert("role_bindings", row)
            .await
            .map(|_| ())
            .map_err(|err| conflict_as(err, ErrorKind::RoleBindingExists))
    }

    async fn get(&self, name: &str) -> Result<RoleBinding> {
        let mut filter = Row::new();
        filter.insert("name".to_string(), Value::String(name.to_string()));
        let bindings = self.select_bindings(&filter).await?;
        bindings
            .into_iter()
            .next()
            .ok_or_else(|| ErrorKind::RoleBindingNotFound.with_reason(name.to_string()))
    }

    async fn update(&self, binding: &RoleBinding) -> Result<()> {
        self.get(binding.name()).await?;

        let mut patch = Row::new();
        patch.insert(
            "role_ref".to_string(),
            Value::String(binding.role_ref.name.clone()),
        );
        patch.insert("subjects".to_string(), to_json_text(&binding.subjects)?);
        if let Some(annotations) = annotations_map(&binding.metadata.annotations)? {
            patch.insert("annotations".to_string(), annotations);
        }

        self.dynamic
            .update("role_bindings", binding.name(), patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::RoleBindingNotFound))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.dynamic
            .delete("role_bindings", name)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::RoleBindingNotFound))
    }

    async fn list(&self) -> Result<Vec<RoleBinding>> {
        self.select_bindings(&Row::new()).await
    }

    async fn find_by_subject(&self, kind: &str, name: &str) -> Result<Vec<RoleBinding>> {
        let bindings = self.list().await?;
        Ok(bindings
            .into_iter()
            .filter(|binding| {
                binding
                    .subjects
                    .iter()
                    .any(|s| s.kind == kind && s.name == name)
            })
            .collect())
    }

    async fn find_by_role(&self, role: &str) -> Result<Vec<RoleBinding>> {
        let mut filter = Row::new();
        filter.insert("role_ref".to_string(), Value::String(role.to_string()));
        self.select_bindings(&filter).await
    }

    async fn add_subject(&self, name: &str, subject: Subject) -> Result<()> {
        let mut binding = self.get(name).await?;
        if binding
            .subjects
            .iter()
            .any(|s| s.kind == subject.kind && s.name == subject.name)
        {
            return Err(ErrorKind::InvalidInput.with_reason("subject already exists in binding"));
        }
        binding.subjects.push(subject);
        self.update(&binding).await
    }

    async fn remove_subject(&self, name: &str, subject: &Subject) -> Result<()> {
        let mut binding = self.get(name).await?;
        let before = binding.subjects.len();
        binding
            .subjects
            .retain(|s| !(s.kind == subject.kind && s.name == subject.name));
        if binding.subjects.len() == before {
            return Err(ErrorKind::InvalidInput.with_reason("subject not found in binding"));
        }
        self.update(&binding).await
    }
}

fn row_to_binding(row: &Row) -> Result<RoleBinding> {
    let mut binding = RoleBinding::new(
        text_field(row, "name")?,
        RoleRef::role(text_field(row, "role_ref")?),
        Vec::new(),
    );
    binding.metadata.creation_timestamp = row
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| parse_timestamp(s).ok());
    if let Some(subjects) = row.get("subjects").filter(|v| !v.is_null()) {
        binding.subjects = from_json_value(subjects.clone())?;
    }
    if let Some(annotations) = row.get("annotations").filter(|v| !v.is_null()) {
        binding.metadata.annotations = from_json_value(annotations.clone())?;
    }
    Ok(binding)
}

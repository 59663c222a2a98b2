//! Role store: rules persist as a JSON list in the `rules` column.

use crate::apis::{PolicyRule, Role};
use crate::error::{ErrorKind, Result};
use crate::schema::value::{format_timestamp, now_timestamp, parse_timestamp};
use crate::store::user::{annotations_map, conflict_as, from_json_value, not_found_as, text_field, to_json_text};
use crate::store::{DynamicStore, RoleStore, Row};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct SqlRoleStore {
    dynamic: Arc<DynamicStore>,
}

impl SqlRoleStore {
    pub fn new(dynamic: Arc<DynamicStore>) -> Self {
        SqlRoleStore { dynamic }
    }

    async fn filter_rules(&self, matcher: impl Fn(&PolicyRule) -> bool) -> Result<Vec<Role>> {
        let roles = self.list().await?;
        Ok(roles
            .into_iter()
            .filter(|role| role.rules.iter().any(&matcher))
            .collect())
    }
}

#[async_trait]
impl RoleStore for SqlRoleStore {
    async fn create(&self, role: &Role) -> Result<()> {
        let created_at = role
            .metadata
            .creation_timestamp
            .map(format_timestamp)
            .unwrap_or_else(now_timestamp);

        let mut row = Row::new();
        row.insert("id".to_string(), Value::String(role.name().to_string()));
        row.insert("name".to_string(), Value::String(role.name().to_string()));
        row.insert(
            "description".to_string(),
            Value::String(
                role.metadata
                    .annotations
                    .get("description")
                    .cloned()
                    .unwrap_or_default(),
            ),
        );
        row.insert("rules".to_string(), to_json_text(&role.rules)?);
        row.insert("created_at".to_string(), Value::String(created_at));
        if let Some(annotations) = annotations_map(&role.metadata.annotations)? {
            row.insert("annotations".to_string(), annotations);
        }

        self.dynamic
            .insert("roles", row)
            .await
            .map(|_| ())
            .map_err(|err| conflict_as(err, ErrorKind::RoleExists))
    }

    async fn get(&self, name: &str) -> Result<Role> {
        let mut filter = Row::new();
        filter.insert("name".to_string(), Value::String(name.to_string()));
        let rows = self.dynamic.select("roles", &filter).await?;
        match rows.into_iter().next() {
            Some(row) => row_to_role(&row),
            None => Err(ErrorKind::RoleNotFound.with_reason(name.to_string())),
        }
    }

    async fn update(&self, role: &Role) -> Result<()> {
        self.get(role.name()).await?;

        let mut patch = Row::new();
        patch.insert(
            "description".to_string(),
            Value::String(
                role.metadata
                    .annotations
                    .get("description")
                    .cloned()
                    .unwrap_or_default(),
            ),
        );
        patch.insert("rules".to_string(), to_json_text(&role.rules)?);
        if let Some(annotations) = annotations_map(&role.metadata.annotations)? {
            patch.insert("annotations".to_string(), annotations);
        }

        self.dynamic
            .update("roles", role.name(), patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::RoleNotFound))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.dynamic
            .delete("roles", name)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::RoleNotFound))
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let rows = self.dynamic.select("roles", &Row::new()).await?;
        let mut roles = Vec::with_capacity(rows.len());
        for row in &rows {
            roles.push(row_to_role(row)?);
        }
        Ok(roles)
    }

    async fn find_by_verb(&self, verb: &str) -> Result<Vec<Role>> {
        self.filter_rules(|rule| rule.verbs.iter().any(|v| v == verb))
            .await
    }

    async fn find_by_resource(&self, resource: &str) -> Result<Vec<Role>> {
        self.filter_rules(|rule| rule.resources.iter().any(|r| r == resource))
            .await
    }

    async fn find_by_api_group(&self, api_group: &str) -> Result<Vec<Role>> {
        self.filter_rules(|rule| rule.api_groups.iter().any(|g| g == api_group))
            .await
    }

    async fn update_rules(&self, name: &str, rules: &[PolicyRule]) -> Result<()> {
        let mut patch = Row::new();
        patch.insert("rules".to_string(), to_json_text(&rules)?);
        self.dynamic
            .update("roles", name, patch)
            .await
            .map_err(|err| not_found_as(err, ErrorKind::RoleNotFound))
    }
}

fn row_to_role(row: &Row) -> Result<Role> {
    let mut role = Role::new(text_field(row, "name")?, Vec::new());
    role.metadata.creation_timestamp = row
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| parse_timestamp(s).ok());
    if let Some(rules) = row.get("rules").filter(|v| !v.is_null()) {
        role.rules = from_json_value(rules.clone())?;
    }
    if let Some(annotations) = row.get("annotations").filter(|v| !v.is_null()) {
        role.metadata.annotations = from_json_value(annotations.clone())?;
    }
    Ok(role)
}

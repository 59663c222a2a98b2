//! Built-in schemas materialized at startup and the implicit core columns.

use super::types::{EntitySchema, FieldDef, FieldType, IndexDef};
use serde_json::json;
use std::collections::HashMap;

/// Columns implicitly prepended to every dynamic table. `deleted_at IS NULL`
/// is the aliveness predicate applied by all read paths.
pub const CORE_COLUMN_NAMES: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// The fixed domains of the service, expressed as ordinary entity schemas so
/// the dynamic engine owns their lifecycle too.
pub fn builtin_schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema {
            name: "users".into(),
            description: "User management table".into(),
            fields: vec![
                FieldDef::new("username", FieldType::Text).required().unique(),
                FieldDef::new("email", FieldType::Text).required().unique(),
                FieldDef::new("password_hash", FieldType::Text).required(),
                FieldDef::new("is_active", FieldType::Boolean)
                    .with_default(json!(true))
                    .mark_required_nullable(),
                FieldDef::new("last_login", FieldType::Timestamp),
                FieldDef::new("roles", FieldType::Json),
                FieldDef::new("annotations", FieldType::Json),
            ],
            indexes: vec![
                IndexDef::new("idx_users_username", vec!["username".into()], true),
                IndexDef::new("idx_users_email", vec!["email".into()], true),
            ],
            annotations: HashMap::new(),
        },
        EntitySchema {
            name: "roles".into(),
            description: "Role definition table".into(),
            fields: vec![
                FieldDef::new("name", FieldType::Text).required().unique(),
                FieldDef::new("description", FieldType::Text),
                FieldDef::new("rules", FieldType::Json),
                FieldDef::new("annotations", FieldType::Json),
            ],
            indexes: vec![IndexDef::new("idx_roles_name", vec!["name".into()], true)],
            annotations: HashMap::new(),
        },
        EntitySchema {
            name: "role_bindings".into(),
            description: "Role assignment table".into(),
            fields: vec![
                FieldDef::new("name", FieldType::Text).required().unique(),
                FieldDef::new("role_ref", FieldType::Text).required(),
                FieldDef::new("subjects", FieldType::Json),
                FieldDef::new("annotations", FieldType::Json),
            ],
            indexes: vec![
                IndexDef::new("idx_role_bindings_name", vec!["name".into()], true),
                IndexDef::new("idx_role_bindings_role_ref", vec!["role_ref".into()], false),
            ],
            annotations: HashMap::new(),
        },
    ]
}

impl FieldDef {
    /// Required at validation time but without NOT NULL in the DDL, so the
    /// column default can apply (`is_active BOOLEAN DEFAULT true`).
    fn mark_required_nullable(mut self) -> Self {
        self.required = true;
        self.nullable = true;
        self
    }
}

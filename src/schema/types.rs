//! Field, index, and schema definitions plus their DDL rendering.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,63}$").expect("identifier regex"));

/// Whether a table/column/index name may appear in SQL text. Values never go
/// through this path; they are always bound as positional parameters.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "NUMERIC")]
    Numeric,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    #[serde(rename = "JSON")]
    Json,
}

impl FieldType {
    /// SQL column type for this field. JSON payloads are stored as text.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Numeric => "NUMERIC",
            FieldType::Integer => "INTEGER",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Json => "TEXT",
        }
    }

    /// Best-effort mapping from a SQL type token back to a field type, used
    /// when an `ALTER TABLE ... ADD` column is folded into the registry.
    pub fn from_sql(ty: &str) -> FieldType {
        match ty.to_ascii_uppercase().as_str() {
            "NUMERIC" | "REAL" | "DOUBLE" | "FLOAT" => FieldType::Numeric,
            "INTEGER" | "INT" | "BIGINT" => FieldType::Integer,
            "BOOLEAN" | "BOOL" => FieldType::Boolean,
            "TIMESTAMP" | "DATETIME" => FieldType::Timestamp,
            "JSON" => FieldType::Json,
            _ => FieldType::Text,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Json => f.write_str("JSON"),
            other => f.write_str(other.sql_type()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_true() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            nullable: true,
            default_value: None,
            primary_key: false,
            not_null: false,
            auto_increment: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Deterministic column-DDL fragment: `<name> <type>[ NOT NULL][ DEFAULT v]`.
    /// The primary-key/autoincrement flags only apply to core registry rows.
    pub fn render_column(&self) -> String {
        let mut def = format!("{} {}", self.name, self.field_type.sql_type());
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
            if self.auto_increment {
                def.push_str(" AUTOINCREMENT");
            }
        }
        if !self.nullable || self.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(value) = &self.default_value {
            def.push_str(" DEFAULT ");
            def.push_str(&render_default(value));
        }
        def
    }
}

fn render_default(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    #[serde(rename = "fields")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        IndexDef {
            name: name.into(),
            columns,
            unique,
        }
    }

    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS <name> ON <table> (<cols>)`.
    pub fn render_create(&self, table: &str) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            unique,
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

/// Schema record persisted in the `entity_schemas` registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Table DDL with the core columns prepended to the schema's own fields.
    /// Every table/column name must already be identifier-checked.
    pub fn render_create_table(&self) -> Result<String> {
        let mut columns = vec![
            "id TEXT PRIMARY KEY".to_string(),
            "created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP".to_string(),
            "updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP".to_string(),
            "deleted_at TIMESTAMP".to_string(),
        ];
        for field in &self.fields {
            if !is_valid_identifier(&field.name) {
                return Err(
                    ErrorKind::InvalidInput.with_reason(format!("invalid column name: {}", field.name))
                );
            }
            columns.push(field.render_column());
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            columns.join(", ")
        ))
    }
}

/// Shape of a table requested through the dynamic store.
#[derive(Clone, Debug, Default)]
pub struct TableOptions {
    pub description: String,
    pub fields: Vec<FieldDef>,
    pub indexes: Vec<IndexDef>,
    pub annotations: HashMap<String, String>,
}

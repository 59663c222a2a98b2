//! Role, rule, and binding objects.

use super::meta::{ObjectMeta, TypeMeta};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub verbs: Vec<String>,
    pub resources: Vec<String>,
    pub api_groups: Vec<String>,
}

impl PolicyRule {
    /// A request is allowed iff all three sets match, where `"*"` in a set
    /// matches any value in that position.
    pub fn allows(&self, verb: &str, resource: &str, api_group: &str) -> bool {
        matches_or_wildcard(&self.api_groups, api_group)
            && matches_or_wildcard(&self.resources, resource)
            && matches_or_wildcard(&self.verbs, verb)
    }
}

fn matches_or_wildcard(values: &[String], item: &str) -> bool {
    values.iter().any(|v| v == item || v == "*")
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default, rename = "metadata")]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Role {
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        Role {
            type_meta: TypeMeta::new("Role"),
            metadata: ObjectMeta::named(name),
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: String,
    pub name: String,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Subject {
            kind: "User".to_string(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub kind: String,
    pub name: String,
}

impl RoleRef {
    pub fn role(name: impl Into<String>) -> Self {
        RoleRef {
            kind: "Role".to_string(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default, rename = "metadata")]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl RoleBinding {
    pub fn new(name: impl Into<String>, role_ref: RoleRef, subjects: Vec<Subject>) -> Self {
        RoleBinding {
            type_meta: TypeMeta::new("RoleBinding"),
            metadata: ObjectMeta::named(name),
            subjects,
            role_ref,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

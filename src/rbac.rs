//! RBAC over the typed stores: role/binding lifecycle with referential
//! guards, and the wildcard-aware access decision.

use crate::apis::{Role, RoleBinding, User};
use crate::error::{ErrorKind, Result};
use crate::store::{RoleBindingStore, RoleStore};
use std::sync::Arc;

pub struct RbacController {
    roles: Arc<dyn RoleStore>,
    bindings: Arc<dyn RoleBindingStore>,
}

impl RbacController {
    pub fn new(roles: Arc<dyn RoleStore>, bindings: Arc<dyn RoleBindingStore>) -> Self {
        RbacController { roles, bindings }
    }

    pub async fn create_role(&self, role: &Role) -> Result<()> {
        validate_role(role)?;
        self.roles.create(role).await
    }

    pub async fn get_role(&self, name: &str) -> Result<Role> {
        if name.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role name is required"));
        }
        self.roles.get(name).await
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.roles.list().await
    }

    /// Delete a role, refusing while any binding still references it.
    pub async fn delete_role(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role name is required"));
        }
        self.roles.get(name).await?;

        let bindings = self
            .bindings
            .list()
            .await
            .map_err(|err| ErrorKind::Internal.with_reason(format!("failed to list role bindings: {err}")))?;
        for binding in &bindings {
            if binding.role_ref.name == name {
                return Err(ErrorKind::InvalidInput.with_reason(format!(
                    "role {} is still referenced by role binding {}",
                    name,
                    binding.name()
                )));
            }
        }

        self.roles.delete(name).await
    }

    pub async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        if binding.name().is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role binding name is required"));
        }
        if binding.role_ref.name.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role reference name is required"));
        }
        if binding.subjects.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("at least one subject is required"));
        }
        // The referenced role must exist before the binding can.
        self.roles.get(&binding.role_ref.name).await?;
        self.bindings.create(binding).await
    }

    pub async fn get_role_binding(&self, name: &str) -> Result<RoleBinding> {
        if name.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role binding name is required"));
        }
        self.bindings.get(name).await
    }

    pub async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>> {
        self.bindings
            .list()
            .await
            .map_err(|err| ErrorKind::Internal.with_reason(format!("failed to list role bindings: {err}")))
    }

    pub async fn delete_role_binding(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ErrorKind::InvalidInput.with_reason("role binding name is required"));
        }
        self.bindings.get(name).await?;
        self.bindings.delete(name).await
    }

    /// Decide whether `user` may perform `verb` on `resource` in `api_group`.
    ///
    /// Scans every binding for a `User` subject with the user's name, then
    /// checks the referenced roles' rules. A dangling role reference is
    /// skipped; any other storage error propagates rather than failing open.
    /// Denial is the `Ok(false)` return, never an error.
    pub async fn check_access(
        &self,
        user: &User,
        verb: &str,
        resource: &str,
        api_group: &str,
    ) -> Result<bool> {
        let bindings = self
            .bindings
            .list()
            .await
            .map_err(|err| ErrorKind::Internal.with_reason(format!("failed to list role bindings: {err}")))?;

        for binding in &bindings {
            let bound = binding
                .subjects
                .iter()
                .any(|s| s.kind == "User" && s.name == user.name());
            if !bound {
                continue;
            }

            let role = match self.roles.get(&binding.role_ref.name).await {
                Ok(role) => role,
                Err(err) if err.kind == ErrorKind::RoleNotFound => {
                    tracing::warn!(
                        binding = %binding.name(),
                        role = %binding.role_ref.name,
                        "binding references a missing role, skipping"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            for rule in &role.rules {
                if rule.allows(verb, resource, api_group) {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

fn validate_role(role: &Role) -> Result<()> {
    if role.name().is_empty() {
        return Err(ErrorKind::InvalidInput.with_reason("role name is required"));
    }
    if role.rules.is_empty() {
        return Err(ErrorKind::InvalidInput.with_reason("at least one rule is required"));
    }
    for (i, rule) in role.rules.iter().enumerate() {
        if rule.verbs.is_empty() {
            return Err(
                ErrorKind::InvalidInput.with_reason(format!("verbs are required in rule {i}"))
            );
        }
        if rule.resources.is_empty() {
            return Err(
                ErrorKind::InvalidInput.with_reason(format!("resources are required in rule {i}"))
            );
        }
        if rule.api_groups.is_empty() {
            return Err(
                ErrorKind::InvalidInput.with_reason(format!("apiGroups are required in rule {i}"))
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::PolicyRule;

    #[test]
    fn role_validation_requires_complete_rules() {
        let empty = Role::new("r", vec![]);
        assert!(validate_role(&empty).is_err());

        let missing_verbs = Role::new(
            "r",
            vec![PolicyRule {
                verbs: vec![],
                resources: vec!["users".into()],
                api_groups: vec!["auth.service".into()],
            }],
        );
        let err = validate_role(&missing_verbs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(err.reason.unwrap().contains("verbs"));

        let complete = Role::new(
            "r",
            vec![PolicyRule {
                verbs: vec!["get".into()],
                resources: vec!["users".into()],
                api_groups: vec!["auth.service".into()],
            }],
        );
        assert!(validate_role(&complete).is_ok());
    }
}

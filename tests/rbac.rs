//! RBAC controller integration tests: wildcard grants, denials, and
//! referential guards.

use authgate::apis::{PolicyRule, Role, RoleBinding, RoleRef, Subject, User};
use authgate::store::{SqlRoleBindingStore, SqlRoleStore};
use authgate::{
    DatabaseConfig, DynamicStore, ErrorKind, Manager, RbacController, RoleBindingStore, RoleStore,
};
use std::sync::Arc;

struct Fixture {
    controller: RbacController,
    roles: Arc<dyn RoleStore>,
    bindings: Arc<dyn RoleBindingStore>,
}

async fn fixture() -> Fixture {
    let config = DatabaseConfig::sqlite(":memory:");
    let manager = Manager::open(&config).await.expect("open manager");
    manager.initialize().await.expect("initialize");
    let dynamic = Arc::new(DynamicStore::new(Arc::new(manager)));
    let roles: Arc<dyn RoleStore> = Arc::new(SqlRoleStore::new(dynamic.clone()));
    let bindings: Arc<dyn RoleBindingStore> = Arc::new(SqlRoleBindingStore::new(dynamic));
    Fixture {
        controller: RbacController::new(roles.clone(), bindings.clone()),
        roles,
        bindings,
    }
}

fn rule(verbs: &[&str], resources: &[&str], groups: &[&str]) -> PolicyRule {
    PolicyRule {
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        resources: resources.iter().map(|s| s.to_string()).collect(),
        api_groups: groups.iter().map(|s| s.to_string()).collect(),
    }
}

fn bind(name: &str, role: &str, user: &str) -> RoleBinding {
    RoleBinding::new(name, RoleRef::role(role), vec![Subject::user(user)])
}

#[tokio::test]
async fn wildcard_role_admits_every_request() {
    let f = fixture().await;
    f.controller
        .create_role(&Role::new("admin", vec![rule(&["*"], &["*"], &["*"])]))
        .await
        .unwrap();
    f.controller
        .create_role_binding(&bind("b1", "admin", "alice"))
        .await
        .unwrap();

    let alice = User::new("alice");
    for (verb, resource, group) in [
        ("delete", "users", "auth.service"),
        ("get", "roles", "auth.service"),
        ("anything", "whatever", "some.group"),
    ] {
        assert!(
            f.controller
                .check_access(&alice, verb, resource, group)
                .await
                .unwrap(),
            "{verb} {resource} {group} should be allowed"
        );
    }
}

#[tokio::test]
async fn scoped_role_denies_outside_its_sets() {
    let f = fixture().await;
    f.controller
        .create_role(&Role::new(
            "reader",
            vec![rule(&["get", "list"], &["users"], &["auth.service"])],
        ))
        .await
        .unwrap();
    f.controller
        .create_role_binding(&bind("bob-reader", "reader", "bob"))
        .await
        .unwrap();

    let bob = User::new("bob");
    assert!(!f
        .controller
        .check_access(&bob, "delete", "users", "auth.service")
        .await
        .unwrap());
    assert!(f
        .controller
        .check_access(&bob, "get", "users", "auth.service")
        .await
        .unwrap());
    assert!(!f
        .controller
        .check_access(&bob, "get", "roles", "auth.service")
        .await
        .unwrap());
    assert!(!f
        .controller
        .check_access(&bob, "get", "users", "other.group")
        .await
        .unwrap());

    // Unbound subjects are denied outright.
    let mallory = User::new("mallory");
    assert!(!f
        .controller
        .check_access(&mallory, "get", "users", "auth.service")
        .await
        .unwrap());
}

#[tokio::test]
async fn adding_a_rule_never_reduces_grants() {
    let f = fixture().await;
    f.controller
        .create_role(&Role::new(
            "reader",
            vec![rule(&["get"], &["users"], &["auth.service"])],
        ))
        .await
        .unwrap();
    f.controller
        .create_role_binding(&bind("b", "reader", "bob"))
        .await
        .unwrap();

    let bob = User::new("bob");
    assert!(f
        .controller
        .check_access(&bob, "get", "users", "auth.service")
        .await
        .unwrap());
    assert!(!f
        .controller
        .check_access(&bob, "list", "roles", "auth.service")
        .await
        .unwrap());

    f.roles
        .update_rules(
            "reader",
            &[
                rule(&["get"], &["users"], &["auth.service"]),
                rule(&["list"], &["roles"], &["auth.service"]),
            ],
        )
        .await
        .unwrap();

    // The original grant survives and the new one appears.
    assert!(f
        .controller
        .check_access(&bob, "get", "users", "auth.service")
        .await
        .unwrap());
    assert!(f
        .controller
        .check_access(&bob, "list", "roles", "auth.service")
        .await
        .unwrap());
}

#[tokio::test]
async fn deleting_a_referenced_role_is_refused() {
    let f = fixture().await;
    f.controller
        .create_role(&Role::new("admin", vec![rule(&["*"], &["*"], &["*"])]))
        .await
        .unwrap();
    f.controller
        .create_role_binding(&bind("b1", "admin", "alice"))
        .await
        .unwrap();

    let err = f.controller.delete_role("admin").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert!(err.reason.unwrap().contains("b1"));
    assert!(f.controller.get_role("admin").await.is_ok());

    // Once the binding is gone the role can go too.
    f.controller.delete_role_binding("b1").await.unwrap();
    f.controller.delete_role("admin").await.unwrap();
    let err = f.controller.get_role("admin").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RoleNotFound);
}

#[tokio::test]
async fn role_create_validation_and_binding_preconditions() {
    let f = fixture().await;

    let err = f
        .controller
        .create_role(&Role::new("empty", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);

    let err = f
        .controller
        .create_role(&Role::new("partial", vec![rule(&[], &["users"], &["g"])]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);

    // A binding cannot reference a role that does not exist.
    let err = f
        .controller
        .create_role_binding(&bind("b1", "ghost", "alice"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RoleNotFound);

    let err = f
        .controller
        .create_role_binding(&RoleBinding::new("b2", RoleRef::role("ghost"), vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn dangling_role_reference_is_skipped_not_fatal() {
    let f = fixture().await;
    f.controller
        .create_role(&Role::new("temp", vec![rule(&["*"], &["*"], &["*"])]))
        .await
        .unwrap();
    f.controller
        .create_role_binding(&bind("b1", "temp", "alice"))
        .await
        .unwrap();
    // Delete the role out from under the binding, bypassing the guard.
    f.roles.delete("temp").await.unwrap();

    let alice = User::new("alice");
    assert!(!f
        .controller
        .check_access(&alice, "get", "users", "auth.service")
        .await
        .unwrap());
    // The binding itself is still listed.
    assert_eq!(f.bindings.list().await.unwrap().len(), 1);
}

//! Dynamic store integration tests against in-memory SQLite.

use authgate::{
    ChangeAction, DatabaseConfig, DynamicStore, ErrorKind, FieldDef, FieldType, IndexDef, Manager,
    QueryParams, Row, TableOptions,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

async fn open_manager() -> Arc<Manager> {
    let config = DatabaseConfig::sqlite(":memory:");
    let manager = Manager::open(&config).await.expect("open manager");
    manager.initialize().await.expect("initialize");
    Arc::new(manager)
}

async fn open_store() -> DynamicStore {
    DynamicStore::new(open_manager().await)
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn projects_options() -> TableOptions {
    TableOptions {
        description: "tracked projects".into(),
        fields: vec![
            FieldDef::new("title", FieldType::Text).required().unique(),
            FieldDef::new("owner", FieldType::Text),
            FieldDef::new("stars", FieldType::Integer),
        ],
        indexes: vec![IndexDef::new(
            "idx_projects_title",
            vec!["title".into()],
            true,
        )],
        annotations: HashMap::new(),
    }
}

#[tokio::test]
async fn initialize_is_idempotent_and_materializes_builtins() {
    let manager = open_manager().await;
    manager.initialize().await.expect("second initialize");
    let store = DynamicStore::new(manager);
    for table in ["users", "roles", "role_bindings", "entity_schemas"] {
        assert!(store.table_exists(table).await.unwrap(), "{table} missing");
    }
    assert!(store.get_schema("users").await.is_ok());
}

#[tokio::test]
async fn create_table_then_exists_then_conflict() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    assert!(store.table_exists("projects").await.unwrap());

    let columns = store.table_schema("projects").await.unwrap();
    for core in authgate::schema::CORE_COLUMN_NAMES {
        assert!(
            columns.iter().any(|c| c.starts_with(core)),
            "core column {core} missing"
        );
    }

    let err = store
        .create_table("projects", projects_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn hostile_identifiers_are_rejected() {
    let store = open_store().await;
    let err = store
        .create_table("bad name; --", projects_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);

    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    let filter = row(&[("owner = '' OR 1", json!("x"))]);
    let err = store.select("projects", &filter).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn insert_then_get_round_trips_supplied_values() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();

    let id = store
        .insert(
            "projects",
            row(&[
                ("id", json!("p1")),
                ("title", json!("engine")),
                ("owner", json!("alice")),
                ("stars", json!(7)),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(id, "p1");

    let fetched = store.get("projects", "p1").await.unwrap();
    assert_eq!(fetched["title"], json!("engine"));
    assert_eq!(fetched["owner"], json!("alice"));
    assert_eq!(fetched["stars"], json!(7));
    assert!(fetched.contains_key("created_at"));
    assert!(fetched.contains_key("updated_at"));
}

#[tokio::test]
async fn insert_autofills_id_when_absent() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    let id = store
        .insert("projects", row(&[("title", json!("unnamed"))]))
        .await
        .unwrap();
    assert!(!id.is_empty());
    let fetched = store.get("projects", &id).await.unwrap();
    assert_eq!(fetched["id"], json!(id));
}

#[tokio::test]
async fn insert_enforces_required_fields_and_types() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();

    let err = store
        .insert("projects", row(&[("owner", json!("alice"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert!(err.reason.unwrap().contains("title"));

    let err = store
        .insert(
            "projects",
            row(&[("title", json!("x")), ("stars", json!("many"))]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidFieldType);
}

#[tokio::test]
async fn unique_index_violation_maps_to_already_exists() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    store
        .insert("projects", row(&[("title", json!("engine"))]))
        .await
        .unwrap();
    let err = store
        .insert("projects", row(&[("title", json!("engine"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn soft_delete_hides_the_row_from_all_reads() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    store
        .insert(
            "projects",
            row(&[("id", json!("p1")), ("title", json!("engine"))]),
        )
        .await
        .unwrap();

    store.delete("projects", "p1").await.unwrap();

    let err = store.get("projects", "p1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let rows = store
        .select("projects", &row(&[("id", json!("p1"))]))
        .await
        .unwrap();
    assert!(rows.is_empty());

    // The soft delete already consumed the row.
    let err = store.delete("projects", "p1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn empty_patch_only_advances_updated_at() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    store
        .insert(
            "projects",
            row(&[
                ("id", json!("p1")),
                ("title", json!("engine")),
                ("stars", json!(3)),
            ]),
        )
        .await
        .unwrap();
    let before = store.get("projects", "p1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    store.update("projects", "p1", Row::new()).await.unwrap();

    let after = store.get("projects", "p1").await.unwrap();
    assert_eq!(after["title"], before["title"]);
    assert_eq!(after["stars"], before["stars"]);
    assert_eq!(after["created_at"], before["created_at"]);
    let old = before["updated_at"].as_str().unwrap();
    let new = after["updated_at"].as_str().unwrap();
    assert!(new > old, "updated_at must strictly advance: {old} -> {new}");
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    let err = store
        .update("projects", "ghost", row(&[("owner", json!("x"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn alter_table_adds_column_and_updates_registry() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();

    let mut changes = HashMap::new();
    changes.insert("priority INTEGER".to_string(), ChangeAction::Add);
    store.alter_table("projects", &changes, 1000).await.unwrap();

    let columns = store.table_schema("projects").await.unwrap();
    assert!(columns.iter().any(|c| c == "priority INTEGER"));
    let schema = store.get_schema("projects").await.unwrap();
    assert!(schema.field("priority").is_some());

    // The new column is usable immediately.
    store
        .insert(
            "projects",
            row(&[
                ("id", json!("p9")),
                ("title", json!("ranked")),
                ("priority", json!(2)),
            ]),
        )
        .await
        .unwrap();
    let fetched = store.get("projects", "p9").await.unwrap();
    assert_eq!(fetched["priority"], json!(2));
}

#[tokio::test]
async fn alter_table_modify_is_not_implemented() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    let mut changes = HashMap::new();
    changes.insert("owner".to_string(), ChangeAction::Modify);
    let err = store.alter_table("projects", &changes, 1000).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotImplemented);
}

#[tokio::test]
async fn drop_column_with_data_preserves_surviving_values() {
    let store = open_store().await;
    store
        .create_table(
            "t",
            TableOptions {
                description: String::new(),
                fields: vec![
                    FieldDef::new("name", FieldType::Text),
                    FieldDef::new("age", FieldType::Integer),
                    FieldDef::new("email", FieldType::Text),
                ],
                indexes: vec![],
                annotations: HashMap::new(),
            },
        )
        .await
        .unwrap();
    store
        .insert(
            "t",
            row(&[
                ("id", json!("1")),
                ("name", json!("Alice")),
                ("age", json!(25)),
                ("email", json!("a@x")),
            ]),
        )
        .await
        .unwrap();
    store
        .insert(
            "t",
            row(&[
                ("id", json!("2")),
                ("name", json!("Bob")),
                ("age", json!(30)),
                ("email", json!("b@x")),
            ]),
        )
        .await
        .unwrap();

    let mut changes = HashMap::new();
    changes.insert("email".to_string(), ChangeAction::Drop);
    store.alter_table("t", &changes, 1).await.unwrap();

    let rows = store.select("t", &Row::new()).await.unwrap();
    assert_eq!(rows.len(), 2);
    for r in &rows {
        assert!(!r.contains_key("email"));
    }
    let alice = rows.iter().find(|r| r["id"] == json!("1")).unwrap();
    assert_eq!(alice["name"], json!("Alice"));
    assert_eq!(alice["age"], json!(25));
    let bob = rows.iter().find(|r| r["id"] == json!("2")).unwrap();
    assert_eq!(bob["name"], json!("Bob"));
    assert_eq!(bob["age"], json!(30));

    let columns = store.table_schema("t").await.unwrap();
    assert!(columns.iter().any(|c| c.starts_with("name ")));
    assert!(columns.iter().any(|c| c.starts_with("age ")));
    assert!(!columns.iter().any(|c| c.starts_with("email")));

    let schema = store.get_schema("t").await.unwrap();
    assert!(schema.field("email").is_none());
}

#[tokio::test]
async fn drop_column_missing_column_is_not_found() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    let err = store.drop_column("projects", "ghost", 100).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    // The source table is untouched.
    assert!(store.table_exists("projects").await.unwrap());
}

#[tokio::test]
async fn drop_table_removes_registry_row_and_allows_recreate() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    store.drop_table("projects").await.unwrap();

    assert!(!store.table_exists("projects").await.unwrap());
    let err = store.get_schema("projects").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    store
        .create_table("projects", projects_options())
        .await
        .unwrap();

    let err = store.drop_table("never_created").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn track_version_assigns_monotone_versions() {
    let store = open_store().await;
    store.track_version("users", "add username").await.unwrap();
    store.track_version("users", "add email").await.unwrap();
    store.track_version("users", "drop legacy").await.unwrap();
    // A different schema keeps its own counter.
    store.track_version("roles", "initial").await.unwrap();

    let versions = store.list_versions("users").await.unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![3, 2, 1]);
    assert_eq!(versions[0].changes, "drop legacy");

    let roles = store.list_versions("roles").await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].version, 1);
}

#[tokio::test]
async fn version_reads_are_cached_until_ttl_expiry() {
    let manager = open_manager().await;
    let store = DynamicStore::with_version_cache(
        manager,
        Duration::from_millis(100),
        Duration::from_secs(600),
    );
    store.track_version("users", "v1").await.unwrap();

    let first = store.list_versions("users").await.unwrap();
    assert_eq!(first.len(), 1);
    let second = store.list_versions("users").await.unwrap();
    assert_eq!(second.len(), 1);

    let stats = store.version_cache_stats();
    assert_eq!(stats.misses, 1, "one database read for two lookups");
    assert_eq!(stats.hits, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    store.list_versions("users").await.unwrap();
    assert_eq!(store.version_cache_stats().misses, 2, "TTL expiry rereads");
}

#[tokio::test]
async fn dependency_edges_list_from_either_endpoint() {
    let store = open_store().await;
    store
        .add_dependency("users", "roles", "references")
        .await
        .unwrap();

    let from_parent = store.list_dependencies("users").await.unwrap();
    assert_eq!(from_parent.len(), 1);
    assert_eq!(from_parent[0].parent_schema, "users");
    assert_eq!(from_parent[0].child_schema, "roles");
    assert_eq!(from_parent[0].dependency_type, "references");

    let from_child = store.list_dependencies("roles").await.unwrap();
    assert_eq!(from_child.len(), 1);
    assert!(store.list_dependencies("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn query_builder_filters_orders_and_pages() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    for (id, title, stars) in [("a", "alpha", 1), ("b", "beta", 5), ("c", "gamma", 9)] {
        store
            .insert(
                "projects",
                row(&[
                    ("id", json!(id)),
                    ("title", json!(title)),
                    ("stars", json!(stars)),
                ]),
            )
            .await
            .unwrap();
    }

    let params = QueryParams::new()
        .select(vec!["id".into(), "stars".into()])
        .add_where("stars", ">", json!(1))
        .unwrap()
        .add_order_by("stars", true)
        .limit(1)
        .offset(1);
    let rows = store.query("projects", &params).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("b"));
    assert_eq!(rows[0]["stars"], json!(5));

    let in_params = QueryParams::new()
        .add_where("id", "IN", json!(["a", "c"]))
        .unwrap();
    let rows = store.query("projects", &in_params).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn count_respects_filters_and_aliveness() {
    let store = open_store().await;
    store
        .create_table("projects", projects_options())
        .await
        .unwrap();
    store
        .insert(
            "projects",
            row(&[
                ("id", json!("p1")),
                ("title", json!("one")),
                ("owner", json!("alice")),
            ]),
        )
        .await
        .unwrap();
    store
        .insert(
            "projects",
            row(&[
                ("id", json!("p2")),
                ("title", json!("two")),
                ("owner", json!("alice")),
            ]),
        )
        .await
        .unwrap();

    let filter = row(&[("owner", json!("alice"))]);
    assert_eq!(store.count("projects", &filter).await.unwrap(), 2);
    store.delete("projects", "p1").await.unwrap();
    assert_eq!(store.count("projects", &filter).await.unwrap(), 1);
}

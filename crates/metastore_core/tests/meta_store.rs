use metastore_core::db::open_db_in_memory;
use metastore_core::{
    MetaError, MetaMap, MetaStore, MetaType, MetaValue, Scope, SqliteMetaRepository, StoreConfig,
};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn open() -> (Connection, StoreConfig) {
    let config = StoreConfig::default().with_default_realm("app");
    let conn = open_db_in_memory(&config).unwrap();
    (conn, config)
}

fn store<'conn>(
    conn: &'conn Connection,
    config: &StoreConfig,
) -> MetaStore<SqliteMetaRepository<'conn>> {
    let repo = SqliteMetaRepository::try_new(conn, config.table_name.as_str()).unwrap();
    MetaStore::new(repo, config)
}

fn stored_row(conn: &Connection, realm: &str, key: &str) -> (String, Option<String>) {
    conn.query_row(
        "SELECT type, \"value\" FROM metadata WHERE realm = ?1 AND \"key\" = ?2;",
        [realm, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .unwrap()
}

fn matched_keys(
    store: &MetaStore<SqliteMetaRepository<'_>>,
    scope: &Scope,
    pattern: &str,
) -> Vec<String> {
    store
        .query(scope, pattern, MetaValue::Null)
        .unwrap()
        .as_map()
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default()
}

fn now_millis() -> i64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    i64::try_from(elapsed.as_millis()).unwrap()
}

fn row_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM metadata;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn set_then_get_returns_typed_values() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, "count", 5).unwrap();
    store.set(&scope, "tags", vec!["a", "b"]).unwrap();
    store.set(&scope, "ratio", 0.25).unwrap();
    store.set(&scope, "enabled", true).unwrap();
    store.set(&scope, "nothing", MetaValue::Null).unwrap();
    store.set(&scope, "name", "meta").unwrap();

    assert_eq!(store.get(&scope, "count", MetaValue::Null).unwrap(), MetaValue::Int(5));
    assert_eq!(
        store.get(&scope, "tags", MetaValue::Null).unwrap(),
        MetaValue::from(vec!["a", "b"])
    );
    assert_eq!(store.get(&scope, "ratio", 0).unwrap(), MetaValue::Float(0.25));
    assert_eq!(store.get(&scope, "enabled", false).unwrap(), MetaValue::Bool(true));
    assert_eq!(store.get(&scope, "nothing", "fallback").unwrap(), MetaValue::Null);
    assert_eq!(store.get(&scope, "name", MetaValue::Null).unwrap(), MetaValue::from("meta"));

    assert_eq!(stored_row(&conn, "app", "count"), ("int".to_string(), Some("5".to_string())));
    assert_eq!(
        stored_row(&conn, "app", "tags"),
        ("array".to_string(), Some(r#"["a","b"]"#.to_string()))
    );
    assert_eq!(stored_row(&conn, "app", "enabled").1.as_deref(), Some("1"));
    assert_eq!(stored_row(&conn, "app", "nothing"), ("null".to_string(), None));
}

#[test]
fn nested_containers_round_trip() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    let value = MetaValue::try_from(json!({
        "flags": [true, false, null],
        "limits": {"max": 10, "ratio": 1.0},
        "labels": ["x", ["y", "z"]],
    }))
    .unwrap();
    store.set(&scope, "settings", value.clone()).unwrap();

    let loaded = store.get(&scope, "settings", MetaValue::Null).unwrap();
    assert_eq!(loaded, value);
    let MetaValue::Map(entries) = loaded else {
        panic!("expected map");
    };
    let MetaValue::Map(limits) = &entries["limits"] else {
        panic!("expected nested map");
    };
    assert_eq!(limits["max"], MetaValue::Int(10));
    assert_eq!(limits["ratio"], MetaValue::Float(1.0));
}

#[test]
fn set_twice_keeps_one_record_and_last_value_wins() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, "mode", "draft").unwrap();
    store.set(&scope, "mode", 3).unwrap();

    assert_eq!(row_count(&conn), 1);
    assert_eq!(store.get(&scope, "mode", MetaValue::Null).unwrap(), MetaValue::Int(3));
    assert_eq!(stored_row(&conn, "app", "mode").0, "int");
}

#[test]
fn set_refreshes_updated_at_on_overwrite() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, "k", 1).unwrap();
    conn.execute("UPDATE metadata SET updated_at = 1000, created_at = 1000;", [])
        .unwrap();
    store.set(&scope, "k", 2).unwrap();

    let (created_at, updated_at): (i64, i64) = conn
        .query_row("SELECT created_at, updated_at FROM metadata;", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(created_at, 1000);
    assert!(updated_at > 1000);
}

#[test]
fn timestamps_have_millisecond_precision() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    let before = now_millis();
    store.set(&scope, "k", 1).unwrap();
    thread::sleep(Duration::from_millis(25));
    store.set(&scope, "k", 2).unwrap();
    let after = now_millis();

    let (created_at, updated_at): (i64, i64) = conn
        .query_row("SELECT created_at, updated_at FROM metadata;", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert!(created_at >= before - 5 && created_at <= after + 5);
    assert!(updated_at >= created_at + 20, "{created_at} -> {updated_at}");
    assert!(updated_at <= after + 5);
}

#[test]
fn create_twice_fails_and_keeps_first_value() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.create(&scope, "owner", "alice").unwrap();
    let err = store.create(&scope, "owner", "bob").unwrap_err();

    assert!(matches!(err, MetaError::AlreadyExists { ref key } if key == "owner"));
    assert_eq!(
        store.get(&scope, "owner", MetaValue::Null).unwrap(),
        MetaValue::from("alice")
    );
}

#[test]
fn update_requires_existing_record() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    let err = store.update(&scope, "missing", 1).unwrap_err();
    assert!(matches!(err, MetaError::NotFound { ref key } if key == "missing"));
    assert_eq!(row_count(&conn), 0);

    store.set(&scope, "present", 1).unwrap();
    store.update(&scope, "present", vec![1, 2]).unwrap();
    assert_eq!(
        store.get(&scope, "present", MetaValue::Null).unwrap(),
        MetaValue::from(vec![1, 2])
    );
}

#[test]
fn get_returns_default_only_on_miss() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    assert_eq!(store.get(&scope, "absent", "fallback").unwrap(), MetaValue::from("fallback"));
    assert_eq!(store.find(&scope, "absent").unwrap(), None);

    store.set(&scope, "present", "stored").unwrap();
    assert_eq!(
        store.get(&scope, "present", "fallback").unwrap(),
        MetaValue::from("stored")
    );

    let long_key = "k".repeat(200);
    assert_eq!(
        store.get(&scope, long_key.as_str(), 7).unwrap(),
        MetaValue::Int(7)
    );
}

#[test]
fn exists_and_count_are_scoped() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let plain = store.default_scope();
    let owned = store.owner_scope("users", "1");
    let other_realm = Scope::new("billing");

    store.set(&plain, "a", 1).unwrap();
    store.set(&plain, "b", 2).unwrap();
    store.set(&owned, "a", 3).unwrap();

    assert!(store.exists(&plain, "a").unwrap());
    assert!(store.exists(&owned, "a").unwrap());
    assert!(!store.exists(&owned, "b").unwrap());
    assert!(!store.exists(&other_realm, "a").unwrap());

    assert_eq!(store.count(&plain).unwrap(), 2);
    assert_eq!(store.count(&owned).unwrap(), 1);
    assert_eq!(store.count(&other_realm).unwrap(), 0);
    assert_eq!(store.get(&owned, "a", MetaValue::Null).unwrap(), MetaValue::Int(3));
}

#[test]
fn all_and_keys_are_ordered_by_key() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = Scope::owned("app", "posts", "17");

    store.set(&scope, "zeta", 1).unwrap();
    store.set(&scope, "alpha", 2).unwrap();
    store.set(&scope, "Mid", 3).unwrap();
    store.set(&scope, "alpha", 4).unwrap();
    store.set(&store.default_scope(), "other", 5).unwrap();

    assert_eq!(store.keys(&scope).unwrap(), vec!["Mid", "alpha", "zeta"]);

    let all = store.all(&scope).unwrap();
    let expected: MetaMap = BTreeMap::from([
        ("Mid".to_string(), MetaValue::Int(3)),
        ("alpha".to_string(), MetaValue::Int(4)),
        ("zeta".to_string(), MetaValue::Int(1)),
    ]);
    assert_eq!(all, expected);
    assert!(store.all(&Scope::new("empty")).unwrap().is_empty());
}

#[test]
fn integer_keys_are_stored_as_strings() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, 42, "answer").unwrap();
    assert!(store.exists(&scope, "42").unwrap());
    assert_eq!(
        store.get(&scope, &json!(42), MetaValue::Null).unwrap(),
        MetaValue::from("answer")
    );
}

#[test]
fn invalid_keys_are_rejected_on_write() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    let long_key = "k".repeat(129);
    assert!(matches!(
        store.set(&scope, long_key.as_str(), 1),
        Err(MetaError::InvalidKey(_))
    ));
    for key in [json!(1.5), json!([]), json!({}), json!(null)] {
        assert!(matches!(
            store.set(&scope, &key, 1),
            Err(MetaError::InvalidKey(_))
        ));
    }
    assert_eq!(row_count(&conn), 0);

    let at_limit = "k".repeat(128);
    store.set(&scope, at_limit.as_str(), 1).unwrap();
    assert_eq!(row_count(&conn), 1);
}

#[test]
fn unsupported_values_are_rejected() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    assert!(matches!(
        store.set(&scope, "nan", f64::NAN),
        Err(MetaError::UnsupportedValueType(_))
    ));
    assert!(MetaValue::try_from(json!(u64::MAX)).is_err());
    assert_eq!(row_count(&conn), 0);
}

#[test]
fn remove_deletes_listed_keys_and_ignores_missing_ones() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();
    let owned = store.owner_scope("users", "1");

    store.set(&scope, "k1", 1).unwrap();
    store.set(&scope, "k3", 3).unwrap();
    store.set(&owned, "k1", 1).unwrap();

    let deleted = store.remove(&scope, ["k1", "k2"]).unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.keys(&scope).unwrap(), vec!["k3"]);
    assert!(store.exists(&owned, "k1").unwrap());

    assert_eq!(store.remove(&scope, Vec::<String>::new()).unwrap(), 0);
}

#[test]
fn purge_only_touches_its_scope() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();
    let owned = store.owner_scope("users", "1");
    let other_realm = Scope::new("billing");

    for index in 0..4 {
        store.set(&scope, format!("key-{index}"), index).unwrap();
    }
    store.set(&owned, "kept", true).unwrap();
    store.set(&other_realm, "kept", true).unwrap();

    assert_eq!(store.purge(&scope).unwrap(), 4);
    assert_eq!(store.count(&scope).unwrap(), 0);
    assert_eq!(store.count(&owned).unwrap(), 1);
    assert_eq!(store.count(&other_realm).unwrap(), 1);
    assert_eq!(store.purge(&scope).unwrap(), 0);
}

#[test]
fn query_supports_leading_trailing_and_embedded_wildcards() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, "abc.first", 1).unwrap();
    store.set(&scope, "x.abc.y", 2).unwrap();
    store.set(&scope, "tail.abc", 3).unwrap();
    store.set(&scope, "unrelated", 4).unwrap();

    assert_eq!(matched_keys(&store, &scope, "abc*"), vec!["abc.first"]);
    assert_eq!(
        matched_keys(&store, &scope, "*abc*"),
        vec!["abc.first", "tail.abc", "x.abc.y"]
    );
    assert_eq!(matched_keys(&store, &scope, "*abc"), vec!["tail.abc"]);
    assert_eq!(matched_keys(&store, &scope, "x*y"), vec!["x.abc.y"]);

    let suffix = store.query(&scope, "*abc", MetaValue::Null).unwrap();
    assert_eq!(
        suffix,
        MetaValue::Map(BTreeMap::from([("tail.abc".to_string(), MetaValue::Int(3))]))
    );
}

#[test]
fn query_returns_default_when_nothing_matches() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();
    store.set(&scope, "abc", 1).unwrap();

    assert_eq!(store.query(&scope, "zzz*", MetaValue::Null).unwrap(), MetaValue::Null);
    assert_eq!(store.query(&scope, "zzz*", "none").unwrap(), MetaValue::from("none"));

    let default = BTreeMap::from([("fallback".to_string(), MetaValue::Bool(true))]);
    assert_eq!(
        store
            .query(&store.owner_scope("users", "1"), "abc", default.clone())
            .unwrap(),
        MetaValue::from(default)
    );

    let empty_default = store.query(&scope, "zzz*", MetaMap::new()).unwrap();
    assert_eq!(empty_default, MetaValue::Map(MetaMap::new()));
    assert_ne!(store.query(&scope, "abc", MetaMap::new()).unwrap(), empty_default);
}

#[test]
fn query_treats_glob_metacharacters_and_case_literally() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    store.set(&scope, "a?c", 1).unwrap();
    store.set(&scope, "abc", 2).unwrap();
    store.set(&scope, "[x]", 3).unwrap();
    store.set(&scope, "ABC", 4).unwrap();

    assert_eq!(matched_keys(&store, &scope, "a?c"), vec!["a?c"]);
    assert_eq!(matched_keys(&store, &scope, "[x*"), vec!["[x]"]);
    assert_eq!(matched_keys(&store, &scope, "AB*"), vec!["ABC"]);
}

#[test]
fn owner_fields_over_limit_are_invalid_scope() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.owner_scope("users", "9".repeat(129));

    assert!(matches!(
        store.set(&scope, "k", 1),
        Err(MetaError::InvalidScope(_))
    ));
    assert_eq!(row_count(&conn), 0);
}

#[test]
fn corrupted_rows_surface_as_storage_errors() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    conn.execute(
        "INSERT INTO metadata (realm, \"key\", \"value\", type) VALUES ('app', 'broken', 'twelve', 'int');",
        [],
    )
    .unwrap();

    assert!(matches!(
        store.get(&scope, "broken", MetaValue::Null),
        Err(MetaError::Storage(_))
    ));
    assert!(matches!(store.all(&scope), Err(MetaError::Storage(_))));
}

#[test]
fn legacy_type_aliases_decode() {
    let (conn, config) = open();
    let store = store(&conn, &config);
    let scope = store.default_scope();

    conn.execute_batch(
        "PRAGMA ignore_check_constraints = ON;
         INSERT INTO metadata (realm, \"key\", \"value\", type) VALUES ('app', 'n', '12', 'integer');
         INSERT INTO metadata (realm, \"key\", \"value\", type) VALUES ('app', 'f', '1.5', 'double');
         INSERT INTO metadata (realm, \"key\", \"value\", type) VALUES ('app', 'b', '1', 'boolean');",
    )
    .unwrap();

    let all = store.all(&scope).unwrap();
    assert_eq!(all["n"], MetaValue::Int(12));
    assert_eq!(all["f"], MetaValue::Float(1.5));
    assert_eq!(all["b"], MetaValue::Bool(true));
    assert_eq!(all["n"].meta_type(), MetaType::Int);
}

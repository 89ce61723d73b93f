//! Integration tests for schema files and the command layer.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use relata::CliError;
use relata::cli::{QueryArgs, cmd_check, describe, read_json, run_normalize, run_query, seed};
use relata::config::load_schema;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BLOG_SCHEMA: &str = r#"
[[entity]]
name = "users"

[[entity.field]]
name = "id"

[[entity.field]]
name = "name"
kind = "string"

[[entity.field]]
name = "age"
kind = "number"
default = 0

[[entity.relation]]
name = "posts"
kind = "has_many"
related = "posts"
foreign_key = "user_id"

[[entity.relation]]
name = "roles"
kind = "belongs_to_many"
related = "roles"
pivot = "role_user"
foreign_pivot_key = "user_id"
related_pivot_key = "role_id"

[[entity]]
name = "posts"

[[entity.field]]
name = "id"

[[entity.field]]
name = "user_id"

[[entity.field]]
name = "title"
kind = "string"

[[entity.relation]]
name = "author"
kind = "belongs_to"
parent = "users"
foreign_key = "user_id"

[[entity]]
name = "roles"

[[entity.field]]
name = "id"

[[entity]]
name = "role_user"

[[entity.field]]
name = "user_id"

[[entity.field]]
name = "role_id"
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn seed_document() -> Value {
    json!({
        "users": [
            {"id": 1, "name": "jo", "age": 30, "posts": [{"id": 10, "title": "a"}, {"id": 11, "title": "b"}]},
            {"id": 2, "name": "al", "age": "20", "roles": [{"id": 7}]},
            {"id": 3, "name": "ed", "age": 40}
        ]
    })
}

fn query(data: &Path, entity: &str) -> QueryArgs {
    QueryArgs {
        data: data.to_path_buf(),
        entity: entity.to_string(),
        ..QueryArgs::default()
    }
}

// =============================================================================
// SCHEMA FILES
// =============================================================================

#[test]
fn test_load_schema_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "blog.toml", BLOG_SCHEMA);

    let registry = load_schema(&path).unwrap();
    assert!(registry.contains("users"));
    assert!(registry.contains("role_user"));

    let summary = describe(&registry).unwrap();
    let entities = summary["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 4);
    let users = entities.iter().find(|e| e["name"] == "users").unwrap();
    assert_eq!(users["fields"], json!(3));
    assert_eq!(users["relations"], json!(2));
}

#[test]
fn test_missing_schema_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_schema(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, CliError::Io { .. }));
}

#[test]
fn test_malformed_schema_is_toml_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "bad.toml", "[[entity]\nname = ");
    assert!(matches!(load_schema(&path), Err(CliError::Toml(_))));
}

#[test]
fn test_check_command_accepts_valid_schema() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "blog.toml", BLOG_SCHEMA);
    cmd_check(&path, true, false).unwrap();
    cmd_check(&path, false, true).unwrap();
}

// =============================================================================
// NORMALIZE
// =============================================================================

#[test]
fn test_normalize_file() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let data = write(
        &dir,
        "users.json",
        r#"{"id": 1, "name": "jo", "posts": [{"id": 10}], "roles": [{"id": 7}]}"#,
    );

    let registry = load_schema(&schema).unwrap();
    let input = read_json(&data).unwrap();
    let store = run_normalize(&registry, &input, "users").unwrap();

    assert_eq!(store.table("users").map(|t| t.len()), Some(1));
    assert_eq!(store.table("posts").map(|t| t.len()), Some(1));
    assert_eq!(store.table("roles").map(|t| t.len()), Some(1));
    assert_eq!(store.table("role_user").map(|t| t.len()), Some(1));

    let user = store.get("users", &"1".into()).unwrap();
    assert_eq!(user.get("age"), Some(&json!(0)));
    let post = store.get("posts", &"10".into()).unwrap();
    assert_eq!(post.get("user_id"), Some(&json!(1)));
}

#[test]
fn test_normalize_unknown_entity_fails() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let registry = load_schema(&schema).unwrap();
    let err = run_normalize(&registry, &json!({"id": 1}), "ghosts").unwrap_err();
    assert!(matches!(err, CliError::Engine(_)));
}

#[test]
fn test_invalid_json_data_is_reported() {
    let dir = TempDir::new().unwrap();
    let data = write(&dir, "broken.json", "{\"id\": ");
    assert!(matches!(read_json(&data), Err(CliError::Json(_))));
}

// =============================================================================
// QUERY
// =============================================================================

#[test]
fn test_query_filters_orders_and_loads() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let data = write(&dir, "seed.json", &seed_document().to_string());
    let db = seed(load_schema(&schema).unwrap(), &read_json(&data).unwrap()).unwrap();

    let mut args = query(&data, "users");
    args.order_by = vec!["age:desc".to_string()];
    args.with = vec!["posts".to_string()];
    let result = run_query(&db, &args).unwrap();

    let names: Vec<&str> = result
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["ed", "jo", "al"]);
    assert_eq!(result[1]["posts"].as_array().map(Vec::len), Some(2));
    assert_eq!(result[2]["age"], json!(20));
}

#[test]
fn test_query_where_and_limit() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let db = seed(load_schema(&schema).unwrap(), &seed_document()).unwrap();
    let data = dir.path().join("unused.json");

    let mut args = query(&data, "posts");
    args.filters = vec!["user_id=1".to_string()];
    args.with = vec!["author".to_string()];
    args.limit = Some(1);
    let result = run_query(&db, &args).unwrap();

    let posts = result.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["title"], json!("a"));
    assert_eq!(posts[0]["author"]["name"], json!("jo"));
}

#[test]
fn test_query_terminals() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let db = seed(load_schema(&schema).unwrap(), &seed_document()).unwrap();
    let data = dir.path().join("unused.json");

    let mut find = query(&data, "users");
    find.find = Some("2".to_string());
    find.with = vec!["roles".to_string()];
    let found = run_query(&db, &find).unwrap();
    assert_eq!(found["name"], json!("al"));
    assert_eq!(found["roles"].as_array().map(Vec::len), Some(1));

    let mut missing = query(&data, "users");
    missing.find = Some("99".to_string());
    assert_eq!(run_query(&db, &missing).unwrap(), Value::Null);

    let mut count = query(&data, "posts");
    count.count = true;
    assert_eq!(run_query(&db, &count).unwrap(), json!(2));

    let mut first = query(&data, "users");
    first.first = true;
    first.order_by = vec!["name".to_string()];
    assert_eq!(run_query(&db, &first).unwrap()["name"], json!("al"));
}

#[test]
fn test_query_bad_arguments() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "blog.toml", BLOG_SCHEMA);
    let db = seed(load_schema(&schema).unwrap(), &seed_document()).unwrap();
    let data = dir.path().join("unused.json");

    let mut bad_filter = query(&data, "users");
    bad_filter.filters = vec!["nameonly".to_string()];
    assert!(matches!(
        run_query(&db, &bad_filter),
        Err(CliError::InvalidArgument(_))
    ));

    let mut bad_relation = query(&data, "users");
    bad_relation.with = vec!["friends".to_string()];
    assert!(matches!(
        run_query(&db, &bad_relation),
        Err(CliError::Engine(_))
    ));
}

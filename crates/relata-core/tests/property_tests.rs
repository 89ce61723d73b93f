//! # Property-Based Tests
//!
//! Determinism and round-trip invariants of the engine, checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use relata_core::{
    Database, Direction, EntityDef, FieldDef, IndexId, Item, Registry, RelationDef, normalize,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;

fn blog() -> Database {
    let mut db = Database::new();
    db.register(
        EntityDef::new("users")
            .field("id", FieldDef::attr(Value::Null))
            .field("name", FieldDef::string(""))
            .relation("posts", RelationDef::has_many("posts", "user_id"))
            .relation(
                "roles",
                RelationDef::belongs_to_many("roles", "role_user", "user_id", "role_id"),
            ),
    )
    .register(
        EntityDef::new("posts")
            .field("id", FieldDef::attr(Value::Null))
            .field("user_id", FieldDef::attr(Value::Null))
            .field("title", FieldDef::string("")),
    )
    .register(EntityDef::new("roles").field("id", FieldDef::attr(Value::Null)))
    .register(
        EntityDef::new("role_user")
            .field("user_id", FieldDef::attr(Value::Null))
            .field("role_id", FieldDef::attr(Value::Null)),
    );
    db
}

/// Users with distinct ids, each owning posts with globally distinct ids.
fn users_tree(users: &BTreeSet<u32>, posts_per_user: usize) -> Value {
    let mut next_post = 0u32;
    let records: Vec<Value> = users
        .iter()
        .map(|&id| {
            let posts: Vec<Value> = (0..posts_per_user)
                .map(|n| {
                    next_post += 1;
                    json!({"id": next_post, "user_id": id, "title": format!("t{n}")})
                })
                .collect();
            json!({"id": id, "name": format!("u{id}"), "posts": posts})
        })
        .collect();
    Value::Array(records)
}

fn titles(item: &Item) -> Vec<Value> {
    item.many("posts")
        .iter()
        .filter_map(|post| post.value("title").cloned())
        .collect()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Normalize then hydrate reproduces the input's field values.
    #[test]
    fn round_trip_preserves_fields(
        users in proptest::collection::btree_set(0u32..1000, 1..8),
        posts_per_user in 0usize..4,
    ) {
        let mut db = blog();
        let input = users_tree(&users, posts_per_user);
        db.insert("users", &input).expect("insert");

        let items = db.query("users").expect("query").with("posts").get().expect("get");
        let originals = input.as_array().cloned().unwrap_or_default();
        prop_assert_eq!(items.len(), originals.len());

        for (item, original) in items.iter().zip(&originals) {
            prop_assert_eq!(item.value("id"), original.get("id"));
            prop_assert_eq!(item.value("name"), original.get("name"));
            let expected: Vec<Value> = original["posts"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|post| post.get("title").cloned())
                .collect();
            prop_assert_eq!(titles(item), expected);
        }
    }

    /// Composite ids depend on declared key order only.
    #[test]
    fn composite_key_determinism(a in any::<i32>(), b in "[a-z]{1,6}") {
        let mut registry = Registry::new();
        registry.register(
            EntityDef::new("pairs")
                .composite_key(["key_1", "key_2"])
                .field("key_1", FieldDef::attr(Value::Null))
                .field("key_2", FieldDef::attr(Value::Null)),
        );
        let forward = normalize(&registry, &json!({"key_1": a, "key_2": b}), "pairs").expect("forward");
        let backward = normalize(&registry, &json!({"key_2": b, "key_1": a}), "pairs").expect("backward");

        prop_assert_eq!(&forward, &backward);
        let expected = IndexId::composite(&[json!(a), json!(b)]);
        prop_assert!(forward.get("pairs", &expected).is_some());
    }

    /// Writing the same edges any number of times keeps one pivot row per edge.
    #[test]
    fn pivot_rows_are_idempotent(
        roles in proptest::collection::btree_set(1u32..50, 1..6),
        repeats in 1usize..4,
    ) {
        let mut db = blog();
        let role_values: Vec<Value> = roles.iter().map(|r| json!({"id": r})).collect();
        for _ in 0..repeats {
            db.insert("users", &json!({"id": 1, "roles": role_values})).expect("insert");
        }
        let pivots = db.store().table("role_user").map_or(0, |t| t.len());
        prop_assert_eq!(pivots, roles.len());
    }

    /// Keyless owners never share their children.
    #[test]
    fn synthetic_ids_are_stable(count in 1usize..10) {
        let mut db = blog();
        let input: Vec<Value> = (0..count)
            .map(|n| json!({"posts": [{"id": n + 1}]}))
            .collect();
        db.insert("users", &Value::Array(input)).expect("insert");

        for n in 0..count {
            let post = db
                .store()
                .get("posts", &IndexId::new((n + 1).to_string()))
                .expect("post");
            let owner = format!("_no_key_{}", n + 1);
            prop_assert_eq!(post.get("user_id"), Some(&json!(owner)));
        }
    }

    /// Sorting is stable: rows with equal keys keep table order.
    #[test]
    fn ordering_is_stable(groups in vec(0u8..3, 1..20)) {
        let mut db = blog();
        let posts: Vec<Value> = groups
            .iter()
            .enumerate()
            .map(|(i, g)| json!({"id": i + 1, "title": format!("g{g}")}))
            .collect();
        db.insert("posts", &Value::Array(posts)).expect("insert");

        let items = db
            .query("posts")
            .expect("query")
            .order_by("title", Direction::Asc)
            .get()
            .expect("get");
        let keys: Vec<(String, u64)> = items
            .iter()
            .map(|item| {
                let title = item.value("title").and_then(Value::as_str).unwrap_or_default().to_string();
                let id = item.value("id").and_then(Value::as_u64).unwrap_or_default();
                (title, id)
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }
}

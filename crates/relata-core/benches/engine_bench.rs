//! # Engine Benchmarks
//!
//! Normalization and eager-loading throughput of relata-core.
//!
//! Run with: `cargo bench -p relata-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use relata_core::{Database, Direction, EntityDef, FieldDef, Registry, RelationDef, normalize};
use serde_json::{Value, json};
use std::hint::black_box;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
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
                .field("title", FieldDef::string(""))
                .relation("author", RelationDef::belongs_to("users", "user_id")),
        )
        .register(EntityDef::new("roles").field("id", FieldDef::attr(Value::Null)))
        .register(
            EntityDef::new("role_user")
                .field("user_id", FieldDef::attr(Value::Null))
                .field("role_id", FieldDef::attr(Value::Null)),
        );
    registry
}

/// `size` users with three posts and two roles each.
fn users(size: usize) -> Value {
    let records: Vec<Value> = (0..size)
        .map(|i| {
            let posts: Vec<Value> = (0..3)
                .map(|p| json!({"id": i * 3 + p, "title": format!("post {p}")}))
                .collect();
            json!({"id": i, "name": format!("user {i}"), "posts": posts, "roles": [i % 5, 5 + i % 3]})
        })
        .collect();
    Value::Array(records)
}

fn database(size: usize) -> Database {
    let mut db = Database::with_registry(registry());
    db.insert("users", &users(size)).expect("seed");
    db
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let registry = registry();

    for size in [10, 100, 1000].iter() {
        let input = users(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(normalize(&registry, input, "users")));
        });
    }

    group.finish();
}

fn bench_filter_and_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_and_order");

    for size in [100, 1000].iter() {
        let db = database(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let query = db.query("posts").expect("query");
                black_box(
                    query
                        .where_fn("id", |id| id.as_u64().is_some_and(|id| id % 2 == 0))
                        .order_by("title", Direction::Desc)
                        .limit(50)
                        .get(),
                )
            });
        });
    }

    group.finish();
}

fn bench_eager_loading(c: &mut Criterion) {
    let mut group = c.benchmark_group("eager_loading");

    for size in [10, 100, 500].iter() {
        let db = database(*size);

        group.bench_with_input(BenchmarkId::new("posts_author", size), size, |b, _| {
            b.iter(|| {
                let query = db.query("users").expect("query");
                black_box(query.with("posts.author").get())
            });
        });

        group.bench_with_input(BenchmarkId::new("roles_pivot", size), size, |b, _| {
            b.iter(|| {
                let query = db.query("users").expect("query");
                black_box(query.with("roles").get())
            });
        });
    }

    group.finish();
}

fn bench_has(c: &mut Criterion) {
    let mut group = c.benchmark_group("has");

    for size in [10, 100, 500].iter() {
        let db = database(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let query = db.query("users").expect("query");
                black_box(query.has_compared("posts", ">=", 3).count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_normalize,
    bench_filter_and_order,
    bench_eager_loading,
    bench_has
);
criterion_main!(benches);

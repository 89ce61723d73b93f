//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//! Each `cmd_*` function prints its result; the functions they delegate to
//! return values so they can be tested without capturing stdout.

use super::QueryArgs;
use crate::config::load_schema;
use crate::error::{CliError, CliResult, read_file};
use relata_core::{Database, Direction, Item, Registry, Store, normalize};
use serde_json::{Value, json};
use std::path::Path;

// =============================================================================
// INPUT HELPERS
// =============================================================================

/// Read and parse a JSON file.
pub fn read_json(path: &Path) -> CliResult<Value> {
    let text = read_file(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Parse a command-line scalar: JSON when it parses, a plain string otherwise.
pub fn parse_scalar(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Split `field=value`.
pub fn parse_filter(raw: &str) -> CliResult<(String, Value)> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), parse_scalar(value.trim())))
        }
        _ => Err(CliError::InvalidArgument(format!(
            "filter `{raw}` is not of the form field=value"
        ))),
    }
}

/// Split `field[:asc|desc]`.
pub fn parse_order(raw: &str) -> CliResult<(String, Direction)> {
    let (field, direction) = match raw.split_once(':') {
        Some((field, direction)) => (field, direction.parse::<Direction>()?),
        None => (raw, Direction::Asc),
    };
    if field.trim().is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "sort key `{raw}` names no field"
        )));
    }
    Ok((field.trim().to_string(), direction))
}

/// Insert every entry of a seed document (`{"users": [...], ...}`) in
/// document order.
pub fn seed(registry: Registry, document: &Value) -> CliResult<Database> {
    let Value::Object(entries) = document else {
        return Err(CliError::InvalidArgument(
            "seed document must be a JSON object keyed by entity".to_string(),
        ));
    };

    let mut db = Database::with_registry(registry);
    for (entity, input) in entries {
        let persisted = db.insert(entity, input)?;
        tracing::debug!(entity = %entity, rows = persisted.len(), "seeded");
    }
    Ok(db)
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Describe a registry: entity names with their field and relation counts.
pub fn describe(registry: &Registry) -> CliResult<Value> {
    let mut entities = Vec::new();
    for name in registry.names() {
        let def = registry.resolve(name)?;
        entities.push(json!({
            "name": name,
            "base": def.base(),
            "fields": registry.fields(name)?.len(),
            "relations": registry.relations(name)?.len(),
        }));
    }
    Ok(json!({ "entities": entities }))
}

/// Validate the schema and list its entities.
pub fn cmd_check(schema: &Path, json_mode: bool, verbose: bool) -> CliResult<()> {
    let registry = load_schema(schema)?;
    let summary = describe(&registry)?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let entities = summary["entities"].as_array().map_or(&[][..], Vec::as_slice);
    println!("Schema OK: {} entities", entities.len());
    if verbose {
        for entity in entities {
            let base = entity["base"]
                .as_str()
                .map(|b| format!(" extends {b}"))
                .unwrap_or_default();
            println!(
                "  {}{}: {} fields, {} relations",
                entity["name"].as_str().unwrap_or_default(),
                base,
                entity["fields"],
                entity["relations"]
            );
        }
    }
    Ok(())
}

// =============================================================================
// NORMALIZE COMMAND
// =============================================================================

/// Flatten `input` rooted at `entity`.
pub fn run_normalize(registry: &Registry, input: &Value, entity: &str) -> CliResult<Store> {
    Ok(normalize(registry, input, entity)?)
}

/// Normalize a JSON file and print the resulting tables.
pub fn cmd_normalize(schema: &Path, json_mode: bool, data: &Path, entity: &str) -> CliResult<()> {
    let registry = load_schema(schema)?;
    let input = read_json(data)?;
    let store = run_normalize(&registry, &input, entity)?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&store)?);
        return Ok(());
    }

    for (name, table) in store.tables() {
        println!("{name} ({} rows)", table.len());
        for (id, row) in &table.data {
            println!("  {id}: {}", Value::Object(row.clone()));
        }
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Build and run the query described by `args` against `db`.
///
/// `--find`, `--count` and `--first` pick the terminal operation, in that
/// order; otherwise every matching record is returned.
pub fn run_query(db: &Database, args: &QueryArgs) -> CliResult<Value> {
    let mut query = db.query(&args.entity)?;

    for raw in &args.filters {
        let (field, value) = parse_filter(raw)?;
        query = query.where_eq(&field, value);
    }
    for raw in &args.order_by {
        let (field, direction) = parse_order(raw)?;
        query = query.order_by(&field, direction);
    }
    for path in &args.with {
        query = query.with(path);
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    if let Some(key) = &args.find {
        let found = query.find(parse_scalar(key))?;
        return Ok(found.as_ref().map_or(Value::Null, Item::to_json));
    }
    if args.count {
        return Ok(Value::from(query.count()?));
    }
    if args.first {
        return Ok(query.first()?.as_ref().map_or(Value::Null, Item::to_json));
    }

    let items = query.get()?;
    tracing::debug!(entity = %args.entity, results = items.len(), "query complete");
    Ok(Value::Array(items.iter().map(Item::to_json).collect()))
}

/// Seed a database from `args.data` and print the query result.
pub fn cmd_query(schema: &Path, json_mode: bool, args: &QueryArgs) -> CliResult<()> {
    let registry = load_schema(schema)?;
    let document = read_json(&args.data)?;
    let db = seed(registry, &document)?;
    let result = run_query(&db, args)?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match &result {
        Value::Array(items) => {
            for item in items {
                println!("{item}");
            }
            println!("({} results)", items.len());
        }
        Value::Null => println!("No match"),
        other => println!("{other}"),
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_prefer_json() {
        assert_eq!(parse_scalar("3"), json!(3));
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("jo"), json!("jo"));
        assert_eq!(parse_scalar("\"3\""), json!("3"));
    }

    #[test]
    fn filters_split_on_first_equals() {
        let (field, value) = parse_filter("note=a=b").expect("filter");
        assert_eq!(field, "note");
        assert_eq!(value, json!("a=b"));
        assert!(parse_filter("novalue").is_err());
        assert!(parse_filter("=1").is_err());
    }

    #[test]
    fn order_keys_default_to_ascending() {
        assert_eq!(
            parse_order("age").expect("order"),
            ("age".to_string(), Direction::Asc)
        );
        assert_eq!(
            parse_order("age:DESC").expect("order"),
            ("age".to_string(), Direction::Desc)
        );
        assert!(parse_order("age:sideways").is_err());
        assert!(parse_order(":desc").is_err());
    }

    #[test]
    fn seed_requires_an_object() {
        assert!(seed(Registry::new(), &json!([1, 2])).is_err());
    }
}

//! Scalar field descriptors.

use serde_json::{Number, Value};
use std::fmt;
use std::sync::Arc;

/// Zero-argument factory producing a default value.
pub type ValueFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Transformation applied to a field value on every hydration.
pub type Mutator = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Kind tag of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Untyped attribute, stored as given.
    Attr,
    /// Attribute cast to a string.
    String,
    /// Attribute cast to a number.
    Number,
    /// Attribute cast to a boolean.
    Boolean,
    /// Generated unique id.
    Uid,
    /// Auto-increment counter.
    Increment,
}

impl FieldKind {
    /// Parse the lowercase kind name used in schema files.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "attr" => Some(Self::Attr),
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            "uid" => Some(Self::Uid),
            "increment" => Some(Self::Increment),
            _ => None,
        }
    }
}

/// Default of a field: a fixed value or a factory called per record.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(ValueFactory),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Describes one scalar attribute of an entity.
#[derive(Clone)]
pub struct FieldDef {
    kind: FieldKind,
    default: DefaultValue,
    nullable: bool,
    mutator: Option<Mutator>,
    generator: Option<ValueFactory>,
}

impl FieldDef {
    fn with_kind(kind: FieldKind, default: Value) -> Self {
        Self {
            kind,
            default: DefaultValue::Value(default),
            nullable: false,
            mutator: None,
            generator: None,
        }
    }

    /// Untyped attribute with a default value.
    #[must_use]
    pub fn attr(default: impl Into<Value>) -> Self {
        Self::with_kind(FieldKind::Attr, default.into())
    }

    /// String attribute with a default value.
    #[must_use]
    pub fn string(default: impl Into<Value>) -> Self {
        Self::with_kind(FieldKind::String, default.into())
    }

    /// Number attribute with a default value.
    #[must_use]
    pub fn number(default: impl Into<Value>) -> Self {
        Self::with_kind(FieldKind::Number, default.into())
    }

    /// Boolean attribute with a default value.
    #[must_use]
    pub fn boolean(default: impl Into<Value>) -> Self {
        Self::with_kind(FieldKind::Boolean, default.into())
    }

    /// Generated unique id (`$uid1`, `$uid2`, ...).
    #[must_use]
    pub fn uid() -> Self {
        Self::with_kind(FieldKind::Uid, Value::Null)
    }

    /// Generated unique id produced by a custom factory.
    #[must_use]
    pub fn uid_with(generator: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            generator: Some(Arc::new(generator)),
            ..Self::uid()
        }
    }

    /// Auto-increment counter.
    #[must_use]
    pub fn increment() -> Self {
        Self::with_kind(FieldKind::Increment, Value::Null)
    }

    /// Build a field of the given kind; generated kinds ignore `default`.
    #[must_use]
    pub fn of_kind(kind: FieldKind, default: Value) -> Self {
        match kind {
            FieldKind::Uid => Self::uid(),
            FieldKind::Increment => Self::increment(),
            kind => Self::with_kind(kind, default),
        }
    }

    /// Keep `null` as `null` instead of casting it to the type's zero value.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Replace the default with a factory called for every filled record.
    #[must_use]
    pub fn default_with(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = DefaultValue::Factory(Arc::new(factory));
        self
    }

    /// Apply `mutator` to the value on every hydration.
    #[must_use]
    pub fn mutate(mut self, mutator: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.mutator = Some(Arc::new(mutator));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the engine generates missing values of this field.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        matches!(self.kind, FieldKind::Uid | FieldKind::Increment)
    }

    /// The custom uid generator, if any.
    pub(crate) fn generator(&self) -> Option<&ValueFactory> {
        self.generator.as_ref()
    }

    /// Produce the default value for a new record.
    #[must_use]
    pub fn default_value(&self) -> Value {
        let value = match &self.default {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        };
        self.cast(value)
    }

    /// Cast a stored value to this field's type. Untyped kinds pass through.
    #[must_use]
    pub fn cast(&self, value: Value) -> Value {
        if value.is_null() && (self.nullable || !self.is_typed()) {
            return Value::Null;
        }
        match self.kind {
            FieldKind::String => cast_string(value),
            FieldKind::Number => cast_number(value),
            FieldKind::Boolean => cast_boolean(value),
            FieldKind::Attr | FieldKind::Uid | FieldKind::Increment => value,
        }
    }

    /// Cast, then apply the mutator. This is the value a hydrated record shows.
    #[must_use]
    pub fn hydrate(&self, value: Value) -> Value {
        let value = self.cast(value);
        match &self.mutator {
            Some(m) => m(value),
            None => value,
        }
    }

    const fn is_typed(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::String | FieldKind::Number | FieldKind::Boolean
        )
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("nullable", &self.nullable)
            .field("mutator", &self.mutator.is_some())
            .finish()
    }
}

fn cast_string(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s),
        Value::Null => Value::String(String::new()),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn cast_number(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(n),
        Value::Bool(b) => Value::from(u8::from(b)),
        Value::String(s) => parse_number(s.trim()).unwrap_or_else(|| Value::from(0)),
        _ => Value::from(0),
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn cast_boolean(value: Value) -> Value {
    let truthy = match value {
        Value::Bool(b) => b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                false
            } else {
                s.parse::<i64>().map(|i| i != 0).unwrap_or(true)
            }
        }
        Value::Array(_) | Value::Object(_) => true,
    };
    Value::Bool(truthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_cast() {
        let field = FieldDef::string("");
        assert_eq!(field.cast(json!(12)), json!("12"));
        assert_eq!(field.cast(json!(true)), json!("true"));
        assert_eq!(field.cast(Value::Null), json!(""));
        assert_eq!(field.clone().nullable().cast(Value::Null), Value::Null);
    }

    #[test]
    fn number_cast() {
        let field = FieldDef::number(0);
        assert_eq!(field.cast(json!("42")), json!(42));
        assert_eq!(field.cast(json!("1.5")), json!(1.5));
        assert_eq!(field.cast(json!("abc")), json!(0));
        assert_eq!(field.cast(json!(true)), json!(1));
    }

    #[test]
    fn boolean_cast() {
        let field = FieldDef::boolean(false);
        assert_eq!(field.cast(json!("")), json!(false));
        assert_eq!(field.cast(json!("0")), json!(false));
        assert_eq!(field.cast(json!("yes")), json!(true));
        assert_eq!(field.cast(json!(3)), json!(true));
    }

    #[test]
    fn attr_passes_through() {
        let field = FieldDef::attr(Value::Null);
        assert_eq!(field.cast(json!({"a": 1})), json!({"a": 1}));
        assert_eq!(field.default_value(), Value::Null);
    }

    #[test]
    fn factory_default_is_called_per_record() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let field = FieldDef::attr(Value::Null)
            .default_with(move || json!(c.fetch_add(1, Ordering::SeqCst)));

        assert_eq!(field.default_value(), json!(0));
        assert_eq!(field.default_value(), json!(1));
    }

    #[test]
    fn mutator_runs_after_cast() {
        let field = FieldDef::string("").mutate(|v| json!(v.as_str().map(str::to_uppercase)));
        assert_eq!(field.hydrate(json!("john")), json!("JOHN"));
    }

    #[test]
    fn generated_kinds() {
        assert!(FieldDef::uid().is_generated());
        assert!(FieldDef::increment().is_generated());
        assert!(!FieldDef::attr(1).is_generated());
        assert_eq!(FieldKind::parse("increment"), Some(FieldKind::Increment));
    }
}

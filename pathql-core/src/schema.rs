//! Schema descriptors for the records a query runs against.
//!
//! Records are `serde_json::Value` objects; a [`Schema`] describes their shape
//! (ordered fields, scalar kinds, optionality, collections) and a
//! [`FieldAccessor`] reads or writes one field of a concrete record.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};

/// Scalar (non-decomposable) kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
    String,
    /// RFC 3339 timestamp, stored as a JSON string.
    Time,
}

impl ScalarKind {
    /// Whether `value` is a valid (non-null) instance of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ScalarKind::Int => value.is_i64() || value.is_u64(),
            ScalarKind::Float => value.is_number(),
            ScalarKind::Bool => value.is_boolean(),
            ScalarKind::String => value.is_string(),
            ScalarKind::Time => value
                .as_str()
                .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Float)
    }

    pub fn zero_value(&self) -> Value {
        match self {
            ScalarKind::Int => Value::from(0),
            ScalarKind::Float => Value::from(0.0),
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::String => Value::String(String::new()),
            ScalarKind::Time => Value::String(
                DateTime::<Utc>::default().to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Time => "time",
        }
    }
}

/// Shape of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Scalar(ScalarKind),
    /// A value that may be absent (`null`).
    Optional(Box<Schema>),
    /// An ordered collection of elements.
    Array(Box<Schema>),
    Record(RecordSchema),
}

impl Schema {
    pub const INT: Schema = Schema::Scalar(ScalarKind::Int);
    pub const FLOAT: Schema = Schema::Scalar(ScalarKind::Float);
    pub const BOOL: Schema = Schema::Scalar(ScalarKind::Bool);
    pub const STRING: Schema = Schema::Scalar(ScalarKind::String);
    pub const TIME: Schema = Schema::Scalar(ScalarKind::Time);

    /// Schema of a host type.
    pub fn of<T: Describe>() -> Schema {
        T::describe()
    }

    pub fn optional(inner: Schema) -> Schema {
        Schema::Optional(Box::new(inner))
    }

    pub fn array(element: Schema) -> Schema {
        Schema::Array(Box::new(element))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Schema::Optional(_))
    }

    /// Strips every optional layer.
    pub fn unwrap_optional(&self) -> &Schema {
        match self {
            Schema::Optional(inner) => inner.unwrap_optional(),
            other => other,
        }
    }

    /// Scalar kind, looking through optional layers.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.unwrap_optional() {
            Schema::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Record schema, looking through optional layers.
    pub fn as_record(&self) -> Option<&RecordSchema> {
        match self.unwrap_optional() {
            Schema::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Record schema of the innermost element, looking through optionals and arrays.
    pub fn leaf_record(&self) -> Option<&RecordSchema> {
        match self {
            Schema::Optional(inner) | Schema::Array(inner) => inner.leaf_record(),
            Schema::Record(record) => Some(record),
            Schema::Scalar(_) => None,
        }
    }

    /// Zero value used to initialise destination records.
    pub fn zero_value(&self) -> Value {
        match self {
            Schema::Scalar(kind) => kind.zero_value(),
            Schema::Optional(_) => Value::Null,
            Schema::Array(_) => Value::Array(Vec::new()),
            Schema::Record(record) => record.zero_value(),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Scalar(kind) => write!(f, "{}", kind.name()),
            Schema::Optional(inner) => write!(f, "*{}", inner),
            Schema::Array(element) => write!(f, "[]{}", element),
            Schema::Record(record) => write!(f, "{}", record.name()),
        }
    }
}

impl From<ScalarKind> for Schema {
    fn from(kind: ScalarKind) -> Self {
        Schema::Scalar(kind)
    }
}

impl From<RecordSchema> for Schema {
    fn from(record: RecordSchema) -> Self {
        Schema::Record(record)
    }
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
}

/// Ordered field list of a record type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSchema {
    name: String,
    fields: Vec<Field>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field whose schema is derived from a host type.
    pub fn field<T: Describe>(self, name: impl Into<String>) -> Self {
        self.with_field(name, T::describe())
    }

    pub fn with_field(mut self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.push_field(name, schema);
        self
    }

    pub fn push_field(&mut self, name: impl Into<String>, schema: impl Into<Schema>) {
        self.fields.push(Field {
            name: name.into(),
            schema: schema.into(),
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Exact-name field lookup.
    pub fn field_by_name(&self, name: &str) -> Option<FieldAccessor> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|index| self.accessor(index))
    }

    /// Case-insensitive lookup ignoring underscores (`user_id` matches `UserID`).
    pub fn field_by_fuzzy_name(&self, name: &str) -> Option<FieldAccessor> {
        if let Some(accessor) = self.field_by_name(name) {
            return Some(accessor);
        }
        let wanted = fuzzy_name(name);
        self.fields
            .iter()
            .position(|f| fuzzy_name(&f.name) == wanted)
            .map(|index| self.accessor(index))
    }

    pub fn accessor(&self, index: usize) -> FieldAccessor {
        let field = &self.fields[index];
        FieldAccessor {
            index,
            name: field.name.clone(),
            schema: field.schema.clone(),
        }
    }

    pub fn accessors(&self) -> impl Iterator<Item = FieldAccessor> + '_ {
        (0..self.fields.len()).map(|i| self.accessor(i))
    }

    pub fn zero_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            map.insert(field.name.clone(), field.schema.zero_value());
        }
        Value::Object(map)
    }

    /// Renames keys of a decoded object to this schema's field names (fuzzy
    /// match), drops unknown keys and fills missing fields with zero values.
    pub fn conform(&self, value: Value) -> Value {
        let source = match value {
            Value::Object(source) => source,
            other => return other,
        };
        let mut by_name: Map<String, Value> = Map::with_capacity(source.len());
        for (key, item) in source {
            by_name.insert(fuzzy_name(&key), item);
        }
        let mut out = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let item = match by_name.remove(&fuzzy_name(&field.name)) {
                Some(item) => conform_value(&field.schema, item),
                None => field.schema.zero_value(),
            };
            out.insert(field.name.clone(), item);
        }
        Value::Object(out)
    }
}

fn conform_value(schema: &Schema, value: Value) -> Value {
    match (schema, value) {
        (Schema::Optional(_), Value::Null) => Value::Null,
        (Schema::Optional(inner), value) => conform_value(inner, value),
        (Schema::Array(element), Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| conform_value(element, item))
                .collect(),
        ),
        (Schema::Record(record), value @ Value::Object(_)) => record.conform(value),
        (schema, Value::Null) => schema.zero_value(),
        (_, value) => value,
    }
}

/// Normalized field name used for fuzzy matching.
pub fn fuzzy_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compile-time bound reader/writer of one record field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAccessor {
    index: usize,
    name: String,
    schema: Schema,
}

impl FieldAccessor {
    /// Builds an accessor for a field that is not (yet) part of a record schema.
    pub fn detached(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            index: usize::MAX,
            name: name.into(),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Reads the field; `None` when it is absent or `null`.
    pub fn get<'a>(&self, record: &'a Value) -> QueryResult<Option<&'a Value>> {
        match record {
            Value::Object(map) => Ok(map.get(&self.name).filter(|v| !v.is_null())),
            other => Err(QueryError::execution(
                &self.name,
                format!("expected record, found {}", value_type_name(other)),
            )),
        }
    }

    pub fn get_mut<'a>(&self, record: &'a mut Value) -> QueryResult<&'a mut Value> {
        match record {
            Value::Object(map) => Ok(map.entry(self.name.clone()).or_insert(Value::Null)),
            other => Err(QueryError::execution(
                &self.name,
                format!("expected record, found {}", value_type_name(other)),
            )),
        }
    }

    pub fn set(&self, record: &mut Value, value: Value) -> QueryResult<()> {
        *self.get_mut(record)? = value;
        Ok(())
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Host types that can describe their own schema.
///
/// ```
/// use pathql_core::schema::{Describe, RecordSchema, Schema};
///
/// struct Item {
///     id: i64,
///     tags: Vec<String>,
/// }
///
/// impl Describe for Item {
///     fn describe() -> Schema {
///         RecordSchema::new("Item")
///             .field::<i64>("id")
///             .field::<Vec<String>>("tags")
///             .into()
///     }
/// }
///
/// assert_eq!(Schema::of::<Vec<Item>>().to_string(), "[]Item");
/// ```
pub trait Describe {
    fn describe() -> Schema;
}

macro_rules! describe_scalar {
    ($kind:expr => $($ty:ty),+) => {
        $(impl Describe for $ty {
            fn describe() -> Schema {
                Schema::Scalar($kind)
            }
        })+
    };
}

describe_scalar!(ScalarKind::Int => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
describe_scalar!(ScalarKind::Float => f32, f64);
describe_scalar!(ScalarKind::Bool => bool);
describe_scalar!(ScalarKind::String => String);
describe_scalar!(ScalarKind::Time => DateTime<Utc>);

impl<T: Describe> Describe for Option<T> {
    fn describe() -> Schema {
        Schema::optional(T::describe())
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> Schema {
        Schema::array(T::describe())
    }
}

impl<T: Describe> Describe for Box<T> {
    fn describe() -> Schema {
        T::describe()
    }
}

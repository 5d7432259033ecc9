//! Named record types the driver resolves table names against.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use pathql_core::{RecordSchema, Schema};
use regex::Regex;
use serde_json::Value;

use crate::error::{DriverError, DriverResult};

/// Types registered with `REGISTER GLOBAL TYPE`, shared by every connection.
static GLOBAL_TYPES: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::new()));

static STRUCT_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*struct\s*\{(.*)\}\s*$").expect("valid struct pattern"));

static FIELD_DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s+(\S+)\s*$").expect("valid field pattern")
});

/// Adds `schema` to the process-wide registry.
pub fn register_global_type(name: &str, schema: RecordSchema) {
    GLOBAL_TYPES.write().register(name, schema);
}

/// Snapshot of the process-wide registry.
pub fn global_types() -> TypeRegistry {
    GLOBAL_TYPES.read().clone()
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, RecordSchema>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, schema: RecordSchema) {
        self.types.insert(name.to_string(), schema);
    }

    /// Exact name first, then case-insensitive.
    pub fn lookup(&self, name: &str) -> Option<&RecordSchema> {
        self.types.get(name).or_else(|| {
            self.types
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, schema)| schema)
        })
    }

    /// Adds the entries of `other` not already present here.
    pub fn merge(&mut self, other: &TypeRegistry) {
        for (name, schema) in &other.types {
            self.types
                .entry(name.clone())
                .or_insert_with(|| schema.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Parses an inline `struct{Id int; Name string}` definition.
///
/// Field types are `int`, `float`, `bool`, `string` and `time`, optionally
/// prefixed with `*` (optional) or `[]` (slice).
pub fn parse_type_definition(name: &str, definition: &str) -> DriverResult<RecordSchema> {
    let body = STRUCT_DEFINITION
        .captures(definition)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            DriverError::UnsupportedStatement(format!(
                "invalid type definition for {}: {}",
                name, definition
            ))
        })?;

    let mut schema = RecordSchema::new(name);
    for item in body.as_str().split(|c| c == ';' || c == '\n') {
        if item.trim().is_empty() {
            continue;
        }
        let caps = FIELD_DEFINITION.captures(item).ok_or_else(|| {
            DriverError::UnsupportedStatement(format!(
                "invalid field definition in {}: '{}'",
                name,
                item.trim()
            ))
        })?;
        let field_type = parse_field_type(&caps[2]).ok_or_else(|| {
            DriverError::UnsupportedStatement(format!(
                "unsupported field type in {}: {}",
                name, &caps[2]
            ))
        })?;
        schema.push_field(&caps[1], field_type);
    }

    if schema.is_empty() {
        return Err(DriverError::UnsupportedStatement(format!(
            "type {} has no fields",
            name
        )));
    }
    Ok(schema)
}

fn parse_field_type(text: &str) -> Option<Schema> {
    if let Some(inner) = text.strip_prefix('*') {
        return parse_field_type(inner).map(Schema::optional);
    }
    if let Some(inner) = text.strip_prefix("[]") {
        return parse_field_type(inner).map(Schema::array);
    }
    let schema = match text.to_ascii_lowercase().as_str() {
        "int" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8" | "uint16" | "uint32"
        | "uint64" => Schema::INT,
        "float" | "float32" | "float64" => Schema::FLOAT,
        "bool" => Schema::BOOL,
        "string" => Schema::STRING,
        "time" | "time.time" => Schema::TIME,
        _ => return None,
    };
    Some(schema)
}

/// Infers a record schema from a sample object, as passed to
/// `REGISTER TYPE Foo AS ?`.
pub fn schema_from_sample(name: &str, sample: &Value) -> DriverResult<RecordSchema> {
    let object = sample.as_object().ok_or_else(|| {
        DriverError::Argument(format!("type {} sample must be an object", name))
    })?;
    let mut schema = RecordSchema::new(name);
    for (key, value) in object {
        let field_type = sample_type(key, value)?;
        schema.push_field(key.as_str(), field_type);
    }
    Ok(schema)
}

fn sample_type(name: &str, value: &Value) -> DriverResult<Schema> {
    let schema = match value {
        Value::Bool(_) => Schema::BOOL,
        Value::Number(n) if n.is_f64() => Schema::FLOAT,
        Value::Number(_) => Schema::INT,
        Value::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Schema::TIME,
        Value::String(_) => Schema::STRING,
        Value::Array(items) => match items.first() {
            Some(first) => Schema::array(sample_type(name, first)?),
            None => {
                return Err(DriverError::Argument(format!(
                    "cannot infer element type of empty field {}",
                    name
                )))
            }
        },
        Value::Object(_) => Schema::Record(schema_from_sample(name, value)?),
        Value::Null => {
            return Err(DriverError::Argument(format!(
                "cannot infer type of null field {}",
                name
            )))
        }
    };
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_inline_struct() {
        let schema =
            parse_type_definition("Foo", "struct{Id int; Name string; Score *float; Tags []string}")
                .unwrap();
        let fields: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| format!("{} {}", f.name, f.schema))
            .collect();
        assert_eq!(
            fields,
            vec!["Id int", "Name string", "Score *float", "Tags []string"]
        );
    }

    #[test]
    fn test_parse_multiline_struct() {
        let schema = parse_type_definition("Bar", "struct {\n id int\n created time\n}").unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.fields()[1].schema, Schema::TIME);
    }

    #[test]
    fn test_reject_bad_definitions() {
        assert!(parse_type_definition("Foo", "Id int").is_err());
        assert!(parse_type_definition("Foo", "struct{Id complex}").is_err());
        assert!(parse_type_definition("Foo", "struct{}").is_err());
    }

    #[test]
    fn test_schema_from_sample() {
        let schema = schema_from_sample(
            "Foo",
            &json!({"Id": 0, "Name": "", "Rate": 0.5, "At": "2024-01-02T03:04:05Z"}),
        )
        .unwrap();
        let kinds: Vec<String> = schema.fields().iter().map(|f| f.schema.to_string()).collect();
        assert_eq!(kinds, vec!["int", "string", "float", "time"]);
        assert!(schema_from_sample("Foo", &json!([1])).is_err());
        assert!(schema_from_sample("Foo", &json!({"Id": null})).is_err());
    }

    #[test]
    fn test_registry_lookup_and_merge() {
        let mut local = TypeRegistry::new();
        local.register("Foo", RecordSchema::new("Foo").field::<i64>("Id"));
        assert!(local.lookup("foo").is_some());

        let mut other = TypeRegistry::new();
        other.register("Foo", RecordSchema::new("Foo").field::<String>("Other"));
        other.register("Bar", RecordSchema::new("Bar").field::<i64>("Id"));
        local.merge(&other);
        assert_eq!(local.len(), 2);
        assert_eq!(local.lookup("Foo").unwrap().fields()[0].name, "Id");
    }

    #[test]
    fn test_global_registry() {
        register_global_type(
            "RegistryGlobalProbe",
            RecordSchema::new("RegistryGlobalProbe").field::<i64>("Id"),
        );
        assert!(global_types().lookup("RegistryGlobalProbe").is_some());
    }
}

//! Input schemas and argument validation
//!
//! A [`SchemaDescriptor`] is the subset of JSON Schema that tools declare for
//! their arguments: required field names, a primitive type per field, and an
//! optional set of allowed values. Validation is a pure function of the
//! arguments and the schema.
//!
//! ```rust
//! use ctxhost_core::schema::{FieldSpec, SchemaDescriptor};
//! use serde_json::json;
//!
//! let schema = SchemaDescriptor::new()
//!     .field("prompt", FieldSpec::string())
//!     .field("language", FieldSpec::string().one_of(["python", "rust"]))
//!     .require("prompt");
//!
//! assert!(schema.validate(&json!({ "prompt": "fizzbuzz" })).is_ok());
//! assert!(schema.validate(&json!({ "language": "rust" })).is_err());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Primitive type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    /// JSON Schema name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    /// Whether a runtime value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime type name of a JSON value
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of a single argument field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Description shown to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allowed values, if restricted
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Advertised default (informational; never injected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            description: None,
            allowed: None,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    /// Set the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict the field to a fixed set of values
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Advertise a default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Declared input schema of a tool
///
/// Serializes as a JSON Schema object (`{"type": "object", ...}`) so it can
/// be handed to callers unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDescriptor {
    required: Vec<String>,
    fields: BTreeMap<String, FieldSpec>,
}

impl SchemaDescriptor {
    /// An empty schema: accepts any object
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Mark a field as required
    pub fn require(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// Required field names in declaration order
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Declared fields, keyed by name
    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    /// Validate an arguments object against this schema
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        validate(args, self)
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), json!(spec)))
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

impl Serialize for SchemaDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_schema().serialize(serializer)
    }
}

/// Why a field was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// A required field is absent
    Missing,
    /// The value's runtime type differs from the declared type
    TypeMismatch {
        expected: FieldType,
        actual: &'static str,
    },
    /// The value is not one of the allowed values
    NotAllowed { allowed: Vec<Value> },
    /// The arguments themselves are not a JSON object
    NotAnObject { actual: &'static str },
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::Missing => f.write_str("required field is missing"),
            ValidationFailure::TypeMismatch { expected, actual } => {
                write!(f, "expected {}, got {}", expected, actual)
            }
            ValidationFailure::NotAllowed { allowed } => {
                let values: Vec<String> = allowed.iter().map(Value::to_string).collect();
                write!(f, "value must be one of [{}]", values.join(", "))
            }
            ValidationFailure::NotAnObject { actual } => {
                write!(f, "arguments must be an object, got {}", actual)
            }
        }
    }
}

/// A rejected argument
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field '{field}': {failure}")]
pub struct ValidationError {
    /// Offending field name (`arguments` when the whole value is rejected)
    pub field: String,
    /// What was wrong with it
    pub failure: ValidationFailure,
}

impl ValidationError {
    fn new(field: impl Into<String>, failure: ValidationFailure) -> Self {
        Self {
            field: field.into(),
            failure,
        }
    }

    /// Structured detail for error responses
    pub fn detail(&self) -> Value {
        match &self.failure {
            ValidationFailure::Missing => json!({
                "field": self.field,
                "reason": "missing",
            }),
            ValidationFailure::TypeMismatch { expected, actual } => json!({
                "field": self.field,
                "reason": "type_mismatch",
                "expectedType": expected.as_str(),
                "actualType": actual,
            }),
            ValidationFailure::NotAllowed { allowed } => json!({
                "field": self.field,
                "reason": "not_allowed",
                "allowed": allowed,
            }),
            ValidationFailure::NotAnObject { actual } => json!({
                "field": self.field,
                "reason": "not_an_object",
                "actualType": actual,
            }),
        }
    }
}

/// Validate `args` against `schema`
///
/// Checks run in a fixed order so the reported error is deterministic:
/// required fields in declaration order, then declared fields by name.
/// Fields not declared in the schema are ignored.
pub fn validate(args: &Value, schema: &SchemaDescriptor) -> Result<(), ValidationError> {
    let Some(object) = args.as_object() else {
        return Err(ValidationError::new(
            "arguments",
            ValidationFailure::NotAnObject {
                actual: type_name(args),
            },
        ));
    };

    for name in &schema.required {
        if !object.contains_key(name) {
            return Err(ValidationError::new(name, ValidationFailure::Missing));
        }
    }

    for (name, spec) in &schema.fields {
        let Some(value) = object.get(name) else {
            continue;
        };

        if !spec.field_type.matches(value) {
            return Err(ValidationError::new(
                name,
                ValidationFailure::TypeMismatch {
                    expected: spec.field_type,
                    actual: type_name(value),
                },
            ));
        }

        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(value) {
                return Err(ValidationError::new(
                    name,
                    ValidationFailure::NotAllowed {
                        allowed: allowed.clone(),
                    },
                ));
            }
        }
    }

    Ok(())
}

//! Schema interpreter.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use super::schema::{ArrayRules, FieldKind, Format, NumberRules, Schema, StringRules};
use crate::sanitize::{sanitize_caption, sanitize_filename, sanitize_url};

/// Path reported for a failure on the value itself rather than a field.
pub const ROOT_PATH: &str = "$";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// A single failing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path to the field, with `[i]` for array elements
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every violation found in one validation pass, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors {
    violations: Vec<Violation>,
}

impl ValidationErrors {
    /// Wrap a list of violations.
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// A single violation.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![Violation::new(field, message)])
    }

    /// Get the violations.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Whether any violation names `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "{} field(s) invalid ({})", self.violations.len(), parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate `value` against `schema`.
///
/// On success returns the coerced value: defaults filled in, normalizing
/// formats applied, unknown fields dropped. On failure returns every
/// violation, not just the first.
pub fn validate(schema: &Schema, value: &Value) -> Result<Value, ValidationErrors> {
    let mut errors = Vec::new();
    let output = check_object(schema, value, "", &mut errors);

    match output {
        Some(output) if errors.is_empty() => Ok(output),
        _ => Err(ValidationErrors::new(errors)),
    }
}

/// Validate and deserialize into the schema's typed shape.
pub fn validate_as<T: DeserializeOwned>(schema: &Schema, value: &Value) -> Result<T, ValidationErrors> {
    let coerced = validate(schema, value)?;
    serde_json::from_value(coerced).map_err(|e| ValidationErrors::single(ROOT_PATH, e.to_string()))
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        ROOT_PATH
    } else {
        path
    }
}

fn check_object(
    schema: &Schema,
    value: &Value,
    path: &str,
    errors: &mut Vec<Violation>,
) -> Option<Value> {
    let Some(input) = value.as_object() else {
        errors.push(Violation::new(display_path(path), "must be an object"));
        return None;
    };

    let mut output = Map::new();
    for field in schema.fields() {
        let field_path = child_path(path, field.name);

        match input.get(field.name).filter(|v| !v.is_null()) {
            Some(v) => {
                if let Some(coerced) = check_kind(&field.kind, v, &field_path, errors) {
                    output.insert(field.name.to_string(), coerced);
                }
            }
            None => {
                if let Some(default) = &field.default {
                    output.insert(field.name.to_string(), default.clone());
                } else if field.required {
                    errors.push(Violation::new(field_path, "is required"));
                }
            }
        }
    }

    Some(Value::Object(output))
}

fn check_kind(
    kind: &FieldKind,
    value: &Value,
    path: &str,
    errors: &mut Vec<Violation>,
) -> Option<Value> {
    match kind {
        FieldKind::String(rules) => check_string(rules, value, path, errors),
        FieldKind::Number(rules) => check_number(rules, value, path, errors),
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) if s == "true" => Some(Value::Bool(true)),
            Value::String(s) if s == "false" => Some(Value::Bool(false)),
            _ => {
                errors.push(Violation::new(path, "must be a boolean"));
                None
            }
        },
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| *a == s) => Some(Value::String(s.to_string())),
            _ => {
                errors.push(Violation::new(
                    path,
                    format!("must be one of: {}", allowed.join(", ")),
                ));
                None
            }
        },
        FieldKind::Array(rules) => check_array(rules, value, path, errors),
        FieldKind::Object(schema) => check_object(schema, value, path, errors),
    }
}

fn check_string(
    rules: &StringRules,
    value: &Value,
    path: &str,
    errors: &mut Vec<Violation>,
) -> Option<Value> {
    let Some(raw) = value.as_str() else {
        errors.push(Violation::new(path, "must be a string"));
        return None;
    };

    let s = match rules.format {
        Some(format) => match apply_format(format, raw) {
            Ok(s) => s,
            Err(message) => {
                errors.push(Violation::new(path, message));
                return None;
            }
        },
        None => raw.to_string(),
    };

    let before = errors.len();
    let len = s.chars().count();

    if let Some(min) = rules.min_len {
        if len < min {
            let message = if min == 1 {
                "must not be empty".to_string()
            } else {
                format!("must be at least {} characters", min)
            };
            errors.push(Violation::new(path, message));
        }
    }
    if let Some(max) = rules.max_len {
        if len > max {
            errors.push(Violation::new(path, format!("must be at most {} characters", max)));
        }
    }
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(&s) {
            errors.push(Violation::new(path, "has an invalid format"));
        }
    }

    (errors.len() == before).then_some(Value::String(s))
}

fn apply_format(format: Format, s: &str) -> Result<String, String> {
    match format {
        Format::Url => sanitize_url(s).map_err(|e| format!("must be a valid http(s) URL ({})", e)),
        Format::Caption => Ok(sanitize_caption(s)),
        Format::FileName => Ok(sanitize_filename(s)),
        Format::Email => {
            if EMAIL.is_match(s) {
                Ok(s.to_lowercase())
            } else {
                Err("must be a valid email address".to_string())
            }
        }
        Format::Uuid => uuid::Uuid::parse_str(s)
            .map(|id| id.hyphenated().to_string())
            .map_err(|_| "must be a valid UUID".to_string()),
        Format::DateTime => DateTime::parse_from_rfc3339(s)
            .map(|dt| {
                dt.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            })
            .map_err(|_| "must be an RFC 3339 timestamp".to_string()),
    }
}

fn check_number(
    rules: &NumberRules,
    value: &Value,
    path: &str,
    errors: &mut Vec<Violation>,
) -> Option<Value> {
    // Query parameters arrive as strings
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    };
    let Some(n) = n else {
        errors.push(Violation::new(path, "must be a number"));
        return None;
    };

    if rules.integer && n.fract() != 0.0 {
        errors.push(Violation::new(path, "must be an integer"));
        return None;
    }

    let before = errors.len();
    if let Some(min) = rules.min {
        if n < min {
            errors.push(Violation::new(path, format!("must be at least {}", min)));
        }
    }
    if let Some(max) = rules.max {
        if n > max {
            errors.push(Violation::new(path, format!("must be at most {}", max)));
        }
    }
    if errors.len() != before {
        return None;
    }

    if rules.integer {
        Some(Value::Number(Number::from(n as i64)))
    } else {
        Number::from_f64(n).map(Value::Number)
    }
}

fn check_array(
    rules: &ArrayRules,
    value: &Value,
    path: &str,
    errors: &mut Vec<Violation>,
) -> Option<Value> {
    let Some(items) = value.as_array() else {
        errors.push(Violation::new(path, "must be an array"));
        return None;
    };

    let before = errors.len();
    if let Some(min) = rules.min_items {
        if items.len() < min {
            errors.push(Violation::new(path, format!("must contain at least {} item(s)", min)));
        }
    }
    if let Some(max) = rules.max_items {
        if items.len() > max {
            errors.push(Violation::new(path, format!("must contain at most {} item(s)", max)));
        }
    }

    let coerced: Vec<Value> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| check_kind(&rules.items, item, &format!("{}[{}]", path, i), errors))
        .collect();

    (errors.len() == before).then_some(Value::Array(coerced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::schema::Field;
    use serde_json::json;

    fn profile_schema() -> Schema {
        Schema::new("profile")
            .field(Field::required("name", FieldKind::string().min_len(1).max_len(10)))
            .field(Field::optional("age", FieldKind::integer().range(0.0, 150.0)))
            .field(Field::optional("role", FieldKind::Enum(&["admin", "member"])).with_default(json!("member")))
            .field(Field::optional(
                "tags",
                FieldKind::array_of(FieldKind::string().max_len(5)).max_items(2),
            ))
            .field(Field::optional(
                "address",
                Schema::new("address")
                    .field(Field::required("city", FieldKind::string().min_len(1)))
                    .field(Field::optional(
                        "zip",
                        FieldKind::string().pattern(Regex::new(r"^\d{5}$").unwrap()),
                    )),
            ))
    }

    #[test]
    fn test_valid_value_is_coerced() {
        let value = json!({ "name": "Ada", "age": "36", "extra": "dropped" });
        let output = validate(&profile_schema(), &value).unwrap();

        assert_eq!(output, json!({ "name": "Ada", "age": 36, "role": "member" }));
    }

    #[test]
    fn test_collects_every_violation() {
        let value = json!({
            "age": 200,
            "role": "owner",
            "tags": ["ok", "waytoolong", "x"],
            "address": { "zip": "12" }
        });

        let errors = validate(&profile_schema(), &value).unwrap_err();
        let fields: Vec<&str> = errors.violations().iter().map(|v| v.field.as_str()).collect();

        assert_eq!(
            fields,
            vec!["name", "age", "role", "tags", "tags[1]", "address.city", "address.zip"]
        );
    }

    #[test]
    fn test_root_must_be_object() {
        let errors = validate(&profile_schema(), &json!([1, 2])).unwrap_err();
        assert_eq!(errors.violations(), &[Violation::new("$", "must be an object")]);
    }

    #[test]
    fn test_null_treated_as_absent() {
        let errors = validate(&profile_schema(), &json!({ "name": null })).unwrap_err();
        assert!(errors.has_field("name"));

        let output = validate(&profile_schema(), &json!({ "name": "a", "role": null })).unwrap();
        assert_eq!(output["role"], json!("member"));
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let errors = validate(&profile_schema(), &json!({ "name": "a", "age": 3.5 })).unwrap_err();
        assert_eq!(errors.violations()[0].message, "must be an integer");
    }

    #[test]
    fn test_boolean_coercion() {
        let schema = Schema::new("flags").field(Field::required("on", FieldKind::Boolean));
        assert_eq!(validate(&schema, &json!({ "on": "true" })).unwrap(), json!({ "on": true }));
        assert!(validate(&schema, &json!({ "on": "yes" })).is_err());
    }

    #[test]
    fn test_formats() {
        let schema = Schema::new("formats")
            .field(Field::optional("url", FieldKind::string().format(Format::Url)))
            .field(Field::optional("email", FieldKind::string().format(Format::Email)))
            .field(Field::optional("id", FieldKind::string().format(Format::Uuid)))
            .field(Field::optional("at", FieldKind::string().format(Format::DateTime)));

        let output = validate(
            &schema,
            &json!({
                "url": "https://example.com",
                "email": "Ada@Example.com",
                "id": "67E55044-10B1-426F-9247-BB680E5FE0C8",
                "at": "2024-05-01T12:00:00+02:00"
            }),
        )
        .unwrap();
        assert_eq!(output["url"], json!("https://example.com/"));
        assert_eq!(output["email"], json!("ada@example.com"));
        assert_eq!(output["id"], json!("67e55044-10b1-426f-9247-bb680e5fe0c8"));
        assert_eq!(output["at"], json!("2024-05-01T10:00:00Z"));

        let errors = validate(
            &schema,
            &json!({ "url": "ftp://x", "email": "nope", "id": "1", "at": "yesterday" }),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_display_lists_fields() {
        let errors = ValidationErrors::new(vec![
            Violation::new("a", "is required"),
            Violation::new("b", "must be a number"),
        ]);
        assert_eq!(
            errors.to_string(),
            "2 field(s) invalid (a: is required; b: must be a number)"
        );
    }
}

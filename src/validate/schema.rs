//! Declarative schema description.
//!
//! A [`Schema`] is a list of named [`Field`]s, each carrying a [`FieldKind`]
//! from a closed set of variants. Schemas are data: the single interpreter in
//! [`validator`](super::validator) gives them meaning.

use regex::Regex;
use serde_json::Value;

/// Declarative description of an object's shape.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    fields: Vec<Field>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Get the schema name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// A named field within a schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: &'static str,
    pub(crate) kind: FieldKind,
    pub(crate) required: bool,
    pub(crate) default: Option<Value>,
}

impl Field {
    /// A field that must be present and non-null.
    pub fn required(name: &'static str, kind: impl Into<FieldKind>) -> Self {
        Self {
            name,
            kind: kind.into(),
            required: true,
            default: None,
        }
    }

    /// A field that may be absent or null.
    pub fn optional(name: &'static str, kind: impl Into<FieldKind>) -> Self {
        Self {
            name,
            kind: kind.into(),
            required: false,
            default: None,
        }
    }

    /// Value substituted when the field is absent or null.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Get the field name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The closed set of field kinds.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String(StringRules),
    Number(NumberRules),
    Boolean,
    /// One of a fixed set of strings
    Enum(&'static [&'static str]),
    Array(ArrayRules),
    Object(Schema),
}

impl FieldKind {
    /// A string with no constraints.
    pub fn string() -> StringRules {
        StringRules::default()
    }

    /// An integer with no bounds.
    pub fn integer() -> NumberRules {
        NumberRules {
            integer: true,
            ..NumberRules::default()
        }
    }

    /// An array of `items`.
    pub fn array_of(items: impl Into<FieldKind>) -> ArrayRules {
        ArrayRules {
            items: Box::new(items.into()),
            min_items: None,
            max_items: None,
        }
    }
}

/// Well-known string formats. Some also normalize the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `http`/`https` URL, canonicalized
    Url,
    /// Long-form text, cleaned and truncated to the caption cap
    Caption,
    /// File name reduced to a safe character set
    FileName,
    Email,
    Uuid,
    /// RFC 3339 timestamp, normalized to UTC
    DateTime,
}

/// Constraints on a string field.
#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub(crate) min_len: Option<usize>,
    pub(crate) max_len: Option<usize>,
    pub(crate) pattern: Option<Regex>,
    pub(crate) format: Option<Format>,
}

impl StringRules {
    /// Minimum length in characters.
    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = Some(min);
        self
    }

    /// Maximum length in characters.
    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    /// Regular expression the value must match. Anchor it to constrain the
    /// whole value.
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }
}

impl From<StringRules> for FieldKind {
    fn from(rules: StringRules) -> Self {
        FieldKind::String(rules)
    }
}

/// Constraints on a numeric field.
#[derive(Debug, Clone, Default)]
pub struct NumberRules {
    pub(crate) min: Option<f64>,
    pub(crate) max: Option<f64>,
    pub(crate) integer: bool,
}

impl NumberRules {
    /// Inclusive lower bound.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Inclusive bounds.
    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }
}

impl From<NumberRules> for FieldKind {
    fn from(rules: NumberRules) -> Self {
        FieldKind::Number(rules)
    }
}

/// Constraints on an array field.
#[derive(Debug, Clone)]
pub struct ArrayRules {
    pub(crate) items: Box<FieldKind>,
    pub(crate) min_items: Option<usize>,
    pub(crate) max_items: Option<usize>,
}

impl ArrayRules {
    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }
}

impl From<ArrayRules> for FieldKind {
    fn from(rules: ArrayRules) -> Self {
        FieldKind::Array(rules)
    }
}

impl From<Schema> for FieldKind {
    fn from(schema: Schema) -> Self {
        FieldKind::Object(schema)
    }
}

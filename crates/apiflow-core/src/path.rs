//! Minimal JSON-path evaluator used for variable extraction.
//!
//! Supported syntax: an optional leading `$`, then dot-separated property
//! names, each optionally followed by one or more `[n]` array indices:
//!
//! ```text
//! $.id
//! users[0].profile.email
//! matrix[1][0]
//! ```

use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a path could not be parsed or evaluated.
///
/// Errors are scoped to a single extraction and never fail the step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The expression is syntactically invalid.
    #[error("Malformed path '{path}': {reason}")]
    Malformed {
        /// The offending expression.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A bracket group does not contain a non-negative integer.
    #[error("Invalid array index '{index}'")]
    InvalidIndex {
        /// The text between the brackets.
        index: String,
    },

    /// A property was accessed on something that is not an object.
    #[error("Cannot access property '{property}': not an object")]
    NotAnObject {
        /// The property being accessed.
        property: String,
    },

    /// The object has no such property.
    #[error("Property '{property}' not found")]
    MissingProperty {
        /// The missing property.
        property: String,
    },

    /// An index was applied to something that is not an array.
    #[error("Cannot access index [{index}]: not an array")]
    NotAnArray {
        /// The index being accessed.
        index: usize,
    },

    /// The array is shorter than the index.
    #[error("Index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The array length.
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Property(String),
    Index(usize),
}

/// A parsed path expression.
///
/// # Examples
///
/// ```
/// use apiflow_core::JsonPath;
/// use serde_json::json;
///
/// let doc = json!({"users": [{"profile": {"email": "ann@example.com"}}]});
/// let path: JsonPath = "users[0].profile.email".parse()?;
/// assert_eq!(path.extract(&doc)?, "ann@example.com");
/// # Ok::<(), apiflow_core::PathError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parses an expression. `$` and the empty string address the root.
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let trimmed = expr.trim();
        let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let body = body.strip_prefix('.').unwrap_or(body);

        let mut segments = Vec::new();
        if !body.is_empty() {
            for token in body.split('.') {
                parse_token(expr, token, &mut segments)?;
            }
        }

        Ok(Self {
            raw: expr.to_string(),
            segments,
        })
    }

    /// Returns the expression as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks the document and returns the addressed value.
    pub fn evaluate<'a>(&self, document: &'a Value) -> Result<&'a Value, PathError> {
        let mut current = document;
        for segment in &self.segments {
            current = match segment {
                Segment::Property(property) => match current {
                    Value::Object(map) => {
                        map.get(property)
                            .ok_or_else(|| PathError::MissingProperty {
                                property: property.clone(),
                            })?
                    }
                    _ => {
                        return Err(PathError::NotAnObject {
                            property: property.clone(),
                        })
                    }
                },
                Segment::Index(index) => match current {
                    Value::Array(items) => {
                        items.get(*index).ok_or(PathError::IndexOutOfBounds {
                            index: *index,
                            len: items.len(),
                        })?
                    }
                    _ => return Err(PathError::NotAnArray { index: *index }),
                },
            };
        }
        Ok(current)
    }

    /// Evaluates the path and renders the result with [`render`].
    pub fn extract(&self, document: &Value) -> Result<String, PathError> {
        self.evaluate(document).map(render)
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn parse_token(expr: &str, token: &str, segments: &mut Vec<Segment>) -> Result<(), PathError> {
    let malformed = |reason| PathError::Malformed {
        path: expr.to_string(),
        reason,
    };

    if token.is_empty() {
        return Err(malformed("empty path segment"));
    }

    let Some(open) = token.find('[') else {
        if token.contains(']') {
            return Err(malformed("unexpected ']'"));
        }
        segments.push(Segment::Property(token.to_string()));
        return Ok(());
    };

    let property = &token[..open];
    if property.contains(']') {
        return Err(malformed("unexpected ']'"));
    }
    if !property.is_empty() {
        segments.push(Segment::Property(property.to_string()));
    }

    let mut rest = &token[open..];
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .ok_or_else(|| malformed("unexpected characters after index"))?;
        let close = inner
            .find(']')
            .ok_or_else(|| malformed("missing closing bracket"))?;
        let index_text = &inner[..close];
        let index = index_text
            .trim()
            .parse::<usize>()
            .map_err(|_| PathError::InvalidIndex {
                index: index_text.to_string(),
            })?;
        segments.push(Segment::Index(index));
        rest = &inner[close + 1..];
    }
    Ok(())
}

/// Renders a JSON value as a variable value.
///
/// Strings pass through unquoted, numbers use their shortest decimal form,
/// `null` becomes the empty string, and arrays and objects become compact
/// JSON text.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => render_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn render_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else if let Some(f) = n.as_f64() {
        // Display for f64 never uses an exponent and drops trailing zeros.
        f.to_string()
    } else {
        n.to_string()
    }
}

/// Parses `expr` and extracts it from `document` in one go.
pub fn extract(document: &Value, expr: &str) -> Result<String, PathError> {
    JsonPath::parse(expr)?.extract(document)
}

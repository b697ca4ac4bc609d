//! # Template AST
//!
//! Parses `{{ expr }}` placeholders once at catalog load time. The resolver in
//! the scanner walks these structures against a runtime scope; nothing is
//! re-parsed per iteration.
//!
//! Grammar:
//! - template  := (literal | "{{" expr "}}")*
//! - expr      := literal-value | path
//! - path      := step ("." step)*
//! - step      := name | name "[]" | "[]" | digits
//!
//! `name[]` flattens: the remainder of the path is applied to every element of
//! the collection found at `name`.

use crate::error::TemplateSyntaxError;
use serde_json::Value;
use std::fmt;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

// ============================================================================
// Paths
// ============================================================================

/// A single step of a dotted path
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// Object key lookup
    Key(String),
    /// Array index lookup
    Index(usize),
    /// Apply the remaining steps to every element of the current collection
    Flatten,
}

/// A parsed dotted path such as `response.items[].name`
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    raw: String,
    steps: Vec<PathStep>,
}

impl PathExpr {
    /// Parse a dotted path
    pub fn parse(raw: &str) -> Result<Self, TemplateSyntaxError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TemplateSyntaxError::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }

        let mut steps = Vec::new();
        for segment in trimmed.split('.') {
            let (name, flatten) = match segment.strip_suffix("[]") {
                Some(name) => (name, true),
                None => (segment, false),
            };

            if name.is_empty() && !flatten {
                return Err(TemplateSyntaxError::InvalidPath {
                    path: raw.to_string(),
                    reason: "empty path segment".to_string(),
                });
            }
            if name.contains(|c: char| c.is_whitespace() || c == '[' || c == ']') {
                return Err(TemplateSyntaxError::InvalidPath {
                    path: raw.to_string(),
                    reason: format!("invalid segment '{}'", segment),
                });
            }

            if !name.is_empty() {
                match name.parse::<usize>() {
                    Ok(index) if name.bytes().all(|b| b.is_ascii_digit()) => {
                        steps.push(PathStep::Index(index))
                    }
                    _ => steps.push(PathStep::Key(name.to_string())),
                }
            }
            if flatten {
                steps.push(PathStep::Flatten);
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            steps,
        })
    }

    /// Original path text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// First key of the path, used to pick the scope binding
    pub fn root(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Check whether the path flattens any collection
    pub fn has_flatten(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, PathStep::Flatten))
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Expression inside a `{{ }}` marker
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal such as `42`, `true`, `null` or `'text'`
    Literal(Value),
    /// Path into the runtime scope
    Path(PathExpr),
}

/// Template segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expr(Expr),
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self, TemplateSyntaxError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find(OPEN) {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + OPEN.len()..];
            let close = after_open
                .find(CLOSE)
                .ok_or_else(|| TemplateSyntaxError::Unclosed {
                    template: source.to_string(),
                    position: offset + open,
                })?;

            let body = after_open[..close].trim();
            if body.is_empty() {
                return Err(TemplateSyntaxError::EmptyExpression {
                    template: source.to_string(),
                });
            }
            segments.push(Segment::Expr(parse_expr(body)?));

            let consumed = open + OPEN.len() + close + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The single expression of a template that is exactly one `{{ }}` marker
    ///
    /// Only such templates resolve to non-string values.
    pub fn single_expression(&self) -> Option<&Expr> {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    /// Check if the template contains no markers at all
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// All scope paths referenced by this template
    pub fn paths(&self) -> impl Iterator<Item = &PathExpr> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Expr(Expr::Path(path)) => Some(path),
            _ => None,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn parse_expr(body: &str) -> Result<Expr, TemplateSyntaxError> {
    match body {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" => return Ok(Expr::Literal(Value::Null)),
        _ => {}
    }

    for quote in ['\'', '"'] {
        if body.len() >= 2 && body.starts_with(quote) && body.ends_with(quote) {
            return Ok(Expr::Literal(Value::String(
                body[1..body.len() - 1].to_string(),
            )));
        }
    }

    let numeric_start = body
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '-')
        .unwrap_or(false);
    if numeric_start {
        if let Ok(i) = body.parse::<i64>() {
            return Ok(Expr::Literal(Value::from(i)));
        }
        if let Ok(f) = body.parse::<f64>() {
            if let Some(number) = serde_json::Number::from_f64(f) {
                return Ok(Expr::Literal(Value::Number(number)));
            }
        }
    }

    PathExpr::parse(body).map(Expr::Path)
}

// ============================================================================
// Parameter trees
// ============================================================================

/// A compiled parameter value: strings become templates, containers are
/// compiled recursively and other scalars pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Template(Template),
    Literal(Value),
    List(Vec<ParamValue>),
    Map(Vec<(String, ParamValue)>),
}

impl ParamValue {
    /// Compile a raw catalog value
    pub fn compile(value: &Value) -> Result<Self, TemplateSyntaxError> {
        match value {
            Value::String(s) => Template::parse(s).map(ParamValue::Template),
            Value::Array(items) => items
                .iter()
                .map(ParamValue::compile)
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::List),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| ParamValue::compile(v).map(|p| (k.clone(), p)))
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::Map),
            other => Ok(ParamValue::Literal(other.clone())),
        }
    }

    /// Compile every entry of a mapping, preserving order
    pub fn compile_map(
        map: &serde_json::Map<String, Value>,
    ) -> Result<Vec<(String, ParamValue)>, TemplateSyntaxError> {
        map.iter()
            .map(|(k, v)| ParamValue::compile(v).map(|p| (k.clone(), p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_literal_only() {
        let t = Template::parse("us-central1").unwrap();
        assert!(t.is_literal());
        assert!(t.single_expression().is_none());
    }

    #[test]
    fn test_parse_single_expression() {
        let t = Template::parse("{{ item.name }}").unwrap();
        match t.single_expression() {
            Some(Expr::Path(path)) => {
                assert_eq!(path.as_str(), "item.name");
                assert_eq!(path.root(), Some("item"));
            }
            other => panic!("unexpected expression: {:?}", other),
        }
    }

    #[test]
    fn test_parse_mixed_template() {
        let t = Template::parse("projects/{{ account }}/zones/{{region}}").unwrap();
        assert_eq!(t.segments().len(), 4);
        assert!(t.single_expression().is_none());
        assert_eq!(t.paths().count(), 2);
    }

    #[test]
    fn test_parse_native_literals() {
        let t = Template::parse("{{ 42 }}").unwrap();
        assert_eq!(
            t.single_expression(),
            Some(&Expr::Literal(Value::from(42)))
        );
        let t = Template::parse("{{ true }}").unwrap();
        assert_eq!(
            t.single_expression(),
            Some(&Expr::Literal(Value::Bool(true)))
        );
        let t = Template::parse("{{ 'abc' }}").unwrap();
        assert_eq!(
            t.single_expression(),
            Some(&Expr::Literal(Value::String("abc".to_string())))
        );
    }

    #[test]
    fn test_parse_flatten_and_index() {
        let path = PathExpr::parse("response.items[].disks.0.source").unwrap();
        assert_eq!(
            path.steps(),
            &[
                PathStep::Key("response".to_string()),
                PathStep::Key("items".to_string()),
                PathStep::Flatten,
                PathStep::Key("disks".to_string()),
                PathStep::Index(0),
                PathStep::Key("source".to_string()),
            ]
        );
        assert!(path.has_flatten());
    }

    #[test]
    fn test_unclosed_marker() {
        let err = Template::parse("abc {{ item.name").unwrap_err();
        assert_matches!(err, TemplateSyntaxError::Unclosed { position: 4, .. });
    }

    #[test]
    fn test_empty_expression() {
        assert_matches!(
            Template::parse("{{   }}"),
            Err(TemplateSyntaxError::EmptyExpression { .. })
        );
    }

    #[test]
    fn test_invalid_path_segment() {
        assert_matches!(
            PathExpr::parse("a..b"),
            Err(TemplateSyntaxError::InvalidPath { .. })
        );
    }

    #[test]
    fn test_compile_param_tree() {
        let raw = serde_json::json!({
            "project": "{{ account }}",
            "maxResults": 500,
            "filter": ["{{ region }}", "static"]
        });
        let compiled = ParamValue::compile(&raw).unwrap();
        match compiled {
            ParamValue::Map(entries) => {
                assert_eq!(entries[0].0, "project");
                assert_matches!(entries[1].1, ParamValue::Literal(_));
                assert_matches!(&entries[2].1, ParamValue::List(list) if list.len() == 2);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}

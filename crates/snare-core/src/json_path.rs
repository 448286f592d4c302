//! Minimal path queries over `serde_json::Value`.
//!
//! Supported syntax: an optional `$` root, dotted object keys and `[n]`
//! array indices, e.g. `$.data.items[0].handle` or `results`.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key lookup.
    Key(String),
    /// Array index lookup.
    Index(usize),
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parses a path expression. An empty path (or `$`) selects the root.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidPath(expr.to_string());
        let mut rest = expr.trim();
        if let Some(r) = rest.strip_prefix('$') {
            rest = r;
        }

        let mut segments = Vec::new();
        let mut key = String::new();
        let mut chars = rest.chars().peekable();
        let mut after_index = false;
        let mut at_start = true;

        while let Some(c) = chars.next() {
            let leading = std::mem::replace(&mut at_start, false);
            let closed_index = std::mem::replace(&mut after_index, false);
            match c {
                '.' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if (leading || closed_index) && chars.peek().is_some() {
                        // `$.a` or `a[0].b`
                    } else {
                        return Err(invalid());
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            _ => return Err(invalid()),
                        }
                    }
                    let index = digits.parse::<usize>().map_err(|_| invalid())?;
                    segments.push(Segment::Index(index));
                    after_index = true;
                }
                ']' => return Err(invalid()),
                c => key.push(c),
            }
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if rest.ends_with('.') {
            return Err(invalid());
        }

        Ok(Self { segments })
    }

    /// Path segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walks the document; `None` if any step is missing.
    pub fn select<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(k) => current.get(k.as_str()),
                Segment::Index(i) => current.get(*i),
            })
    }
}

/// Parses `expr` and selects it from `value` in one call.
pub fn select<'a>(value: &'a Value, expr: &str) -> Result<Option<&'a Value>> {
    Ok(JsonPath::parse(expr)?.select(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_dotted_and_indexed() {
        let path = JsonPath::parse("$.data.items[2].name").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("data".into()),
                Segment::Key("items".into()),
                Segment::Index(2),
                Segment::Key("name".into()),
            ]
        );
    }

    #[test]
    fn root_paths() {
        assert!(JsonPath::parse("").unwrap().segments().is_empty());
        assert!(JsonPath::parse("$").unwrap().segments().is_empty());
    }

    #[test]
    fn rejects_malformed() {
        assert!(JsonPath::parse("a..b").is_err());
        assert!(JsonPath::parse("a[x]").is_err());
        assert!(JsonPath::parse("a[1").is_err());
        assert!(JsonPath::parse("a.").is_err());
        assert!(JsonPath::parse("a]").is_err());
    }

    #[test]
    fn select_walks_document() {
        let doc = json!({"data": {"results": [{"id": 7}, {"id": 9}]}});
        assert_eq!(select(&doc, "data.results[1].id").unwrap(), Some(&json!(9)));
        assert_eq!(select(&doc, "$.data.results").unwrap().map(|v| v.is_array()), Some(true));
        assert_eq!(select(&doc, "data.missing").unwrap(), None);
        assert_eq!(select(&doc, "data.results[5]").unwrap(), None);
    }

    #[test]
    fn select_root_returns_document() {
        let doc = json!(["A", "B"]);
        assert_eq!(select(&doc, "$").unwrap(), Some(&doc));
    }
}

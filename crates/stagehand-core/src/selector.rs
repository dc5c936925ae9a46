//! Element queries over an [`ElementTree`].
//!
//! A query is a `using` key plus a text. With `using = "selector"` the text is
//! a selector string:
//!
//! ```text
//! selector := prefix filter*
//! prefix   := "*" | "#" id | type | ""
//! filter   := "[" property op value "]"
//! op       := "=" | "!=" | "*=" | "^=" | "$="
//! value    := '"' .. '"' | "'" .. "'" | bare text up to "]"
//! ```
//!
//! With `using` set to `name`, `label`, `value` or `id`, the text is matched
//! against that single property. Text comparisons accept `*` and `?`
//! wildcards; ids always compare exactly.
//!
//! Callers that need to tell "nothing matched" from "the query itself is
//! broken" use [`select`], which returns a [`QueryOutcome`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::Element;
use crate::tree::{normalize_type, ElementTree};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid `using` key `{0}` (expected selector, name, label, id or value)")]
    InvalidUsing(String),

    #[error("malformed selector `{selector}` at offset {offset}: {reason}")]
    Syntax {
        selector: String,
        offset: usize,
        reason: String,
    },

    #[error("empty selector")]
    Empty,
}

/// How an action's target text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Using {
    #[default]
    Selector,
    Name,
    Label,
    Id,
    Value,
}

impl FromStr for Using {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selector" => Ok(Using::Selector),
            "name" => Ok(Using::Name),
            "label" => Ok(Using::Label),
            "id" => Ok(Using::Id),
            "value" => Ok(Using::Value),
            other => Err(SelectorError::InvalidUsing(other.to_string())),
        }
    }
}

impl fmt::Display for Using {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Using::Selector => "selector",
            Using::Name => "name",
            Using::Label => "label",
            Using::Id => "id",
            Using::Value => "value",
        };
        f.write_str(s)
    }
}

/// A queryable element property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Id,
    Type,
    Name,
    Label,
    Value,
    Enabled,
    Visible,
    Index,
}

impl FromStr for Property {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(Property::Id),
            "type" => Ok(Property::Type),
            "name" => Ok(Property::Name),
            "label" => Ok(Property::Label),
            "value" => Ok(Property::Value),
            "enabled" => Ok(Property::Enabled),
            "visible" => Ok(Property::Visible),
            "index" => Ok(Property::Index),
            other => Err(format!("unknown property `{other}`")),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Property::Id => "id",
            Property::Type => "type",
            Property::Name => "name",
            Property::Label => "label",
            Property::Value => "value",
            Property::Enabled => "enabled",
            Property::Visible => "visible",
            Property::Index => "index",
        };
        f.write_str(s)
    }
}

impl Element {
    /// The text form of a property, `None` when the element has no such value.
    pub fn property(&self, property: Property) -> Option<String> {
        match property {
            Property::Id => Some(self.id.clone()),
            Property::Type => Some(self.element_type.clone()),
            Property::Name => self.name.clone(),
            Property::Label => self.label.clone(),
            Property::Value => self.value.clone(),
            Property::Enabled => Some(self.enabled.to_string()),
            Property::Visible => Some(self.visible.to_string()),
            Property::Index => Some(self.index.to_string()),
        }
    }
}

/// Returns true if the pattern contains glob wildcard characters (`*` or `?`).
fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Matches a string against a glob pattern with `*` (any chars) and `?` (single char).
///
/// When the pattern has no wildcards, falls back to exact equality.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !has_wildcard(pattern) {
        return pattern == text;
    }

    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    // Two-row DP: prev[j] = pat[..i-1] matches txt[..j]
    let mut prev = vec![false; txt.len() + 1];
    prev[0] = true;
    for p in &pat {
        let mut row = vec![false; txt.len() + 1];
        row[0] = *p == '*' && prev[0];
        for j in 1..=txt.len() {
            row[j] = match p {
                '*' => prev[j] || row[j - 1],
                '?' => prev[j - 1],
                c => *c == txt[j - 1] && prev[j - 1],
            };
        }
        prev = row;
    }
    prev[txt.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    property: Property,
    op: Op,
    value: String,
}

impl Filter {
    fn matches(&self, element: &Element) -> bool {
        let actual = element.property(self.property);
        match (self.op, actual) {
            (Op::Ne, None) => true,
            (_, None) => false,
            (Op::Eq, Some(a)) => self.compare(&a),
            (Op::Ne, Some(a)) => !self.compare(&a),
            (Op::Contains, Some(a)) => a.contains(&self.value),
            (Op::Prefix, Some(a)) => a.starts_with(&self.value),
            (Op::Suffix, Some(a)) => a.ends_with(&self.value),
        }
    }

    fn compare(&self, actual: &str) -> bool {
        match self.property {
            Property::Id => self.value == actual,
            Property::Type => normalize_type(Some(&self.value), false, false) == actual,
            _ => glob_match(&self.value, actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Prefix {
    Any,
    Id(String),
    Type(String),
}

/// A parsed, reusable query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    using: Using,
    text: String,
    prefix: Prefix,
    filters: Vec<Filter>,
}

impl Query {
    /// Parses `text` according to `using`.
    pub fn new(using: Using, text: &str) -> Result<Self, SelectorError> {
        let (prefix, filters) = match using {
            Using::Selector => parse_selector(text)?,
            Using::Id => (Prefix::Id(text.to_string()), Vec::new()),
            Using::Name | Using::Label | Using::Value => {
                let property = match using {
                    Using::Name => Property::Name,
                    Using::Label => Property::Label,
                    _ => Property::Value,
                };
                let filter = Filter {
                    property,
                    op: Op::Eq,
                    value: text.to_string(),
                };
                (Prefix::Any, vec![filter])
            }
        };
        Ok(Self {
            using,
            text: text.to_string(),
            prefix,
            filters,
        })
    }

    /// Parses a raw `using` key together with the text.
    pub fn parse(using: &str, text: &str) -> Result<Self, SelectorError> {
        Self::new(using.parse()?, text)
    }

    pub fn using(&self) -> Using {
        self.using
    }

    /// The text the query was built from.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, element: &Element) -> bool {
        let prefix_ok = match self.prefix {
            Prefix::Any => true,
            Prefix::Id(ref id) => element.id == *id,
            Prefix::Type(ref ty) => element.element_type == *ty,
        };
        prefix_ok && self.filters.iter().all(|f| f.matches(element))
    }

    /// All matching elements in breadth-first order.
    pub fn run(&self, tree: &ElementTree) -> Vec<Element> {
        tree.searchable()
            .filter(|e| self.matches(e))
            .cloned()
            .collect()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The three distinguishable results of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Found(Vec<Element>),
    Empty,
    Invalid(SelectorError),
}

impl QueryOutcome {
    pub fn from_matches(matches: Vec<Element>) -> Self {
        if matches.is_empty() {
            QueryOutcome::Empty
        } else {
            QueryOutcome::Found(matches)
        }
    }
}

/// Parses and runs a query in one step.
pub fn select(tree: &ElementTree, using: &str, text: &str) -> QueryOutcome {
    match Query::parse(using, text) {
        Ok(query) => QueryOutcome::from_matches(query.run(tree)),
        Err(e) => QueryOutcome::Invalid(e),
    }
}

fn parse_selector(text: &str) -> Result<(Prefix, Vec<Filter>), SelectorError> {
    let src = text.trim();
    if src.is_empty() {
        return Err(SelectorError::Empty);
    }
    let syntax = |offset: usize, reason: &str| SelectorError::Syntax {
        selector: text.to_string(),
        offset,
        reason: reason.to_string(),
    };

    let head_end = src.find('[').unwrap_or(src.len());
    let head = src[..head_end].trim();
    let prefix = if head.is_empty() || head == "*" {
        Prefix::Any
    } else if let Some(id) = head.strip_prefix('#') {
        if id.is_empty() {
            return Err(syntax(1, "expected an id after `#`"));
        }
        Prefix::Id(id.to_string())
    } else if head
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        Prefix::Type(normalize_type(Some(head), false, false))
    } else {
        return Err(syntax(0, "expected `*`, `#id` or an element type"));
    };

    let mut filters = Vec::new();
    let mut rest = &src[head_end..];
    while !rest.is_empty() {
        let offset = src.len() - rest.len();
        let body = rest
            .strip_prefix('[')
            .ok_or_else(|| syntax(offset, "expected `[`"))?;
        let (filter, consumed) = parse_filter(body).map_err(|reason| syntax(offset + 1, &reason))?;
        filters.push(filter);
        rest = body[consumed..].trim_start();
    }

    if matches!(prefix, Prefix::Any) && filters.is_empty() && head != "*" {
        return Err(SelectorError::Empty);
    }
    Ok((prefix, filters))
}

/// Parses `attr op value]`, returning the filter and the bytes consumed
/// including the closing bracket.
fn parse_filter(body: &str) -> Result<(Filter, usize), String> {
    let op_start = body
        .find(|c| matches!(c, '=' | '!' | '*' | '^' | '$'))
        .ok_or("expected an operator")?;
    let property: Property = body[..op_start].trim().parse()?;

    let after = &body[op_start..];
    let (op, op_len) = [
        ("!=", Op::Ne),
        ("*=", Op::Contains),
        ("^=", Op::Prefix),
        ("$=", Op::Suffix),
        ("=", Op::Eq),
    ]
    .iter()
    .find(|(tok, _)| after.starts_with(tok))
    .map(|(tok, op)| (*op, tok.len()))
    .ok_or("expected one of = != *= ^= $=")?;

    let value_start = op_start + op_len;
    let value_src = &body[value_start..];
    let trimmed = value_src.trim_start();
    let lead = value_src.len() - trimmed.len();

    let (value, consumed) = match trimmed.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let inner = &trimmed[1..];
            let close = inner.find(q).ok_or("unterminated quoted value")?;
            let after_quote = inner[close + 1..].trim_start();
            if !after_quote.starts_with(']') {
                return Err("expected `]` after quoted value".to_string());
            }
            let used = trimmed.len() - after_quote.len() + 1;
            (inner[..close].to_string(), value_start + lead + used)
        }
        _ => {
            let close = trimmed.find(']').ok_or("missing `]`")?;
            (trimmed[..close].trim().to_string(), value_start + lead + close + 1)
        }
    };

    Ok((Filter { property, op, value }, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{RawNode, RawSnapshot};
    use crate::tree::TreeOptions;

    fn leaf(ty: &str, name: Option<&str>, label: Option<&str>, value: Option<&str>) -> RawNode {
        RawNode {
            element_type: Some(ty.to_string()),
            name: name.map(String::from),
            label: label.map(String::from),
            value: value.map(String::from),
            ..Default::default()
        }
    }

    fn sample_tree() -> ElementTree {
        let mut disabled = leaf("Button", Some("delete"), Some("Delete"), None);
        disabled.enabled = Some(false);
        let root = RawNode {
            element_type: Some("Window".into()),
            children: vec![
                leaf("Button", Some("save"), Some("Save"), None),
                leaf("Button", Some("cancel"), Some("Cancel"), None),
                disabled,
                leaf("TextField", Some("email"), Some("Email"), Some("a@b.test")),
            ],
            ..Default::default()
        };
        ElementTree::build(&RawSnapshot::new(vec![root]), &TreeOptions::default(), 1)
    }

    fn ids(found: Vec<Element>) -> Vec<String> {
        found.into_iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("Save", "Save"));
        assert!(!glob_match("Save", "Saved"));
        assert!(glob_match("Sav*", "Saved"));
        assert!(glob_match("*ve?", "Saved"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYc"));
        assert!(!glob_match("a*b*c", "aXXbY"));
        assert!(glob_match("??", "ab"));
        assert!(!glob_match("??", "a"));
    }

    #[test]
    fn test_query_by_id_returns_exactly_that_element() {
        let tree = sample_tree();
        for element in tree.searchable() {
            let found = Query::new(Using::Id, &element.id).unwrap().run(&tree);
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, element.id);
        }
    }

    #[test]
    fn test_query_by_property() {
        let tree = sample_tree();
        let found = Query::new(Using::Name, "save").unwrap().run(&tree);
        assert_eq!(ids(found), vec!["button:0"]);

        let found = Query::new(Using::Label, "*a*").unwrap().run(&tree);
        assert_eq!(ids(found), vec!["button:0", "button:1", "textfield:0"]);

        let found = Query::new(Using::Value, "a@b.test").unwrap().run(&tree);
        assert_eq!(ids(found), vec!["textfield:0"]);
    }

    #[test]
    fn test_selector_type_prefix_and_filters() {
        let tree = sample_tree();
        let q = Query::new(Using::Selector, "Button[enabled=true]").unwrap();
        assert_eq!(ids(q.run(&tree)), vec!["button:0", "button:1"]);

        let q = Query::new(Using::Selector, "XCUIElementTypeButton[label^='Ca']").unwrap();
        assert_eq!(ids(q.run(&tree)), vec!["button:1"]);

        let q = Query::new(Using::Selector, r#"*[label*="e"][name!=delete]"#).unwrap();
        assert_eq!(ids(q.run(&tree)), vec!["button:0", "button:1"]);

        let q = Query::new(Using::Selector, "[value$=.test]").unwrap();
        assert_eq!(ids(q.run(&tree)), vec!["textfield:0"]);

        let q = Query::new(Using::Selector, "#button:2").unwrap();
        assert_eq!(ids(q.run(&tree)), vec!["button:2"]);
    }

    #[test]
    fn test_missing_property_only_satisfies_not_equal() {
        let tree = sample_tree();
        let q = Query::new(Using::Selector, "button[value!=x]").unwrap();
        assert_eq!(q.run(&tree).len(), 3);
        let q = Query::new(Using::Selector, "button[value=*]").unwrap();
        assert!(q.run(&tree).is_empty());
    }

    #[test]
    fn test_select_distinguishes_three_outcomes() {
        let tree = sample_tree();
        assert!(matches!(select(&tree, "name", "save"), QueryOutcome::Found(ref v) if v.len() == 1));
        assert_eq!(select(&tree, "name", "missing"), QueryOutcome::Empty);
        assert_eq!(
            select(&tree, "xpath", "//button"),
            QueryOutcome::Invalid(SelectorError::InvalidUsing("xpath".into()))
        );
    }

    #[test]
    fn test_malformed_selectors() {
        assert_eq!(Query::parse("selector", "  ").unwrap_err(), SelectorError::Empty);
        assert!(matches!(
            Query::parse("selector", "button[label='Save'"),
            Err(SelectorError::Syntax { .. })
        ));
        assert!(matches!(
            Query::parse("selector", "button[colour=red]"),
            Err(SelectorError::Syntax { .. })
        ));
        assert!(matches!(
            Query::parse("selector", "button[label~Save]"),
            Err(SelectorError::Syntax { .. })
        ));
        assert!(matches!(Query::parse("selector", "a b"), Err(SelectorError::Syntax { .. })));
        assert!(matches!(Query::parse("selector", "#"), Err(SelectorError::Syntax { .. })));
    }

    #[test]
    fn test_quoted_value_may_contain_brackets() {
        let root = leaf("StaticText", None, Some("[beta] build"), None);
        let tree = ElementTree::build(&RawSnapshot::new(vec![root]), &TreeOptions::default(), 1);
        let q = Query::new(Using::Selector, r#"statictext[label="[beta] build"]"#).unwrap();
        assert_eq!(q.run(&tree).len(), 1);
    }
}

//! Run-scoped variables.
//!
//! Values are plain JSON so captures, arrays and objects can be stored
//! without a bespoke value type. A `${name}` reference inside any string
//! field of an action is replaced at execution time; dotted paths reach into
//! arrays and objects (`${user.emails.0}`). References that do not resolve
//! are left in place verbatim.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub value: Value,
    /// Survives [`VariableStore::reset_transient`].
    pub persistent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    variables: HashMap<String, Variable>,
}

/// Text form of a value as substituted into strings.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, name: impl Into<String>, value: Value, persistent: bool) {
        self.variables
            .insert(name.into(), Variable { value, persistent });
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).map(|v| &v.value)
    }

    pub fn delete(&mut self, name: &str) -> Option<Variable> {
        self.variables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Drops every variable not saved as persistent.
    pub fn reset_transient(&mut self) {
        self.variables.retain(|_, v| v.persistent);
    }

    /// Resolves a dotted path such as `order.items.0.sku`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?.trim())?;
        for segment in segments {
            current = match current {
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replaces every resolvable `${path}` in `text`.
    pub fn interpolate(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let reference = &after[..end];
                    match self.lookup(reference) {
                        Some(value) => out.push_str(&display_value(value)),
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Interpolates every string leaf of `value`.
    ///
    /// A string that is exactly one reference is replaced by the referenced
    /// value itself, so arrays and objects keep their shape.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let whole = s
                    .strip_prefix("${")
                    .and_then(|r| r.strip_suffix('}'))
                    .filter(|r| !r.contains('}'));
                match whole.and_then(|r| self.lookup(r)) {
                    Some(found) => found.clone(),
                    None => Value::String(self.interpolate(s)),
                }
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_get_delete() {
        let mut vars = VariableStore::new();
        vars.save("x", json!(42), false);
        assert_eq!(vars.get("x"), Some(&json!(42)));
        assert!(vars.contains("x"));
        assert_eq!(vars.delete("x").map(|v| v.value), Some(json!(42)));
        assert_eq!(vars.get("x"), None);
        assert!(vars.delete("x").is_none());
    }

    #[test]
    fn test_reset_transient_keeps_persistent() {
        let mut vars = VariableStore::new();
        vars.save("token", json!("abc"), true);
        vars.save("tmp", json!(1), false);
        vars.reset_transient();
        assert!(vars.contains("token"));
        assert!(!vars.contains("tmp"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_interpolate() {
        let mut vars = VariableStore::new();
        vars.save("name", json!("Ada"), false);
        vars.save("n", json!(3), false);
        vars.save("user", json!({"emails": ["a@x.test", "b@x.test"]}), false);

        assert_eq!(vars.interpolate("Hi ${name}!"), "Hi Ada!");
        assert_eq!(vars.interpolate("${n} items"), "3 items");
        assert_eq!(vars.interpolate("to ${user.emails.1}"), "to b@x.test");
        assert_eq!(vars.interpolate("${missing} stays"), "${missing} stays");
        assert_eq!(vars.interpolate("${user.emails.9}"), "${user.emails.9}");
        assert_eq!(vars.interpolate("open ${name"), "open ${name");
        assert_eq!(vars.interpolate("no refs"), "no refs");
    }

    #[test]
    fn test_interpolate_value_keeps_shape() {
        let mut vars = VariableStore::new();
        vars.save("list", json!([1, 2]), false);
        vars.save("who", json!("Ada"), false);

        assert_eq!(vars.interpolate_value(&json!("${list}")), json!([1, 2]));
        assert_eq!(
            vars.interpolate_value(&json!({"greeting": "hi ${who}", "n": 1, "xs": ["${who}"]})),
            json!({"greeting": "hi Ada", "n": 1, "xs": ["Ada"]})
        );
        assert_eq!(vars.interpolate_value(&json!("${a}${b}")), json!("${a}${b}"));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("s")), "s");
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!([1, "a"])), r#"[1,"a"]"#);
    }
}

//! `{{path.to.value}}` placeholders resolved against a block's inputs.
//!
//! Paths are dot-separated; numeric segments index into arrays. Keys with the
//! reserved `__` prefix are never resolvable, so hidden run metadata cannot
//! leak into prompts or tool arguments.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern"))
}

/// Look up a dotted path in `inputs`.
pub fn lookup<'a>(inputs: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    if weft_core::is_reserved_key(first) {
        return None;
    }
    let mut current = inputs.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) if !weft_core::is_reserved_key(segment) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form of a value as it appears inside rendered prompts.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every placeholder; unknown paths render as the empty string.
pub fn render(template: &str, inputs: &Map<String, Value>) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(inputs, &caps[1]).map(value_to_text).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve a template to a JSON value.
///
/// A template that is exactly one placeholder keeps the JSON type of the
/// resolved value; anything else renders to a string.
pub fn resolve(template: &str, inputs: &Map<String, Value>) -> Value {
    let trimmed = template.trim();
    if let Some(caps) = placeholder().captures(trimmed) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(trimmed.len()) {
            return lookup(inputs, &caps[1])
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
        }
    }
    Value::String(render(template, inputs))
}

/// Resolve every string inside `value`, recursing through objects and arrays.
pub fn resolve_value(value: &Value, inputs: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve(s, inputs),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, inputs)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> Map<String, Value> {
        json!({
            "input": {"text": "hello", "count": 3},
            "Start": {"text": "hello"},
            "items": ["a", {"name": "b"}],
            "__user_id__": "u1",
            "nested": {"__secret": "x"}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn renders_dotted_paths() {
        let out = render("Summarize: {{ Start.text }} ({{input.count}}) {{items.1.name}}", &inputs());
        assert_eq!(out, "Summarize: hello (3) b");
    }

    #[test]
    fn unknown_and_reserved_paths_render_empty() {
        let out = render("[{{missing.path}}][{{__user_id__}}][{{nested.__secret}}]", &inputs());
        assert_eq!(out, "[][][]");
    }

    #[test]
    fn single_placeholder_keeps_type() {
        assert_eq!(resolve("{{input.count}}", &inputs()), json!(3));
        assert_eq!(resolve(" {{input}} ", &inputs()), json!({"text": "hello", "count": 3}));
        assert_eq!(resolve("n={{input.count}}", &inputs()), json!("n=3"));
        assert_eq!(resolve("{{nope}}", &inputs()), json!(""));
    }

    #[test]
    fn resolves_nested_mappings() {
        let mapping = json!({"body": "{{Start.text}}", "meta": {"n": "{{input.count}}"}, "fixed": true});
        assert_eq!(
            resolve_value(&mapping, &inputs()),
            json!({"body": "hello", "meta": {"n": 3}, "fixed": true})
        );
    }

    #[test]
    fn objects_render_as_json_text() {
        assert_eq!(render("{{Start}}", &inputs()), r#"{"text":"hello"}"#);
    }
}

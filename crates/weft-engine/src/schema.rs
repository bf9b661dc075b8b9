//! Structured-output helpers: pulling JSON out of model text and checking it
//! against the small schema subset blocks can declare (`type`, `required`,
//! `properties.*.type`).

use serde_json::Value;

/// Extract JSON from a response that may contain markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

/// Parse model text as JSON and check it against `schema`.
///
/// Returns the parsed value, or every issue found.
pub fn parse_structured(text: &str, schema: Option<&Value>) -> Result<Value, Vec<String>> {
    let value: Value =
        serde_json::from_str(extract_json(text)).map_err(|e| vec![format!("Output is not valid JSON: {}", e)])?;
    let issues = match schema {
        Some(schema) => check(&value, schema),
        None => Vec::new(),
    };
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(issues)
    }
}

/// Issues found validating `value` against `schema`.
pub fn check(value: &Value, schema: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            issues.push(format!("Expected {} but got {}", expected, type_name(value)));
            return issues;
        }
    }

    let Some(obj) = value.as_object() else {
        return issues;
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                issues.push(format!("Missing required key: '{}'", key));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in props {
            let (Some(actual), Some(expected)) = (obj.get(key), prop.get("type").and_then(Value::as_str)) else {
                continue;
            };
            if !type_matches(actual, expected) {
                issues.push(format!(
                    "Key '{}' should be {} but is {}",
                    key,
                    expected,
                    type_name(actual)
                ));
            }
        }
    }

    issues
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Data-driven parameter validation.
//!
//! Walks a tool's declared JSON-Schema-shaped parameter description against
//! the supplied parameter map: type per field, required fields, `enum`
//! membership, and `minimum`/`maximum` bounds. Fields the schema does not
//! declare pass through untouched. Returns every violation found; an empty
//! list means the parameters are acceptable.

use serde_json::Value;

/// Validate `params` against `schema`. Returns violations, empty when valid.
pub fn validate_params(schema: &Value, params: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(params_map) = params.as_object() else {
        return vec!["parameters must be an object".to_string()];
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !params_map.contains_key(field) {
                errors.push(format!("missing required field '{field}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return errors;
    };

    for (field, declared) in properties {
        let Some(value) = params_map.get(field) else {
            continue;
        };
        check_field(field, declared, value, &mut errors);
    }

    errors
}

fn check_field(field: &str, declared: &Value, value: &Value, errors: &mut Vec<String>) {
    if let Some(expected) = declared.get("type").and_then(Value::as_str)
        && !type_matches(expected, value)
    {
        errors.push(format!(
            "field '{field}' must be of type {expected}, got {}",
            type_name(value)
        ));
        return;
    }

    if let Some(allowed) = declared.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        let rendered: Vec<String> = allowed.iter().map(render_terse).collect();
        errors.push(format!(
            "field '{field}' must be one of [{}]",
            rendered.join(", ")
        ));
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = declared.get("minimum").and_then(Value::as_f64)
            && number < min
        {
            errors.push(format!("field '{field}' must be >= {min}"));
        }
        if let Some(max) = declared.get("maximum").and_then(Value::as_f64)
            && number > max
        {
            errors.push(format!("field '{field}' must be <= {max}"));
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keyword: accept rather than reject.
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

fn render_terse(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

use crate::engine::types::Values;

/// Interpolate `${values.key}` and `${values.nested.key}` patterns in a string.
pub fn interpolate_values(template: &str, values: &Values) -> String {
    const OPEN: &str = "${values.";

    let mut result = template.to_string();
    let mut start = 0;

    loop {
        let open = match result[start..].find(OPEN) {
            Some(pos) => start + pos,
            None => break,
        };

        let close = match result[open..].find('}') {
            Some(pos) => open + pos,
            None => break,
        };

        let path = &result[open + OPEN.len()..close];
        let value = resolve_path(path, values);

        result.replace_range(open..=close, &value);
        start = open + value.len();
    }

    result
}

/// Resolve a dotted path (e.g., "customer.email") from the value map.
fn resolve_path(path: &str, values: &Values) -> String {
    let mut parts = path.split('.');

    let mut current = match parts.next().and_then(|first| values.get(first)) {
        Some(v) => v,
        None => return String::new(),
    };

    for part in parts {
        current = match current.get(part) {
            Some(v) => v,
            None => return String::new(),
        };
    }

    match current {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_interpolation() {
        let mut values = Values::new();
        values.insert("name".to_string(), serde_json::json!("Alice"));

        assert_eq!(
            interpolate_values("Hello ${values.name}!", &values),
            "Hello Alice!"
        );
    }

    #[test]
    fn test_nested_interpolation() {
        let mut values = Values::new();
        values.insert(
            "customer".to_string(),
            serde_json::json!({"email": "alice@example.com"}),
        );

        assert_eq!(
            interpolate_values("Email: ${values.customer.email}", &values),
            "Email: alice@example.com"
        );
    }

    #[test]
    fn test_missing_key() {
        let values = Values::new();
        assert_eq!(
            interpolate_values("Hello ${values.missing}!", &values),
            "Hello !"
        );
    }

    #[test]
    fn test_non_string_value() {
        let mut values = Values::new();
        values.insert("count".to_string(), serde_json::json!(3));
        assert_eq!(interpolate_values("n=${values.count}", &values), "n=3");
    }
}

//! Filters available to manifest templates.

use minijinja::{Error, ErrorKind, Value};

/// `{{ labels | to_yaml }}`: block YAML without document marker or
/// trailing newline.
pub fn to_yaml(value: Value) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let yaml = serde_yaml::to_string(&json)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

pub fn tojson(value: Value) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    serde_json::to_string(&json).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Double-quoted YAML scalar.
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Newline, then every non-empty line indented by `spaces`.
pub fn nindent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    let mut out = String::with_capacity(value.len() + spaces * 4 + 1);
    for line in value.lines() {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(&pad);
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_yaml_mapping() {
        let value = Value::from_serialize(serde_json::json!({"cpu": "100m", "memory": "64Mi"}));
        assert_eq!(to_yaml(value).unwrap(), "cpu: 100m\nmemory: 64Mi");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(Value::from("a\"b")), "\"a\\\"b\"");
        assert_eq!(quote(Value::from(4)), "\"4\"");
    }

    #[test]
    fn test_tojson_bool() {
        assert_eq!(tojson(Value::from(true)).unwrap(), "true");
    }

    #[test]
    fn test_nindent() {
        assert_eq!(nindent("a: 1\nb: 2".to_string(), 2), "\n  a: 1\n  b: 2");
        assert_eq!(nindent("a\n\nb".to_string(), 4), "\n    a\n\n    b");
    }
}

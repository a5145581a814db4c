//! Canonical JSON serialization for content-addressed event ids.
//!
//! Compact output with object keys sorted at every depth, so the same logical
//! payload always hashes to the same event id regardless of how the caller
//! ordered its fields.

use serde_json::Value;

/// Produce a canonical JSON string from a [`serde_json::Value`].
///
/// ```
/// use serde_json::json;
/// use forge_core::event::canonical::canonicalize_json;
///
/// let val = json!({"title": "T", "base": {"ref": "main", "compare": "x"}});
/// assert_eq!(
///     canonicalize_json(&val),
///     r#"{"base":{"compare":"x","ref":"main"},"title":"T"}"#
/// );
/// ```
#[must_use]
pub fn canonicalize_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_string(s: &str, buf: &mut String) {
    // Value's Display applies JSON string escaping and cannot fail.
    buf.push_str(&Value::String(s.to_owned()).to_string());
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => write_string(s, buf),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            buf.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_string(key, buf);
                buf.push(':');
                write_canonical(val, buf);
            }
            buf.push('}');
        }
    }
}

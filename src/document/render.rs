//! Render a keyed YAML value as indented lines for splicing into a document.
//!
//! Only what the text patcher needs: block mappings, block sequences and
//! scalars. Strings are quoted whenever a plain scalar could be read back as
//! something else.

use serde_yaml::Value;

/// Lines for `key: value` at `indent`, nesting by `step`.
pub fn render_entry(key: &str, value: &Value, indent: usize, step: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    let name = format_key(key);
    match value {
        Value::Mapping(map) if !map.is_empty() => {
            let mut lines = vec![format!("{pad}{name}:")];
            for (k, v) in map {
                lines.extend(render_entry(&key_text(k), v, indent + step, step));
            }
            lines
        }
        Value::Mapping(_) => vec![format!("{pad}{name}: {{}}")],
        Value::Sequence(items) if !items.is_empty() => {
            let mut lines = vec![format!("{pad}{name}:")];
            for item in items {
                lines.extend(render_item(item, indent + step, step));
            }
            lines
        }
        Value::Sequence(_) => vec![format!("{pad}{name}: []")],
        Value::Tagged(tagged) => render_entry(key, &tagged.value, indent, step),
        scalar => vec![format!("{pad}{name}: {}", format_scalar(scalar))],
    }
}

fn render_item(item: &Value, indent: usize, step: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    match item {
        Value::Mapping(map) if !map.is_empty() => {
            // Entries sit two columns right of the dash; the first shares its line.
            let inner = indent + 2;
            let mut lines = Vec::new();
            for (k, v) in map {
                lines.extend(render_entry(&key_text(k), v, inner, step));
            }
            if let Some(first) = lines.first_mut() {
                *first = format!("{pad}- {}", &first[inner..]);
            }
            lines
        }
        Value::Tagged(tagged) => render_item(&tagged.value, indent, step),
        Value::Mapping(_) => vec![format!("{pad}- {{}}")],
        Value::Sequence(_) => vec![format!("{pad}- []")],
        scalar => vec![format!("{pad}- {}", format_scalar(scalar))],
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => format_scalar(other),
    }
}

pub fn format_key(key: &str) -> String {
    if is_plain_safe(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

pub fn format_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if is_plain_safe(s) => s.clone(),
        Value::String(s) => quote(s),
        Value::Tagged(tagged) => format_scalar(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => {
            serde_yaml::to_string(value)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default()
        }
    }
}

/// Plain scalars limited to a conservative character set that cannot be
/// mistaken for a number, boolean or null.
fn is_plain_safe(s: &str) -> bool {
    let Some(first) = s.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != '_' && first != '/' {
        return false;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return false;
    }
    let lower = s.to_ascii_lowercase();
    !matches!(
        lower.as_str(),
        "true" | "false" | "yes" | "no" | "on" | "off" | "y" | "n" | "null"
    ) && s.parse::<f64>().is_err()
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

//! Prompt templates: `{{key}}` substitution against a [`Context`].
//!
//! This is deliberately a single substitution pass with no control flow.
//! Whitespace inside the braces is ignored (`{{ key }}` == `{{key}}`).
//! An unterminated `{{` is kept as literal text.

use crate::context::{Context, value_to_text};
use crate::error::TemplateError;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render `template`, substituting every placeholder with the string form of
/// the matching context value.
///
/// Fails with [`TemplateError::MissingKey`] naming the first placeholder
/// (left to right) whose key is absent.
pub fn render(template: &str, context: &Context) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        out.push_str(&rest[..start]);
        let key = after_open[..end].trim();
        let value = context
            .get(key)
            .ok_or_else(|| TemplateError::MissingKey(key.to_string()))?;
        out.push_str(&value_to_text(value));

        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Keys referenced by `template`, in order of appearance (duplicates kept).
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        keys.push(after_open[..end].trim().to_string());
        rest = &after_open[end + CLOSE.len()..];
    }
    keys
}

/// Render every string inside a JSON value.
///
/// A string that consists of exactly one placeholder is replaced by the
/// context value itself, so structured results pass through unchanged.
pub fn render_value(value: &Value, context: &Context) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => {
            if let Some(key) = sole_placeholder(s) {
                return context
                    .get(key)
                    .cloned()
                    .ok_or_else(|| TemplateError::MissingKey(key.to_string()));
            }
            render(s, context).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim())
}

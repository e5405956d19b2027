//! Context: the variables accumulated over a run.
//!
//! Every successful step writes its result under a key; later prompts and
//! action arguments reference those keys with `{{name}}` placeholders.
//! Keys keep the position of their first insertion, overwriting a key
//! replaces its value in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An ordered map of variable name to value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ContextEntry>", into = "Vec<ContextEntry>")]
pub struct Context {
    entries: Vec<ContextEntry>,
    index: HashMap<String, usize>,
}

/// A single named value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: Value,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].value, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push(ContextEntry { key, value });
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&pos| &self.entries[pos].value)
    }

    /// The string form used for template substitution: strings verbatim,
    /// everything else as compact JSON.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(value_to_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.key.as_str(), &e.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<ContextEntry>> for Context {
    fn from(entries: Vec<ContextEntry>) -> Self {
        let mut ctx = Context::new();
        for entry in entries {
            ctx.insert(entry.key, entry.value);
        }
        ctx
    }
}

impl From<Context> for Vec<ContextEntry> {
    fn from(ctx: Context) -> Self {
        ctx.entries
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

/// Render a JSON value as prompt text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

//! Standard actions for taskloop.
//!
//! Actions give a run the ability to affect the world: create and edit
//! files under a workspace root, make HTTP requests, ask the language
//! model a side question, and read or write document memory.

pub mod ask_ai;
pub mod filesystem;
pub mod http;
pub mod memory;

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use taskloop_core::action::ActionRegistry;
use taskloop_core::error::ActionError;
use taskloop_core::memory::MemoryStore;
use taskloop_core::provider::Provider;

pub use ask_ai::AskAiAction;
pub use filesystem::{
    AppendFileAction, ListDirAction, MkdirAction, ReadFileAction, TouchAction, Workspace,
    WriteFileAction,
};
pub use http::{HttpGetAction, HttpPostAction};
pub use memory::{AddDocumentAction, AnswerFromMemoryAction, QueryMemoryAction};

/// Builds the standard registry.
///
/// Filesystem and HTTP actions are always present. `ask_ai` needs a
/// provider; the memory actions need a store, and `answer_from_memory`
/// needs both.
pub struct StandardRegistry {
    root: PathBuf,
    provider: Option<(Arc<dyn Provider>, String)>,
    memory: Option<(Arc<dyn MemoryStore>, usize)>,
}

impl StandardRegistry {
    /// Relative paths given to filesystem actions resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            provider: None,
            memory: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.provider = Some((provider, model.into()));
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>, default_top_k: usize) -> Self {
        self.memory = Some((memory, default_top_k));
        self
    }

    pub fn build(self) -> Result<ActionRegistry, ActionError> {
        let workspace = Workspace::new(self.root);
        let mut registry = ActionRegistry::new();

        registry.register(Arc::new(MkdirAction::new(workspace.clone())))?;
        registry.register(Arc::new(TouchAction::new(workspace.clone())))?;
        registry.register(Arc::new(WriteFileAction::new(workspace.clone())))?;
        registry.register(Arc::new(AppendFileAction::new(workspace.clone())))?;
        registry.register(Arc::new(ReadFileAction::new(workspace.clone())))?;
        registry.register(Arc::new(ListDirAction::new(workspace)))?;
        registry.register(Arc::new(HttpGetAction::new()))?;
        registry.register(Arc::new(HttpPostAction::new()))?;

        if let Some((provider, model)) = &self.provider {
            registry.register(Arc::new(AskAiAction::new(provider.clone(), model.clone())))?;
        }

        if let Some((memory, top_k)) = self.memory {
            registry.register(Arc::new(AddDocumentAction::new(memory.clone())))?;
            registry.register(Arc::new(QueryMemoryAction::new(memory.clone(), top_k)))?;
            if let Some((provider, model)) = self.provider {
                registry.register(Arc::new(AnswerFromMemoryAction::new(
                    memory, provider, model, top_k,
                )))?;
            }
        }

        tracing::debug!(actions = registry.len(), "Standard registry built");
        Ok(registry)
    }
}

/// Fetch a required string argument, accepting any of `keys`.
pub(crate) fn required_str<'a>(
    arguments: &'a Value,
    keys: &[&str],
) -> Result<&'a str, ActionError> {
    keys.iter()
        .find_map(|k| arguments.get(*k).and_then(Value::as_str))
        .ok_or_else(|| ActionError::InvalidArguments(format!("Missing '{}' argument", keys[0])))
}

/// Render a string or structured argument as text.
pub(crate) fn text_arg(arguments: &Value, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

//! Action trait: the abstraction over capabilities the model can choose.
//!
//! Actions are what let a run affect the world: create directories, fetch
//! URLs, query memory, and so on. An action never writes into the
//! [`Context`] itself; it returns an [`ActionOutput`] and the dispatcher
//! performs the write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::error::ActionError;

/// Terminal pseudo-action: the model declares the objective complete.
pub const DECLARE_DONE: &str = "declare_done";

/// Pseudo-action that suspends the run until the operator answers.
pub const ASK_USER: &str = "ask_user_to_clarify";

/// Names that can never be registered.
pub const RESERVED_ACTIONS: [&str; 2] = [DECLARE_DONE, ASK_USER];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_ACTIONS.contains(&name)
}

/// What an action hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    /// Nothing to store.
    Empty,
    /// A text observation; stored under `<action>_result`.
    Text(String),
    /// A scalar or structured value; stored under `<action>_result`.
    Value(Value),
    /// A value the action wants stored under a specific key.
    Tagged { key: String, value: Value },
}

impl ActionOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn tagged(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Tagged {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The core Action trait.
///
/// Handlers have a fixed argument shape (described by `parameters_schema`),
/// even when their effect is non-deterministic. They must not assume they
/// run on any particular thread.
#[async_trait]
pub trait Action: Send + Sync {
    /// The unique name of this action (e.g., "mkdir", "http_get").
    fn name(&self) -> &str;

    /// A description of what this action does (shown to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing the argument object.
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Run the action. `arguments` has already been rendered against the
    /// context, which is passed read-only.
    async fn execute(&self, arguments: Value, context: &Context) -> Result<ActionOutput, ActionError>;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An action as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The catalogue of actions available to a run.
///
/// Order is registration order, so prompts are stable across a run.
/// Registries are built once and shared read-only (wrap in `Arc`).
#[derive(Default)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
    by_name: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Names must be unique and not reserved.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), ActionError> {
        let name = action.name().to_string();
        if is_reserved(&name) {
            return Err(ActionError::ReservedName(name));
        }
        if self.by_name.contains_key(&name) {
            return Err(ActionError::DuplicateName(name));
        }
        self.by_name.insert(name, self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, action: Arc<dyn Action>) -> Result<Self, ActionError> {
        self.register(action)?;
        Ok(self)
    }

    /// Look up an action by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.by_name
            .get(name)
            .map(|&i| Arc::clone(&self.actions[i]))
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// (name, description) pairs in registration order.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.actions
            .iter()
            .map(|a| (a.name(), a.description()))
            .collect()
    }

    /// Full descriptors, including parameter schemas, in registration order.
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions.iter().map(|a| a.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

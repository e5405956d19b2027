//! Ask the language model a side question and return its answer.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use taskloop_core::action::{Action, ActionOutput};
use taskloop_core::context::Context;
use taskloop_core::error::ActionError;
use taskloop_core::message::Message;
use taskloop_core::provider::{CompletionRequest, Provider};

use crate::required_str;

pub struct AskAiAction {
    provider: Arc<dyn Provider>,
    model: String,
}

impl AskAiAction {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Action for AskAiAction {
    fn name(&self) -> &str {
        "ask_ai"
    }

    fn description(&self) -> &str {
        "Ask the language model a question (e.g. to write or summarize text) and store its answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "The full question or instruction" }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let prompt = required_str(&arguments, &["prompt", "question"])?;

        let request = CompletionRequest::new(&self.model, vec![Message::user(prompt)]);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?;

        Ok(ActionOutput::Text(response.content))
    }
}

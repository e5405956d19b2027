//! Memory actions: let the model store, look up, and ask questions about
//! documents.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use taskloop_core::action::{Action, ActionOutput};
use taskloop_core::context::Context;
use taskloop_core::error::ActionError;
use taskloop_core::memory::{MemoryStore, ScoredDocument};
use taskloop_core::message::Message;
use taskloop_core::provider::{CompletionRequest, Provider};

use crate::{required_str, text_arg};

const ANSWER_INSTRUCTIONS: &str = "Answer the question using only the documents below. \
If they do not contain the answer, say so.";

pub struct AddDocumentAction {
    memory: Arc<dyn MemoryStore>,
}

impl AddDocumentAction {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Action for AddDocumentAction {
    fn name(&self) -> &str {
        "add_document_to_memory"
    }

    fn description(&self) -> &str {
        "Store a named document in memory (overwrites a document with the same name)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Document name" },
                "text": { "type": "string", "description": "Document contents" }
            },
            "required": ["name", "text"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let name = required_str(&arguments, &["name"])?;
        let text = text_arg(&arguments, "text")
            .ok_or_else(|| ActionError::InvalidArguments("Missing 'text' argument".into()))?;

        self.memory.add(name, &text).await?;
        Ok(ActionOutput::text(format!("Added document to memory: {name}")))
    }
}

pub struct QueryMemoryAction {
    memory: Arc<dyn MemoryStore>,
    default_top_k: usize,
}

impl QueryMemoryAction {
    pub fn new(memory: Arc<dyn MemoryStore>, default_top_k: usize) -> Self {
        Self {
            memory,
            default_top_k,
        }
    }
}

#[async_trait]
impl Action for QueryMemoryAction {
    fn name(&self) -> &str {
        "query_memory"
    }

    fn description(&self) -> &str {
        "Look up documents in memory: an exact document name returns that document, any other text returns the most similar documents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "A document name or free-form question" },
                "top_k": { "type": "integer", "description": "Maximum number of documents to return" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let query = required_str(&arguments, &["query"])?;
        let top_k = top_k_arg(&arguments, self.default_top_k);

        let results = self.memory.query(query, top_k).await?;
        let value = serde_json::to_value(&results).map_err(|e| ActionError::failed(self.name(), e))?;
        Ok(ActionOutput::Value(value))
    }
}

fn top_k_arg(arguments: &Value, default: usize) -> usize {
    arguments
        .get("top_k")
        .and_then(Value::as_u64)
        .map(|k| k as usize)
        .unwrap_or(default)
}

/// Answers a question from the most relevant documents in memory.
pub struct AnswerFromMemoryAction {
    memory: Arc<dyn MemoryStore>,
    provider: Arc<dyn Provider>,
    model: String,
    default_top_k: usize,
}

impl AnswerFromMemoryAction {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        default_top_k: usize,
    ) -> Self {
        Self {
            memory,
            provider,
            model: model.into(),
            default_top_k,
        }
    }
}

/// The question followed by each retrieved document.
fn answer_prompt(question: &str, documents: &[ScoredDocument]) -> String {
    let mut prompt = format!("{ANSWER_INSTRUCTIONS}\n\nQUESTION:\n{question}\n");
    for doc in documents {
        prompt.push_str(&format!("\nDOCUMENT {}:\n{}\n", doc.name, doc.text));
    }
    prompt
}

#[async_trait]
impl Action for AnswerFromMemoryAction {
    fn name(&self) -> &str {
        "answer_from_memory"
    }

    fn description(&self) -> &str {
        "Answer a question from the documents in memory: the most relevant documents are retrieved and the language model writes the answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "What to find out from memory" },
                "top_k": { "type": "integer", "description": "How many documents to read" }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let question = required_str(&arguments, &["question", "query"])?;
        let top_k = top_k_arg(&arguments, self.default_top_k);

        let documents = self.memory.query(question, top_k).await?;
        if documents.is_empty() {
            return Err(ActionError::failed(self.name(), "memory holds no documents"));
        }
        tracing::debug!(
            sources = ?documents.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "Answering from memory"
        );

        let request = CompletionRequest::new(
            &self.model,
            vec![Message::user(answer_prompt(question, &documents))],
        );
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?;

        Ok(ActionOutput::Text(response.content))
    }
}

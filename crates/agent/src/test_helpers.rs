//! Shared test doubles for the execution loop.
//!
//! Also compiled into the integration tests via `#[path]`, so this file
//! only refers to `taskloop_core`.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::action::{Action, ActionOutput};
use taskloop_core::clarify::Clarifier;
use taskloop_core::context::Context;
use taskloop_core::error::{ActionError, ClarifyError, ProviderError};
use taskloop_core::provider::{CompletionRequest, CompletionResponse, Provider, Usage};

/// A mock provider that returns a sequence of scripted completions.
///
/// Each call to `complete` returns the next entry. Once the script is
/// exhausted every call fails, so a runaway loop ends instead of hanging.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Script of successful completions only.
    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Content of the last message of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        let content = match next {
            Some(result) => result?,
            None => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "SequentialMockProvider: no more responses".into(),
                });
            }
        };

        Ok(CompletionResponse {
            content,
            model,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

/// A JSON decision as the model would write it.
pub fn decision(action: &str, arguments: Value) -> String {
    serde_json::json!({
        "thoughts": format!("I should use {action}"),
        "reasoning": "it moves towards the objective",
        "chosen_action": action,
        "arguments": arguments,
    })
    .to_string()
}

enum Behaviour {
    Output(ActionOutput),
    Fail(String),
    Sleep(Duration),
}

/// An action that records every argument object it is invoked with.
pub struct RecordingAction {
    name: String,
    behaviour: Behaviour,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl RecordingAction {
    /// Succeeds with a text observation naming the action.
    pub fn new(name: &str) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let output = ActionOutput::text(format!("{name} ok"));
        Self::build(name, Behaviour::Output(output))
    }

    pub fn returning(name: &str, output: ActionOutput) -> (Self, Arc<Mutex<Vec<Value>>>) {
        Self::build(name, Behaviour::Output(output))
    }

    pub fn failing(name: &str, reason: &str) -> (Self, Arc<Mutex<Vec<Value>>>) {
        Self::build(name, Behaviour::Fail(reason.into()))
    }

    pub fn sleeping(name: &str, duration: Duration) -> (Self, Arc<Mutex<Vec<Value>>>) {
        Self::build(name, Behaviour::Sleep(duration))
    }

    fn build(name: &str, behaviour: Behaviour) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.into(),
                behaviour,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its arguments"
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        self.calls.lock().unwrap().push(arguments);
        match &self.behaviour {
            Behaviour::Output(out) => Ok(out.clone()),
            Behaviour::Fail(reason) => Err(ActionError::failed(&self.name, reason)),
            Behaviour::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(ActionOutput::Empty)
            }
        }
    }
}

/// A clarifier that answers from a script and remembers the questions.
pub struct ScriptedClarifier {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedClarifier {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clarifier for ScriptedClarifier {
    async fn ask(&self, question: &str) -> Result<String, ClarifyError> {
        self.questions.lock().unwrap().push(question.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ClarifyError::InputClosed)
    }
}

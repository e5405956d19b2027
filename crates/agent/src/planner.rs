//! Step planning: turning the current state of a run into one decision.
//!
//! [`Planner`] is the seam between the loop and its decision source.
//! [`LlmPlanner`] asks a language model, validates the answer, and
//! re-prompts a bounded number of times when the answer is unusable.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskloop_config::AppConfig;
use taskloop_core::action::{ActionRegistry, is_reserved};
use taskloop_core::context::Context;
use taskloop_core::error::{ParseError, StepError, StepErrorKind};
use taskloop_core::memory::MemoryDocument;
use taskloop_core::message::Message;
use taskloop_core::provider::{CompletionRequest, Provider};
use taskloop_core::template;
use taskloop_core::trace::{StepDecision, StepRecord};
use tracing::{debug, warn};

use crate::prompt::{self, PromptInput};

/// Everything the planner may look at for one cycle.
pub struct PlanRequest<'a> {
    pub objective: &'a str,
    pub context: &'a Context,
    pub registry: &'a ActionRegistry,
    /// Most recent steps, oldest first, already cut to the history window.
    pub history: &'a [StepRecord],
    pub documents: &'a [MemoryDocument],
    /// What happened in the previous cycle.
    pub observation: Option<&'a str>,
}

/// A validated decision and how many completions it took.
#[derive(Debug, Clone)]
pub struct Planned {
    pub decision: StepDecision,
    pub attempts: u32,
}

/// The planner gave up on this cycle.
#[derive(Debug, Clone)]
pub struct PlanFailure {
    pub error: StepError,
    pub attempts: u32,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<Planned, PlanFailure>;
}

pub struct LlmPlanner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    template: String,
    max_parse_retries: u32,
    timeout: Option<Duration>,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            template: prompt::DEFAULT_STEP_TEMPLATE.to_string(),
            max_parse_retries: 3,
            timeout: None,
        }
    }

    /// Model, sampling, retry budget, timeout and template from configuration.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let mut planner = Self::new(provider, &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_max_parse_retries(config.agent.max_parse_retries);
        if let Some(timeout) = config.agent.llm_timeout() {
            planner = planner.with_timeout(timeout);
        }
        if let Some(template) = &config.agent.prompt_template {
            planner = planner.with_template(template);
        }
        planner
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Re-prompts allowed after the first malformed answer.
    pub fn with_max_parse_retries(mut self, retries: u32) -> Self {
        self.max_parse_retries = retries;
        self
    }

    /// Bound on each completion call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String, AttemptError> {
        let mut request = CompletionRequest::new(&self.model, messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let call = self.provider.complete(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AttemptError::TimedOut(limit))?,
            None => call.await,
        };

        response
            .map(|r| r.content)
            .map_err(|e| AttemptError::Parse(ParseError::Completion(e.to_string())))
    }
}

enum AttemptError {
    Parse(ParseError),
    TimedOut(Duration),
}

impl AttemptError {
    fn to_step_error(&self) -> StepError {
        match self {
            AttemptError::Parse(e) => StepError::from(e),
            AttemptError::TimedOut(limit) => StepError::new(
                StepErrorKind::Timeout,
                format!("Completion timed out after {}ms", limit.as_millis()),
            ),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<Planned, PlanFailure> {
        let input = PromptInput {
            objective: request.objective,
            registry: request.registry,
            context: request.context,
            history: request.history,
            documents: request.documents,
            observation: request.observation,
        };
        let prompt = template::render(&self.template, &prompt::prompt_context(&input)).map_err(
            |e| PlanFailure {
                error: StepError::from(&e),
                attempts: 0,
            },
        )?;

        debug!(prompt = %prompt, "Step prompt rendered");
        let mut messages = vec![Message::user(prompt)];
        let max_attempts = self.max_parse_retries + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let outcome = match self.complete(messages.clone()).await {
                Ok(raw) => {
                    debug!(attempt, response = %raw, "Model answered");
                    match parse_decision(&raw, request.registry) {
                        Ok(decision) => {
                            debug!(attempt, action = %decision.chosen_action, "Decision accepted");
                            return Ok(Planned {
                                decision,
                                attempts: attempt,
                            });
                        }
                        Err(e) => {
                            messages.push(Message::assistant(raw));
                            AttemptError::Parse(e)
                        }
                    }
                }
                Err(e) => e,
            };

            let step_error = outcome.to_step_error();
            warn!(attempt, max_attempts, error = %step_error, "Planner attempt failed");
            messages.push(Message::user(prompt::malformed_notice(&step_error.message)));
            last_error = Some(step_error);
        }

        Err(PlanFailure {
            error: last_error.unwrap_or_else(|| {
                StepError::new(StepErrorKind::Parse, "no completion attempts were made")
            }),
            attempts: max_attempts,
        })
    }
}

/// Decode and validate a model answer.
///
/// The answer must be a JSON object with exactly the decision fields,
/// optionally wrapped in a Markdown code fence. The chosen action must be
/// registered or reserved.
pub fn parse_decision(raw: &str, registry: &ActionRegistry) -> Result<StepDecision, ParseError> {
    let body = strip_code_fence(raw.trim());

    let value: Value =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ParseError::InvalidShape("expected a JSON object".into()));
    }

    let mut decision: StepDecision =
        serde_json::from_value(value).map_err(|e| ParseError::InvalidShape(e.to_string()))?;

    decision.chosen_action = decision.chosen_action.trim().to_string();
    if decision.chosen_action.is_empty() {
        return Err(ParseError::InvalidShape("chosen_action is empty".into()));
    }

    match decision.arguments {
        Value::Object(_) => {}
        Value::Null => decision.arguments = Value::Object(serde_json::Map::new()),
        _ => {
            return Err(ParseError::InvalidShape(
                "arguments must be a JSON object".into(),
            ));
        }
    }

    if !is_reserved(&decision.chosen_action) && !registry.contains(&decision.chosen_action) {
        return Err(ParseError::UnknownAction(decision.chosen_action));
    }

    Ok(decision)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Skip an info string such as `json`, on its own line or inline
    let body = match rest.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with('{') => body,
        Some(_) => rest,
        None => match rest.trim_start().split_once(char::is_whitespace) {
            Some((info, body)) if !info.starts_with('{') => body,
            _ => rest,
        },
    };
    body.trim()
}

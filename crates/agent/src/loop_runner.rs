//! The execution loop state machine.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskloop_config::AgentConfig;
use taskloop_core::action::{ASK_USER, ActionRegistry, DECLARE_DONE};
use taskloop_core::clarify::{Clarifier, NoClarifier};
use taskloop_core::context::Context;
use taskloop_core::error::{ClarifyError, StepError};
use taskloop_core::event::{DomainEvent, EventBus};
use taskloop_core::memory::MemoryStore;
use taskloop_core::template;
use taskloop_core::trace::{RunState, StepDecision, StepRecord, Trace};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{ActionDispatcher, Dispatch, error_observation, result_key};
use crate::planner::{PlanRequest, Planner};

/// What a run hands back: always a terminal state and the full trace.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub trace: Trace,
    pub context: Context,
}

/// Drives one objective to a terminal [`RunState`].
///
/// Each cycle: check bounds, plan, then either finish, ask the operator,
/// or dispatch an action. Every cycle that produced a decision (or gave up
/// trying) appends exactly one [`StepRecord`].
pub struct ExecutionLoop {
    planner: Arc<dyn Planner>,
    registry: Arc<ActionRegistry>,

    /// Hard cap on recorded steps
    max_steps: usize,

    /// Steps rendered into each prompt
    history_window: usize,

    /// Consecutive failed cycles tolerated before the run fails
    failure_budget: u32,

    action_timeout: Option<Duration>,
    clarify_timeout: Option<Duration>,
    clarifier: Arc<dyn Clarifier>,
    memory: Option<Arc<dyn MemoryStore>>,
    event_bus: Arc<EventBus>,
}

impl ExecutionLoop {
    pub fn new(planner: Arc<dyn Planner>, registry: Arc<ActionRegistry>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            planner,
            registry,
            max_steps: defaults.max_steps,
            history_window: defaults.history_window,
            failure_budget: defaults.failure_budget,
            action_timeout: None,
            clarify_timeout: None,
            clarifier: Arc::new(NoClarifier),
            memory: None,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Apply bounds and timeouts from the `[agent]` config section.
    pub fn configure(mut self, config: &AgentConfig) -> Self {
        self.max_steps = config.max_steps;
        self.history_window = config.history_window;
        self.failure_budget = config.failure_budget;
        self.action_timeout = config.action_timeout();
        self.clarify_timeout = config.clarify_timeout();
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_failure_budget(mut self, budget: u32) -> Self {
        self.failure_budget = budget;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = Some(timeout);
        self
    }

    pub fn with_clarify_timeout(mut self, timeout: Duration) -> Self {
        self.clarify_timeout = Some(timeout);
        self
    }

    pub fn with_clarifier(mut self, clarifier: Arc<dyn Clarifier>) -> Self {
        self.clarifier = clarifier;
        self
    }

    /// Document names from this store are listed in every prompt.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn dispatcher(&self) -> ActionDispatcher {
        let dispatcher =
            ActionDispatcher::new(self.registry.clone()).with_event_bus(self.event_bus.clone());
        match self.action_timeout {
            Some(limit) => dispatcher.with_timeout(limit),
            None => dispatcher,
        }
    }

    /// Run `objective` to completion.
    ///
    /// Never returns an error: every failure ends up in the trace and the
    /// run still reaches a terminal state. `cancel` is checked between
    /// cycles; an action that has started is allowed to finish.
    pub async fn run(
        &self,
        objective: &str,
        initial: Context,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut trace = Trace::begin(objective);
        let mut context = initial;
        let dispatcher = self.dispatcher();
        let run_id = trace.run_id.clone();

        info!(run_id = %run_id, max_steps = self.max_steps, "Run started");
        self.event_bus.publish(DomainEvent::RunStarted {
            run_id: run_id.clone(),
            objective: objective.to_string(),
            timestamp: Utc::now(),
        });

        let mut consecutive_failures = 0u32;
        let mut observation: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                trace.finish(RunState::Failed, "cancelled");
                break;
            }

            let step = trace.next_index();
            if step >= self.max_steps {
                trace.finish(
                    RunState::MaxStepsExceeded,
                    format!("reached max_steps ({})", self.max_steps),
                );
                break;
            }

            let documents = match &self.memory {
                Some(memory) => memory.documents().await,
                None => Vec::new(),
            };

            debug!(run_id = %run_id, step, "Planning");
            let planned = self
                .planner
                .plan(PlanRequest {
                    objective,
                    context: &context,
                    registry: &self.registry,
                    history: trace.tail(self.history_window),
                    documents: &documents,
                    observation: observation.as_deref(),
                })
                .await;

            let planned = match planned {
                Ok(planned) => planned,
                Err(failure) => {
                    warn!(run_id = %run_id, step, error = %failure.error, "Planner gave up");
                    let reason = format!(
                        "no valid decision after {} attempt(s): {}",
                        failure.attempts, failure.error.message
                    );
                    let record = StepRecord {
                        observation: failure.error.message.clone(),
                        error: Some(failure.error),
                        parse_attempts: failure.attempts,
                        ..empty_record()
                    };
                    self.append(&mut trace, record);
                    trace.finish(RunState::Failed, reason);
                    break;
                }
            };

            let decision = planned.decision;
            let action = decision.chosen_action.clone();
            info!(
                run_id = %run_id,
                step,
                action = %action,
                thoughts = %decision.thoughts,
                reasoning = %decision.reasoning,
                "Step decided"
            );

            if action == DECLARE_DONE {
                info!(run_id = %run_id, step, "Objective declared complete");
                let record = StepRecord {
                    observation: "Objective declared complete.".into(),
                    parse_attempts: planned.attempts,
                    ..decided_record(&decision)
                };
                self.append(&mut trace, record);
                trace.finish(RunState::DeclaredDone, "objective declared complete");
                break;
            }

            let dispatch = if action == ASK_USER {
                self.clarify(&run_id, &decision.arguments, &mut context).await
            } else {
                dispatcher.invoke(&action, &decision.arguments, &mut context).await
            };

            let failed = dispatch.error.is_some();
            observation = Some(dispatch.observation.clone());

            let record = StepRecord {
                resolved_arguments: dispatch.resolved_arguments,
                dispatched: dispatch.dispatched,
                result: dispatch.result,
                observation: dispatch.observation,
                error: dispatch.error,
                parse_attempts: planned.attempts,
                ..decided_record(&decision)
            };
            self.append(&mut trace, record);

            if failed {
                consecutive_failures += 1;
                if consecutive_failures > self.failure_budget {
                    trace.finish(
                        RunState::Failed,
                        format!("{consecutive_failures} consecutive failed steps"),
                    );
                    break;
                }
            } else {
                consecutive_failures = 0;
            }
        }

        info!(
            run_id = %run_id,
            state = %trace.final_state,
            steps = trace.steps.len(),
            reason = trace.termination.as_deref().unwrap_or(""),
            "Run finished"
        );
        self.event_bus.publish(DomainEvent::RunFinished {
            run_id,
            state: trace.final_state,
            steps: trace.steps.len(),
            timestamp: Utc::now(),
        });

        RunOutcome {
            state: trace.final_state,
            trace,
            context,
        }
    }

    /// Suspend on the operator and fold the answer into the context.
    async fn clarify(&self, run_id: &str, arguments: &Value, context: &mut Context) -> Dispatch {
        let resolved = match template::render_value(arguments, context) {
            Ok(v) => v,
            Err(e) => {
                let error = StepError::from(&e);
                return Dispatch {
                    observation: error_observation(ASK_USER, arguments, &error),
                    error: Some(error),
                    ..Dispatch::default()
                };
            }
        };
        let question = question_text(&resolved);

        self.event_bus.publish(DomainEvent::ClarificationRequested {
            run_id: run_id.to_string(),
            question: question.clone(),
            timestamp: Utc::now(),
        });

        let ask = self.clarifier.ask(&question);
        let answer = match self.clarify_timeout {
            Some(limit) => tokio::time::timeout(limit, ask)
                .await
                .unwrap_or(Err(ClarifyError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })),
            None => ask.await,
        };

        match answer {
            Ok(answer) => {
                let key = result_key(ASK_USER);
                context.insert(key.clone(), answer.clone());
                Dispatch {
                    observation: format!("The user answered (stored as `{key}`): {answer}"),
                    resolved_arguments: Some(resolved),
                    result: Some(Value::String(answer)),
                    result_key: Some(key),
                    ..Dispatch::default()
                }
            }
            Err(e) => {
                let error = StepError::from(&e);
                Dispatch {
                    observation: error_observation(ASK_USER, &resolved, &error),
                    resolved_arguments: Some(resolved),
                    error: Some(error),
                    ..Dispatch::default()
                }
            }
        }
    }

    fn append(&self, trace: &mut Trace, record: StepRecord) {
        let run_id = trace.run_id.clone();
        let appended = trace.push(record);
        debug!(
            run_id = %run_id,
            step = appended.index,
            action = appended.chosen_action.as_deref().unwrap_or("-"),
            success = appended.is_success(),
            "Step recorded"
        );
        self.event_bus.publish(DomainEvent::StepRecorded {
            run_id,
            index: appended.index,
            action: appended.chosen_action.clone(),
            success: appended.is_success(),
            timestamp: Utc::now(),
        });
    }
}

/// The question to show the operator.
fn question_text(arguments: &Value) -> String {
    match arguments.get("question") {
        Some(Value::String(q)) => q.clone(),
        Some(other) => other.to_string(),
        None => arguments.to_string(),
    }
}

fn empty_record() -> StepRecord {
    StepRecord {
        index: 0,
        thoughts: String::new(),
        reasoning: String::new(),
        chosen_action: None,
        arguments: Value::Object(serde_json::Map::new()),
        resolved_arguments: None,
        dispatched: false,
        result: None,
        observation: String::new(),
        error: None,
        parse_attempts: 1,
        timestamp: Utc::now(),
    }
}

fn decided_record(decision: &StepDecision) -> StepRecord {
    StepRecord {
        thoughts: decision.thoughts.clone(),
        reasoning: decision.reasoning.clone(),
        chosen_action: Some(decision.chosen_action.clone()),
        arguments: decision.arguments.clone(),
        ..empty_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::LlmPlanner;
    use crate::test_helpers::{RecordingAction, ScriptedClarifier, SequentialMockProvider, decision};
    use serde_json::json;
    use taskloop_core::action::ActionOutput;
    use taskloop_core::error::StepErrorKind;

    fn registry_with(actions: Vec<RecordingAction>) -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        for a in actions {
            registry.register(Arc::new(a)).unwrap();
        }
        Arc::new(registry)
    }

    fn looped(provider: Arc<SequentialMockProvider>, registry: Arc<ActionRegistry>) -> ExecutionLoop {
        ExecutionLoop::new(Arc::new(LlmPlanner::new(provider, "mock-model")), registry)
    }

    #[tokio::test]
    async fn zero_max_steps_never_calls_model() {
        let provider = Arc::new(SequentialMockProvider::texts([decision(DECLARE_DONE, json!({}))]));
        let outcome = looped(provider.clone(), registry_with(vec![]))
            .with_max_steps(0)
            .run("anything", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::MaxStepsExceeded);
        assert!(outcome.trace.steps.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn step_bound_is_enforced() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let provider = Arc::new(SequentialMockProvider::texts(
            (0..10).map(|i| decision("mkdir", json!({"folder": format!("d{i}")}))),
        ));
        let outcome = looped(provider.clone(), registry_with(vec![mkdir]))
            .with_max_steps(3)
            .run("loop forever", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::MaxStepsExceeded);
        assert_eq!(outcome.trace.steps.len(), 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn results_flow_into_later_arguments() {
        let (fetch, _) = RecordingAction::returning("fetch", ActionOutput::text("hello"));
        let (write, write_calls) = RecordingAction::new("write_file");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision("fetch", json!({})),
            decision("write_file", json!({"path": "a.txt", "contents": "{{fetch_result}}!"})),
            decision(DECLARE_DONE, json!({})),
        ]));

        let outcome = looped(provider.clone(), registry_with(vec![fetch, write]))
            .run("copy", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert_eq!(write_calls.lock().unwrap()[0], json!({"path": "a.txt", "contents": "hello!"}));
        assert_eq!(outcome.context.get_text("write_file_result").unwrap(), "write_file ok");

        // The second prompt shows the first result
        let prompts = provider.prompts();
        assert!(prompts[1].contains("fetch_result"));
        assert!(prompts[1].contains("0. fetch"));
    }

    #[tokio::test]
    async fn initial_context_is_available_to_templates() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision("mkdir", json!({"folder": "{{target}}"})),
            decision(DECLARE_DONE, json!({})),
        ]));
        let initial: Context = [("target", "reports")].into_iter().collect();

        looped(provider, registry_with(vec![mkdir]))
            .run("make it", initial, &CancellationToken::new())
            .await;
        assert_eq!(calls.lock().unwrap()[0], json!({"folder": "reports"}));
    }

    #[tokio::test]
    async fn failed_step_is_fed_back_and_run_continues() {
        let (bad, _) = RecordingAction::failing("mkdir", "permission denied");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision("mkdir", json!({"folder": "/root"})),
            decision(DECLARE_DONE, json!({})),
        ]));

        let outcome = looped(provider.clone(), registry_with(vec![bad]))
            .run("try", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::DeclaredDone);
        let first = &outcome.trace.steps[0];
        assert_eq!(first.error.as_ref().unwrap().kind, StepErrorKind::ActionExecution);
        assert!(provider.prompts()[1].contains("permission denied"));
    }

    #[tokio::test]
    async fn consecutive_failures_exhaust_budget() {
        let (bad, calls) = RecordingAction::failing("mkdir", "nope");
        let provider = Arc::new(SequentialMockProvider::texts(
            (0..10).map(|_| decision("mkdir", json!({}))),
        ));

        let outcome = looped(provider, registry_with(vec![bad]))
            .with_failure_budget(2)
            .run("fail", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.trace.steps.len(), 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert!(outcome.trace.termination.unwrap().contains("3 consecutive"));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let (bad, _) = RecordingAction::failing("bad", "nope");
        let (good, _) = RecordingAction::new("good");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision("bad", json!({})),
            decision("good", json!({})),
            decision("bad", json!({})),
            decision(DECLARE_DONE, json!({})),
        ]));

        let outcome = looped(provider, registry_with(vec![bad, good]))
            .with_failure_budget(1)
            .run("mixed", Context::new(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert_eq!(outcome.trace.steps.len(), 4);
    }

    #[tokio::test]
    async fn exhausted_parse_retries_fail_the_run() {
        let provider = Arc::new(SequentialMockProvider::texts(["x", "y", "z"]));
        let planner = LlmPlanner::new(provider, "m").with_max_parse_retries(2);
        let outcome = ExecutionLoop::new(Arc::new(planner), registry_with(vec![]))
            .run("garbage", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.trace.steps.len(), 1);
        let step = &outcome.trace.steps[0];
        assert!(step.chosen_action.is_none());
        assert_eq!(step.parse_attempts, 3);
        assert_eq!(step.error.as_ref().unwrap().kind, StepErrorKind::Parse);
    }

    #[tokio::test]
    async fn clarification_answer_lands_in_context() {
        let clarifier = Arc::new(ScriptedClarifier::new(["use ./out"]));
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision(ASK_USER, json!({"question": "Which folder?"})),
            decision("mkdir", json!({"folder": "{{ask_user_to_clarify_result}}"})),
            decision(DECLARE_DONE, json!({})),
        ]));

        let outcome = looped(provider, registry_with(vec![mkdir]))
            .with_clarifier(clarifier.clone())
            .run("make a folder", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert_eq!(clarifier.questions(), vec!["Which folder?"]);
        assert_eq!(calls.lock().unwrap()[0], json!({"folder": "use ./out"}));

        let indices: Vec<_> = outcome.trace.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(!outcome.trace.steps[0].dispatched);
        assert_eq!(outcome.trace.steps[0].result, Some(json!("use ./out")));
    }

    #[tokio::test]
    async fn clarification_without_operator_is_a_step_failure() {
        let provider = Arc::new(SequentialMockProvider::texts([
            decision(ASK_USER, json!({"question": "?"})),
            decision(DECLARE_DONE, json!({})),
        ]));

        let outcome = looped(provider, registry_with(vec![]))
            .run("ask", Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert!(outcome.trace.steps[0].error.is_some());
    }

    #[tokio::test]
    async fn cancellation_is_honored_between_cycles() {
        let provider = Arc::new(SequentialMockProvider::texts([decision(DECLARE_DONE, json!({}))]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = looped(provider.clone(), registry_with(vec![]))
            .run("never", Context::new(), &cancel)
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.trace.termination.as_deref(), Some("cancelled"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn history_window_bounds_prompt() {
        let (mkdir, _) = RecordingAction::new("mkdir");
        let provider = Arc::new(SequentialMockProvider::texts([
            decision("mkdir", json!({"folder": "first"})),
            decision("mkdir", json!({"folder": "second"})),
            decision("mkdir", json!({"folder": "third"})),
            decision(DECLARE_DONE, json!({})),
        ]));

        looped(provider.clone(), registry_with(vec![mkdir]))
            .with_history_window(1)
            .run("dirs", Context::new(), &CancellationToken::new())
            .await;

        let last_prompt = provider.prompts().pop().unwrap();
        assert!(last_prompt.contains("2. mkdir"));
        assert!(!last_prompt.contains("0. mkdir"));
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::texts([decision(DECLARE_DONE, json!({}))]));

        looped(provider, registry_with(vec![]))
            .with_event_bus(bus)
            .run("done", Context::new(), &CancellationToken::new())
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::RunStarted { .. } => "started",
                DomainEvent::StepRecorded { .. } => "step",
                DomainEvent::RunFinished { .. } => "finished",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "step", "finished"]);
    }

    #[tokio::test]
    async fn configure_reads_agent_section() {
        let config = AgentConfig {
            max_steps: 0,
            ..AgentConfig::default()
        };
        let provider = Arc::new(SequentialMockProvider::texts(Vec::<String>::new()));
        let outcome = looped(provider, registry_with(vec![]))
            .configure(&config)
            .run("x", Context::new(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, RunState::MaxStepsExceeded);
    }
}

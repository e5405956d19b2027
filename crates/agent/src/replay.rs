//! Deterministic re-execution of a recorded trace.
//!
//! Replay never consults the model. It walks the recorded steps in order and
//! re-dispatches every step that was dispatched originally, using the
//! arguments that were actually passed at the time. Side effects are repeated,
//! not checked for idempotency: replaying a trace twice creates the same
//! directories twice.
//!
//! [`RecordedPlanner`] is the other way back in: it feeds a trace's decisions
//! to an [`ExecutionLoop`](crate::ExecutionLoop) in place of the model, so
//! arguments are rendered again against the new run's context.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::action::{ASK_USER, ActionRegistry, DECLARE_DONE};
use taskloop_core::context::Context;
use taskloop_core::error::{StepError, StepErrorKind, TraceError};
use taskloop_core::event::EventBus;
use taskloop_core::trace::{RunState, StepDecision, StepRecord, Trace};
use tracing::{debug, info, warn};

use crate::dispatcher::{ActionDispatcher, result_key};
use crate::planner::{PlanFailure, PlanRequest, Planned, Planner};

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// The recorded terminal state of the run that was replayed.
    pub state: RunState,
    /// Number of actions re-dispatched.
    pub dispatched: usize,
    /// Step index and error for every re-dispatch that failed.
    pub errors: Vec<(usize, StepError)>,
    pub context: Context,
}

pub struct Replayer {
    dispatcher: ActionDispatcher,
}

impl Replayer {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            dispatcher: ActionDispatcher::new(registry),
        }
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_event_bus(bus);
        self
    }

    /// Names every dispatched step needs, checked before anything runs.
    fn check_schema(&self, trace: &Trace) -> Result<(), TraceError> {
        let registry = self.dispatcher.registry();
        for step in trace.steps.iter().filter(|s| s.dispatched) {
            let action = step.chosen_action.as_deref().unwrap_or_default();
            if !registry.contains(action) {
                return Err(TraceError::SchemaMismatch {
                    index: step.index,
                    action: action.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Re-dispatch the recorded actions of `trace`.
    ///
    /// Fails with [`TraceError::SchemaMismatch`] before dispatching anything
    /// if a recorded action is not registered. Failing re-dispatches do not
    /// stop the replay; they are collected in [`ReplayOutcome::errors`].
    pub async fn replay(&self, trace: &Trace) -> Result<ReplayOutcome, TraceError> {
        self.check_schema(trace)?;
        info!(run_id = %trace.run_id, steps = trace.steps.len(), "Replaying trace");

        let mut context = Context::new();
        let mut dispatched = 0;
        let mut errors = Vec::new();

        for step in &trace.steps {
            let Some(action) = step.chosen_action.as_deref() else {
                continue;
            };

            match action {
                DECLARE_DONE => break,
                ASK_USER => reapply_answer(step, &mut context),
                _ if step.dispatched => {
                    let arguments = step
                        .resolved_arguments
                        .clone()
                        .unwrap_or_else(|| step.arguments.clone());
                    debug!(step = step.index, action, "Re-dispatching");
                    let result = self.dispatcher.invoke_resolved(action, arguments, &mut context).await;
                    dispatched += 1;
                    if let Some(error) = result.error {
                        warn!(step = step.index, action, error = %error, "Replayed step failed");
                        errors.push((step.index, error));
                    }
                }
                _ => {}
            }
        }

        info!(
            run_id = %trace.run_id,
            dispatched,
            failed = errors.len(),
            "Replay finished"
        );
        Ok(ReplayOutcome {
            state: trace.final_state,
            dispatched,
            errors,
            context,
        })
    }

    /// Parse a trace file's contents and replay it.
    pub async fn replay_serialized(&self, json: &str) -> Result<ReplayOutcome, TraceError> {
        let trace = Trace::from_json(json)?;
        self.replay(&trace).await
    }
}

/// A [`Planner`] that answers with the decisions recorded in a trace.
pub struct RecordedPlanner {
    decisions: Mutex<VecDeque<StepDecision>>,
}

impl RecordedPlanner {
    /// Steps that never produced a decision are skipped.
    pub fn from_trace(trace: &Trace) -> Self {
        let decisions = trace
            .steps
            .iter()
            .filter_map(|step| {
                let action = step.chosen_action.clone()?;
                Some(StepDecision {
                    thoughts: step.thoughts.clone(),
                    reasoning: step.reasoning.clone(),
                    chosen_action: action,
                    arguments: step.arguments.clone(),
                })
            })
            .collect();
        Self {
            decisions: Mutex::new(decisions),
        }
    }

    pub fn remaining(&self) -> usize {
        self.decisions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Planner for RecordedPlanner {
    async fn plan(&self, _request: PlanRequest<'_>) -> Result<Planned, PlanFailure> {
        let next = self
            .decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(decision) => Ok(Planned {
                decision,
                attempts: 1,
            }),
            None => Err(PlanFailure {
                error: StepError::new(StepErrorKind::Parse, "recorded trace has no more decisions"),
                attempts: 0,
            }),
        }
    }
}

/// The operator's recorded answer takes the place of asking again.
fn reapply_answer(step: &StepRecord, context: &mut Context) {
    if let Some(Value::String(answer)) = &step.result {
        context.insert(result_key(ASK_USER), answer.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingAction;
    use chrono::Utc;
    use serde_json::json;
    use crate::loop_runner::ExecutionLoop;
    use taskloop_core::action::ActionOutput;
    use tokio_util::sync::CancellationToken;

    fn record(action: Option<&str>, resolved: Option<Value>, dispatched: bool) -> StepRecord {
        StepRecord {
            index: 0,
            thoughts: String::new(),
            reasoning: String::new(),
            chosen_action: action.map(String::from),
            arguments: json!({"folder": "{{dir}}"}),
            resolved_arguments: resolved,
            dispatched,
            result: None,
            observation: String::new(),
            error: None,
            parse_attempts: 1,
            timestamp: Utc::now(),
        }
    }

    fn registry_with(actions: Vec<RecordingAction>) -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        for a in actions {
            registry.register(Arc::new(a)).unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn dispatches_resolved_arguments_verbatim() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let mut trace = Trace::begin("dirs");
        trace.push(record(Some("mkdir"), Some(json!({"folder": "out"})), true));
        trace.push(record(Some(DECLARE_DONE), None, false));
        trace.finish(RunState::DeclaredDone, "done");

        let outcome = Replayer::new(registry_with(vec![mkdir])).replay(&trace).await.unwrap();
        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(calls.lock().unwrap().as_slice(), &[json!({"folder": "out"})]);
    }

    #[tokio::test]
    async fn undispatched_steps_are_skipped() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let mut trace = Trace::begin("dirs");
        trace.push(record(Some("mkdir"), None, false));
        trace.push(record(None, None, false));

        let outcome = Replayer::new(registry_with(vec![mkdir])).replay(&trace).await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_action_fails_before_any_dispatch() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let mut trace = Trace::begin("dirs");
        trace.push(record(Some("mkdir"), Some(json!({"folder": "a"})), true));
        trace.push(record(Some("http_get"), Some(json!({"url": "http://x"})), true));

        let err = Replayer::new(registry_with(vec![mkdir])).replay(&trace).await.unwrap_err();
        assert!(matches!(err, TraceError::SchemaMismatch { index: 1, ref action } if action == "http_get"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_are_collected_not_fatal() {
        let (bad, _) = RecordingAction::failing("mkdir", "File exists");
        let (touch, touch_calls) = RecordingAction::new("touch");
        let mut trace = Trace::begin("dirs");
        trace.push(record(Some("mkdir"), Some(json!({"folder": "out"})), true));
        trace.push(record(Some("touch"), Some(json!({"path": "out/a"})), true));

        let outcome = Replayer::new(registry_with(vec![bad, touch])).replay(&trace).await.unwrap();
        assert_eq!(outcome.dispatched, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, 0);
        assert_eq!(outcome.errors[0].1.kind, StepErrorKind::ActionExecution);
        assert_eq!(touch_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clarification_answers_are_reapplied() {
        let (fetch, _) = RecordingAction::returning("fetch", ActionOutput::text("page"));
        let mut trace = Trace::begin("ask");
        let mut ask = record(Some(ASK_USER), Some(json!({"question": "which?"})), false);
        ask.result = Some(json!("the blue one"));
        trace.push(ask);
        trace.push(record(Some("fetch"), Some(json!({})), true));

        let outcome = Replayer::new(registry_with(vec![fetch])).replay(&trace).await.unwrap();
        assert_eq!(
            outcome.context.get_text("ask_user_to_clarify_result").unwrap(),
            "the blue one"
        );
        assert_eq!(outcome.context.get_text("fetch_result").unwrap(), "page");
    }

    #[tokio::test]
    async fn serialized_trace_replays() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let mut trace = Trace::begin("dirs");
        trace.push(record(Some("mkdir"), Some(json!({"folder": "out"})), true));
        let json = trace.to_json().unwrap();

        let outcome = Replayer::new(registry_with(vec![mkdir]))
            .replay_serialized(&json)
            .await
            .unwrap();
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recorded_planner_drives_a_new_run() {
        let mut trace = Trace::begin("dirs");
        trace.push(record(None, None, false));
        let mut mkdir_step = record(Some("mkdir"), None, true);
        mkdir_step.arguments = json!({"folder": "{{dir}}"});
        trace.push(mkdir_step);
        trace.push(record(Some(DECLARE_DONE), None, false));

        let planner = Arc::new(RecordedPlanner::from_trace(&trace));
        assert_eq!(planner.remaining(), 2);

        let (mkdir, calls) = RecordingAction::new("mkdir");
        let initial: Context = [("dir", "fresh")].into_iter().collect();
        let outcome = ExecutionLoop::new(planner.clone(), registry_with(vec![mkdir]))
            .run("dirs", initial, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, RunState::DeclaredDone);
        assert_eq!(calls.lock().unwrap().as_slice(), &[json!({"folder": "fresh"})]);
        assert_eq!(planner.remaining(), 0);
    }

    #[tokio::test]
    async fn recorded_planner_fails_when_exhausted() {
        let planner = RecordedPlanner::from_trace(&Trace::begin("empty"));
        let outcome = ExecutionLoop::new(Arc::new(planner), registry_with(vec![]))
            .run("empty", Context::new(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.trace.steps[0].parse_attempts, 0);
    }
}

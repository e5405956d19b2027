//! Action dispatch: resolve, render arguments, invoke, write back.
//!
//! The dispatcher is the only writer of action results into the
//! [`Context`]. A result lands under the key the action tagged it with,
//! or under `<action>_result`.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskloop_core::action::{Action, ActionOutput, ActionRegistry};
use taskloop_core::context::{Context, value_to_text};
use taskloop_core::error::{ActionError, StepError};
use taskloop_core::event::{DomainEvent, EventBus};
use taskloop_core::template;
use tracing::{debug, warn};

/// Observations longer than this are cut before being fed back.
const OBSERVATION_PREVIEW: usize = 1000;

/// Outcome of one dispatch, ready to be folded into a step record.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    /// Arguments after context substitution; `None` if rendering failed.
    pub resolved_arguments: Option<Value>,
    /// Whether the handler was actually invoked.
    pub dispatched: bool,
    pub result: Option<Value>,
    /// Context key the result was written to.
    pub result_key: Option<String>,
    pub observation: String,
    pub error: Option<StepError>,
}

pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
            event_bus: None,
        }
    }

    /// Bound on each handler invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Resolve `name`, render `arguments` against the context and invoke.
    pub async fn invoke(&self, name: &str, arguments: &Value, context: &mut Context) -> Dispatch {
        let action = match self.registry.resolve(name) {
            Ok(action) => action,
            Err(e) => return Self::failure(name, arguments, None, false, StepError::from(&e)),
        };

        let resolved = match template::render_value(arguments, context) {
            Ok(v) => v,
            Err(e) => return Self::failure(name, arguments, None, false, StepError::from(&e)),
        };

        self.execute(action, resolved, context).await
    }

    /// Invoke with arguments that are already resolved, e.g. from a trace.
    pub async fn invoke_resolved(&self, name: &str, resolved: Value, context: &mut Context) -> Dispatch {
        match self.registry.resolve(name) {
            Ok(action) => self.execute(action, resolved, context).await,
            Err(e) => Self::failure(name, &resolved, Some(resolved.clone()), false, StepError::from(&e)),
        }
    }

    async fn execute(&self, action: Arc<dyn Action>, resolved: Value, context: &mut Context) -> Dispatch {
        let name = action.name().to_string();
        let start = Instant::now();

        let call = action.execute(resolved.clone(), context);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout {
                    action_name: name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => call.await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ActionExecuted {
                action_name: name.clone(),
                success: outcome.is_ok(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }

        match outcome {
            Ok(output) => {
                debug!(action = %name, duration_ms, "Action succeeded");
                Self::commit(&name, resolved, output, context)
            }
            Err(e) => {
                warn!(action = %name, duration_ms, error = %e, "Action failed");
                Self::failure(&name, &resolved, Some(resolved.clone()), true, StepError::from(&e))
            }
        }
    }

    fn commit(name: &str, resolved: Value, output: ActionOutput, context: &mut Context) -> Dispatch {
        let (key, value) = match output {
            ActionOutput::Empty => {
                return Dispatch {
                    resolved_arguments: Some(resolved),
                    dispatched: true,
                    observation: format!("Ran `{name}`. It produced no result."),
                    ..Dispatch::default()
                };
            }
            ActionOutput::Text(text) => (result_key(name), Value::String(text)),
            ActionOutput::Value(value) => (result_key(name), value),
            ActionOutput::Tagged { key, value } => (key, value),
        };

        let observation = format!(
            "Ran `{name}`. Result stored in context as `{key}`: {}",
            truncate(&value_to_text(&value), OBSERVATION_PREVIEW)
        );
        context.insert(key.clone(), value.clone());

        Dispatch {
            resolved_arguments: Some(resolved),
            dispatched: true,
            result: Some(value),
            result_key: Some(key),
            observation,
            error: None,
        }
    }

    fn failure(
        name: &str,
        arguments: &Value,
        resolved: Option<Value>,
        dispatched: bool,
        error: StepError,
    ) -> Dispatch {
        Dispatch {
            resolved_arguments: resolved,
            dispatched,
            observation: error_observation(name, arguments, &error),
            error: Some(error),
            ..Dispatch::default()
        }
    }
}

/// Default context key for an action's result.
pub fn result_key(action_name: &str) -> String {
    format!("{action_name}_result")
}

/// Text telling the model what went wrong so it can adapt.
pub fn error_observation(action: &str, arguments: &Value, error: &StepError) -> String {
    format!(
        "Just tried running action `{action}` with arguments {arguments}. It failed: {}. \
         Try again with corrected arguments or choose a different action.",
        error.message
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingAction;
    use serde_json::json;
    use taskloop_core::error::StepErrorKind;

    fn dispatcher_with(actions: Vec<RecordingAction>) -> ActionDispatcher {
        let mut registry = ActionRegistry::new();
        for a in actions {
            registry.register(Arc::new(a)).unwrap();
        }
        ActionDispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn text_result_lands_under_action_result_key() {
        let (mkdir, calls) = RecordingAction::new("mkdir");
        let dispatcher = dispatcher_with(vec![mkdir]);
        let mut ctx = Context::new();

        let d = dispatcher.invoke("mkdir", &json!({"folder": "out"}), &mut ctx).await;
        assert!(d.error.is_none());
        assert!(d.dispatched);
        assert_eq!(d.result_key.as_deref(), Some("mkdir_result"));
        assert_eq!(ctx.get_text("mkdir_result").unwrap(), "mkdir ok");
        assert_eq!(calls.lock().unwrap().as_slice(), &[json!({"folder": "out"})]);
        assert!(d.observation.contains("mkdir_result"));
    }

    #[tokio::test]
    async fn tagged_result_lands_under_its_key() {
        let (fetch, _) = RecordingAction::returning("fetch", ActionOutput::tagged("page", json!({"title": "Home"})));
        let dispatcher = dispatcher_with(vec![fetch]);
        let mut ctx = Context::new();

        dispatcher.invoke("fetch", &json!({}), &mut ctx).await;
        assert_eq!(ctx.get("page").unwrap(), &json!({"title": "Home"}));
        assert!(!ctx.contains_key("fetch_result"));
    }

    #[tokio::test]
    async fn empty_result_writes_nothing() {
        let (noop, _) = RecordingAction::returning("noop", ActionOutput::Empty);
        let dispatcher = dispatcher_with(vec![noop]);
        let mut ctx = Context::new();

        let d = dispatcher.invoke("noop", &json!({}), &mut ctx).await;
        assert!(d.error.is_none());
        assert!(ctx.is_empty());
        assert!(d.result.is_none());
    }

    #[tokio::test]
    async fn arguments_are_rendered_against_context() {
        let (write, calls) = RecordingAction::new("write_file");
        let dispatcher = dispatcher_with(vec![write]);
        let mut ctx = Context::new();
        ctx.insert("dir", "out");
        ctx.insert("rows", json!([1, 2, 3]));

        let d = dispatcher
            .invoke(
                "write_file",
                &json!({"path": "{{dir}}/data.txt", "contents": "{{rows}}"}),
                &mut ctx,
            )
            .await;

        let expected = json!({"path": "out/data.txt", "contents": [1, 2, 3]});
        assert_eq!(d.resolved_arguments.as_ref().unwrap(), &expected);
        assert_eq!(calls.lock().unwrap()[0], expected);
    }

    #[tokio::test]
    async fn missing_placeholder_is_not_dispatched() {
        let (write, calls) = RecordingAction::new("write_file");
        let dispatcher = dispatcher_with(vec![write]);
        let mut ctx = Context::new();

        let d = dispatcher.invoke("write_file", &json!({"path": "{{nope}}"}), &mut ctx).await;
        assert_eq!(d.error.as_ref().unwrap().kind, StepErrorKind::TemplateResolution);
        assert!(!d.dispatched);
        assert!(calls.lock().unwrap().is_empty());
        assert!(d.observation.contains("nope"));
    }

    #[tokio::test]
    async fn unknown_action_is_reported() {
        let dispatcher = dispatcher_with(vec![]);
        let mut ctx = Context::new();
        let d = dispatcher.invoke("fly", &json!({}), &mut ctx).await;
        assert_eq!(d.error.unwrap().kind, StepErrorKind::UnknownAction);
        assert!(d.observation.contains("`fly`"));
    }

    #[tokio::test]
    async fn handler_error_feeds_back_summary() {
        let (bad, _) = RecordingAction::failing("mkdir", "File exists");
        let dispatcher = dispatcher_with(vec![bad]);
        let mut ctx = Context::new();

        let d = dispatcher.invoke("mkdir", &json!({"folder": "out"}), &mut ctx).await;
        let err = d.error.unwrap();
        assert_eq!(err.kind, StepErrorKind::ActionExecution);
        assert!(d.dispatched);
        assert!(d.observation.contains("File exists"));
        assert!(ctx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let (slow, _) = RecordingAction::sleeping("slow", Duration::from_secs(30));
        let dispatcher = dispatcher_with(vec![slow]).with_timeout(Duration::from_millis(100));
        let mut ctx = Context::new();

        let d = dispatcher.invoke("slow", &json!({}), &mut ctx).await;
        assert_eq!(d.error.unwrap().kind, StepErrorKind::Timeout);
    }

    #[tokio::test]
    async fn execution_events_are_published() {
        let (mkdir, _) = RecordingAction::new("mkdir");
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let dispatcher = dispatcher_with(vec![mkdir]).with_event_bus(bus);

        dispatcher.invoke("mkdir", &json!({}), &mut Context::new()).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::ActionExecuted { action_name, success: true, .. } if action_name == "mkdir"));
    }

    #[tokio::test]
    async fn invoke_resolved_skips_templating() {
        let (echo, calls) = RecordingAction::new("echo");
        let dispatcher = dispatcher_with(vec![echo]);
        let mut ctx = Context::new();

        let d = dispatcher
            .invoke_resolved("echo", json!({"text": "{{literal}}"}), &mut ctx)
            .await;
        assert!(d.error.is_none());
        assert_eq!(calls.lock().unwrap()[0], json!({"text": "{{literal}}"}));
    }
}

//! Step prompt construction.
//!
//! The step prompt is itself a `{{key}}` template. The planner fills a
//! [`Context`] with pre-formatted sections and renders the template
//! against it, so the whole prompt can be replaced from configuration
//! as long as the replacement only uses the keys listed in [`PROMPT_KEYS`].

use serde_json::Value;
use taskloop_core::action::{ASK_USER, ActionRegistry, DECLARE_DONE};
use taskloop_core::context::{Context, value_to_text};
use taskloop_core::memory::MemoryDocument;
use taskloop_core::trace::StepRecord;

/// Keys available to a step prompt template.
pub const PROMPT_KEYS: [&str; 7] = [
    "objective",
    "actions",
    "documents",
    "variables",
    "history",
    "observation",
    "response_format",
];

/// Context values longer than this are cut in the prompt.
const PREVIEW_CHARS: usize = 200;

pub const DEFAULT_STEP_TEMPLATE: &str = "\
You are an autonomous agent working towards an objective by choosing one action at a time.

OBJECTIVE:
{{objective}}

AVAILABLE ACTIONS:
{{actions}}

DOCUMENTS IN MEMORY:
{{documents}}

CONTEXT VARIABLES (reference one in an argument by wrapping its name in double curly braces):
{{variables}}

ACTIONS TAKEN SO FAR:
{{history}}

{{observation}}

{{response_format}}";

pub const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "thoughts": "what you notice about the current situation",
  "reasoning": "why the chosen action moves towards the objective",
  "chosen_action": "one of the available action names",
  "arguments": { "argument_name": "value" }
}
A string argument may reference a context variable by writing its name between double curly braces."#;

/// Everything a step prompt is built from.
pub struct PromptInput<'a> {
    pub objective: &'a str,
    pub registry: &'a ActionRegistry,
    pub context: &'a Context,
    pub history: &'a [StepRecord],
    pub documents: &'a [MemoryDocument],
    pub observation: Option<&'a str>,
}

/// Build the context a step template is rendered against.
pub fn prompt_context(input: &PromptInput<'_>) -> Context {
    let mut ctx = Context::new();
    ctx.insert("objective", input.objective);
    ctx.insert("actions", format_actions(input.registry));
    ctx.insert("documents", format_documents(input.documents));
    ctx.insert("variables", format_variables(input.context));
    ctx.insert("history", format_history(input.history));
    ctx.insert(
        "observation",
        input
            .observation
            .filter(|o| !o.is_empty())
            .map(|o| format!("RESULT OF THE LAST STEP:\n{o}"))
            .unwrap_or_default(),
    );
    ctx.insert("response_format", RESPONSE_FORMAT);
    ctx
}

/// The catalogue in registration order, followed by the reserved actions.
pub fn format_actions(registry: &ActionRegistry) -> String {
    let mut lines: Vec<String> = registry
        .descriptors()
        .into_iter()
        .map(|d| {
            let params = parameter_names(&d.parameters);
            if params.is_empty() {
                format!("- {}: {}", d.name, d.description)
            } else {
                format!("- {}({}): {}", d.name, params.join(", "), d.description)
            }
        })
        .collect();

    lines.push(format!(
        "- {ASK_USER}(question): Ask the user a clarifying question and wait for the answer."
    ));
    lines.push(format!(
        "- {DECLARE_DONE}: Declare the objective complete. Choose this only when it is."
    ));
    lines.join("\n")
}

fn parameter_names(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Each document by name with a preview of its text.
pub fn format_documents(documents: &[MemoryDocument]) -> String {
    if documents.is_empty() {
        return "(none)".into();
    }
    documents
        .iter()
        .map(|d| format!("- {}: {}", d.name, preview(&d.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_variables(context: &Context) -> String {
    if context.is_empty() {
        return "(none)".into();
    }
    context
        .iter()
        .map(|(key, value)| format!("- {key}: {}", preview(&value_to_text(value))))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_history(history: &[StepRecord]) -> String {
    if history.is_empty() {
        return "(none yet)".into();
    }
    history
        .iter()
        .map(|step| {
            let action = step.chosen_action.as_deref().unwrap_or("(no valid decision)");
            let outcome = match &step.error {
                Some(err) => format!("FAILED: {}", err.message),
                None => "ok".to_string(),
            };
            format!(
                "{}. {action} {} -> {outcome}",
                step.index,
                compact(&step.arguments)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text sent after a malformed answer.
pub fn malformed_notice(error: &str) -> String {
    format!(
        "Your previous answer could not be used: {error}\n\
         Respond again with only the JSON object described above, \
         choosing one of the available action names."
    )
}

fn compact(value: &Value) -> String {
    preview(&value.to_string())
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

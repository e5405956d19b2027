//! Run traces: the canonical, replayable record of a run.
//!
//! A [`Trace`] is the objective, the ordered [`StepRecord`]s and the final
//! [`RunState`]. Step indices run 0..N-1 with no gaps. The JSON form is
//! versioned; readers accept any version up to [`TRACE_SCHEMA_VERSION`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StepError, TraceError};

/// Current trace schema version.
pub const TRACE_SCHEMA_VERSION: u32 = 1;

/// The state of a run. Exactly one value describes a run at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    DeclaredDone,
    MaxStepsExceeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "RUNNING",
            RunState::DeclaredDone => "DECLARED_DONE",
            RunState::MaxStepsExceeded => "MAX_STEPS_EXCEEDED",
            RunState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A validated decision produced by the planner for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDecision {
    #[serde(default)]
    pub thoughts: String,

    #[serde(default)]
    pub reasoning: String,

    /// An action name or one of the reserved pseudo-actions.
    pub chosen_action: String,

    /// Argument object (placeholders not yet rendered).
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl StepDecision {
    pub fn new(chosen_action: impl Into<String>, arguments: Value) -> Self {
        Self {
            thoughts: String::new(),
            reasoning: String::new(),
            chosen_action: chosen_action.into(),
            arguments,
        }
    }
}

/// One cycle's audit entry. Immutable once appended to a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,

    #[serde(default)]
    pub thoughts: String,

    #[serde(default)]
    pub reasoning: String,

    /// `None` when no valid decision was produced.
    #[serde(default)]
    pub chosen_action: Option<String>,

    /// Arguments as the model wrote them.
    #[serde(default = "empty_object")]
    pub arguments: Value,

    /// Arguments after context substitution, as dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_arguments: Option<Value>,

    /// Whether a registry action was actually invoked.
    #[serde(default)]
    pub dispatched: bool,

    #[serde(default)]
    pub result: Option<Value>,

    /// Text fed back to the model in the next prompt.
    #[serde(default)]
    pub observation: String,

    #[serde(default)]
    pub error: Option<StepError>,

    /// Number of completions it took to get a valid decision.
    #[serde(default = "one")]
    pub parse_attempts: u32,

    pub timestamp: DateTime<Utc>,
}

fn one() -> u32 {
    1
}

impl StepRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A complete run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub version: u32,
    pub run_id: String,
    pub objective: String,
    pub steps: Vec<StepRecord>,
    pub final_state: RunState,

    /// Human-readable reason the run stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trace {
    /// Start an empty trace in the `Running` state.
    pub fn begin(objective: impl Into<String>) -> Self {
        Self {
            version: TRACE_SCHEMA_VERSION,
            run_id: Uuid::new_v4().to_string(),
            objective: objective.into(),
            steps: Vec::new(),
            final_state: RunState::Running,
            termination: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The index the next appended step must carry.
    pub fn next_index(&self) -> usize {
        self.steps.len()
    }

    /// Append a step. The index is assigned here so it can never skip.
    pub fn push(&mut self, mut record: StepRecord) -> &StepRecord {
        record.index = self.steps.len();
        self.steps.push(record);
        &self.steps[self.steps.len() - 1]
    }

    pub fn finish(&mut self, state: RunState, reason: impl Into<String>) {
        self.final_state = state;
        self.termination = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// The last `window` steps, oldest first.
    pub fn tail(&self, window: usize) -> &[StepRecord] {
        let start = self.steps.len().saturating_sub(window);
        &self.steps[start..]
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a trace, rejecting versions newer than this build understands.
    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        #[derive(Deserialize)]
        struct VersionHeader {
            version: u32,
        }

        let header: VersionHeader = serde_json::from_str(json)?;
        if header.version > TRACE_SCHEMA_VERSION {
            return Err(TraceError::UnsupportedVersion {
                found: header.version,
                supported: TRACE_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_str(json)?)
    }
}

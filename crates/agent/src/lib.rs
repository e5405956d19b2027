//! The taskloop execution engine.
//!
//! A run follows a **Plan → Dispatch → Observe → Record** cycle:
//!
//! 1. **Plan**: the [`Planner`] renders the step prompt (objective, action
//!    catalogue, context variables, recent history) and turns the model's
//!    answer into a validated [`StepDecision`](taskloop_core::StepDecision)
//! 2. **Dispatch**: the [`ActionDispatcher`] renders the decision's arguments
//!    against the context and invokes the action
//! 3. **Observe**: the result is written back into the context and summarized
//!    for the next prompt
//! 4. **Record**: the cycle is appended to the [`Trace`](taskloop_core::Trace)
//!
//! The loop stops when the model declares the objective done, the step bound
//! is reached, or too many cycles fail in a row. Recorded traces can be
//! saved with [`recorder`] and re-executed without the model by the
//! [`Replayer`].

pub mod dispatcher;
pub mod loop_runner;
pub mod planner;
pub mod prompt;
pub mod recorder;
pub mod replay;

#[cfg(test)]
mod test_helpers;

pub use dispatcher::{ActionDispatcher, Dispatch};
pub use loop_runner::{ExecutionLoop, RunOutcome};
pub use planner::{LlmPlanner, PlanFailure, PlanRequest, Planned, Planner, parse_decision};
pub use recorder::{default_trace_path, load_trace, record, save_trace};
pub use replay::{RecordedPlanner, ReplayOutcome, Replayer};

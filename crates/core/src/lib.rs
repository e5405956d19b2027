//! # taskloop core
//!
//! Domain types, traits, and error definitions for the taskloop execution
//! engine. This crate has **no framework dependencies** beyond serde, tokio
//! sync primitives and async-trait: it defines the model every other crate
//! implements against.
//!
//! Each external collaborator is a trait here:
//! - [`Provider`]: language model completions and embeddings
//! - [`Action`]: a capability the model can choose
//! - [`MemoryStore`] / [`Embedder`]: named documents with similarity lookup
//! - [`Clarifier`]: the human operator

pub mod action;
pub mod clarify;
pub mod context;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod template;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use action::{Action, ActionDescriptor, ActionOutput, ActionRegistry, ASK_USER, DECLARE_DONE};
pub use clarify::{Clarifier, NoClarifier};
pub use context::Context;
pub use error::{StepError, StepErrorKind};
pub use event::{DomainEvent, EventBus};
pub use memory::{Embedder, MemoryDocument, MemoryStore, ScoredDocument};
pub use message::{Message, Role};
pub use provider::{CompletionRequest, CompletionResponse, Provider};
pub use trace::{RunState, StepDecision, StepRecord, Trace, TRACE_SCHEMA_VERSION};

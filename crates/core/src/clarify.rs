//! Clarifier: the synchronous boundary to a human operator.
//!
//! When the model chooses the clarification pseudo-action, the loop blocks
//! on [`Clarifier::ask`] until an answer string comes back.

use async_trait::async_trait;
use crate::error::ClarifyError;

#[async_trait]
pub trait Clarifier: Send + Sync {
    /// Ask the operator a question and wait for the answer.
    async fn ask(&self, question: &str) -> Result<String, ClarifyError>;
}

/// Used when no operator is attached; every request fails.
pub struct NoClarifier;

#[async_trait]
impl Clarifier for NoClarifier {
    async fn ask(&self, _question: &str) -> Result<String, ClarifyError> {
        Err(ClarifyError::NoOperator)
    }
}

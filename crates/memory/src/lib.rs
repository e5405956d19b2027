//! Memory implementations for taskloop.
//!
//! [`VectorMemory`] is the run-scoped document store; [`HashingEmbedder`]
//! gives it offline embeddings when no provider endpoint is configured.

pub mod hashing;
pub mod store;
pub mod vector;

pub use hashing::HashingEmbedder;
pub use store::VectorMemory;
pub use vector::{cosine_similarity, vector_search};

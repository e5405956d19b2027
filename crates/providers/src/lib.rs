//! Language model providers for taskloop.
//!
//! All providers implement the `taskloop_core::Provider` trait.
//! [`build_from_config`] picks the backend named in the configuration.

pub mod embedder;
pub mod openai_compat;
pub mod router;

pub use embedder::ProviderEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, default_base_url};

pub mod config_cmd;
pub mod replay;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskloop_actions::StandardRegistry;
use taskloop_config::{AppConfig, EmbedderKind};
use taskloop_core::action::ActionRegistry;
use taskloop_core::memory::{Embedder, MemoryStore};
use taskloop_core::provider::Provider;
use taskloop_memory::{HashingEmbedder, VectorMemory};
use taskloop_providers::ProviderEmbedder;

/// Load `path` if given, else the default location; env overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => AppConfig::load_with_env(p),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn build_memory(config: &AppConfig, provider: &Arc<dyn Provider>) -> Arc<dyn MemoryStore> {
    let embedder: Arc<dyn Embedder> = match config.memory.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.memory.dimensions)),
        EmbedderKind::Provider => Arc::new(ProviderEmbedder::new(
            provider.clone(),
            &config.memory.embedding_model,
        )),
    };
    Arc::new(VectorMemory::new(embedder))
}

/// The same catalogue for `run` and `replay`, so recorded names resolve.
pub fn build_registry(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    memory: Arc<dyn MemoryStore>,
    workdir: Option<PathBuf>,
) -> Result<Arc<ActionRegistry>, Box<dyn std::error::Error>> {
    let root = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let registry = StandardRegistry::new(root)
        .with_provider(provider, &config.model)
        .with_memory(memory, config.memory.top_k)
        .build()?;
    Ok(Arc::new(registry))
}

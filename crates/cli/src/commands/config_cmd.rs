//! `taskloop config`: configuration management commands.

use std::path::Path;
use taskloop_config::AppConfig;

pub fn default() {
    println!("{}", AppConfig::default_toml());
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", super::config_file(config_path).display());
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}", super::config_file(config_path).display());

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    if !config.has_api_key() {
        println!("   ⚠️  No API key set (TASKLOOP_API_KEY or OPENAI_API_KEY)");
    }

    println!();
    println!("   Provider:   {}", config.provider);
    println!("   Model:      {}", config.model);
    println!("   Max steps:  {}", config.agent.max_steps);
    println!("   Embedder:   {:?}", config.memory.embedder);
    println!("   Traces:     {}", config.trace_dir().display());
    Ok(())
}

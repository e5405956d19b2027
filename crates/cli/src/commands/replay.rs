//! `taskloop replay`: re-execute a recorded trace without the model.

use std::path::{Path, PathBuf};
use taskloop_agent::{Replayer, load_trace};

pub async fn run(
    config_path: Option<&Path>,
    trace_path: &Path,
    workdir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let trace = load_trace(trace_path).await?;

    let provider = taskloop_providers::build_from_config(&config);
    let memory = super::build_memory(&config, &provider);
    let registry = super::build_registry(&config, provider, memory, workdir)?;

    let mut replayer = Replayer::new(registry);
    if let Some(limit) = config.agent.action_timeout() {
        replayer = replayer.with_action_timeout(limit);
    }

    println!();
    println!("  Replaying: {}", trace.objective);
    println!("  Run id:    {}", trace.run_id);
    println!("  Recorded:  {} steps, {}", trace.steps.len(), trace.final_state);

    let outcome = replayer.replay(&trace).await?;

    println!("  Dispatched {} action(s)", outcome.dispatched);
    for (index, error) in &outcome.errors {
        println!("  [{index:>3}] failed: {error}");
    }
    println!();

    if !outcome.errors.is_empty() {
        return Err(format!("{} replayed step(s) failed", outcome.errors.len()).into());
    }
    Ok(())
}

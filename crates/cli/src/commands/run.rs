//! `taskloop run`: drive an objective and record the trace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskloop_agent::{ExecutionLoop, LlmPlanner, default_trace_path, save_trace};
use taskloop_core::context::Context;
use taskloop_core::event::{DomainEvent, EventBus};
use taskloop_core::memory::MemoryStore;
use taskloop_core::trace::RunState;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clarifier::StdinClarifier;

/// Providers reached without an API key.
const LOCAL_PROVIDERS: [&str; 4] = ["ollama", "vllm", "llamacpp", "llama.cpp"];

pub struct RunOptions {
    pub objective: String,
    pub max_steps: Option<usize>,
    pub trace: Option<PathBuf>,
    pub docs: Vec<String>,
    pub workdir: Option<PathBuf>,
}

pub async fn run(config_path: Option<&Path>, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if let Some(max) = options.max_steps {
        config.agent.max_steps = max;
    }

    // Fail early with setup instructions
    if !config.has_api_key() && !LOCAL_PROVIDERS.contains(&config.provider.as_str()) {
        eprintln!();
        eprintln!("  ERROR: No API key configured for provider '{}'", config.provider);
        eprintln!();
        eprintln!("  Set TASKLOOP_API_KEY or OPENAI_API_KEY, or add api_key to");
        eprintln!("    {}", super::config_file(config_path).display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = taskloop_providers::build_from_config(&config);
    let memory = super::build_memory(&config, &provider);
    for spec in &options.docs {
        let (name, path) = parse_doc_arg(spec)?;
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read document '{name}' from {path}: {e}"))?;
        memory.add(name, &text).await?;
    }

    let registry = super::build_registry(&config, provider.clone(), memory.clone(), options.workdir)?;
    let planner = LlmPlanner::from_config(provider, &config);

    let bus = Arc::new(EventBus::default());
    let progress = spawn_progress(&bus);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Interrupted, stopping after the current step...");
            on_interrupt.cancel();
        }
    });

    let engine = ExecutionLoop::new(Arc::new(planner), registry)
        .configure(&config.agent)
        .with_clarifier(Arc::new(StdinClarifier::new()))
        .with_memory(memory)
        .with_event_bus(bus);

    eprintln!();
    eprintln!("  Objective: {}", options.objective);
    eprintln!("  Provider:  {} ({})", config.provider, config.model);
    eprintln!();

    let outcome = engine.run(&options.objective, Context::new(), &cancel).await;
    // Dropping the engine closes the bus; the printer drains what is left
    drop(engine);
    if let Err(e) = progress.await {
        tracing::debug!(error = %e, "Progress printer stopped abnormally");
    }

    let trace_path = options
        .trace
        .unwrap_or_else(|| default_trace_path(&config.trace_dir(), &outcome.trace));
    save_trace(&outcome.trace, &trace_path).await?;

    println!();
    println!("  Final state: {}", outcome.state);
    if let Some(reason) = &outcome.trace.termination {
        println!("  Reason:      {reason}");
    }
    println!("  Steps:       {}", outcome.trace.steps.len());
    println!("  Trace:       {}", trace_path.display());
    println!();

    if outcome.state != RunState::DeclaredDone {
        return Err(format!("Run ended in state {}", outcome.state).into());
    }
    Ok(())
}

/// Split a `NAME=PATH` document argument.
fn parse_doc_arg(spec: &str) -> Result<(&str, &str), String> {
    match spec.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim(), path.trim()))
        }
        _ => Err(format!("Invalid --doc '{spec}', expected NAME=PATH")),
    }
}

fn spawn_progress(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &DomainEvent) {
    match event {
        DomainEvent::StepRecorded {
            index,
            action,
            success,
            ..
        } => {
            let action = action.as_deref().unwrap_or("(no decision)");
            let mark = if *success { "ok" } else { "failed" };
            eprintln!("  [{index:>3}] {action:<24} {mark}");
        }
        DomainEvent::ActionExecuted {
            action_name,
            duration_ms,
            ..
        } => {
            tracing::debug!(action = %action_name, duration_ms, "Action executed");
        }
        _ => {}
    }
}

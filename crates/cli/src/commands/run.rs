//! `continuum run`: Single-message or interactive turns.

use crate::dispatcher::UnavailableDispatcher;
use continuum_agent::{ContinuationController, OutputEvent, RunOptions, RunOutcome, StatusKind};
use continuum_config::EngineConfig;
use continuum_core::message::{ConversationId, Message};
use continuum_core::store::MessageStore;
use continuum_store::InMemoryStore;
use continuum_tools::{ToolRelevanceFilter, builtin_catalog};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

pub async fn run(
    message: Option<String>,
    system: String,
    model: Option<String>,
    no_stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early; give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONTINUUM_API_KEY=sk-ant-...");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", EngineConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let catalog = builtin_catalog();
    let filter = ToolRelevanceFilter::validated(&catalog, config.tools.strict_essentials)?;
    let provider = Arc::new(continuum_providers::build_from_config(&config));
    let store = InMemoryStore::new();

    let controller = ContinuationController::new(
        provider,
        Arc::new(store.clone()),
        Arc::new(catalog),
        Arc::new(UnavailableDispatcher),
    )
    .with_filter(filter);

    let mut options = RunOptions::from_config(&config);
    if let Some(model) = model {
        options.model = model;
    }
    if no_stream {
        options.stream = false;
    }

    let conversation_id = ConversationId::new();

    if let Some(msg) = message {
        store.append(&conversation_id, Message::user(msg)).await?;
        let outcome = turn(&controller, &conversation_id, &system, options).await?;
        if outcome == RunOutcome::Error {
            return Err("Run failed. See above for details.".into());
        }
        return Ok(());
    }

    println!();
    println!("  Continuum — Interactive Mode");
    println!();
    println!("  Model:     {}", options.model);
    if let Some(fallback) = &options.fallback_model {
        println!("  Fallback:  {fallback}");
    }
    println!(
        "  Limits:    {} continuations, {} tool rounds",
        options.max_auto_continues, options.max_tool_calls
    );
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' to quit; Ctrl+C stops the current turn.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        store.append(&conversation_id, Message::user(line)).await?;
        println!();
        turn(&controller, &conversation_id, &system, options.clone()).await?;
        println!();
    }

    println!();
    Ok(())
}

/// Drive one turn, printing output as it arrives.
async fn turn(
    controller: &ContinuationController,
    conversation_id: &ConversationId,
    system: &str,
    options: RunOptions,
) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let mut handle = controller.run(conversation_id.clone(), system, options);
    let mut outcome = RunOutcome::Done;
    let mut cancelled = false;

    loop {
        let event = tokio::select! {
            event = handle.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                handle.cancel();
                continue;
            }
        };
        let Some(event) = event else { break };

        match &event {
            OutputEvent::Content { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            OutputEvent::Finish { reason, .. } => {
                outcome = *reason;
                println!();
            }
            _ => {}
        }
        if let Some(line) = status_line(&event) {
            eprintln!("{line}");
        }
    }

    Ok(outcome)
}

/// One-line description of a non-content event, for stderr.
fn status_line(event: &OutputEvent) -> Option<String> {
    match event {
        OutputEvent::Content { .. } => None,
        OutputEvent::ToolCall { name, arguments, .. } => Some(format!("  [tool] {name} {arguments}")),
        OutputEvent::Status { kind, message } => {
            let label = match kind {
                StatusKind::Fallback => "fallback",
                StatusKind::Notice => "notice",
                StatusKind::Error => "error",
            };
            Some(format!("  [{label}] {message}"))
        }
        OutputEvent::Finish {
            reason,
            iterations,
            tool_calls,
            model,
            usage,
            error,
        } => {
            let mut line = format!(
                "  [finish] {} after {iterations} call(s), {tool_calls} tool round(s) on {model}; {} tokens",
                outcome_label(*reason),
                usage.total_tokens
            );
            if usage.cache_read_tokens > 0 {
                line.push_str(&format!(" ({} cached)", usage.cache_read_tokens));
            }
            if let Some(error) = error {
                line.push_str(&format!(": {error}"));
            }
            Some(line)
        }
    }
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Done => "done",
        RunOutcome::Error => "error",
        RunOutcome::LimitReached => "limit reached",
        RunOutcome::Cancelled => "cancelled",
    }
}

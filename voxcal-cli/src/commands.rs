//! Subcommand handlers.

use std::path::Path;

use dialoguer::Confirm;
use voxcal_core::backend::{CalendarReader, HttpBackend};
use voxcal_core::config::{VoxcalConfig, load_config, write_default_config};
use voxcal_core::{CalendarEvent, Diff, MutationOutcome};

use crate::{Commands, ConfigAction};

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    backend_url: Option<&str>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Run {
            text,
            audio,
            mic,
            yes,
        } => {
            let config = load(workspace, backend_url)?;
            let listen_from = match (audio, mic) {
                (Some(path), _) => crate::console::ListenFrom::File(path),
                (None, true) => crate::console::ListenFrom::Microphone,
                (None, false) => crate::console::ListenFrom::Nothing,
            };
            crate::console::run(config, text, listen_from, yes).await
        }
        Commands::List => handle_list(&load(workspace, backend_url)?).await,
        Commands::History { limit } => handle_history(&load(workspace, backend_url)?, limit).await,
        Commands::DeleteLast { yes } => {
            handle_last(&load(workspace, backend_url)?, LastAction::Delete, yes).await
        }
        Commands::UndoLast { yes } => {
            handle_last(&load(workspace, backend_url)?, LastAction::Undo, yes).await
        }
    }
}

/// Load configuration and apply command-line overrides.
pub(crate) fn load(workspace: &Path, backend_url: Option<&str>) -> anyhow::Result<VoxcalConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(url) = backend_url {
        config.backend.base_url = url.to_string();
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = voxcal_core::config::workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = write_default_config(workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn handle_list(config: &VoxcalConfig) -> anyhow::Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let token = config.auth.provider().token().await;
    let events = backend.list_events(token.as_deref()).await?;
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    println!("Events ({}):", events.len());
    for event in &events {
        println!("  {}", format_event(event));
    }
    Ok(())
}

async fn handle_history(config: &VoxcalConfig, limit: u32) -> anyhow::Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let token = config.auth.provider().token().await;
    let page = backend.history(limit, token.as_deref()).await?;
    if page.items.is_empty() {
        println!("No history.");
        return Ok(());
    }
    match page.total {
        Some(total) => println!("History ({} of {}):", page.items.len(), total),
        None => println!("History ({}):", page.items.len()),
    }
    for item in &page.items {
        let subject = item
            .after
            .as_ref()
            .or(item.event.as_ref())
            .or(item.before.as_ref())
            .map(|e| e.display_title().to_string())
            .unwrap_or_default();
        println!("  {}  {:<8} {}", item.ts, item.op, subject);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum LastAction {
    Delete,
    Undo,
}

async fn handle_last(config: &VoxcalConfig, action: LastAction, yes: bool) -> anyhow::Result<()> {
    let prompt = match action {
        LastAction::Delete => "Delete the most recently created event?",
        LastAction::Undo => "Revert the most recent change?",
    };
    if !yes && !Confirm::new().with_prompt(prompt).default(false).interact()? {
        println!("Cancelled.");
        return Ok(());
    }

    let backend = HttpBackend::new(&config.backend)?;
    let token = config.auth.provider().token().await;
    let outcome = match action {
        LastAction::Delete => backend.delete_last(token.as_deref()).await?,
        LastAction::Undo => backend.undo_last(token.as_deref()).await?,
    };
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

pub(crate) fn format_event(event: &CalendarEvent) -> String {
    let when = match (&event.start, &event.end) {
        (Some(start), Some(end)) => format!("{start} -> {end}"),
        (Some(start), None) => start.clone(),
        _ => "(no time)".to_string(),
    };
    format!("[{}] {}  {}", event.id, event.display_title(), when)
}

pub(crate) fn describe_outcome(outcome: &MutationOutcome) -> String {
    match &outcome.diff {
        Some(Diff::Create { event }) => format!("Created {}", format_event(event)),
        Some(Diff::Update { event }) => format!("Updated {}", format_event(event)),
        Some(Diff::Delete { id }) => format!("Deleted event {id}"),
        Some(Diff::Noop) => "Nothing changed.".to_string(),
        None => "Done.".to_string(),
    }
}

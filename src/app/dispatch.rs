use super::render::{
    render_autonomy, render_escalations, render_history, render_log, render_outcome,
    render_patterns, render_pending, render_trust,
};
use crate::cli::{AutonomyCommands, Cli, Commands, EscalationCommands};
use crate::config::Config;
use crate::gateway::{GatewayTransport, SidecarBridge, UnconfiguredTransport};
use crate::knowledge::{KnowledgeSearch, NoKnowledge};
use crate::llm::{ChatProvider, OllamaProvider};
use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::security::AutonomyManager;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Everything a command needs, plus the sidecar so it can be shut down.
struct Runtime {
    orchestrator: Orchestrator,
    sidecar: Option<Arc<SidecarBridge>>,
}

impl Runtime {
    async fn shutdown(self) {
        if let Some(sidecar) = self.sidecar {
            sidecar.shutdown().await;
        }
    }
}

async fn build_runtime(config: &Config) -> Result<Runtime> {
    let pool = crate::store::open_pool(&config.db_path()).await?;

    let (transport, knowledge, sidecar): (
        Arc<dyn GatewayTransport>,
        Arc<dyn KnowledgeSearch>,
        Option<Arc<SidecarBridge>>,
    ) = if config.gateway.sidecar_command.is_some() {
        let bridge = Arc::new(SidecarBridge::spawn(&config.gateway)?);
        log_sidecar_events(bridge.subscribe());
        (bridge.clone(), bridge.clone(), Some(bridge))
    } else {
        info!("no gateway sidecar configured; actions will stay pending");
        (Arc::new(UnconfiguredTransport), Arc::new(NoKnowledge), None)
    };

    let provider: Arc<dyn ChatProvider> = Arc::new(OllamaProvider::new(&config.provider));
    let orchestrator = Orchestrator::new(OrchestratorDeps {
        provider,
        knowledge,
        transport,
        autonomy: Arc::new(AutonomyManager::new(config.autonomy.clone())),
        pool,
        boundaries: config.boundaries.clone(),
        config: config.orchestrator.clone(),
    });

    Ok(Runtime {
        orchestrator,
        sidecar,
    })
}

/// Surface unsolicited sidecar notifications in the log until it exits.
fn log_sidecar_events(mut events: broadcast::Receiver<crate::gateway::SidecarEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(event = %event.name, data = %event.data, "sidecar event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sidecar events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub async fn dispatch(cli: Cli, mut config: Config) -> Result<()> {
    let runtime = build_runtime(&config).await?;
    let result = run_command(&runtime.orchestrator, cli.command, &mut config).await;
    runtime.shutdown().await;
    result
}

async fn run_command(
    orchestrator: &Orchestrator,
    command: Commands,
    config: &mut Config,
) -> Result<()> {
    match command {
        Commands::Chat {
            message,
            conversation,
        } => match message {
            Some(message) => {
                let outcome = orchestrator
                    .process_message(&message, conversation.as_deref())
                    .await?;
                println!("{}", render_outcome(&outcome));
                println!("\nconversation: {}", outcome.conversation_id);
                Ok(())
            }
            None => run_interactive(orchestrator, conversation).await,
        },

        Commands::Pending => {
            let pending = orchestrator.get_pending_actions().await?;
            println!("{}", render_pending(&pending));
            Ok(())
        }

        Commands::Approve { id } => {
            orchestrator.recover().await?;
            let outcome = orchestrator.approve_action(&id).await?;
            println!("Executed {} ({})", outcome.action.action, outcome.action.id);
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }

        Commands::Reject { id } => {
            orchestrator.recover().await?;
            let rejected = orchestrator.reject_action(&id).await?;
            println!("Rejected {} ({})", rejected.action, rejected.id);
            Ok(())
        }

        Commands::Undo { id } => {
            let outcome = orchestrator.undo_action(&id).await?;
            println!("Undid {} ({})", outcome.action.action, outcome.action.id);
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }

        Commands::History { conversation } => {
            let turns = orchestrator.get_conversation(&conversation).await?;
            println!("{}", render_history(&turns));
            Ok(())
        }

        Commands::Log { limit, offset } => {
            let entries = orchestrator.action_log(limit, offset).await?;
            println!("{}", render_log(&entries));
            Ok(())
        }

        Commands::Autonomy { autonomy_command } => match autonomy_command {
            AutonomyCommands::Show => {
                println!("{}", render_autonomy(&orchestrator.autonomy_config()));
                Ok(())
            }
            AutonomyCommands::Set { tier, domain } => {
                config.autonomy = orchestrator.set_autonomy_tier(domain.as_deref(), tier);
                config.save()?;
                println!("{}", render_autonomy(&config.autonomy));
                println!("Config: {}", config.config_path.display());
                Ok(())
            }
            AutonomyCommands::Clear { domain } => {
                if !orchestrator.clear_autonomy_tier(&domain) {
                    println!("No override set for {domain}.");
                    return Ok(());
                }
                config.autonomy = orchestrator.autonomy_config();
                config.save()?;
                println!("{}", render_autonomy(&config.autonomy));
                println!("Config: {}", config.config_path.display());
                Ok(())
            }
        },

        Commands::Trust {
            action,
            payload,
            all,
        } => {
            let Some(action) = action.filter(|_| !all) else {
                let patterns = orchestrator.approval_patterns().await?;
                println!("{}", render_patterns(&patterns));
                return Ok(());
            };
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let status = orchestrator.approval_status(&action, &payload).await?;
            println!("{}", render_trust(&status));
            Ok(())
        }

        Commands::Escalations { escalation_command } => match escalation_command {
            EscalationCommands::Check => {
                let offered = orchestrator.check_escalations().await?;
                println!("{}", render_escalations(&offered));
                Ok(())
            }
            EscalationCommands::List => {
                let active = orchestrator.active_escalations().await?;
                println!("{}", render_escalations(&active));
                Ok(())
            }
            EscalationCommands::Accept { id } => {
                let response = orchestrator.respond_to_escalation(&id, true).await?;
                config.autonomy = response.autonomy;
                config.save()?;
                println!("Accepted suggestion for {}", response.prompt.domain);
                println!("{}", render_autonomy(&config.autonomy));
                println!("Config: {}", config.config_path.display());
                Ok(())
            }
            EscalationCommands::Dismiss { id } => {
                let response = orchestrator.respond_to_escalation(&id, false).await?;
                println!("Dismissed suggestion for {}", response.prompt.domain);
                Ok(())
            }
        },
    }
}

async fn run_interactive(orchestrator: &Orchestrator, conversation: Option<String>) -> Result<()> {
    let mut conversation = conversation;
    println!("Semblance is listening. Empty line or Ctrl-D to quit.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        let read = tokio::task::spawn_blocking(move || {
            std::io::stdin().lock().read_line(&mut line).map(|n| (n, line))
        })
        .await??;
        let (bytes, line) = read;
        let text = line.trim();
        if bytes == 0 || text.is_empty() {
            break;
        }

        match orchestrator
            .process_message(text, conversation.as_deref())
            .await
        {
            Ok(outcome) => {
                println!("{}", render_outcome(&outcome));
                conversation = Some(outcome.conversation_id);
            }
            Err(error) => eprintln!("error: {error}"),
        }
    }

    if let Some(id) = conversation {
        println!("conversation: {id}");
    }
    Ok(())
}

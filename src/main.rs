use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use codeact_core::config::CoreConfig;
use codeact_core::ids::{ConversationId, TaskId};
use codeact_engine::{Agent, RuleReflector, TaskOutcome};
use codeact_llm::{LlmClient, LlmConfig};
use codeact_memory::{Memory, MemoryConfig};
use codeact_runtime::{
    serve_sandbox, Dispatcher, RuntimeContext, SandboxClient, SandboxServerConfig, ToolRegistry,
    UiEvent,
};
use codeact_telemetry::TelemetryConfig;
use codeact_workspace::UserWorkspace;

#[derive(Parser)]
#[command(name = "codeact", about = "Execution core for a code-acting agent")]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Persist warn+ logs to this SQLite file.
    #[arg(long)]
    log_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task to completion against a workspace.
    Run {
        /// The root task goal.
        #[arg(long)]
        goal: String,

        /// Current requirement; defaults to the goal.
        #[arg(long)]
        requirement: Option<String>,

        #[arg(long, default_value = "./workspace")]
        workspace: PathBuf,

        #[arg(long, default_value = "./memory")]
        memory_dir: PathBuf,

        #[arg(long, default_value = "0")]
        user_id: String,

        /// Chat completions endpoint (OpenAI-compatible, streaming).
        #[arg(long, default_value = "http://localhost:11434/v1/chat/completions")]
        llm_url: String,

        #[arg(long, default_value = "default")]
        model: String,

        #[arg(long)]
        api_key: Option<String>,

        /// Execute actions through a remote sandbox runtime instead of
        /// locally.
        #[arg(long)]
        sandbox_url: Option<String>,

        /// Resume an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Serve the sandbox runtime HTTP API for remote instances.
    Sandbox {
        #[arg(long, default_value_t = 8330)]
        port: u16,

        #[arg(long, default_value = "./workspace")]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _telemetry = codeact_telemetry::init_telemetry(TelemetryConfig {
        default_filter: cli.log_level.clone(),
        log_db_path: cli.log_db.clone(),
    });

    match cli.command {
        Command::Run {
            goal,
            requirement,
            workspace,
            memory_dir,
            user_id,
            llm_url,
            model,
            api_key,
            sandbox_url,
            conversation,
        } => {
            let conversation = conversation
                .map(ConversationId::from_raw)
                .unwrap_or_default();
            let task = TaskId::new();
            tracing::info!(conversation = %conversation, task = %task, "starting task");

            let ctx = RuntimeContext::new(
                UserWorkspace::new(workspace, &user_id),
                conversation.prefix(),
            );
            let mut dispatcher =
                Dispatcher::new(ToolRegistry::builtin(), ctx, conversation.to_string());
            if let Some(url) = sandbox_url {
                dispatcher = dispatcher.with_sandbox(SandboxClient::new(url, Some(user_id)));
            }

            // Echo runtime activity to the log while the task runs.
            let mut events = dispatcher.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        UiEvent::ActionRunning { description, .. } => {
                            tracing::info!("{description}");
                        }
                        UiEvent::ActionFinished {
                            action_type,
                            success,
                            ..
                        } => {
                            tracing::info!(tool = %action_type, success, "action finished");
                        }
                    }
                }
            });

            let chat = Arc::new(LlmClient::new(LlmConfig {
                endpoint: llm_url,
                model,
                api_key,
                message_delimiter: "\n\n".into(),
            }));

            let cancel = CancellationToken::new();
            let agent = Agent::new(chat, dispatcher, Arc::new(RuleReflector))
                .with_config(CoreConfig::default())
                .with_cancel(cancel.clone());

            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    wait_for_shutdown_signal().await;
                    tracing::info!("shutdown signal received; cancelling task");
                    cancel.cancel();
                }
            });

            let mut memory = match Memory::open(
                &memory_dir,
                &conversation,
                &task,
                MemoryConfig::default(),
            ) {
                Ok(memory) => memory,
                Err(e) => {
                    eprintln!("cannot open memory: {e}");
                    std::process::exit(2);
                }
            };

            let requirement = requirement.unwrap_or_else(|| goal.clone());
            match agent.run_task(&goal, &requirement, &mut memory).await {
                Ok(TaskOutcome::Finished {
                    status, message, ..
                }) => {
                    println!("finished ({status:?}): {message}");
                }
                Ok(TaskOutcome::Failure { comments }) => {
                    eprintln!("failed: {comments}");
                    std::process::exit(1);
                }
                Ok(TaskOutcome::Paused { reason }) => {
                    println!("paused: {reason}");
                }
                Ok(TaskOutcome::PlanRevision { action }) => {
                    println!(
                        "plan revision requested: {}",
                        action.str_param("reason").unwrap_or("(no reason)")
                    );
                }
                Err(e) => {
                    eprintln!("engine error: {e}");
                    std::process::exit(2);
                }
            }
        }

        Command::Sandbox { port, workspace } => {
            let config = SandboxServerConfig {
                port,
                workspace_root: workspace,
                core: CoreConfig::default(),
            };
            if let Err(e) = serve_sandbox(ToolRegistry::builtin(), config).await {
                eprintln!("sandbox server error: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_command() {
        let cli = Cli::parse_from([
            "codeact",
            "run",
            "--goal",
            "build a todo app",
            "--model",
            "qwen3",
        ]);
        match cli.command {
            Command::Run { goal, model, .. } => {
                assert_eq!(goal, "build a todo app");
                assert_eq!(model, "qwen3");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_sandbox_command() {
        let cli = Cli::parse_from(["codeact", "sandbox", "--port", "9000"]);
        match cli.command {
            Command::Sandbox { port, .. } => assert_eq!(port, 9000),
            _ => panic!("expected sandbox command"),
        }
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["codeact", "run", "--goal", "g"]);
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Command::Run {
                workspace,
                sandbox_url,
                ..
            } => {
                assert_eq!(workspace, PathBuf::from("./workspace"));
                assert!(sandbox_url.is_none());
            }
            _ => panic!("expected run command"),
        }
    }
}

//! The dispatcher: prepares actions (origin identity, run ids,
//! conversation-scoped paths), routes them to local handlers or the sandbox
//! runtime, normalizes failures, and emits the UI event pair around every
//! execution.

use codeact_core::action::{Action, ActionResult, ActionType};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::handler::ToolRegistry;
use crate::sandbox::{remote_capable, SandboxClient};

/// Messages for the UI bus: a running placeholder, then the final state.
#[derive(Clone, Debug)]
pub enum UiEvent {
    ActionRunning {
        action_type: String,
        description: String,
    },
    ActionFinished {
        action_type: String,
        success: bool,
        preview: String,
    },
}

pub struct Dispatcher {
    registry: ToolRegistry,
    ctx: RuntimeContext,
    sandbox: Option<SandboxClient>,
    conversation_uuid: String,
    events: broadcast::Sender<UiEvent>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, ctx: RuntimeContext, conversation_uuid: String) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry,
            ctx,
            sandbox: None,
            conversation_uuid,
            events,
        }
    }

    pub fn with_sandbox(mut self, sandbox: SandboxClient) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether results of this tool feed the memorized-content summary.
    pub fn memorized(&self, tool: ActionType) -> bool {
        self.registry.get(tool).is_some_and(|h| h.memorized())
    }

    pub fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        self.registry
            .get(action.action_type)?
            .memory_summary(action, result)
    }

    /// Derive execution identity before dispatch. Idempotent, and called
    /// separately from `execute` so the caller can append the prepared
    /// action to memory first.
    pub fn prepare(&self, action: &Action) -> Action {
        let mut prepared = action.clone();
        match prepared.action_type {
            t if t.is_file_tool() => {
                if prepared.str_param("origin_path").is_none() {
                    if let Some(path) = prepared.str_param("path").map(str::to_owned) {
                        prepared.set_param("origin_path", basename(&path));
                        let rel = self.ctx.conversation_rel();
                        if !path.starts_with(&rel) {
                            prepared.set_param("path", format!("{rel}/{path}"));
                        }
                    }
                }
            }
            ActionType::TerminalRun => {
                if prepared.str_param("run_id").is_none() {
                    prepared.set_param("run_id", random_run_id());
                }
                if prepared.str_param("origin_path").is_none() {
                    let command = prepared.str_param("command").unwrap_or_default().to_owned();
                    let args = prepared.str_param("args").unwrap_or_default().to_owned();
                    let cwd = prepared.str_param("cwd").unwrap_or_default().to_owned();
                    prepared.set_param("origin_cwd", cwd.clone());
                    prepared.set_param(
                        "origin_command",
                        if args.is_empty() {
                            command.clone()
                        } else {
                            format!("{command} {args}")
                        },
                    );
                    prepared.set_param("origin_path", format!("terminal_run:{cwd}::{command}"));
                }
            }
            ActionType::Browser => {
                // The browser drives a model itself; inject the credential
                // triple of the conversation's default model.
                if let Some(llm) = &self.ctx.llm {
                    prepared.set_param("llm_endpoint", llm.endpoint.clone());
                    prepared.set_param("llm_model", llm.model.clone());
                    if let Some(key) = &llm.api_key {
                        prepared.set_param("llm_api_key", key.clone());
                    }
                }
            }
            _ => {}
        }
        prepared
    }

    /// Execute a prepared action and return its normalized result.
    pub async fn execute(&self, action: &Action) -> ActionResult {
        let prepared = self.prepare(action);
        let description = self
            .registry
            .get(prepared.action_type)
            .map(|h| h.describe(&prepared))
            .unwrap_or_else(|| prepared.action_type.as_str().to_owned());

        let _ = self.events.send(UiEvent::ActionRunning {
            action_type: prepared.action_type.as_str().to_owned(),
            description,
        });
        info!(tool = %prepared.action_type, "executing action");

        let mut result = match (&self.sandbox, remote_capable(prepared.action_type)) {
            (Some(sandbox), true) => {
                sandbox
                    .execute_action(&prepared, &self.conversation_uuid)
                    .await
            }
            _ => self.execute_local(&prepared).await,
        };

        if result.content.is_empty() {
            // A failure with nothing to show is worse than a synthesized
            // diagnostic.
            result.content = format!(
                "({} finished with status {:?} and no output)",
                prepared.action_type, result.status
            );
        }
        if result.meta.action_type.is_empty() {
            result.meta.action_type = prepared.action_type.as_str().to_owned();
        }

        let _ = self.events.send(UiEvent::ActionFinished {
            action_type: prepared.action_type.as_str().to_owned(),
            success: result.is_success(),
            preview: result.content.chars().take(200).collect(),
        });
        result
    }

    async fn execute_local(&self, action: &Action) -> ActionResult {
        match self.registry.get(action.action_type) {
            Some(handler) => handler.execute(action, &self.ctx).await,
            None => {
                warn!(tool = %action.action_type, "no handler for action");
                ActionResult::failure(
                    action.action_type,
                    format!(
                        "no runtime backend is configured for {}; choose a different tool",
                        action.action_type
                    ),
                )
            }
        }
    }
}

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_owned()
}

fn random_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

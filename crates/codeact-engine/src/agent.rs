//! The per-task control loop.

use std::sync::Arc;

use codeact_core::action::{Action, ActionResult, ActionType};
use codeact_core::config::CoreConfig;
use codeact_core::message::{MessageMeta, Role};
use codeact_core::sanitize::strip_workspace_paths;
use codeact_llm::{ChatCompletion, ChatOptions};
use codeact_memory::{Memory, MemoryError};
use codeact_parse::{parse_actions, validate};
use codeact_runtime::Dispatcher;
use codeact_workspace::list_files;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::context::{FinishStatus, PromptMode, TaskContext};
use crate::prompt::PromptBuilder;
use crate::reflect::Reflector;
use crate::retry::is_expected_test_failure;

const EMPTY_OUTPUT_CORRECTION: &str = "Your last response was empty. Respond with exactly one \
tool call as an XML block, for example:\n<read_file><path>main.py</path></read_file>";

const PARSE_ERROR_CORRECTION: &str = "Your last response contained no usable tool call. Emit \
exactly one tool call as an XML block with the documented fields, for example:\n\
<write_code><path>main.py</path><content><![CDATA[print(\"hello\")]]></content></write_code>";

const FINISH_CORRECTION: &str = "The finish action needs a <status> of SUCCESS or FAILED and a \
non-empty <message>. Re-emit it correctly.";

/// How many directory levels and entries the prompt's workspace listing
/// shows.
const LISTING_DEPTH: usize = 2;
const LISTING_MAX_ENTRIES: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Terminal outcome of a task run.
#[derive(Debug)]
pub enum TaskOutcome {
    Finished {
        status: FinishStatus,
        message: String,
        /// A FAILED finish carries its reflection into the next task goal.
        reflection: Option<String>,
    },
    Failure {
        comments: String,
    },
    Paused {
        reason: String,
    },
    PlanRevision {
        action: Action,
    },
}

pub struct Agent {
    chat: Arc<dyn ChatCompletion>,
    dispatcher: Dispatcher,
    reflector: Arc<dyn Reflector>,
    config: CoreConfig,
    options: ChatOptions,
    cancel: CancellationToken,
    previous_digest: Option<String>,
    evaluation_prompt: Option<String>,
}

impl Agent {
    pub fn new(
        chat: Arc<dyn ChatCompletion>,
        dispatcher: Dispatcher,
        reflector: Arc<dyn Reflector>,
    ) -> Self {
        Self {
            chat,
            dispatcher,
            reflector,
            config: CoreConfig::default(),
            options: ChatOptions::default(),
            cancel: CancellationToken::new(),
            previous_digest: None,
            evaluation_prompt: None,
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_previous_digest(mut self, digest: impl Into<String>) -> Self {
        self.previous_digest = Some(digest.into());
        self
    }

    pub fn with_evaluation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.evaluation_prompt = Some(prompt.into());
        self
    }

    /// Run the loop until the model finishes, a control action hands the
    /// task back, or a retry cap trips.
    #[instrument(skip_all, fields(goal = %goal))]
    pub async fn run_task(
        &self,
        goal: &str,
        requirement: &str,
        memory: &mut Memory,
    ) -> Result<TaskOutcome, EngineError> {
        let mut ctx = TaskContext::default();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(TaskOutcome::Paused {
                    reason: "cancelled".into(),
                });
            }

            if let Some(outcome) = self.run_iteration(goal, requirement, memory, &mut ctx).await? {
                return Ok(outcome);
            }

            if ctx.retry_count >= self.config.max_retry_times {
                return Ok(TaskOutcome::Failure {
                    comments: format!(
                        "{} consecutive technical failures; giving up",
                        ctx.retry_count
                    ),
                });
            }
            if let Some(cap) = self.config.max_total_retries {
                if ctx.total_retry_attempts >= cap {
                    return Ok(TaskOutcome::Failure {
                        comments: format!("total retry budget of {cap} exhausted"),
                    });
                }
            }
        }
    }

    /// One model turn: prompt → chat → parse → sequence actions → reflect.
    /// `Some(outcome)` ends the task; `None` continues the loop.
    pub async fn run_iteration(
        &self,
        goal: &str,
        requirement: &str,
        memory: &mut Memory,
        ctx: &mut TaskContext,
    ) -> Result<Option<TaskOutcome>, EngineError> {
        self.revalidate_reads(memory, ctx).await?;

        let prompt = self.build_prompt(goal, requirement, memory, ctx);
        if memory.is_empty() {
            memory.add_message(Role::User, &prompt, None, false, MessageMeta::default())?;
        }

        let output = match self
            .chat
            .complete(&prompt, &[], &self.options, None, &self.cancel)
            .await
        {
            Ok(output) => output,
            Err(e) if e.requires_pause() => {
                return Ok(Some(TaskOutcome::Paused {
                    reason: e.to_string(),
                }));
            }
            Err(e) => {
                warn!(error = %e, "chat completion failed");
                ctx.bump_retry();
                memory.add_message(
                    Role::User,
                    &strip_workspace_paths(&format!("The model call failed: {e}. Retrying.")),
                    None,
                    false,
                    MessageMeta::default(),
                )?;
                return Ok(None);
            }
        };

        memory.add_message(Role::Assistant, &output, None, false, MessageMeta::default())?;

        if output.trim().is_empty() {
            memory.remove_last_assistant_message()?;
            memory.add_message(
                Role::Developer,
                EMPTY_OUTPUT_CORRECTION,
                None,
                false,
                MessageMeta::default(),
            )?;
            ctx.bump_retry();
            return Ok(None);
        }

        let actions = parse_actions(&output);
        if actions.is_empty() {
            memory.remove_last_assistant_message()?;
            let correction = match detect_unknown_tool(&output) {
                Some(name) => format!(
                    "Unsupported tool '{name}'. Only the documented tools exist. Emit one of \
them as an XML block, for example:\n<terminal_run><command>ls</command></terminal_run>"
                ),
                None => PARSE_ERROR_CORRECTION.to_owned(),
            };
            memory.add_message(Role::Developer, &correction, None, false, MessageMeta::default())?;
            ctx.bump_retry();
            return Ok(None);
        }

        let multi = actions.len() > 1;
        if multi {
            // The raw multi-action message is replaced by one canonical XML
            // message per action so call/result adjacency holds.
            memory.remove_last_assistant_message()?;
        }

        let mut last_executed: Option<(Action, ActionResult)> = None;

        for action in &actions {
            if self.cancel.is_cancelled() {
                return Ok(Some(TaskOutcome::Paused {
                    reason: "cancelled".into(),
                }));
            }

            match action.action_type {
                ActionType::RevisePlan => {
                    return Ok(Some(TaskOutcome::PlanRevision {
                        action: action.clone(),
                    }));
                }
                ActionType::PauseForUserInput => {
                    return Ok(Some(TaskOutcome::Paused {
                        reason: action
                            .str_param("message")
                            .unwrap_or("user input requested")
                            .to_owned(),
                    }));
                }
                ActionType::PatchComplete => {
                    ctx.prompt_mode = PromptMode::Build;
                    memory.add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())?;
                    break;
                }
                ActionType::Information => {
                    info!(note = action.str_param("message").unwrap_or(""), "information");
                    if multi {
                        self.append_call_message(memory, action)?;
                    }
                    memory.add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())?;
                    continue;
                }
                ActionType::Evaluation => {
                    let comments = action
                        .str_param("comments")
                        .unwrap_or("invalid action")
                        .to_owned();
                    memory.add_message(
                        Role::User,
                        &format!("Action rejected: {comments}"),
                        None,
                        false,
                        MessageMeta::default(),
                    )?;
                    if !multi {
                        ctx.bump_retry();
                    }
                    continue;
                }
                ActionType::Finish => {
                    let status = action.str_param("status").and_then(FinishStatus::parse);
                    if let Some(status) = status {
                        // Observed even when the finish is later rejected.
                        ctx.last_finish_status = Some(status);
                    }
                    let message = action
                        .nonempty_param("message")
                        .unwrap_or_default()
                        .to_owned();
                    match status {
                        Some(FinishStatus::Success) if !message.is_empty() => {
                            ctx.reflection = None;
                            return Ok(Some(TaskOutcome::Finished {
                                status: FinishStatus::Success,
                                message,
                                reflection: None,
                            }));
                        }
                        Some(FinishStatus::Failed) if !message.is_empty() => {
                            return Ok(Some(TaskOutcome::Finished {
                                status: FinishStatus::Failed,
                                message,
                                reflection: ctx.reflection.clone(),
                            }));
                        }
                        _ => {
                            // Soft fail: the model corrects next turn, no
                            // penalty.
                            memory.add_message(
                                Role::User,
                                FINISH_CORRECTION,
                                None,
                                false,
                                MessageMeta::default(),
                            )?;
                            continue;
                        }
                    }
                }
                _ => {
                    if let Err(reason) = validate(action) {
                        memory.add_message(
                            Role::User,
                            &format!("Invalid {}: {reason}", action.action_type),
                            None,
                            false,
                            MessageMeta::default(),
                        )?;
                        if !multi {
                            ctx.bump_retry();
                        }
                        continue;
                    }

                    let prepared = self.dispatcher.prepare(action);
                    if multi {
                        self.append_call_message(memory, &prepared)?;
                    }

                    let result = self.dispatcher.execute(&prepared).await;
                    self.append_result_message(memory, &prepared, &result)?;
                    self.track_paths(ctx, action, &prepared, &result);
                    let failed = !result.is_success();
                    last_executed = Some((prepared, result));
                    if failed {
                        // A failed execution ends the sequence for this
                        // turn; the model sees the failure first.
                        break;
                    }
                }
            }
        }

        if let Some((action, result)) = last_executed {
            self.after_execution(requirement, memory, ctx, &action, &result)
                .await?;
        }

        Ok(None)
    }

    fn append_call_message(&self, memory: &mut Memory, action: &Action) -> Result<(), MemoryError> {
        let meta = MessageMeta {
            action: Some(action.clone()),
            ..MessageMeta::default()
        };
        memory.add_message(
            Role::Assistant,
            &action.to_xml(),
            Some(action.action_type.as_str()),
            false,
            meta,
        )
    }

    fn append_result_message(
        &self,
        memory: &mut Memory,
        action: &Action,
        result: &ActionResult,
    ) -> Result<(), MemoryError> {
        let mut content = result.content.clone();
        if let Some(comments) = result.comments.as_deref().filter(|c| !c.is_empty()) {
            content.push('\n');
            content.push_str(comments);
        }

        let meta = MessageMeta {
            run_id: result.meta.run_id.clone(),
            exit_code: result.meta.exit_code,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            filepath: result.meta.filepath.clone(),
            origin_cwd: result.meta.origin_cwd.clone(),
            origin_command: result.meta.origin_command.clone(),
            origin_path: action.str_param("origin_path").map(str::to_owned),
            action_memory: self.dispatcher.memory_summary(action, result),
            ..MessageMeta::default()
        };
        let memorized = self.dispatcher.memorized(action.action_type);
        memory.add_message(
            Role::User,
            &content,
            Some(action.action_type.as_str()),
            memorized,
            meta,
        )
    }

    fn track_paths(
        &self,
        ctx: &mut TaskContext,
        original: &Action,
        prepared: &Action,
        result: &ActionResult,
    ) {
        let path = original
            .str_param("path")
            .or_else(|| prepared.str_param("origin_path"))
            .unwrap_or_default()
            .to_owned();
        if path.is_empty() {
            return;
        }

        match prepared.action_type {
            ActionType::ReadFile if !result.is_success() => {
                if let Some(class) = result.error.as_deref() {
                    if class == "NOT_FOUND" || class == "INACCESSIBLE" {
                        ctx.read_failures.insert(path, class.to_owned());
                    }
                }
            }
            ActionType::WriteCode
            | ActionType::WriteFile
            | ActionType::PatchCode
            | ActionType::ReplaceCodeBlock
                if result.is_success() =>
            {
                ctx.written_paths.insert(path);
            }
            _ => {}
        }
    }

    async fn after_execution(
        &self,
        requirement: &str,
        memory: &mut Memory,
        ctx: &mut TaskContext,
        action: &Action,
        result: &ActionResult,
    ) -> Result<(), EngineError> {
        let reflection = self.reflector.evaluate(requirement, result).await;

        if action.action_type == ActionType::TerminalRun {
            if result.is_success() {
                ctx.prompt_mode = PromptMode::Build;
                ctx.last_terminal_failure = None;
            } else {
                ctx.prompt_mode = PromptMode::CodeCorrector;
                ctx.last_terminal_failure = Some(result.content.clone());
            }
        }

        if result.is_success() {
            ctx.clear_retries();
            if reflection.comments.is_empty() {
                ctx.reflection = None;
                return Ok(());
            }
            // The evaluator can flag an inadequate success; feed it back
            // without a penalty.
            ctx.reflection = Some(reflection.comments.clone());
            memory.add_message(Role::User, &reflection.comments, None, false, MessageMeta::default())?;
            return Ok(());
        }

        let command_line = format!(
            "{} {}",
            action.str_param("command").unwrap_or_default(),
            action.str_param("args").unwrap_or_default()
        );
        let combined_output = format!(
            "{}\n{}\n{}",
            result.content,
            result.stdout.as_deref().unwrap_or_default(),
            result.stderr.as_deref().unwrap_or_default()
        );

        let expected_test = action.action_type == ActionType::TerminalRun
            && is_expected_test_failure(&command_line, result.meta.exit_code, &combined_output);
        let plain_exit_one = action.action_type == ActionType::TerminalRun
            && result.meta.exit_code == Some(1)
            && result.meta.timed_out != Some(true);

        if !(expected_test || plain_exit_one) {
            ctx.bump_retry();
        }

        let mut feedback = reflection.comments;
        if let Some(run_id) = result.meta.run_id.as_deref() {
            let marker = format!("[terminal_run_id:{run_id}]");
            if !feedback.contains(&marker) {
                feedback.push_str(&format!("\n{marker}"));
            }
        }
        ctx.reflection = Some(feedback.clone());
        let meta = MessageMeta {
            run_id: result.meta.run_id.clone(),
            ..MessageMeta::default()
        };
        memory.add_message(Role::User, &feedback, None, false, meta)?;
        Ok(())
    }

    /// If a path that failed to read was later written successfully, try
    /// the read again and drop stale feedback once it recovers.
    async fn revalidate_reads(
        &self,
        memory: &mut Memory,
        ctx: &mut TaskContext,
    ) -> Result<(), EngineError> {
        let candidates: Vec<String> = ctx
            .read_failures
            .keys()
            .filter(|path| ctx.written_paths.contains(*path))
            .cloned()
            .collect();

        for path in candidates {
            let probe = Action::new(ActionType::ReadFile).with_param("path", path.clone());
            let result = self.dispatcher.execute(&probe).await;
            if result.is_success() {
                info!(%path, "transient read failure recovered");
                ctx.read_failures.remove(&path);
                if ctx.reflection.as_deref().is_some_and(|r| r.contains(&path)) {
                    ctx.reflection = None;
                }
                memory.add_message(
                    Role::User,
                    &format!("Note: {path} is now readable."),
                    None,
                    false,
                    MessageMeta::default(),
                )?;
            }
        }
        Ok(())
    }

    fn build_prompt(
        &self,
        goal: &str,
        requirement: &str,
        memory: &Memory,
        ctx: &TaskContext,
    ) -> String {
        let catalog = self.dispatcher.registry().catalog();
        let files = list_files(
            &self.dispatcher.context().conversation_dir(),
            LISTING_DEPTH,
            LISTING_MAX_ENTRIES,
        );
        let memorized = memory.memorized_content();

        PromptBuilder {
            mode: ctx.prompt_mode,
            tool_catalog: &catalog,
            workspace_files: &files,
            memorized: &memorized,
            previous_digest: self.previous_digest.as_deref(),
            goal,
            requirement,
            reflection: ctx.reflection.as_deref(),
            last_finish_status: ctx.last_finish_status,
            evaluation_prompt: self.evaluation_prompt.as_deref(),
        }
        .build()
    }
}

/// Find an XML-looking opener whose tag is not a recognized tool; used to
/// issue the stricter unsupported-tool correction.
fn detect_unknown_tool(output: &str) -> Option<String> {
    let mut pos = 0;
    while let Some(rel) = output[pos..].find('<') {
        let lt = pos + rel;
        let after = &output[lt + 1..];
        let name: String = after
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || *c == '_')
            .collect();
        if name.len() >= 2
            && after[name.len()..].starts_with('>')
            && name != "think"
            && ActionType::from_name(&name).is_none()
            && output.contains(&format!("</{name}>"))
        {
            return Some(name);
        }
        pos = lt + 1;
    }
    None
}

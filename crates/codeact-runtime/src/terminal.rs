//! `terminal_run`: shell execution inside the conversation directory with
//! a hard wall-clock limit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use codeact_core::action::{Action, ActionResult, ActionStatus, ActionType};
use codeact_core::truncate::clip;
use tracing::warn;

use crate::context::RuntimeContext;
use crate::handler::ToolHandler;

pub struct TerminalRunTool;

#[async_trait]
impl ToolHandler for TerminalRunTool {
    fn tool(&self) -> ActionType {
        ActionType::TerminalRun
    }

    fn description(&self) -> &'static str {
        "Run a shell <command> (with optional <args> and <cwd>) in the workspace"
    }

    fn describe(&self, action: &Action) -> String {
        format!(
            "Running `{} {}`",
            action.str_param("command").unwrap_or_default(),
            action.str_param("args").unwrap_or_default()
        )
    }

    fn memorized(&self) -> bool {
        true
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        run_terminal(action, ctx).await
    }

    fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        let command = action.str_param("command").unwrap_or_default();
        let args = action.str_param("args").unwrap_or_default();
        let exit = result.meta.exit_code.unwrap_or(-1);
        Some(format!(
            "<terminal_run command=\"{command} {args}\">exit {exit}</terminal_run>"
        ))
    }
}

pub async fn run_terminal(action: &Action, ctx: &RuntimeContext) -> ActionResult {
    let command = action.str_param("command").unwrap_or_default().to_owned();
    let args = action.str_param("args").unwrap_or_default().to_owned();
    let cwd = action.str_param("cwd").unwrap_or_default().to_owned();
    let run_id = action.str_param("run_id").unwrap_or_default().to_owned();

    let conversation_rel = ctx.conversation_rel();
    let cwd_rel = if cwd.is_empty() {
        conversation_rel.clone()
    } else if cwd.starts_with(&conversation_rel) {
        cwd.clone()
    } else {
        format!("{conversation_rel}/{cwd}")
    };
    let resolved_cwd = match ctx.resolve(&cwd_rel) {
        Ok(p) => p,
        Err(e) => return failure_shape(action, &run_id, e.to_string()),
    };
    if let Err(e) = tokio::fs::create_dir_all(&resolved_cwd).await {
        return failure_shape(action, &run_id, format!("cannot create cwd: {e}"));
    }

    let full = if args.is_empty() {
        command.clone()
    } else {
        format!("{command} {args}")
    };

    let timeout = Duration::from_millis(ctx.config.terminal_run_timeout_ms);
    let start = Instant::now();

    let mut builder = tokio::process::Command::new("bash");
    builder
        .arg("-c")
        .arg(&full)
        .current_dir(&resolved_cwd)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    // Dropping the output future on timeout SIGKILLs the child. Grandchildren
    // may survive; accepted limitation.
    let outcome = tokio::time::timeout(timeout, builder.output()).await;
    let duration = start.elapsed();

    let mut result = match outcome {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let exit_code = i64::from(output.status.code().unwrap_or(-1));
            let signal = exit_signal(&output.status);
            let success = output.status.success();

            let mut result = if success {
                ActionResult::success(ActionType::TerminalRun, String::new())
            } else {
                ActionResult::failure(ActionType::TerminalRun, String::new())
            };
            result.content = if stdout.is_empty() {
                "(no output)".to_owned()
            } else {
                clip(&stdout, ctx.config.max_content_length)
            };
            result.stdout = Some(clip(&stdout, ctx.config.max_content_length));
            result.stderr = Some(clip(&stderr, ctx.config.max_content_length));
            result.meta.exit_code = Some(exit_code);
            result.meta.signal = signal;
            result
        }
        Ok(Err(e)) => {
            let mut result = ActionResult::failure(
                ActionType::TerminalRun,
                format!("failed to spawn `{full}`: {e}"),
            );
            result.meta.exit_code = Some(1);
            result
        }
        Err(_) => {
            warn!(command = %full, timeout_ms = ctx.config.terminal_run_timeout_ms, "terminal_run timed out");
            let message = format!(
                "Command timed out after {}ms and was killed",
                ctx.config.terminal_run_timeout_ms
            );
            let mut result = ActionResult::failure(ActionType::TerminalRun, message.clone());
            result.stderr = Some(message);
            result.meta.timed_out = Some(true);
            result.meta.exit_code = Some(1);
            result.meta.signal = Some("SIGKILL".to_owned());
            result
        }
    };

    // Normalize the shape shared by local and sandbox execution.
    if result.meta.exit_code.is_none() {
        result.meta.exit_code = Some(if result.is_success() { 0 } else { 1 });
    }
    result.meta.duration_ms = Some(duration.as_millis() as u64);
    result.meta.resolved_cwd = Some(resolved_cwd.to_string_lossy().into_owned());
    result.meta.command = Some(command);
    result.meta.args = Some(args);
    result.meta.cwd = Some(cwd);
    if !run_id.is_empty() {
        result.meta.run_id = Some(run_id.clone());
        // The marker rides in both content and meta so a purge can match
        // either.
        result.content = format!("{}\n[terminal_run_id:{run_id}]", result.content);
    }
    result
}

fn failure_shape(action: &Action, run_id: &str, message: String) -> ActionResult {
    let mut result = ActionResult::failure(ActionType::TerminalRun, message);
    result.meta.exit_code = Some(1);
    result.meta.command = action.str_param("command").map(str::to_owned);
    result.meta.args = action.str_param("args").map(str::to_owned);
    result.meta.cwd = action.str_param("cwd").map(str::to_owned);
    if !run_id.is_empty() {
        result.meta.run_id = Some(run_id.to_owned());
    }
    result
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|s| format!("signal {s}"))
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::config::CoreConfig;
    use codeact_workspace::UserWorkspace;

    fn ctx() -> (RuntimeContext, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!("codeact_term_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        let ctx = RuntimeContext::new(UserWorkspace::new(&root, "1"), "conv1234");
        (ctx, root)
    }

    fn action(command: &str, args: &str) -> Action {
        let mut a = Action::new(ActionType::TerminalRun).with_param("command", command);
        if !args.is_empty() {
            a.set_param("args", args);
        }
        a
    }

    #[tokio::test]
    async fn echo_succeeds_with_zero_exit() {
        let (ctx, root) = ctx();
        let result = run_terminal(&action("echo", "hello"), &ctx).await;
        assert_eq!(result.status, ActionStatus::Success);
        assert!(result.content.contains("hello"));
        assert_eq!(result.meta.exit_code, Some(0));
        assert!(result.meta.duration_ms.is_some());
        assert!(result
            .meta
            .resolved_cwd
            .as_deref()
            .unwrap()
            .contains("Conversation_conv1234"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let (ctx, root) = ctx();
        let result = run_terminal(&action("false", ""), &ctx).await;
        assert_eq!(result.status, ActionStatus::Failure);
        assert_eq!(result.meta.exit_code, Some(1));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn no_output_is_synthesized() {
        let (ctx, root) = ctx();
        let result = run_terminal(&action("true", ""), &ctx).await;
        assert!(result.content.contains("(no output)"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn stderr_captured_separately() {
        let (ctx, root) = ctx();
        let result = run_terminal(&action("sh", "-c 'echo oops >&2'"), &ctx).await;
        assert!(result.stderr.as_deref().unwrap().contains("oops"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn timeout_kills_and_marks() {
        let (mut ctx, root) = ctx();
        ctx.config = CoreConfig {
            terminal_run_timeout_ms: 200,
            ..CoreConfig::default()
        };
        let start = Instant::now();
        let result = run_terminal(&action("sleep", "10"), &ctx).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result.status, ActionStatus::Failure);
        assert_eq!(result.meta.timed_out, Some(true));
        assert!(result.stderr.as_deref().unwrap().contains("timed out"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn run_marker_written_to_content_and_meta() {
        let (ctx, root) = ctx();
        let mut a = action("echo", "x");
        a.set_param("run_id", "deadbeef0123");
        let result = run_terminal(&a, &ctx).await;
        assert_eq!(result.meta.run_id.as_deref(), Some("deadbeef0123"));
        assert!(result.content.contains("[terminal_run_id:deadbeef0123]"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn cwd_resolved_under_conversation() {
        let (ctx, root) = ctx();
        let mut a = action("pwd", "");
        a.set_param("cwd", "sub");
        let result = run_terminal(&a, &ctx).await;
        assert!(result.is_success(), "{}", result.content);
        assert!(result.content.contains("Conversation_conv1234/sub"));
        std::fs::remove_dir_all(&root).ok();
    }
}

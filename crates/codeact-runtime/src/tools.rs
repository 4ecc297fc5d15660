//! File and web tool handlers.

use async_trait::async_trait;
use codeact_core::action::{Action, ActionResult, ActionType};
use codeact_core::truncate::clip;
use codeact_workspace::diff::{apply_unified_diff, generate_unified_diff};
use codeact_workspace::guardrail::check_python_interactive;
use codeact_workspace::replace::replace_code_block;

use crate::context::RuntimeContext;
use crate::handler::ToolHandler;

fn display_path(action: &Action) -> String {
    action
        .str_param("origin_path")
        .or_else(|| action.str_param("path"))
        .unwrap_or("<unknown>")
        .to_owned()
}

/// Guardrail applied before any Python source reaches disk.
fn guard_python(path: &str, content: &str) -> Result<(), String> {
    if !path.ends_with(".py") {
        return Ok(());
    }
    check_python_interactive(content).map_err(|v| {
        format!(
            "refusing to write {path}: {v}. Scripts run unattended; read parameters from \
argv or files instead of interactive input."
        )
    })
}

// ── write_code / write_file ─────────────────────────────────────────────

pub struct WriteCodeTool {
    tool: ActionType,
    guarded: bool,
}

impl WriteCodeTool {
    pub fn write_code() -> Self {
        Self {
            tool: ActionType::WriteCode,
            guarded: true,
        }
    }

    pub fn write_file() -> Self {
        Self {
            tool: ActionType::WriteFile,
            guarded: false,
        }
    }
}

#[async_trait]
impl ToolHandler for WriteCodeTool {
    fn tool(&self) -> ActionType {
        self.tool
    }

    fn description(&self) -> &'static str {
        "Write a file at <path> with the full <content>"
    }

    fn describe(&self, action: &Action) -> String {
        format!("Writing {}", display_path(action))
    }

    fn memorized(&self) -> bool {
        true
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        let path = action.str_param("path").unwrap_or_default();
        let content = action.str_param("content").unwrap_or_default();

        if self.guarded {
            if let Err(reason) = guard_python(&display_path(action), content) {
                return ActionResult::failure(self.tool, reason);
            }
        }

        let resolved = match ctx.resolve(path) {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(self.tool, e.to_string()),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ActionResult::failure(self.tool, format!("cannot create {path}: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => {
                let mut result = ActionResult::success(
                    self.tool,
                    format!("Wrote {} bytes to {}", content.len(), display_path(action)),
                );
                result.meta.filepath = Some(display_path(action));
                result
            }
            Err(e) => ActionResult::failure(self.tool, format!("cannot write {path}: {e}")),
        }
    }

    fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        let status = if result.is_success() { "ok" } else { "failed" };
        Some(format!(
            "<{} path=\"{}\">{status}</{}>",
            self.tool,
            display_path(action),
            self.tool
        ))
    }
}

// ── read_file ───────────────────────────────────────────────────────────

pub struct ReadFileTool;

/// Classify a read error the way callers track transient failures.
pub fn classify_read_error(error: &std::io::Error) -> String {
    match error.kind() {
        std::io::ErrorKind::NotFound => "NOT_FOUND".to_owned(),
        std::io::ErrorKind::PermissionDenied => "INACCESSIBLE".to_owned(),
        other => format!("{other:?}"),
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn tool(&self) -> ActionType {
        ActionType::ReadFile
    }

    fn description(&self) -> &'static str {
        "Read the file at <path> and return its content"
    }

    fn describe(&self, action: &Action) -> String {
        format!("Reading {}", display_path(action))
    }

    fn memorized(&self) -> bool {
        true
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        let path = action.str_param("path").unwrap_or_default();
        let resolved = match ctx.resolve(path) {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(self.tool(), e.to_string()),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => {
                let mut result = ActionResult::success(
                    self.tool(),
                    clip(&content, ctx.config.max_content_length),
                );
                result.meta.filepath = Some(display_path(action));
                result
            }
            Err(e) => {
                let class = classify_read_error(&e);
                let mut result = ActionResult::failure(
                    self.tool(),
                    format!("Cannot read {}: {class}", display_path(action)),
                );
                result.error = Some(class);
                result.meta.filepath = Some(display_path(action));
                result
            }
        }
    }
}

// ── patch_code ──────────────────────────────────────────────────────────

pub struct PatchCodeTool;

#[async_trait]
impl ToolHandler for PatchCodeTool {
    fn tool(&self) -> ActionType {
        ActionType::PatchCode
    }

    fn description(&self) -> &'static str {
        "Apply a unified <diff> to the file at <path>"
    }

    fn describe(&self, action: &Action) -> String {
        format!("Patching {}", display_path(action))
    }

    fn memorized(&self) -> bool {
        true
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        let path = action.str_param("path").unwrap_or_default();
        let diff = action.str_param("diff").unwrap_or_default();

        let resolved = match ctx.resolve(path) {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(self.tool(), e.to_string()),
        };
        let current = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => {
                return ActionResult::failure(
                    self.tool(),
                    format!("Cannot read {}: {}", display_path(action), classify_read_error(&e)),
                )
            }
        };

        let patched = match apply_unified_diff(&current, diff) {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(self.tool(), e.to_string()),
        };
        if let Err(reason) = guard_python(&display_path(action), &patched) {
            return ActionResult::failure(self.tool(), reason);
        }
        if let Err(e) = tokio::fs::write(&resolved, &patched).await {
            return ActionResult::failure(self.tool(), format!("cannot write {path}: {e}"));
        }

        let mut result = ActionResult::success(
            self.tool(),
            format!("Patched {}", display_path(action)),
        );
        result.meta.filepath = Some(display_path(action));
        result
    }

    fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        let status = if result.is_success() { "ok" } else { "failed" };
        Some(format!(
            "<patch_code path=\"{}\">{status}</patch_code>",
            display_path(action)
        ))
    }
}

// ── replace_code_block ──────────────────────────────────────────────────

pub struct ReplaceCodeBlockTool;

#[async_trait]
impl ToolHandler for ReplaceCodeBlockTool {
    fn tool(&self) -> ActionType {
        ActionType::ReplaceCodeBlock
    }

    fn description(&self) -> &'static str {
        "Replace the code region anchored by <code_block> in the file at <path>"
    }

    fn describe(&self, action: &Action) -> String {
        format!("Editing {}", display_path(action))
    }

    fn memorized(&self) -> bool {
        true
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        let path = action.str_param("path").unwrap_or_default();
        let block = action.str_param("code_block").unwrap_or_default();

        let resolved = match ctx.resolve(path) {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(self.tool(), e.to_string()),
        };
        let current = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => {
                return ActionResult::failure(
                    self.tool(),
                    format!("Cannot read {}: {}", display_path(action), classify_read_error(&e)),
                )
            }
        };

        let replacement = match replace_code_block(&current, block) {
            Ok(r) => r,
            Err(e) => {
                let mut result = ActionResult::failure(
                    self.tool(),
                    format!(
                        "{e}.\nCurrent content of {}:\n{}",
                        display_path(action),
                        clip(&current, ctx.config.max_content_length)
                    ),
                );
                result.meta.keyid = Some(e.keyid().to_owned());
                result.meta.filepath = Some(display_path(action));
                return result;
            }
        };

        if let Err(reason) = guard_python(&display_path(action), &replacement.content) {
            return ActionResult::failure(self.tool(), reason);
        }
        if let Err(e) = tokio::fs::write(&resolved, &replacement.content).await {
            return ActionResult::failure(self.tool(), format!("cannot write {path}: {e}"));
        }

        let echo = generate_unified_diff(&current, &replacement.content, 2);
        let mut result = ActionResult::success(
            self.tool(),
            format!(
                "Replaced lines {}-{} in {}\n{}",
                replacement.start_line + 1,
                replacement.end_line + 1,
                display_path(action),
                clip(&echo, 4000)
            ),
        );
        result.meta.filepath = Some(display_path(action));
        result
    }

    fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        let status = if result.is_success() { "ok" } else { "failed" };
        Some(format!(
            "<replace_code_block path=\"{}\">{status}</replace_code_block>",
            display_path(action)
        ))
    }
}

// ── read_url ────────────────────────────────────────────────────────────

pub struct ReadUrlTool;

#[async_trait]
impl ToolHandler for ReadUrlTool {
    fn tool(&self) -> ActionType {
        ActionType::ReadUrl
    }

    fn description(&self) -> &'static str {
        "Fetch <url> over HTTP(S) and return the response body"
    }

    fn describe(&self, action: &Action) -> String {
        format!("Fetching {}", action.str_param("url").unwrap_or("<url>"))
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult {
        let url = action.str_param("url").unwrap_or_default();
        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
        {
            Ok(c) => c,
            Err(e) => return ActionResult::failure(self.tool(), format!("http client: {e}")),
        };

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(body) if status.is_success() => ActionResult::success(
                        self.tool(),
                        clip(&body, ctx.config.max_content_length),
                    ),
                    Ok(body) => ActionResult::failure(
                        self.tool(),
                        format!("GET {url} returned {status}: {}", clip(&body, 2000)),
                    ),
                    Err(e) => ActionResult::failure(
                        self.tool(),
                        format!("GET {url} body read failed: {e}"),
                    ),
                }
            }
            Err(e) => ActionResult::failure(self.tool(), format!("GET {url} failed: {e}")),
        }
    }
}

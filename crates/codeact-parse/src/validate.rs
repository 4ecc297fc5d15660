//! Structural and per-tool argument validation.

use codeact_core::action::{Action, ActionType};
use serde_json::Value;

/// Validate a resolved action. `Err` carries the reason shown to the model.
pub fn validate(action: &Action) -> Result<(), String> {
    structural(action)?;
    arguments(action)
}

/// Hard structural rejects: field combinations that indicate the model
/// confused one tool with another.
fn structural(action: &Action) -> Result<(), String> {
    match action.action_type {
        ActionType::TerminalRun => {
            if action.params.contains_key("path") || action.params.contains_key("content") {
                return Err(
                    "terminal_run must not carry path/content fields; use write_code to create files"
                        .into(),
                );
            }
        }
        ActionType::WriteCode | ActionType::WriteFile => {
            if action.params.contains_key("command") {
                return Err(format!(
                    "{} must not carry a command field; use terminal_run to run commands",
                    action.action_type
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

fn arguments(action: &Action) -> Result<(), String> {
    match action.action_type {
        ActionType::WebSearch => {
            require_nonempty(action, "query")?;
            if let Some(n) = action.params.get("num_results") {
                let ok = n.as_u64().is_some_and(|v| v > 0);
                if !ok {
                    return Err("web_search num_results must be a positive integer".into());
                }
            }
            Ok(())
        }
        ActionType::ReadUrl => {
            let url = require_nonempty(action, "url")?;
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err("read_url url must start with http:// or https://".into())
            }
        }
        ActionType::TerminalRun => {
            require_nonempty(action, "command")?;
            for key in ["args", "cwd"] {
                if let Some(v) = action.params.get(key) {
                    if !v.is_string() {
                        return Err(format!("terminal_run {key} must be a string"));
                    }
                }
            }
            Ok(())
        }
        ActionType::WriteCode | ActionType::WriteFile => {
            require_nonempty(action, "path")?;
            if let Some(v) = action.params.get("content") {
                if !v.is_string() {
                    return Err(format!("{} content must be a string", action.action_type));
                }
            }
            Ok(())
        }
        ActionType::ReadFile => {
            require_nonempty(action, "path")?;
            Ok(())
        }
        ActionType::PatchCode => {
            require_nonempty(action, "path")?;
            require_nonempty(action, "diff")?;
            Ok(())
        }
        ActionType::ReplaceCodeBlock => {
            require_nonempty(action, "path")?;
            require_nonempty(action, "code_block")?;
            Ok(())
        }
        ActionType::McpTool => {
            require_nonempty(action, "name")?;
            if let Some(v) = action.params.get("arguments") {
                if !v.is_object() {
                    return Err("mcp_tool arguments must be a JSON object".into());
                }
            }
            Ok(())
        }
        ActionType::Finish => {
            require_nonempty(action, "message")?;
            match action.str_param("status") {
                Some(s) if s.eq_ignore_ascii_case("SUCCESS") || s.eq_ignore_ascii_case("FAILED") => {
                    Ok(())
                }
                Some(other) => Err(format!(
                    "finish status must be SUCCESS or FAILED, got '{other}'"
                )),
                None => Err("finish requires a status of SUCCESS or FAILED".into()),
            }
        }
        ActionType::Browser => {
            require_nonempty(action, "question")?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn require_nonempty<'a>(action: &'a Action, key: &str) -> Result<&'a str, String> {
    match action.params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => Err(format!(
            "{} requires a non-empty {key}",
            action.action_type
        )),
    }
}

/// Build the synthetic action that carries a validation failure back to the
/// model as an evaluation result.
pub fn evaluation_failure(reason: &str) -> Action {
    Action::new(ActionType::Evaluation)
        .with_param("status", "failure")
        .with_param("comments", reason)
}

//! Logical action-type detection and stable-key derivation.
//!
//! The stable key is the normalized identity of a tool call: the basename
//! of the target path for file tools, the `(command, args, cwd)` tuple for
//! `terminal_run`. Hashing `toolName || stableKey` groups every snapshot of
//! the same call for occurrence pruning.

use codeact_core::action::{Action, ActionType};
use codeact_core::message::MessageMeta;
use codeact_parse::{extract_blocks, resolve_block, strip_think};

/// Determine a message's logical action type: the explicit override wins,
/// then the attached action, then an XML opener at the start of content.
pub fn detect_action_type(content: &str, meta: &MessageMeta, explicit: Option<&str>) -> String {
    if let Some(t) = explicit {
        if !t.is_empty() {
            return t.to_owned();
        }
    }
    if let Some(action) = &meta.action {
        return action.action_type.as_str().to_owned();
    }

    let visible = strip_think(content);
    let trimmed = visible.trim_start();
    if let Some(rest) = trimmed.strip_prefix('<') {
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || *c == '_')
            .collect();
        if rest[name.len()..].starts_with('>') && ActionType::from_name(&name).is_some() {
            return name;
        }
    }
    String::new()
}

/// Derive the stable key for a pruned tool call, or `None` when no target
/// can be determined.
pub fn stable_key(tool: ActionType, meta: &MessageMeta, content: &str) -> Option<String> {
    match tool {
        ActionType::TerminalRun => {
            let action = meta
                .action
                .clone()
                .or_else(|| action_from_content(content))?;
            let command = action.str_param("command").unwrap_or_default();
            let args = action.str_param("args").unwrap_or_default();
            let cwd = action.str_param("cwd").unwrap_or_default();
            Some(format!("{command} {args}||{cwd}"))
        }
        t if t.is_file_tool() => {
            let from_action = meta.action.as_ref().and_then(|a| {
                a.str_param("origin_path")
                    .or_else(|| a.str_param("path"))
                    .map(str::to_owned)
            });
            let path = from_action
                .or_else(|| {
                    action_from_content(content)
                        .and_then(|a| a.str_param("path").map(str::to_owned))
                })
                .or_else(|| meta.filepath.clone())?;
            Some(basename(&path))
        }
        _ => None,
    }
}

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_owned()
}

fn action_from_content(content: &str) -> Option<Action> {
    let visible = strip_think(content);
    let blocks = extract_blocks(&visible);
    let block = blocks.first()?;
    resolve_block(block).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_type_wins() {
        let meta = MessageMeta::default();
        assert_eq!(
            detect_action_type("<read_file><path>a</path></read_file>", &meta, Some("write_code")),
            "write_code"
        );
    }

    #[test]
    fn attached_action_type_used() {
        let meta = MessageMeta {
            action: Some(Action::new(ActionType::TerminalRun)),
            ..MessageMeta::default()
        };
        assert_eq!(detect_action_type("anything", &meta, None), "terminal_run");
    }

    #[test]
    fn opener_detected_after_think() {
        let content = "<think>planning</think>\n<write_code><path>a.py</path></write_code>";
        assert_eq!(
            detect_action_type(content, &MessageMeta::default(), None),
            "write_code"
        );
    }

    #[test]
    fn unknown_opener_yields_empty() {
        assert_eq!(
            detect_action_type("<p>hello</p>", &MessageMeta::default(), None),
            ""
        );
        assert_eq!(detect_action_type("plain", &MessageMeta::default(), None), "");
    }

    #[test]
    fn file_tool_key_is_basename() {
        let meta = MessageMeta {
            action: Some(
                Action::new(ActionType::WriteCode).with_param("path", "src/deep/a.py"),
            ),
            ..MessageMeta::default()
        };
        assert_eq!(
            stable_key(ActionType::WriteCode, &meta, "").as_deref(),
            Some("a.py")
        );
    }

    #[test]
    fn origin_path_preferred_over_path() {
        let meta = MessageMeta {
            action: Some(
                Action::new(ActionType::WriteCode)
                    .with_param("path", "Conversation_x/a.py")
                    .with_param("origin_path", "a.py"),
            ),
            ..MessageMeta::default()
        };
        assert_eq!(
            stable_key(ActionType::WriteCode, &meta, "").as_deref(),
            Some("a.py")
        );
    }

    #[test]
    fn file_key_falls_back_to_content_xml() {
        let content = "<read_file><path>lib/util.py</path></read_file>";
        assert_eq!(
            stable_key(ActionType::ReadFile, &MessageMeta::default(), content).as_deref(),
            Some("util.py")
        );
    }

    #[test]
    fn file_key_falls_back_to_meta_filepath() {
        let meta = MessageMeta {
            filepath: Some("x/y/z.txt".into()),
            ..MessageMeta::default()
        };
        assert_eq!(
            stable_key(ActionType::ReadFile, &meta, "no xml").as_deref(),
            Some("z.txt")
        );
    }

    #[test]
    fn terminal_key_includes_command_args_cwd() {
        let meta = MessageMeta {
            action: Some(
                Action::new(ActionType::TerminalRun)
                    .with_param("command", "pytest")
                    .with_param("args", "-q")
                    .with_param("cwd", "proj"),
            ),
            ..MessageMeta::default()
        };
        assert_eq!(
            stable_key(ActionType::TerminalRun, &meta, "").as_deref(),
            Some("pytest -q||proj")
        );
    }

    #[test]
    fn terminal_key_from_content() {
        let content = "<terminal_run><command>ls</command></terminal_run>";
        assert_eq!(
            stable_key(ActionType::TerminalRun, &MessageMeta::default(), content).as_deref(),
            Some("ls ||")
        );
    }

    #[test]
    fn no_target_no_key() {
        assert!(stable_key(ActionType::ReadFile, &MessageMeta::default(), "prose").is_none());
    }
}

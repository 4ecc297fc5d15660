//! Per-block resolution: stream-parse a tool block into an [`Action`].

use codeact_core::action::{Action, ActionType};
use serde_json::Value;

use crate::blocks::RawBlock;

/// Resolve one extracted block. Unresolvable blocks return a human-readable
/// reason; the caller converts it into a synthetic evaluation action.
pub fn resolve_block(block: &RawBlock) -> Result<Action, String> {
    if let Some(err) = &block.error {
        return Err(format!("malformed {} block: {err}", block.name));
    }
    let tool = ActionType::from_name(&block.name)
        .ok_or_else(|| format!("unsupported tool '{}'", block.name))?;

    let open_len = block.name.len() + 2;
    let close_len = block.name.len() + 3;
    if block.xml.len() < open_len + close_len {
        return Err(format!("empty {} block", block.name));
    }
    let inner = &block.xml[open_len..block.xml.len() - close_len];

    let mut action = Action::new(tool);
    for (field, raw_value) in scan_fields(inner) {
        if !tool.known_fields().contains(&field.as_str()) {
            continue;
        }
        if action.params.contains_key(&field) {
            continue; // first occurrence wins
        }
        let value = unwrap_cdata(&raw_value);
        let value = if tool.payload_fields().contains(&field.as_str()) {
            value
        } else {
            value.trim().to_owned()
        };
        action.set_param(&field, Value::String(value));
    }

    coerce(&mut action);
    Ok(action)
}

/// Scan `<field>value</field>` pairs, skipping CDATA while locating closing
/// tags. Text outside fields is ignored.
fn scan_fields(inner: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while let Some(rel) = inner[pos..].find('<') {
        let lt = pos + rel;
        let after = &inner[lt + 1..];
        let name_len = after
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || *c == '_')
            .count();
        if name_len == 0 || !after[name_len..].starts_with('>') {
            pos = lt + 1;
            continue;
        }
        let name = &after[..name_len];
        let body_start = lt + 1 + name_len + 1;
        let close = format!("</{name}>");

        let mut search = body_start;
        let close_at = loop {
            let cdata_at = inner[search..].find("<![CDATA[").map(|i| search + i);
            let close_at = inner[search..].find(&close).map(|i| search + i);
            match (cdata_at, close_at) {
                (Some(cd), Some(cl)) if cd < cl => match inner[cd..].find("]]>") {
                    Some(i) => search = cd + i + 3,
                    None => break None,
                },
                (_, Some(cl)) => break Some(cl),
                (Some(cd), None) => match inner[cd..].find("]]>") {
                    Some(i) => search = cd + i + 3,
                    None => break None,
                },
                (None, None) => break None,
            }
        };

        match close_at {
            Some(cl) => {
                fields.push((name.to_owned(), inner[body_start..cl].to_owned()));
                pos = cl + close.len();
            }
            None => {
                pos = lt + 1;
            }
        }
    }
    fields
}

fn unwrap_cdata(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(stripped) = trimmed.strip_prefix("<![CDATA[") {
        if let Some(body) = stripped.strip_suffix("]]>") {
            return body.to_owned();
        }
    }
    // Not CDATA: leave untouched; trimming is the caller's per-field call.
    value.to_owned()
}

/// Tool-specific coercions applied after field collection.
fn coerce(action: &mut Action) {
    match action.action_type {
        ActionType::TerminalRun => {
            // args may arrive as a JSON array (or a JSON-string array);
            // collapse to a single shell string.
            if let Some(args) = action.str_param("args").map(str::to_owned) {
                let trimmed = args.trim();
                if trimmed.starts_with('[') {
                    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                        let joined = items
                            .iter()
                            .map(|v| match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(" ");
                        action.set_param("args", Value::String(joined));
                    }
                }
            }
            // A command with embedded whitespace and no args splits at the
            // first whitespace run.
            let has_args = action.nonempty_param("args").is_some();
            if !has_args {
                if let Some(command) = action.str_param("command").map(str::to_owned) {
                    if let Some(split_at) = command.find(char::is_whitespace) {
                        let (cmd, rest) = command.split_at(split_at);
                        let cmd = cmd.to_owned();
                        let rest = rest.trim_start().to_owned();
                        if !rest.is_empty() {
                            action.set_param("command", Value::String(cmd));
                            action.set_param("args", Value::String(rest));
                        }
                    }
                }
            }
        }
        ActionType::WebSearch => {
            if let Some(n) = action.str_param("num_results").map(str::to_owned) {
                if let Ok(parsed) = n.trim().parse::<u64>() {
                    action.set_param("num_results", Value::Number(parsed.into()));
                }
            }
        }
        ActionType::McpTool => {
            if let Some(args) = action.str_param("arguments").map(str::to_owned) {
                if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(args.trim()) {
                    action.set_param("arguments", value);
                }
            }
        }
        ActionType::Finish | ActionType::Evaluation => {
            if let Some(status) = action.str_param("status").map(str::to_owned) {
                let canonical = if action.action_type == ActionType::Finish {
                    status.trim().to_ascii_uppercase()
                } else {
                    status.trim().to_ascii_lowercase()
                };
                action.set_param("status", Value::String(canonical));
            }
        }
        _ => {}
    }
}

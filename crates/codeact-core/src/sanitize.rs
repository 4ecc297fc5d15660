//! Workspace-path sanitization.
//!
//! Any text written to memory or shown to the user must not leak absolute
//! workspace paths. Two fragment shapes are removed:
//!
//! - `…/workspace/user_<digits>/Conversation_<token>/` (the whole prefix)
//! - `Conversation_<token>/` (when no workspace prefix precedes it)
//!
//! Implemented as a single left-to-right scan; no regex on large payloads.

const MARKER: &str = "Conversation_";

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

/// True when `span` ends in a `workspace/user_<digits>/` path segment.
fn contains_user_root(span: &str) -> bool {
    let Some(pos) = span.find("workspace/user_") else {
        return false;
    };
    let tail = &span[pos + "workspace/user_".len()..];
    let digits = tail.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && tail[digits..].starts_with('/')
}

/// Strip conversation-workspace path fragments from `content`.
pub fn strip_workspace_paths(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find(MARKER) {
        let after = &rest[pos + MARKER.len()..];
        // Token chars are ASCII, so char count == byte count here.
        let token_len = after.chars().take_while(|c| is_token_char(*c)).count();
        let is_fragment = token_len > 0 && after[token_len..].starts_with('/');

        if !is_fragment {
            let keep = pos + MARKER.len();
            out.push_str(&rest[..keep]);
            rest = &rest[keep..];
            continue;
        }

        let fragment_end = pos + MARKER.len() + token_len + 1;

        // Extend left across path characters to find where the path began.
        let before = &rest[..pos];
        let path_start = before
            .char_indices()
            .rev()
            .find(|(_, c)| !is_path_char(*c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);

        let removal_start = if contains_user_root(&before[path_start..]) {
            path_start
        } else {
            pos
        };

        out.push_str(&rest[..removal_start]);
        rest = &rest[fragment_end..];
    }

    out.push_str(rest);
    out
}

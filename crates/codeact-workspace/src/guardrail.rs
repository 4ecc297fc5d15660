//! Write-time guardrail for Python sources.
//!
//! Files the agent writes run unattended in the sandbox, so anything that
//! blocks on interactive input must be rejected before it reaches disk.
//! The source is lexed with a small state machine that neutralizes string
//! literals and comments, then scanned for the interactive patterns.

/// Patterns that block on stdin.
const INTERACTIVE_PATTERNS: &[&str] = &["input(", "sys.stdin", "readline("];

#[derive(Debug, thiserror::Error)]
#[error("interactive input pattern `{pattern}` at line {line}")]
pub struct GuardrailViolation {
    pub pattern: &'static str,
    pub line: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Comment,
    Sq,
    Dq,
    Tsq,
    Tdq,
}

/// Replace string literal and comment bodies with spaces, preserving
/// newlines so line numbers survive.
pub fn neutralize_python(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let starts_triple = |q: char| i + 2 < chars.len() && chars[i] == q && chars[i + 1] == q && chars[i + 2] == q;

        match state {
            State::Code => match c {
                '#' => {
                    state = State::Comment;
                    out.push(' ');
                }
                '\'' if starts_triple('\'') => {
                    state = State::Tsq;
                    out.push_str("   ");
                    i += 2;
                }
                '"' if starts_triple('"') => {
                    state = State::Tdq;
                    out.push_str("   ");
                    i += 2;
                }
                '\'' => {
                    state = State::Sq;
                    out.push(' ');
                }
                '"' => {
                    state = State::Dq;
                    out.push(' ');
                }
                _ => out.push(c),
            },
            State::Comment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Sq | State::Dq => {
                let quote = if state == State::Sq { '\'' } else { '"' };
                match c {
                    '\\' if i + 1 < chars.len() => {
                        out.push_str("  ");
                        i += 1;
                        if chars[i] == '\n' {
                            out.pop();
                            out.push('\n');
                        }
                    }
                    '\n' => {
                        // Unterminated single-quoted string; Python would
                        // reject it, but recover at the newline.
                        state = State::Code;
                        out.push('\n');
                    }
                    c if c == quote => {
                        state = State::Code;
                        out.push(' ');
                    }
                    _ => out.push(' '),
                }
            }
            State::Tsq | State::Tdq => {
                let quote = if state == State::Tsq { '\'' } else { '"' };
                if c == quote && starts_triple(quote) {
                    state = State::Code;
                    out.push_str("   ");
                    i += 2;
                } else if c == '\n' {
                    out.push('\n');
                } else if c == '\\' && i + 1 < chars.len() {
                    out.push_str("  ");
                    i += 1;
                    if chars[i] == '\n' {
                        out.pop();
                        out.push('\n');
                    }
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }
    out
}

/// Reject Python source containing interactive input calls outside strings
/// and comments.
pub fn check_python_interactive(source: &str) -> Result<(), GuardrailViolation> {
    let neutralized = neutralize_python(source);

    for pattern in INTERACTIVE_PATTERNS {
        let mut offset = 0;
        while let Some(rel) = neutralized[offset..].find(pattern) {
            let at = offset + rel;
            // Word boundary: an identifier character before the match means
            // it is part of a longer name (e.g. custom_input()). A dot is a
            // method call and still counts.
            let boundary = neutralized[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_');
            if boundary {
                let line = neutralized[..at].matches('\n').count() + 1;
                return Err(GuardrailViolation { pattern, line });
            }
            offset = at + pattern.len();
        }
    }
    Ok(())
}

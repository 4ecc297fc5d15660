//! Anchor-based code block replacement.
//!
//! The model sends a proposed block; the target region in the file is
//! located by progressive disambiguation of the block's anchor lines. The
//! START anchor is the snippet's first non-empty line; while it matches
//! multiple file positions, the next non-empty snippet line is required as
//! well, and so on. The END anchor resolves symmetrically from the tail,
//! searching only after the resolved START. A proposed block identical to
//! the current slice fails explicitly rather than silently succeeding.

/// keyid hint attached to no-op failures.
pub const KEYID_NOOP: &str = "replace_code_block_noop";
/// keyid hint attached to anchor failures.
pub const KEYID_ANCHOR: &str = "replace_code_block_anchor";

#[derive(Debug, thiserror::Error)]
pub enum ReplaceError {
    #[error("code block has no usable anchor lines")]
    NoAnchors,
    #[error("start anchor not found in the file")]
    StartNotFound,
    #[error("start anchor is ambiguous: {candidates} positions match even with all anchors")]
    StartAmbiguous { candidates: usize },
    #[error("end anchor not found after the start anchor")]
    EndNotFound,
    #[error("end anchor is ambiguous: {candidates} positions match even with all anchors")]
    EndAmbiguous { candidates: usize },
    #[error("proposed block is identical to the current code; no changes to apply")]
    NoOp,
}

impl ReplaceError {
    /// Machine-readable failure class shown to the model.
    pub fn keyid(&self) -> &'static str {
        match self {
            ReplaceError::NoOp => KEYID_NOOP,
            _ => KEYID_ANCHOR,
        }
    }
}

/// A successful replacement: the new file content plus the replaced line
/// range (0-based, inclusive) in the original.
#[derive(Clone, Debug)]
pub struct Replacement {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

fn normalize_lf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Normalized comparison form: LF, per-line right trim, outer blank lines
/// dropped.
fn comparison_form(text: &str) -> String {
    normalize_lf(text)
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_owned()
}

/// Replace the region of `current` anchored by `snippet` with `snippet`.
pub fn replace_code_block(current: &str, snippet: &str) -> Result<Replacement, ReplaceError> {
    let current_norm = normalize_lf(current);
    let snippet_norm = normalize_lf(snippet);
    let had_trailing_newline = current_norm.ends_with('\n');

    let file_lines: Vec<&str> = current_norm.lines().collect();
    let anchors: Vec<&str> = snippet_norm
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if anchors.is_empty() {
        return Err(ReplaceError::NoAnchors);
    }

    let start = resolve_start(&file_lines, &anchors)?;
    let end = resolve_end(&file_lines, &anchors, start)?;

    let slice = file_lines[start..=end].join("\n");
    if comparison_form(&slice) == comparison_form(&snippet_norm) {
        return Err(ReplaceError::NoOp);
    }

    let mut new_lines: Vec<&str> = Vec::with_capacity(file_lines.len());
    new_lines.extend_from_slice(&file_lines[..start]);
    new_lines.extend(snippet_norm.lines());
    new_lines.extend_from_slice(&file_lines[end + 1..]);

    let mut content = new_lines.join("\n");
    if had_trailing_newline {
        content.push('\n');
    }

    Ok(Replacement {
        content,
        start_line: start,
        end_line: end,
    })
}

/// A candidate start matches depth `d` when the first `d` anchors appear in
/// order as the next non-empty file lines from the candidate on.
fn matches_forward(file_lines: &[&str], from: usize, anchors: &[&str]) -> bool {
    let mut at = from;
    for anchor in anchors {
        loop {
            let Some(line) = file_lines.get(at) else {
                return false;
            };
            at += 1;
            if line.trim().is_empty() {
                continue;
            }
            if line.trim() != *anchor {
                return false;
            }
            break;
        }
    }
    true
}

fn matches_backward(file_lines: &[&str], from: usize, anchors_rev: &[&str], floor: usize) -> bool {
    let mut at = from as isize;
    for anchor in anchors_rev {
        loop {
            if at < floor as isize {
                return false;
            }
            let line = file_lines[at as usize];
            at -= 1;
            if line.trim().is_empty() {
                continue;
            }
            if line.trim() != *anchor {
                return false;
            }
            break;
        }
    }
    true
}

fn resolve_start(file_lines: &[&str], anchors: &[&str]) -> Result<usize, ReplaceError> {
    let mut candidates: Vec<usize> = file_lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.trim() == anchors[0])
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return Err(ReplaceError::StartNotFound);
    }

    let mut depth = 1;
    while candidates.len() > 1 && depth < anchors.len() {
        depth += 1;
        let filtered: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&c| matches_forward(file_lines, c, &anchors[..depth]))
            .collect();
        if filtered.is_empty() {
            // Deeper anchors eliminated everything; the shallower set is
            // genuinely ambiguous.
            return Err(ReplaceError::StartAmbiguous {
                candidates: candidates.len(),
            });
        }
        candidates = filtered;
    }

    if candidates.len() > 1 {
        return Err(ReplaceError::StartAmbiguous {
            candidates: candidates.len(),
        });
    }
    Ok(candidates[0])
}

fn resolve_end(
    file_lines: &[&str],
    anchors: &[&str],
    start: usize,
) -> Result<usize, ReplaceError> {
    let last = anchors[anchors.len() - 1];
    let mut candidates: Vec<usize> = (start..file_lines.len())
        .filter(|&i| file_lines[i].trim() == last)
        .collect();
    if candidates.is_empty() {
        return Err(ReplaceError::EndNotFound);
    }

    let mut depth = 1;
    while candidates.len() > 1 && depth < anchors.len() {
        depth += 1;
        let tail: Vec<&str> = anchors[anchors.len() - depth..].iter().rev().copied().collect();
        let filtered: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&c| matches_backward(file_lines, c, &tail, start))
            .collect();
        if filtered.is_empty() {
            return Err(ReplaceError::EndAmbiguous {
                candidates: candidates.len(),
            });
        }
        candidates = filtered;
    }

    if candidates.len() > 1 {
        return Err(ReplaceError::EndAmbiguous {
            candidates: candidates.len(),
        });
    }
    Ok(candidates[0])
}

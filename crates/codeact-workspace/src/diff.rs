//! Unified diff parsing, fuzzy application, and generation.
//!
//! Application tries each hunk at its declared position first. When the
//! original side does not match there, the hunk is re-anchored: the
//! original-side needle (context + deletions, at least 2 lines) is searched
//! within ±200 lines of the declared position, then across the whole file,
//! and only a unique match is accepted.
//!
//! Files are modeled as `split('\n')` element lists so a trailing newline
//! survives round trips: `apply(generate(a, b), a) == b` for LF input.

use std::fmt::Write as _;

/// Re-anchoring window around the declared hunk position, in lines.
const FUZZY_WINDOW: usize = 200;
/// Minimum needle length for re-anchoring.
const MIN_NEEDLE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("diff has no hunks")]
    NoHunks,
    #[error("malformed hunk header: {0}")]
    BadHeader(String),
    #[error("Patch context mismatch: {0}")]
    ContextMismatch(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Removed(String),
    Added(String),
}

#[derive(Clone, Debug)]
pub struct Hunk {
    /// 1-based line number on the original side.
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// The original-side needle: context and removed lines in order.
    fn needle(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                DiffLine::Context(s) | DiffLine::Removed(s) => Some(s.as_str()),
                DiffLine::Added(_) => None,
            })
            .collect()
    }
}

/// Parse a unified diff. File headers (`---`/`+++`/`diff`/`index`) are
/// tolerated and ignored.
pub fn parse_unified_diff(diff: &str) -> Result<Vec<Hunk>, DiffError> {
    let normalized = diff.replace("\r\n", "\n");
    let mut hunks: Vec<Hunk> = Vec::new();

    for line in normalized.split('\n') {
        if line.starts_with("@@") {
            hunks.push(parse_header(line)?);
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            continue; // header noise before the first hunk
        };
        if let Some(rest) = line.strip_prefix('+') {
            hunk.lines.push(DiffLine::Added(rest.to_owned()));
        } else if let Some(rest) = line.strip_prefix('-') {
            if rest.starts_with("--") && hunk.lines.is_empty() {
                continue; // a `---` file header between hunks
            }
            hunk.lines.push(DiffLine::Removed(rest.to_owned()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk.lines.push(DiffLine::Context(rest.to_owned()));
        } else if line.is_empty() {
            // Lenient: producers sometimes drop the leading space on blank
            // context lines. A trailing blank after the last hunk line is
            // indistinguishable, so only accept it mid-hunk.
            hunk.lines.push(DiffLine::Context(String::new()));
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }
        // Anything else (new file headers) is ignored.
    }

    // Drop trailing blank-context lines introduced by the final newline.
    for hunk in &mut hunks {
        while matches!(hunk.lines.last(), Some(DiffLine::Context(s)) if s.is_empty())
            && count_old(hunk) > hunk.old_count
        {
            hunk.lines.pop();
        }
    }

    if hunks.is_empty() {
        return Err(DiffError::NoHunks);
    }
    Ok(hunks)
}

fn count_old(hunk: &Hunk) -> usize {
    hunk.lines
        .iter()
        .filter(|l| !matches!(l, DiffLine::Added(_)))
        .count()
}

fn parse_header(line: &str) -> Result<Hunk, DiffError> {
    // @@ -old_start[,old_count] +new_start[,new_count] @@
    let bad = || DiffError::BadHeader(line.to_owned());
    let inner = line.trim_start_matches('@').trim();
    let inner = inner.split("@@").next().unwrap_or(inner).trim();
    let mut parts = inner.split_whitespace();

    let old = parts.next().ok_or_else(bad)?.strip_prefix('-').ok_or_else(bad)?;
    let new = parts.next().ok_or_else(bad)?.strip_prefix('+').ok_or_else(bad)?;

    let parse_pair = |s: &str| -> Result<(usize, usize), DiffError> {
        match s.split_once(',') {
            Some((a, b)) => Ok((
                a.parse().map_err(|_| bad())?,
                b.parse().map_err(|_| bad())?,
            )),
            None => Ok((s.parse().map_err(|_| bad())?, 1)),
        }
    };

    let (old_start, old_count) = parse_pair(old)?;
    let (new_start, new_count) = parse_pair(new)?;
    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

/// Parse and apply a unified diff against `original`.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, DiffError> {
    let hunks = parse_unified_diff(diff)?;
    apply_hunks(original, &hunks)
}

pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, DiffError> {
    let mut lines: Vec<String> = original
        .replace("\r\n", "\n")
        .split('\n')
        .map(str::to_owned)
        .collect();

    let mut drift: isize = 0;
    for (index, hunk) in hunks.iter().enumerate() {
        let declared = (hunk.old_start as isize - 1 + drift).max(0) as usize;
        let position = anchor_hunk(&lines, hunk, declared, index)?;

        let mut result: Vec<String> = lines[..position].to_vec();
        let mut cursor = position;
        for line in &hunk.lines {
            match line {
                DiffLine::Context(expected) => {
                    debug_assert_eq!(lines.get(cursor).map(String::as_str), Some(expected.as_str()));
                    result.push(expected.clone());
                    cursor += 1;
                }
                DiffLine::Removed(_) => {
                    cursor += 1;
                }
                DiffLine::Added(added) => {
                    result.push(added.clone());
                }
            }
        }
        result.extend_from_slice(&lines[cursor..]);

        drift += result.len() as isize - lines.len() as isize;
        lines = result;
    }

    Ok(lines.join("\n"))
}

fn matches_at(lines: &[String], needle: &[&str], at: usize) -> bool {
    at + needle.len() <= lines.len()
        && needle
            .iter()
            .zip(&lines[at..at + needle.len()])
            .all(|(n, l)| *n == l.as_str())
}

fn anchor_hunk(
    lines: &[String],
    hunk: &Hunk,
    declared: usize,
    index: usize,
) -> Result<usize, DiffError> {
    let needle = hunk.needle();

    if matches_at(lines, &needle, declared) {
        return Ok(declared);
    }
    if needle.is_empty() {
        // Pure insertion without context: only the declared position makes
        // sense.
        return Ok(declared.min(lines.len()));
    }
    if needle.len() < MIN_NEEDLE {
        return Err(DiffError::ContextMismatch(format!(
            "hunk {} does not apply at line {} and is too short to re-anchor",
            index + 1,
            hunk.old_start
        )));
    }

    let lo = declared.saturating_sub(FUZZY_WINDOW);
    let hi = (declared + FUZZY_WINDOW).min(lines.len());
    let windowed: Vec<usize> = (lo..hi)
        .filter(|&at| matches_at(lines, &needle, at))
        .collect();
    if windowed.len() == 1 {
        return Ok(windowed[0]);
    }

    let global: Vec<usize> = (0..lines.len())
        .filter(|&at| matches_at(lines, &needle, at))
        .collect();
    if global.len() == 1 {
        return Ok(global[0]);
    }

    Err(DiffError::ContextMismatch(format!(
        "hunk {} expected its context at line {} (searched lines {}..{}, found {} candidate positions)",
        index + 1,
        hunk.old_start,
        lo + 1,
        hi,
        global.len()
    )))
}

// ── generation ──────────────────────────────────────────────────────────

enum EditOp {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Generate a unified diff between two LF strings. Empty when equal.
pub fn generate_unified_diff(old: &str, new: &str, context: usize) -> String {
    if old == new {
        return String::new();
    }
    let a: Vec<&str> = old.split('\n').collect();
    let b: Vec<&str> = new.split('\n').collect();
    let ops = edit_ops(&a, &b);
    render_hunks(&a, &b, &ops, context)
}

fn edit_ops(a: &[&str], b: &[&str]) -> Vec<EditOp> {
    // LCS table.
    let mut dp = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for (i, line_a) in a.iter().enumerate() {
        for (j, line_b) in b.iter().enumerate() {
            dp[i + 1][j + 1] = if line_a == line_b {
                dp[i][j] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (a.len(), b.len());
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] {
            ops.push(EditOp::Equal(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i][j - 1] >= dp[i - 1][j]) {
            ops.push(EditOp::Insert(j - 1));
            j -= 1;
        } else {
            ops.push(EditOp::Delete(i - 1));
            i -= 1;
        }
    }
    ops.reverse();
    ops
}

fn render_hunks(a: &[&str], b: &[&str], ops: &[EditOp], context: usize) -> String {
    // Change runs in op-index space, merged when their context would touch.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < ops.len() {
        if matches!(ops[i], EditOp::Equal(..)) {
            i += 1;
            continue;
        }
        let start = i;
        while i < ops.len() && !matches!(ops[i], EditOp::Equal(..)) {
            i += 1;
        }
        match runs.last_mut() {
            Some((_, prev_end)) if start - *prev_end <= 2 * context => *prev_end = i,
            _ => runs.push((start, i)),
        }
    }

    let mut out = String::new();
    for &(run_start, run_end) in &runs {
        let lo = run_start.saturating_sub(context);
        let hi = (run_end + context).min(ops.len());

        let mut old_start = 0;
        let mut new_start = 0;
        let mut old_count = 0;
        let mut new_count = 0;
        let mut first = true;
        let mut body = String::new();

        for op in &ops[lo..hi] {
            match op {
                EditOp::Equal(oi, ni) => {
                    if first {
                        old_start = oi + 1;
                        new_start = ni + 1;
                        first = false;
                    }
                    old_count += 1;
                    new_count += 1;
                    let _ = writeln!(body, " {}", a[*oi]);
                }
                EditOp::Delete(oi) => {
                    if first {
                        old_start = oi + 1;
                        new_start = new_position_before(ops, lo) + 1;
                        first = false;
                    }
                    old_count += 1;
                    let _ = writeln!(body, "-{}", a[*oi]);
                }
                EditOp::Insert(ni) => {
                    if first {
                        old_start = old_position_before(ops, lo) + 1;
                        new_start = ni + 1;
                        first = false;
                    }
                    new_count += 1;
                    let _ = writeln!(body, "+{}", b[*ni]);
                }
            }
        }

        let _ = writeln!(out, "@@ -{old_start},{old_count} +{new_start},{new_count} @@");
        out.push_str(&body);
    }
    out
}

/// Old-side line count consumed by ops before index `at`.
fn old_position_before(ops: &[EditOp], at: usize) -> usize {
    ops[..at]
        .iter()
        .filter(|op| !matches!(op, EditOp::Insert(_)))
        .count()
}

fn new_position_before(ops: &[EditOp], at: usize) -> usize {
    ops[..at]
        .iter()
        .filter(|op| !matches!(op, EditOp::Delete(_)))
        .count()
}

//! Occurrence pruning and the character-budget cap.

use codeact_core::message::{Message, Role};
use tracing::error;

/// Per-message character cost for the budget cap.
pub fn estimate_cost(message: &Message) -> usize {
    message.content.len()
        + message.action_type.len()
        + message
            .meta
            .action_memory
            .as_ref()
            .map_or(0, String::len)
}

/// Blank every message of the old occurrences of the tool call identified
/// by `key`, keeping the latest `keep - 1` history occurrences (the
/// incoming append is the `keep`-th).
///
/// An occurrence is the assistant call message plus the immediately
/// following user result carrying the same `prune_hash`. All occurrences of
/// one `toolCallKey` must share one `prune_hash`; a mismatch aborts the
/// prune rather than blanking the wrong rows.
pub fn unified_prune(messages: &mut [Message], key: &str, hash: &str, keep: usize) {
    let call_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.role == Role::Assistant && m.meta.tool_call_key.as_deref() == Some(key)
        })
        .map(|(i, _)| i)
        .collect();

    if call_indices
        .iter()
        .any(|&i| messages[i].meta.prune_hash.as_deref() != Some(hash))
    {
        error!(key, "prune hash mismatch across occurrences; skipping prune");
        return;
    }

    let mut occurrences: Vec<(usize, Option<usize>)> = Vec::new();
    for &call in &call_indices {
        let result = match messages.get(call + 1) {
            Some(next)
                if next.role == Role::User && next.meta.prune_hash.as_deref() == Some(hash) =>
            {
                Some(call + 1)
            }
            _ => None,
        };
        occurrences.push((call, result));
    }

    let keep_from_history = keep.saturating_sub(1);
    if occurrences.len() <= keep_from_history {
        return;
    }

    let cutoff = occurrences.len() - keep_from_history;
    for &(call, result) in &occurrences[..cutoff] {
        blank(&mut messages[call]);
        if let Some(result) = result {
            blank(&mut messages[result]);
        }
    }
}

fn blank(message: &mut Message) {
    if message.meta.pruned {
        return;
    }
    message.content.clear();
    message.memorized = false;
    message.meta.pruned = true;
    message.meta.pruned_reason = Some("superseded by a newer call with the same target".into());
    message.meta.blank_payloads();
}

/// Enforce the character budget: group contiguous messages by `prune_hash`,
/// walk newest to oldest accumulating cost (the incoming message's cost
/// first), and drop every whole group past the point the budget is
/// exceeded. Groups are never split.
pub fn char_budget_prune(messages: &mut Vec<Message>, incoming_cost: usize, budget: usize) {
    if budget == 0 || messages.is_empty() {
        return;
    }

    // Contiguous groups, oldest first, as (start, end) inclusive.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        let hash = message.meta.prune_hash.as_deref();
        match groups.last_mut() {
            Some((start, end))
                if *end + 1 == i
                    && hash.is_some()
                    && messages[*start].meta.prune_hash.as_deref() == hash =>
            {
                *end = i;
            }
            _ => groups.push((i, i)),
        }
    }

    let mut total = incoming_cost;
    let mut drop_through: Option<usize> = None;
    for &(start, end) in groups.iter().rev() {
        total += messages[start..=end].iter().map(estimate_cost).sum::<usize>();
        if total > budget {
            drop_through = Some(end);
            break;
        }
    }

    if let Some(end) = drop_through {
        messages.drain(..=end);
    }
}

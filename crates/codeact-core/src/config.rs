use serde::{Deserialize, Serialize};

/// Tunables of the execution core. Defaults match production behavior;
/// tests override individual fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Consecutive technical failures before the task is abandoned.
    pub max_retry_times: u32,
    /// How many recent assistant outputs are checked for repeats.
    pub repeat_detect_window: usize,
    /// Occurrences of the same tool call kept un-pruned (including the
    /// incoming one).
    pub prune_keep_occurrences: usize,
    /// Character budget for the retained portion of memory. `0` disables the
    /// budget prune.
    pub prune_max_chars: usize,
    /// Wall-clock limit for `terminal_run`, in milliseconds.
    pub terminal_run_timeout_ms: u64,
    /// Cap on any single content payload stored or shown.
    pub max_content_length: usize,
    /// Optional global cap across all retries of a task. Disabled unless
    /// explicitly configured.
    pub max_total_retries: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_retry_times: 10,
            repeat_detect_window: 2,
            prune_keep_occurrences: 3,
            prune_max_chars: 60_000,
            terminal_run_timeout_ms: 30_000,
            max_content_length: 50_000,
            max_total_retries: None,
        }
    }
}

use std::collections::{HashMap, HashSet};

/// Which role header the next prompt is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PromptMode {
    #[default]
    Build,
    CodeCorrector,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishStatus {
    Success,
    Failed,
}

impl FinishStatus {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("SUCCESS") {
            Some(Self::Success)
        } else if s.eq_ignore_ascii_case("FAILED") {
            Some(Self::Failed)
        } else {
            None
        }
    }
}

/// Mutable per-task loop state.
#[derive(Debug, Default)]
pub struct TaskContext {
    /// Consecutive technical failures.
    pub retry_count: u32,
    /// Retries across the whole task, for the optional global cap.
    pub total_retry_attempts: u32,
    pub prompt_mode: PromptMode,
    pub last_terminal_failure: Option<String>,
    pub last_finish_status: Option<FinishStatus>,
    /// Reflection feedback carried into the next prompt.
    pub reflection: Option<String>,
    /// Paths whose reads failed transiently (`NOT_FOUND`/`INACCESSIBLE`),
    /// revalidated after a later successful write to the same path.
    pub read_failures: HashMap<String, String>,
    /// Paths written successfully this task.
    pub written_paths: HashSet<String>,
}

impl TaskContext {
    pub fn bump_retry(&mut self) {
        self.retry_count += 1;
        self.total_retry_attempts += 1;
    }

    pub fn clear_retries(&mut self) {
        self.retry_count = 0;
    }
}

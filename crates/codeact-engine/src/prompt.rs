//! Prompt assembly.
//!
//! Rebuilt every turn: the workspace listing and reflection feedback are
//! dynamic. The role header follows the prompt mode; the error-feedback
//! block disappears once a task finished with SUCCESS.

use crate::context::{FinishStatus, PromptMode};

const BUILD_HEADER: &str = "You are a code-acting agent. You complete programming tasks by \
emitting one tool call per turn as an XML block, observing the result, and iterating until the \
task is done. Work inside the workspace only. When the task is complete, emit \
<finish><status>SUCCESS</status><message>...</message></finish>; if you cannot complete it, use \
status FAILED.";

const CODECORRECTOR_HEADER: &str = "You are a code-acting agent in correction mode: the last \
command failed. Diagnose the failure from the output below, fix the code with the editing tools, \
and re-run the command to verify. Do not claim success until the command passes.";

/// Control tools always advertised alongside the runtime catalog.
const CONTROL_TOOLS: &[(&str, &str)] = &[
    ("finish", "End the task with <status> SUCCESS or FAILED and a <message>"),
    ("information", "Record a short note for the log; no execution"),
    ("patch_complete", "Declare the current correction finished and return to building"),
];

/// Inputs for one prompt build. Borrowed so callers can assemble them from
/// live state without copies.
pub struct PromptBuilder<'a> {
    pub mode: PromptMode,
    pub tool_catalog: &'a [(String, String)],
    pub workspace_files: &'a [String],
    pub memorized: &'a str,
    pub previous_digest: Option<&'a str>,
    pub goal: &'a str,
    pub requirement: &'a str,
    pub reflection: Option<&'a str>,
    pub last_finish_status: Option<FinishStatus>,
    pub evaluation_prompt: Option<&'a str>,
}

impl PromptBuilder<'_> {
    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str(match self.mode {
            PromptMode::Build => BUILD_HEADER,
            PromptMode::CodeCorrector => CODECORRECTOR_HEADER,
        });
        prompt.push_str("\n\n=== System ===\n");
        prompt.push_str(&format!(
            "time: {}\nos: {} {}\n",
            chrono::Utc::now().to_rfc3339(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        ));

        prompt.push_str("\n=== Tools ===\n");
        for (name, description) in self.tool_catalog {
            prompt.push_str(&format!("{name}: {description}\n"));
        }
        for (name, description) in CONTROL_TOOLS {
            prompt.push_str(&format!("{name}: {description}\n"));
        }

        prompt.push_str("\n=== Workspace Files ===\n");
        if self.workspace_files.is_empty() {
            prompt.push_str("(empty)\n");
        } else {
            for file in self.workspace_files {
                prompt.push_str(file);
                prompt.push('\n');
            }
        }

        if !self.memorized.is_empty() {
            prompt.push_str("\n=== Memorized Content ===\n");
            prompt.push_str(self.memorized);
            prompt.push('\n');
        }

        if let Some(digest) = self.previous_digest.filter(|d| !d.is_empty()) {
            prompt.push_str("\n=== Previous Conversation ===\n");
            prompt.push_str(digest);
            prompt.push('\n');
        }

        prompt.push_str("\n=== Goal ===\n");
        prompt.push_str(self.goal);
        prompt.push_str("\n\n=== Current Requirement ===\n");
        prompt.push_str(self.requirement);
        prompt.push('\n');

        if let Some(reflection) = self.error_feedback() {
            prompt.push_str("\n=== Error Feedback ===\n");
            prompt.push_str(reflection);
            prompt.push('\n');
        }

        if let Some(evaluation) = self.evaluation_prompt.filter(|e| !e.is_empty()) {
            prompt.push('\n');
            prompt.push_str(evaluation);
            prompt.push('\n');
        }

        prompt
    }

    /// Error feedback is dropped once a SUCCESS finish was observed.
    fn error_feedback(&self) -> Option<&str> {
        if self.last_finish_status == Some(FinishStatus::Success) {
            return None;
        }
        self.reflection.filter(|r| !r.is_empty())
    }
}

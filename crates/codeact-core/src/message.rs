use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Author of a memory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Developer,
}

/// One entry of the ordered conversation memory.
///
/// A pruned message keeps its index and role but has empty `content` and
/// `memorized == false`; the pruning state lives in `meta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Logical tool name, or empty for plain conversation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    /// Whether this entry contributes to the memorized-content summary.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub memorized: bool,
    #[serde(default, skip_serializing_if = "MessageMeta::is_default")]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            action_type: String::new(),
            memorized: false,
            meta: MessageMeta::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::new(Role::Developer, content)
    }

    pub fn is_pruned(&self) -> bool {
        self.meta.pruned
    }
}

/// Structured annotations on a message.
///
/// `tool_call_key` is present only on assistant tool-call messages;
/// `prune_hash` is present on both the call and its adjacent result, with
/// the same value within one occurrence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// The originating action, when this message represents a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Compact XML rendering of the action + result for memorized summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_memory: Option<String>,
    /// 16-hex digest grouping a tool call with its result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_hash: Option<String>,
    /// Same digest, stored only on the assistant tool-call message.
    #[serde(rename = "toolCallKey", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_key: Option<String>,
    /// Digest of normalized assistant content, for anti-loop detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pruned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruned_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(rename = "exitCode", default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl MessageMeta {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Blank the heavy payloads this meta carries, keeping identity fields
    /// (`prune_hash`, `toolCallKey`, `run_id`, origins) intact.
    pub fn blank_payloads(&mut self) {
        self.action_memory = None;
        self.stdout = None;
        self.stderr = None;
        self.diff = None;
        self.result = None;
        if let Some(action) = &mut self.action {
            for key in ["content", "diff", "code_block"] {
                action.params.remove(key);
            }
        }
    }
}

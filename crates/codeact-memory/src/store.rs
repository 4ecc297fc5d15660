use std::path::{Path, PathBuf};

use codeact_core::action::ActionType;
use codeact_core::config::CoreConfig;
use codeact_core::hash::{digest16, tool_call_digest};
use codeact_core::ids::{ConversationId, TaskId};
use codeact_core::message::{Message, MessageMeta, Role};
use codeact_core::sanitize::strip_workspace_paths;
use tracing::debug;

use crate::keys;
use crate::prune;

/// Error text injected when the model repeats itself.
const REPEAT_ERROR: &str = "ERROR: repeated assistant output detected. The previous response was \
identical to an earlier one. Take a different action instead of repeating yourself.";

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory io: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub repeat_detect_window: usize,
    pub prune_keep_occurrences: usize,
    pub prune_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            repeat_detect_window: 2,
            prune_keep_occurrences: 3,
            prune_max_chars: 60_000,
        }
    }
}

impl From<&CoreConfig> for MemoryConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            repeat_detect_window: config.repeat_detect_window,
            prune_keep_occurrences: config.prune_keep_occurrences,
            prune_max_chars: config.prune_max_chars,
        }
    }
}

/// The ordered memory of one (conversation, task), backed by
/// `memory/<conversation_prefix>/<task_key>.json`.
pub struct Memory {
    path: PathBuf,
    messages: Vec<Message>,
    config: MemoryConfig,
    pending_repeat_error: Option<String>,
}

impl Memory {
    /// Open (or create) the memory file for a task.
    pub fn open(
        base_dir: &Path,
        conversation: &ConversationId,
        task: &TaskId,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        let path = base_dir
            .join(conversation.prefix())
            .join(format!("{}.json", task.as_str()));
        let messages = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            messages,
            config,
            pending_repeat_error: None,
        })
    }

    /// An unpersisted store, for tests and dry runs.
    pub fn ephemeral(config: MemoryConfig) -> Self {
        Self {
            path: PathBuf::new(),
            messages: Vec::new(),
            config,
            pending_repeat_error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, running the full pipeline: sanitize → classify →
    /// repeat detection → adjacent dedup → key derivation → occurrence
    /// prune → char-budget prune → persist.
    pub fn add_message(
        &mut self,
        role: Role,
        content: &str,
        action_type: Option<&str>,
        memorized: bool,
        meta: MessageMeta,
    ) -> Result<(), MemoryError> {
        let content = strip_workspace_paths(content);
        let action_type = keys::detect_action_type(&content, &meta, action_type);
        let mut message = Message {
            role,
            content,
            action_type,
            memorized,
            meta,
        };

        // A queued repeat error replaces the next runtime acknowledgement;
        // failing that, it lands as its own user message just before the
        // next assistant append so alternation is preserved.
        if let Some(error) = self.pending_repeat_error.take() {
            match role {
                Role::User if message.content.trim() == "Acknowledged." => {
                    message.content = error;
                    message.memorized = false;
                }
                Role::Assistant => {
                    self.messages.push(Message::user(error));
                }
                _ => self.pending_repeat_error = Some(error),
            }
        }

        if role == Role::Assistant {
            let hash = digest16(message.content.trim());
            if self.recent_assistant_hashes().contains(&hash) {
                debug!("repeated assistant output detected");
                self.pending_repeat_error = Some(REPEAT_ERROR.to_owned());
            }
            message.meta.repeat_hash = Some(hash);
        }

        if let Some(last) = self.messages.last() {
            if last.role == message.role && last.content == message.content {
                return Ok(()); // adjacent duplicate dropped entirely
            }
        }

        self.derive_keys(&mut message);

        if let (Some(key), Some(hash)) = (
            message.meta.tool_call_key.clone(),
            message.meta.prune_hash.clone(),
        ) {
            prune::unified_prune(
                &mut self.messages,
                &key,
                &hash,
                self.config.prune_keep_occurrences,
            );
        }

        prune::char_budget_prune(
            &mut self.messages,
            prune::estimate_cost(&message),
            self.config.prune_max_chars,
        );

        self.messages.push(message);
        self.persist()
    }

    fn derive_keys(&self, message: &mut Message) {
        match message.role {
            Role::Assistant => {
                let Some(tool) = ActionType::from_name(&message.action_type) else {
                    return;
                };
                if tool.is_pruned_tool() {
                    if let Some(key) = keys::stable_key(tool, &message.meta, &message.content) {
                        let digest = tool_call_digest(tool.as_str(), &key);
                        message.meta.tool_call_key = Some(digest.clone());
                        message.meta.prune_hash = Some(digest);
                    }
                } else if tool == ActionType::Information {
                    message.meta.prune_hash = Some(digest16(message.content.trim()));
                }
            }
            Role::User if message.meta.prune_hash.is_none() => {
                // A result message inherits the hash of the call it answers.
                if let Some(last) = self.messages.last() {
                    if last.role == Role::Assistant && last.meta.prune_hash.is_some() {
                        message.meta.prune_hash = last.meta.prune_hash.clone();
                    }
                }
            }
            _ => {}
        }
    }

    fn recent_assistant_hashes(&self) -> Vec<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant && !m.is_pruned())
            .filter_map(|m| m.meta.repeat_hash.clone())
            .take(self.config.repeat_detect_window)
            .collect()
    }

    /// Remove the most recent assistant message (used to drop invalid
    /// model turns).
    pub fn remove_last_assistant_message(&mut self) -> Result<Option<Message>, MemoryError> {
        let position = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant);
        let removed = position.map(|i| self.messages.remove(i));
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn pop_last_message(&mut self) -> Result<Option<Message>, MemoryError> {
        let removed = self.messages.pop();
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Remove every message matching the predicate; returns how many went.
    pub fn remove_messages_where(
        &mut self,
        predicate: impl Fn(&Message) -> bool,
    ) -> Result<usize, MemoryError> {
        let before = self.messages.len();
        self.messages.retain(|m| !predicate(m));
        let removed = before - self.messages.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Purge a terminal run: its result, any error feedback carrying the
    /// run marker, and the assistant call that started it. The marker is
    /// matched in both content and meta so either write path suffices.
    pub fn purge_run(&mut self, run_id: &str) -> Result<usize, MemoryError> {
        let marker = format!("[terminal_run_id:{run_id}]");
        let mut remove = vec![false; self.messages.len()];

        for (i, message) in self.messages.iter().enumerate() {
            let in_meta = message.meta.run_id.as_deref() == Some(run_id);
            let in_action = message
                .meta
                .action
                .as_ref()
                .and_then(|a| a.str_param("run_id"))
                == Some(run_id);
            if in_meta || in_action || message.content.contains(&marker) {
                remove[i] = true;
            }
        }
        for i in 1..self.messages.len() {
            if remove[i]
                && self.messages[i].role == Role::User
                && self.messages[i - 1].role == Role::Assistant
                && self.messages[i - 1].action_type == "terminal_run"
            {
                remove[i - 1] = true;
            }
        }

        let mut keep = remove.iter().map(|r| !r);
        let before = self.messages.len();
        self.messages.retain(|_| keep.next().unwrap_or(true));
        let removed = before - self.messages.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// The memorized-content summary shown in every prompt.
    pub fn memorized_content(&self) -> String {
        let joined = self
            .messages
            .iter()
            .filter(|m| m.memorized)
            .map(|m| {
                m.meta.action_memory.clone().unwrap_or_else(|| {
                    format!("{}: {}", m.action_type.to_uppercase(), m.content)
                })
            })
            .collect::<Vec<_>>()
            .join("\n");
        strip_workspace_paths(&joined)
    }

    /// Rewrite the backing file atomically (write-then-rename).
    fn persist(&self) -> Result<(), MemoryError> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.messages)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::action::Action;

    fn mem() -> Memory {
        Memory::ephemeral(MemoryConfig::default())
    }

    fn write_call_meta(path: &str) -> MessageMeta {
        MessageMeta {
            action: Some(
                Action::new(ActionType::WriteCode)
                    .with_param("path", path)
                    .with_param("content", "x = 1\n"),
            ),
            ..MessageMeta::default()
        }
    }

    fn add_write_occurrence(memory: &mut Memory, path: &str, n: usize) {
        memory
            .add_message(
                Role::Assistant,
                &format!("<write_code><path>{path}</path><content><![CDATA[x = {n}\n]]></content></write_code>"),
                Some("write_code"),
                false,
                write_call_meta(path),
            )
            .unwrap();
        memory
            .add_message(Role::User, &format!("wrote {path} (rev {n})"), None, true, MessageMeta::default())
            .unwrap();
    }

    #[test]
    fn call_and_result_share_prune_hash() {
        let mut memory = mem();
        add_write_occurrence(&mut memory, "a.py", 1);
        let call = &memory.messages()[0];
        let result = &memory.messages()[1];
        assert!(call.meta.tool_call_key.is_some());
        assert!(result.meta.tool_call_key.is_none());
        assert_eq!(call.meta.prune_hash, result.meta.prune_hash);
        assert_eq!(call.meta.prune_hash.as_ref().unwrap().len(), 16);
    }

    #[test]
    fn occurrence_pruning_keeps_three() {
        let mut memory = mem();
        for n in 1..=3 {
            add_write_occurrence(&mut memory, "a.py", n);
        }
        // Three occurrences, none pruned.
        assert!(memory.messages().iter().all(|m| !m.is_pruned()));

        // The 4th occurrence blanks the oldest.
        add_write_occurrence(&mut memory, "a.py", 4);
        let messages = memory.messages();
        assert!(messages[0].is_pruned());
        assert!(messages[1].is_pruned());
        assert!(!messages[2].is_pruned());

        // At most 3 non-pruned occurrences for the key.
        let key = messages[2].meta.tool_call_key.clone().unwrap();
        let live = messages
            .iter()
            .filter(|m| m.meta.tool_call_key.as_deref() == Some(key.as_str()) && !m.is_pruned())
            .count();
        assert_eq!(live, 3);
    }

    #[test]
    fn different_paths_do_not_share_keys() {
        let mut memory = mem();
        add_write_occurrence(&mut memory, "a.py", 1);
        add_write_occurrence(&mut memory, "b.py", 1);
        let k0 = memory.messages()[0].meta.tool_call_key.clone();
        let k2 = memory.messages()[2].meta.tool_call_key.clone();
        assert_ne!(k0, k2);
    }

    #[test]
    fn same_basename_from_origin_path_groups_together() {
        let mut memory = mem();
        // Dispatcher-prefixed path and bare path aggregate to one key.
        let mut meta = MessageMeta::default();
        meta.action = Some(
            Action::new(ActionType::WriteCode)
                .with_param("path", "deep/nested/a.py")
                .with_param("origin_path", "a.py"),
        );
        memory
            .add_message(Role::Assistant, "call 1", Some("write_code"), false, meta)
            .unwrap();
        add_write_occurrence(&mut memory, "a.py", 2);
        let k0 = memory.messages()[0].meta.tool_call_key.clone();
        let k1 = memory.messages()[1].meta.tool_call_key.clone();
        assert_eq!(k0, k1);
    }

    #[test]
    fn repeated_assistant_output_replaces_next_ack() {
        let mut memory = mem();
        let output = "<information><message><![CDATA[thinking about it]]></message></information>";

        memory
            .add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::User, "Acknowledged.", None, false, MessageMeta::default())
            .unwrap();

        let last = memory.messages().last().unwrap();
        assert!(last.content.starts_with("ERROR: repeated assistant output"));
        assert_eq!(last.role, Role::User);
    }

    #[test]
    fn repeat_error_prepended_before_assistant_when_no_ack() {
        let mut memory = mem();
        let output = "same thing";
        memory
            .add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::User, "tool result text", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::Assistant, output, None, false, MessageMeta::default())
            .unwrap();
        // No ack arrives; the next assistant append forces the injection.
        memory
            .add_message(Role::Assistant, "different now", None, false, MessageMeta::default())
            .unwrap();

        let messages = memory.messages();
        let n = messages.len();
        assert_eq!(messages[n - 1].content, "different now");
        assert!(messages[n - 2].content.starts_with("ERROR: repeated"));
        assert_eq!(messages[n - 2].role, Role::User);
    }

    #[test]
    fn repeat_window_limits_detection() {
        let mut memory = Memory::ephemeral(MemoryConfig {
            repeat_detect_window: 2,
            ..MemoryConfig::default()
        });
        memory
            .add_message(Role::Assistant, "alpha", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::Assistant, "beta", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::Assistant, "gamma", None, false, MessageMeta::default())
            .unwrap();
        // "alpha" is outside the window of 2 now.
        memory
            .add_message(Role::Assistant, "alpha", None, false, MessageMeta::default())
            .unwrap();
        assert!(memory.pending_repeat_error.is_none());

        // "alpha" again is inside the window.
        memory
            .add_message(Role::Assistant, "delta", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::Assistant, "alpha", None, false, MessageMeta::default())
            .unwrap();
        assert!(memory.pending_repeat_error.is_some());
    }

    #[test]
    fn adjacent_duplicates_dropped() {
        let mut memory = mem();
        memory
            .add_message(Role::User, "same", None, false, MessageMeta::default())
            .unwrap();
        memory
            .add_message(Role::User, "same", None, false, MessageMeta::default())
            .unwrap();
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn workspace_paths_sanitized_on_append() {
        let mut memory = mem();
        memory
            .add_message(
                Role::User,
                "wrote /srv/workspace/user_1/Conversation_abcd1234/x.py",
                None,
                false,
                MessageMeta::default(),
            )
            .unwrap();
        assert_eq!(memory.messages()[0].content, "wrote x.py");
    }

    #[test]
    fn char_budget_cap_holds_after_every_append() {
        let mut memory = Memory::ephemeral(MemoryConfig {
            prune_max_chars: 1000,
            ..MemoryConfig::default()
        });
        for i in 0..10 {
            memory
                .add_message(
                    Role::User,
                    &format!("{}{}", i, "x".repeat(299)),
                    None,
                    false,
                    MessageMeta::default(),
                )
                .unwrap();
            let total: usize = memory.messages().iter().map(prune::estimate_cost).sum();
            assert!(total <= 1000, "total {total} exceeds budget");
        }
        // Only the newest messages survive.
        assert!(memory.len() <= 3);
        assert!(memory.messages().last().unwrap().content.starts_with('9'));
    }

    #[test]
    fn information_gets_content_hash() {
        let mut memory = mem();
        memory
            .add_message(
                Role::Assistant,
                "<information><message><![CDATA[status note]]></message></information>",
                None,
                false,
                MessageMeta::default(),
            )
            .unwrap();
        let m = &memory.messages()[0];
        assert_eq!(m.action_type, "information");
        assert!(m.meta.prune_hash.is_some());
        assert!(m.meta.tool_call_key.is_none());
    }

    #[test]
    fn purge_run_removes_call_result_and_feedback() {
        let mut memory = mem();
        let run_id = "abc123def456";
        let call_meta = MessageMeta {
            action: Some(
                Action::new(ActionType::TerminalRun)
                    .with_param("command", "pytest")
                    .with_param("run_id", run_id),
            ),
            ..MessageMeta::default()
        };
        memory
            .add_message(
                Role::Assistant,
                "<terminal_run><command>pytest</command></terminal_run>",
                Some("terminal_run"),
                false,
                call_meta,
            )
            .unwrap();
        let result_meta = MessageMeta {
            run_id: Some(run_id.to_owned()),
            ..MessageMeta::default()
        };
        memory
            .add_message(Role::User, "tests failed\n[terminal_run_id:abc123def456]", None, true, result_meta)
            .unwrap();
        memory
            .add_message(
                Role::User,
                "Fix the failing assert [terminal_run_id:abc123def456]",
                None,
                false,
                MessageMeta::default(),
            )
            .unwrap();
        memory
            .add_message(Role::User, "unrelated", None, false, MessageMeta::default())
            .unwrap();

        let removed = memory.purge_run(run_id).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.messages()[0].content, "unrelated");
    }

    #[test]
    fn memorized_content_collects_summaries() {
        let mut memory = mem();
        let meta = MessageMeta {
            action_memory: Some("<write_code path=\"a.py\">ok</write_code>".into()),
            ..MessageMeta::default()
        };
        memory
            .add_message(Role::User, "wrote a.py", Some("write_code"), true, meta)
            .unwrap();
        memory
            .add_message(Role::User, "not memorized", None, false, MessageMeta::default())
            .unwrap();

        let summary = memory.memorized_content();
        assert!(summary.contains("a.py"));
        assert!(!summary.contains("not memorized"));
    }

    #[test]
    fn memorized_content_synthesizes_without_action_memory() {
        let mut memory = mem();
        memory
            .add_message(Role::User, "raw result", Some("read_file"), true, MessageMeta::default())
            .unwrap();
        assert_eq!(memory.memorized_content(), "READ_FILE: raw result");
    }

    #[test]
    fn persistence_roundtrip() {
        let base = std::env::temp_dir().join(format!("codeact_mem_{}", uuid::Uuid::now_v7()));
        let conversation = ConversationId::new();
        let task = TaskId::new();

        let mut memory =
            Memory::open(&base, &conversation, &task, MemoryConfig::default()).unwrap();
        add_write_occurrence(&mut memory, "a.py", 1);
        assert_eq!(memory.len(), 2);

        let reopened = Memory::open(&base, &conversation, &task, MemoryConfig::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.messages()[0].meta.tool_call_key,
            memory.messages()[0].meta.tool_call_key
        );

        std::fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn one_prune_hash_per_tool_call_key() {
        let mut memory = mem();
        for n in 1..=5 {
            add_write_occurrence(&mut memory, "a.py", n);
        }
        let mut hashes: Vec<&str> = memory
            .messages()
            .iter()
            .filter(|m| m.meta.tool_call_key.is_some())
            .filter_map(|m| m.meta.prune_hash.as_deref())
            .collect();
        hashes.dedup();
        assert_eq!(hashes.len(), 1);
    }
}

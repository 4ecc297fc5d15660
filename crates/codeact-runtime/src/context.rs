use std::path::PathBuf;

use codeact_core::config::CoreConfig;
use codeact_workspace::{PathError, UserWorkspace};

/// LLM credential triple handed to tools that drive a model themselves
/// (the browser tool). Pulled from the conversation's default model.
#[derive(Clone, Debug)]
pub struct LlmCredential {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Everything a tool handler needs during execution.
#[derive(Clone)]
pub struct RuntimeContext {
    pub workspace: UserWorkspace,
    pub conversation_prefix: String,
    pub config: CoreConfig,
    pub llm: Option<LlmCredential>,
}

impl RuntimeContext {
    pub fn new(workspace: UserWorkspace, conversation_prefix: impl Into<String>) -> Self {
        Self {
            workspace,
            conversation_prefix: conversation_prefix.into(),
            config: CoreConfig::default(),
            llm: None,
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm(mut self, llm: LlmCredential) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Workspace-relative conversation directory name.
    pub fn conversation_rel(&self) -> String {
        format!("Conversation_{}", self.conversation_prefix)
    }

    /// Absolute on-disk conversation directory.
    pub fn conversation_dir(&self) -> PathBuf {
        self.workspace.conversation_dir(&self.conversation_prefix)
    }

    /// Resolve a (possibly conversation-prefixed) tool path to an absolute
    /// path inside the user root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathError> {
        self.workspace.resolve(path)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use codeact_core::action::{Action, ActionResult, ActionType};

use crate::context::RuntimeContext;

/// A runtime tool. `memorized` declares whether results of this tool feed
/// the memorized-content summary; `memory_summary` renders the compact form
/// stored for it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn tool(&self) -> ActionType;

    /// One-line catalog entry shown in the prompt's tool list.
    fn description(&self) -> &'static str;

    /// Human-readable description of a specific call, for UI events.
    fn describe(&self, action: &Action) -> String {
        let _ = action;
        self.description().to_owned()
    }

    fn memorized(&self) -> bool {
        false
    }

    async fn execute(&self, action: &Action, ctx: &RuntimeContext) -> ActionResult;

    fn memory_summary(&self, action: &Action, result: &ActionResult) -> Option<String> {
        let _ = (action, result);
        None
    }
}

/// Tool handlers keyed by action type.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<ActionType, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in local tool set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::tools::WriteCodeTool::write_code()));
        registry.register(Arc::new(crate::tools::WriteCodeTool::write_file()));
        registry.register(Arc::new(crate::tools::ReadFileTool));
        registry.register(Arc::new(crate::tools::PatchCodeTool));
        registry.register(Arc::new(crate::tools::ReplaceCodeBlockTool));
        registry.register(Arc::new(crate::terminal::TerminalRunTool));
        registry.register(Arc::new(crate::tools::ReadUrlTool));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.tool(), handler);
    }

    pub fn get(&self, tool: ActionType) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(&tool).cloned()
    }

    /// Sorted (name, description) pairs for prompt assembly.
    pub fn catalog(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .handlers
            .values()
            .map(|h| (h.tool().as_str().to_owned(), h.description().to_owned()))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_runtime_tools() {
        let registry = ToolRegistry::builtin();
        for tool in [
            ActionType::WriteCode,
            ActionType::WriteFile,
            ActionType::ReadFile,
            ActionType::PatchCode,
            ActionType::ReplaceCodeBlock,
            ActionType::TerminalRun,
            ActionType::ReadUrl,
        ] {
            assert!(registry.get(tool).is_some(), "missing {tool}");
        }
        assert!(registry.get(ActionType::Finish).is_none());
    }

    #[test]
    fn catalog_is_sorted() {
        let registry = ToolRegistry::builtin();
        let catalog = registry.catalog();
        let mut sorted = catalog.clone();
        sorted.sort();
        assert_eq!(catalog, sorted);
        assert!(catalog.iter().any(|(n, _)| n == "terminal_run"));
    }
}

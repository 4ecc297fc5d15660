use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of tools the model may invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Finish,
    PatchCode,
    WriteCode,
    ReplaceCodeBlock,
    WriteFile,
    ReadFile,
    RevisePlan,
    TerminalRun,
    WebSearch,
    ReadUrl,
    Browser,
    McpTool,
    Evaluation,
    DocumentQuery,
    DocumentUpload,
    PatchComplete,
    Information,
    PauseForUserInput,
}

impl ActionType {
    pub const ALL: &'static [ActionType] = &[
        ActionType::Finish,
        ActionType::PatchCode,
        ActionType::WriteCode,
        ActionType::ReplaceCodeBlock,
        ActionType::WriteFile,
        ActionType::ReadFile,
        ActionType::RevisePlan,
        ActionType::TerminalRun,
        ActionType::WebSearch,
        ActionType::ReadUrl,
        ActionType::Browser,
        ActionType::McpTool,
        ActionType::Evaluation,
        ActionType::DocumentQuery,
        ActionType::DocumentUpload,
        ActionType::PatchComplete,
        ActionType::Information,
        ActionType::PauseForUserInput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Finish => "finish",
            ActionType::PatchCode => "patch_code",
            ActionType::WriteCode => "write_code",
            ActionType::ReplaceCodeBlock => "replace_code_block",
            ActionType::WriteFile => "write_file",
            ActionType::ReadFile => "read_file",
            ActionType::RevisePlan => "revise_plan",
            ActionType::TerminalRun => "terminal_run",
            ActionType::WebSearch => "web_search",
            ActionType::ReadUrl => "read_url",
            ActionType::Browser => "browser",
            ActionType::McpTool => "mcp_tool",
            ActionType::Evaluation => "evaluation",
            ActionType::DocumentQuery => "document_query",
            ActionType::DocumentUpload => "document_upload",
            ActionType::PatchComplete => "patch_complete",
            ActionType::Information => "information",
            ActionType::PauseForUserInput => "pause_for_user_input",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Tools whose target is a workspace file.
    pub fn is_file_tool(&self) -> bool {
        matches!(
            self,
            ActionType::PatchCode
                | ActionType::WriteCode
                | ActionType::ReplaceCodeBlock
                | ActionType::WriteFile
                | ActionType::ReadFile
        )
    }

    /// Tools that participate in occurrence-based memory pruning.
    pub fn is_pruned_tool(&self) -> bool {
        matches!(
            self,
            ActionType::ReadFile
                | ActionType::WriteCode
                | ActionType::PatchCode
                | ActionType::ReplaceCodeBlock
                | ActionType::TerminalRun
        )
    }

    /// Tools handled inside the control loop; never routed to the runtime.
    pub fn is_local_only(&self) -> bool {
        matches!(
            self,
            ActionType::Information
                | ActionType::PatchComplete
                | ActionType::Evaluation
                | ActionType::RevisePlan
                | ActionType::PauseForUserInput
                | ActionType::Finish
        )
    }

    /// Recognized fields, in canonical serialization order.
    pub fn known_fields(&self) -> &'static [&'static str] {
        match self {
            ActionType::Finish => &["status", "message"],
            ActionType::PatchCode => &["path", "diff"],
            ActionType::WriteCode | ActionType::WriteFile => &["path", "content"],
            ActionType::ReplaceCodeBlock => &["path", "code_block"],
            ActionType::ReadFile => &["path"],
            ActionType::RevisePlan => &["mode", "reason", "tasks"],
            ActionType::TerminalRun => &["command", "args", "cwd"],
            ActionType::WebSearch => &["query", "num_results", "topic"],
            ActionType::ReadUrl => &["url"],
            ActionType::Browser => &["question"],
            ActionType::McpTool => &["name", "arguments"],
            ActionType::Evaluation => &["status", "comments"],
            ActionType::DocumentQuery => &["query", "document_id"],
            ActionType::DocumentUpload => &["path", "description"],
            ActionType::PatchComplete => &["message"],
            ActionType::Information => &["message"],
            ActionType::PauseForUserInput => &["message"],
        }
    }

    /// Fields that carry verbatim payloads: never deep-trimmed by the
    /// parser.
    pub fn payload_fields(&self) -> &'static [&'static str] {
        match self {
            ActionType::WriteCode | ActionType::WriteFile => &["content"],
            ActionType::ReplaceCodeBlock => &["code_block"],
            ActionType::PatchCode => &["diff"],
            _ => &[],
        }
    }

    /// Fields serialized inside CDATA because they commonly contain `<` or
    /// `&`.
    pub fn cdata_fields(&self) -> &'static [&'static str] {
        match self {
            ActionType::WriteCode | ActionType::WriteFile => &["content"],
            ActionType::ReplaceCodeBlock => &["code_block"],
            ActionType::PatchCode => &["diff"],
            ActionType::Finish
            | ActionType::Information
            | ActionType::PatchComplete
            | ActionType::PauseForUserInput => &["message"],
            ActionType::McpTool => &["arguments"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured tool invocation derived from model output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// A non-empty, trimmed string parameter.
    pub fn nonempty_param(&self, key: &str) -> Option<&str> {
        self.str_param(key).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<Value>) {
        self.params.insert(key.to_owned(), value.into());
    }

    /// Canonical XML form: recognized fields in declaration order, payload
    /// fields wrapped in CDATA. This is what the control loop appends to
    /// memory for each action of a multi-action turn.
    pub fn to_xml(&self) -> String {
        let tool = self.action_type.as_str();
        let mut xml = format!("<{tool}>");
        for field in self.action_type.known_fields() {
            let Some(value) = self.params.get(*field) else {
                continue;
            };
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let needs_cdata = self.action_type.cdata_fields().contains(field)
                || text.contains('<')
                || text.contains('&');
            if needs_cdata {
                xml.push_str(&format!("<{field}><![CDATA[{text}]]></{field}>"));
            } else {
                xml.push_str(&format!("<{field}>{text}</{field}>"));
            }
        }
        xml.push_str(&format!("</{tool}>"));
        xml
    }
}

/// Outcome classification for an executed action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failure,
}

impl ActionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionStatus::Success)
    }
}

/// Result of executing an action. `content` is never empty for a delivered
/// result: callers synthesize a diagnostic block when the tool legitimately
/// produced nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub meta: ResultMeta,
}

impl ActionResult {
    pub fn success(action_type: ActionType, content: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            content: content.into(),
            stdout: None,
            stderr: None,
            error: None,
            comments: None,
            meta: ResultMeta::for_action(action_type),
        }
    }

    pub fn failure(action_type: ActionType, content: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failure,
            content: content.into(),
            stdout: None,
            stderr: None,
            error: None,
            comments: None,
            meta: ResultMeta::for_action(action_type),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Structured annotations on a result. `exit_code`, `signal` and the
/// `origin_*` fields are populated for `terminal_run`; `keyid` carries a
/// machine-readable failure class hint for the model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResultMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    #[serde(rename = "exitCode", default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(rename = "durationMs", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    #[serde(rename = "timedOut", default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl ResultMeta {
    pub fn for_action(action_type: ActionType) -> Self {
        Self {
            action_type: action_type.as_str().to_owned(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_name_roundtrip() {
        for t in ActionType::ALL {
            assert_eq!(ActionType::from_name(t.as_str()), Some(*t));
        }
        assert_eq!(ActionType::from_name("no_such_tool"), None);
    }

    #[test]
    fn action_type_serde_snake_case() {
        let json = serde_json::to_string(&ActionType::TerminalRun).unwrap();
        assert_eq!(json, r#""terminal_run""#);
        let parsed: ActionType = serde_json::from_str(r#""replace_code_block""#).unwrap();
        assert_eq!(parsed, ActionType::ReplaceCodeBlock);
    }

    #[test]
    fn pruned_tools() {
        assert!(ActionType::WriteCode.is_pruned_tool());
        assert!(ActionType::TerminalRun.is_pruned_tool());
        assert!(!ActionType::WebSearch.is_pruned_tool());
        assert!(!ActionType::Information.is_pruned_tool());
    }

    #[test]
    fn local_only_tools_never_reach_runtime() {
        assert!(ActionType::Information.is_local_only());
        assert!(ActionType::PatchComplete.is_local_only());
        assert!(!ActionType::TerminalRun.is_local_only());
        assert!(!ActionType::WriteCode.is_local_only());
    }

    #[test]
    fn xml_serialization_wraps_payload_in_cdata() {
        let action = Action::new(ActionType::WriteCode)
            .with_param("path", "a.py")
            .with_param("content", "def f():\n    return 1\n");
        let xml = action.to_xml();
        assert!(xml.starts_with("<write_code>"));
        assert!(xml.contains("<path>a.py</path>"));
        assert!(xml.contains("<content><![CDATA[def f():\n    return 1\n]]></content>"));
        assert!(xml.ends_with("</write_code>"));
    }

    #[test]
    fn xml_serialization_cdata_on_demand() {
        // `cwd` is not a CDATA field, but an angle bracket forces wrapping.
        let action = Action::new(ActionType::TerminalRun)
            .with_param("command", "echo")
            .with_param("args", "a<b");
        let xml = action.to_xml();
        assert!(xml.contains("<args><![CDATA[a<b]]></args>"));
        assert!(xml.contains("<command>echo</command>"));
    }

    #[test]
    fn xml_field_order_is_canonical() {
        let action = Action::new(ActionType::Finish)
            .with_param("message", "done")
            .with_param("status", "SUCCESS");
        let xml = action.to_xml();
        let status_pos = xml.find("<status>").unwrap();
        let message_pos = xml.find("<message>").unwrap();
        assert!(status_pos < message_pos);
    }

    #[test]
    fn result_meta_serde_field_names() {
        let mut meta = ResultMeta::for_action(ActionType::TerminalRun);
        meta.exit_code = Some(1);
        meta.duration_ms = Some(42);
        meta.timed_out = Some(true);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["exitCode"], 1);
        assert_eq!(json["durationMs"], 42);
        assert_eq!(json["timedOut"], true);
        assert_eq!(json["action_type"], "terminal_run");
    }

    #[test]
    fn result_constructors() {
        let ok = ActionResult::success(ActionType::ReadFile, "file body");
        assert!(ok.is_success());
        let bad = ActionResult::failure(ActionType::ReadFile, "missing").with_error("NOT_FOUND");
        assert!(!bad.is_success());
        assert_eq!(bad.error.as_deref(), Some("NOT_FOUND"));
    }
}

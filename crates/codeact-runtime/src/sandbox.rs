//! HTTP client for the sandbox runtime server.
//!
//! A delivered result is never empty: missing payloads and transport
//! errors are synthesized into structured failures carrying the request
//! identity and whatever diagnostics the error exposes.

use codeact_core::action::{Action, ActionResult, ActionType};
use codeact_core::truncate::clip;
use serde_json::{json, Value};
use tracing::warn;

#[derive(Clone)]
pub struct SandboxClient {
    http: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
}

impl SandboxClient {
    pub fn new(base_url: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            user_id,
        }
    }

    /// `POST /execute_action` with `{action, uuid, user_id}`.
    pub async fn execute_action(&self, action: &Action, uuid: &str) -> ActionResult {
        let url = format!("{}/execute_action", self.base_url.trim_end_matches('/'));
        let body = json!({
            "action": action,
            "uuid": uuid,
            "user_id": self.user_id,
        });

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return self.transport_failure(action, uuid, &e),
        };

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return self.synthesized_failure(
                    action,
                    uuid,
                    format!("runtime returned unparseable body (HTTP {status}): {e}"),
                    None,
                );
            }
        };

        // The result rides in the `data` field; anything else is a protocol
        // violation we surface rather than swallow.
        match payload.get("data") {
            Some(data) if data.is_object() => {
                match serde_json::from_value::<ActionResult>(data.clone()) {
                    Ok(mut result) => {
                        if result.content.is_empty() {
                            result.content = format!(
                                "(runtime returned an empty {} result)",
                                action.action_type
                            );
                        }
                        result
                    }
                    Err(e) => self.synthesized_failure(
                        action,
                        uuid,
                        format!("runtime result did not deserialize: {e}"),
                        Some(&payload),
                    ),
                }
            }
            _ => self.synthesized_failure(
                action,
                uuid,
                format!("runtime response carried no result payload (HTTP {status})"),
                Some(&payload),
            ),
        }
    }

    fn synthesized_failure(
        &self,
        action: &Action,
        uuid: &str,
        reason: String,
        payload: Option<&Value>,
    ) -> ActionResult {
        warn!(tool = %action.action_type, %reason, "sandbox call failed");
        let mut content = format!(
            "Runtime failure for {}\nuuid: {uuid}\nreason: {reason}",
            action.action_type
        );
        for key in ["command", "args", "cwd", "path"] {
            if let Some(v) = action.str_param(key) {
                content.push_str(&format!("\n{key}: {v}"));
            }
        }
        if let Some(payload) = payload {
            content.push_str(&format!("\npayload: {}", clip(&payload.to_string(), 2000)));
        }
        ActionResult::failure(action.action_type, content).with_error(reason)
    }

    fn transport_failure(
        &self,
        action: &Action,
        uuid: &str,
        error: &reqwest::Error,
    ) -> ActionResult {
        let mut diagnostics = Vec::new();
        if error.is_timeout() {
            diagnostics.push("code: ETIMEDOUT".to_owned());
        } else if error.is_connect() {
            diagnostics.push("code: ECONNREFUSED".to_owned());
            diagnostics.push("syscall: connect".to_owned());
        }
        if let Some(url) = error.url() {
            diagnostics.push(format!("address: {url}"));
        }
        if let Some(status) = error.status() {
            diagnostics.push(format!("status: {status}"));
        }

        let reason = format!("runtime unreachable: {error}");
        let mut result = self.synthesized_failure(action, uuid, reason, None);
        if !diagnostics.is_empty() {
            result.content.push('\n');
            result.content.push_str(&diagnostics.join("\n"));
        }
        result
    }
}

/// Which action types a remote runtime can execute for us.
pub fn remote_capable(tool: ActionType) -> bool {
    !tool.is_local_only()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_runtime_synthesizes_diagnostics() {
        // Nothing listens on this port.
        let client = SandboxClient::new("http://127.0.0.1:9", Some("1".into()));
        let action = Action::new(ActionType::TerminalRun)
            .with_param("command", "ls")
            .with_param("cwd", "src");
        let result = client.execute_action(&action, "conv_x").await;

        assert!(!result.is_success());
        assert!(!result.content.is_empty());
        assert!(result.content.contains("uuid: conv_x"));
        assert!(result.content.contains("command: ls"));
        assert!(result.content.contains("cwd: src"));
        assert!(result.error.is_some());
    }

    #[test]
    fn local_only_tools_never_remote() {
        assert!(!remote_capable(ActionType::Information));
        assert!(!remote_capable(ActionType::PatchComplete));
        assert!(!remote_capable(ActionType::Finish));
        assert!(remote_capable(ActionType::TerminalRun));
        assert!(remote_capable(ActionType::WebSearch));
    }
}

use async_trait::async_trait;
use codeact_core::action::{ActionResult, ActionStatus};
use codeact_core::truncate::clip;

/// Verdict from the reflection collaborator on one executed action.
#[derive(Clone, Debug)]
pub struct Reflection {
    pub status: ActionStatus,
    pub comments: String,
}

/// The external evaluator contract: given the current requirement and a
/// tool result, produce short commentary for the next prompt.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn evaluate(&self, requirement: &str, result: &ActionResult) -> Reflection;
}

/// Rule-based default used when no external evaluation service is wired:
/// failures echo their diagnostics, successes pass through silently.
pub struct RuleReflector;

#[async_trait]
impl Reflector for RuleReflector {
    async fn evaluate(&self, _requirement: &str, result: &ActionResult) -> Reflection {
        if result.is_success() {
            return Reflection {
                status: ActionStatus::Success,
                comments: String::new(),
            };
        }

        let mut comments = format!("The last {} failed: {}", result.meta.action_type, clip(&result.content, 2000));
        if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.is_empty()) {
            comments.push_str(&format!("\nstderr: {}", clip(stderr, 1000)));
        }
        if let Some(error) = result.error.as_deref() {
            comments.push_str(&format!("\nerror: {error}"));
        }
        comments.push_str("\nFix the cause before retrying the same action.");
        Reflection {
            status: ActionStatus::Failure,
            comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::action::ActionType;

    #[tokio::test]
    async fn success_produces_no_comments() {
        let result = ActionResult::success(ActionType::WriteCode, "ok");
        let reflection = RuleReflector.evaluate("req", &result).await;
        assert_eq!(reflection.status, ActionStatus::Success);
        assert!(reflection.comments.is_empty());
    }

    #[tokio::test]
    async fn failure_echoes_diagnostics() {
        let mut result = ActionResult::failure(ActionType::TerminalRun, "exit 2");
        result.stderr = Some("command not found".into());
        result.error = Some("spawn".into());
        let reflection = RuleReflector.evaluate("req", &result).await;
        assert_eq!(reflection.status, ActionStatus::Failure);
        assert!(reflection.comments.contains("terminal_run"));
        assert!(reflection.comments.contains("command not found"));
        assert!(reflection.comments.contains("spawn"));
    }
}

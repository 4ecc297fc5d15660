//! Tool-call parsing.
//!
//! The model emits tool calls in several shapes: canonical XML blocks,
//! OpenAI-style JSON, channel-enveloped payloads, and bare JSON params with
//! an envelope hint. This crate normalizes all of them into canonical XML,
//! extracts the tool blocks, resolves each into an [`Action`], and
//! validates arguments. Parse and validation problems never surface as
//! errors: an invalid block becomes a synthetic `evaluation(failure)`
//! action the control loop can show to the model.

pub mod blocks;
pub mod normalize;
pub mod resolve;
pub mod validate;

use codeact_core::action::{Action, ActionType};
use tracing::debug;

pub use blocks::{extract_blocks, RawBlock};
pub use normalize::{normalize, strip_think};
pub use resolve::resolve_block;
pub use validate::{evaluation_failure, validate};

/// Full pipeline: raw model output to an ordered action list.
pub fn parse_actions(raw: &str) -> Vec<Action> {
    let visible = strip_think(raw);
    let normalized = normalize(&visible);
    let mut actions = Vec::new();

    for block in extract_blocks(&normalized) {
        match resolve_block(&block) {
            // An invalid finish is the control loop's call: it soft-fails
            // there so the model can correct it without a retry penalty.
            Ok(action) if action.action_type == ActionType::Finish => actions.push(action),
            Ok(action) => match validate(&action) {
                Ok(()) => actions.push(action),
                Err(reason) => {
                    debug!(tool = %block.name, %reason, "rejecting invalid tool call");
                    actions.push(evaluation_failure(&reason));
                }
            },
            Err(reason) => {
                debug!(tool = %block.name, %reason, "unresolvable tool block");
                actions.push(evaluation_failure(&reason));
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::action::{ActionType, Action};

    #[test]
    fn parses_single_canonical_block() {
        let raw = "I'll write the file now.\n<write_code><path>a.py</path><content><![CDATA[print(1)\n]]></content></write_code>";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::WriteCode);
        assert_eq!(actions[0].str_param("path"), Some("a.py"));
        assert_eq!(actions[0].str_param("content"), Some("print(1)\n"));
    }

    #[test]
    fn parses_multiple_blocks_in_order() {
        let raw = "<read_file><path>a.py</path></read_file>\nsome text\n<terminal_run><command>ls</command></terminal_run>";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_type, ActionType::ReadFile);
        assert_eq!(actions[1].action_type, ActionType::TerminalRun);
    }

    #[test]
    fn invalid_block_becomes_evaluation_failure() {
        let raw = "<read_url><url>ftp://example.com</url></read_url>";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Evaluation);
        assert_eq!(actions[0].str_param("status"), Some("failure"));
        assert!(actions[0].str_param("comments").unwrap().contains("url"));
    }

    #[test]
    fn tool_calls_inside_think_are_ignored() {
        let raw = "<think>maybe <terminal_run><command>rm -rf /</command></terminal_run></think><read_file><path>a</path></read_file>";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::ReadFile);
    }

    #[test]
    fn no_tool_output_yields_no_actions() {
        assert!(parse_actions("Just narration, no calls.").is_empty());
    }

    #[test]
    fn parser_idempotence_over_canonical_forms() {
        let cases = vec![
            Action::new(ActionType::WriteCode)
                .with_param("path", "src/a.py")
                .with_param("content", "a < b and b > c\n"),
            Action::new(ActionType::TerminalRun)
                .with_param("command", "pytest")
                .with_param("args", "-q tests/")
                .with_param("cwd", "."),
            Action::new(ActionType::Finish)
                .with_param("status", "SUCCESS")
                .with_param("message", "all done"),
            Action::new(ActionType::ReplaceCodeBlock)
                .with_param("path", "m.py")
                .with_param("code_block", "def f():\n    return 2\n"),
            Action::new(ActionType::WebSearch)
                .with_param("query", "rust sse decoder")
                .with_param("num_results", 5),
            Action::new(ActionType::McpTool)
                .with_param("name", "list_issues")
                .with_param("arguments", serde_json::json!({"repo": "x/y"})),
        ];
        for action in cases {
            let parsed = parse_actions(&action.to_xml());
            assert_eq!(parsed.len(), 1, "for {}", action.to_xml());
            assert_eq!(parsed[0], action, "for {}", action.to_xml());
        }
    }

    #[test]
    fn normalization_convergence() {
        let inputs = vec![
            "<write_code><path>a.py</path><content>if a < b: pass</content></write_code>".to_owned(),
            r#"{"type":"tool_call","name":"read_file","arguments":{"path":"x.py"}}"#.to_owned(),
            "<finish status=\"SUCCESS\" message=\"ok\"/>".to_owned(),
            "plain text, nothing to do".to_owned(),
        ];
        for raw in inputs {
            let once = normalize(&raw);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not convergent for {raw}");
        }
    }
}

//! Normalization of raw model output into canonical tool XML.
//!
//! Applied before block extraction, in order:
//!
//! 1. strip `<|channel|>…<|message|>` envelopes, keeping payloads and any
//!    `to=<tool>` hint,
//! 2. convert JSON-only tool calls (several provider shapes) to XML,
//! 3. wrap bare JSON params in the hinted tool when the envelope named one,
//! 4. rewrite the self-closing attribute form of `<finish …/>`,
//! 5. wrap payload-bearing fields containing `<` or `&` in CDATA.
//!
//! The whole pass is convergent: `normalize(normalize(x)) == normalize(x)`.

use codeact_core::action::ActionType;
use serde_json::{Map, Value};

/// Remove `<think>…</think>` spans. Unterminated spans drop through to the
/// end of input.
pub fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// The full normalization pipeline.
pub fn normalize(raw: &str) -> String {
    let (text, hint) = strip_channel_envelopes(raw);
    let text = convert_json_tool_calls(&text, hint.as_deref());
    let text = canonicalize_finish(&text);
    wrap_payload_cdata(&text)
}

// ── 1. channel envelopes ────────────────────────────────────────────────

const CHANNEL: &str = "<|channel|>";
const MESSAGE: &str = "<|message|>";
const TERMINATORS: &[&str] = &["<|end|>", "<|return|>", "<|call|>"];

fn strip_channel_envelopes(raw: &str) -> (String, Option<String>) {
    if !raw.contains(CHANNEL) {
        return (raw.to_owned(), None);
    }

    let mut out = String::with_capacity(raw.len());
    let mut hint = None;
    let mut rest = raw;

    while let Some(start) = rest.find(CHANNEL) {
        out.push_str(&rest[..start]);
        let after_channel = &rest[start + CHANNEL.len()..];
        let Some(msg_at) = after_channel.find(MESSAGE) else {
            // Malformed envelope: drop the marker, keep the rest verbatim.
            rest = after_channel;
            continue;
        };
        let header = &after_channel[..msg_at];
        if let Some(h) = extract_tool_hint(header) {
            hint = Some(h);
        }

        let payload_and_rest = &after_channel[msg_at + MESSAGE.len()..];
        let payload_end = TERMINATORS
            .iter()
            .filter_map(|t| payload_and_rest.find(t).map(|i| (i, t.len())))
            .chain(payload_and_rest.find(CHANNEL).map(|i| (i, 0)))
            .min_by_key(|(i, _)| *i);

        match payload_end {
            Some((idx, skip)) => {
                out.push_str(&payload_and_rest[..idx]);
                rest = &payload_and_rest[idx + skip..];
            }
            None => {
                out.push_str(payload_and_rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    (out, hint)
}

fn extract_tool_hint(header: &str) -> Option<String> {
    let at = header.find("to=")?;
    let token: String = header[at + 3..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let tool = token.strip_prefix("functions.").unwrap_or(&token);
    if tool.is_empty() {
        None
    } else {
        Some(tool.to_owned())
    }
}

// ── 2 + 3. JSON tool calls ──────────────────────────────────────────────

fn convert_json_tool_calls(text: &str, hint: Option<&str>) -> String {
    let trimmed = text.trim();
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return text.to_owned();
    };
    let Value::Object(obj) = &value else {
        return text.to_owned();
    };

    if let Some(calls) = recognized_calls(obj) {
        return calls
            .iter()
            .map(|(name, args)| xml_for_call(name, args))
            .collect::<Vec<_>>()
            .join("\n");
    }

    // Bare params object with an envelope hint naming the tool.
    if let Some(tool) = hint {
        return xml_for_call(tool, obj);
    }

    text.to_owned()
}

type Call = (String, Map<String, Value>);

/// Match the known JSON tool-call shapes; `None` means "not a tool call".
fn recognized_calls(obj: &Map<String, Value>) -> Option<Vec<Call>> {
    // {type:"tool_call", name, arguments}
    if obj.get("type").and_then(Value::as_str) == Some("tool_call") {
        return single_call(obj).map(|c| vec![c]);
    }
    // {tool_calls:[{function:{name, arguments}}]}
    if let Some(Value::Array(items)) = obj.get("tool_calls") {
        return Some(calls_from_array(items));
    }
    // {choices:[{message:{tool_calls:[…]}}]}
    if let Some(items) = obj
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
    {
        return Some(calls_from_array(items));
    }
    // {output:[{type:"tool_call", name, arguments}…]}
    if let Some(Value::Array(items)) = obj.get("output") {
        let calls: Vec<Call> = items
            .iter()
            .filter_map(Value::as_object)
            .filter(|o| o.get("type").and_then(Value::as_str) == Some("tool_call"))
            .filter_map(single_call)
            .collect();
        if !calls.is_empty() {
            return Some(calls);
        }
    }
    // {name, arguments|params}
    if obj.contains_key("name") && (obj.contains_key("arguments") || obj.contains_key("params")) {
        return single_call(obj).map(|c| vec![c]);
    }
    None
}

fn calls_from_array(items: &[Value]) -> Vec<Call> {
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            match obj.get("function").and_then(Value::as_object) {
                Some(func) => single_call(func),
                None => single_call(obj),
            }
        })
        .collect()
}

fn single_call(obj: &Map<String, Value>) -> Option<Call> {
    let name = obj.get("name")?.as_str()?.to_owned();
    let args = obj.get("arguments").or_else(|| obj.get("params"));
    let args = match args {
        Some(Value::Object(map)) => map.clone(),
        // Arguments serialized as a JSON string.
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    };
    Some((name, args))
}

/// Render a call as canonical XML: recognized fields first in declaration
/// order, anything else after, CDATA where the field needs it.
fn xml_for_call(name: &str, args: &Map<String, Value>) -> String {
    let tool = ActionType::from_name(name);
    let known: &[&str] = tool.map(|t| t.known_fields()).unwrap_or(&[]);
    let cdata: &[&str] = tool.map(|t| t.cdata_fields()).unwrap_or(&[]);

    let mut keys: Vec<&String> = Vec::new();
    for field in known {
        if let Some((k, _)) = args.get_key_value(*field) {
            keys.push(k);
        }
    }
    for k in args.keys() {
        if !known.contains(&k.as_str()) {
            keys.push(k);
        }
    }

    let mut xml = format!("<{name}>");
    for key in keys {
        let value = &args[key.as_str()];
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if cdata.contains(&key.as_str()) || text.contains('<') || text.contains('&') {
            xml.push_str(&format!("<{key}><![CDATA[{text}]]></{key}>"));
        } else {
            xml.push_str(&format!("<{key}>{text}</{key}>"));
        }
    }
    xml.push_str(&format!("</{name}>"));
    xml
}

// ── 4. finish attribute form ────────────────────────────────────────────

fn canonicalize_finish(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<finish ") {
        let Some(tag_end) = rest[start..].find('>') else {
            break;
        };
        let tag_end = start + tag_end;
        if !rest[..tag_end].ends_with('/') {
            // Already nested form; pass through.
            out.push_str(&rest[..tag_end + 1]);
            rest = &rest[tag_end + 1..];
            continue;
        }

        let attrs = &rest[start + "<finish ".len()..tag_end - 1];
        let status = attr_value(attrs, "status").unwrap_or_default();
        let message = attr_value(attrs, "message").unwrap_or_default();

        out.push_str(&rest[..start]);
        out.push_str(&format!(
            "<finish><status>{status}</status><message><![CDATA[{message}]]></message></finish>"
        ));
        rest = &rest[tag_end + 1..];
    }
    out.push_str(rest);
    out
}

fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let at = attrs.find(&format!("{name}="))?;
    let after = &attrs[at + name.len() + 1..];
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &after[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_owned())
}

// ── 5. payload CDATA ────────────────────────────────────────────────────

const PAYLOAD_TAGS: &[&str] = &["content", "code_block", "diff", "message"];

fn wrap_payload_cdata(text: &str) -> String {
    let mut out = text.to_owned();
    for tag in PAYLOAD_TAGS {
        out = wrap_tag_cdata(&out, tag);
    }
    out
}

fn wrap_tag_cdata(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(&open) {
        let body_at = start + open.len();
        let Some(body_len) = rest[body_at..].find(&close) else {
            break;
        };
        let body = &rest[body_at..body_at + body_len];
        let needs_wrap = (body.contains('<') || body.contains('&'))
            && !(body.trim_start().starts_with("<![CDATA[") && body.trim_end().ends_with("]]>"));

        out.push_str(&rest[..body_at]);
        if needs_wrap {
            out.push_str(&format!("<![CDATA[{body}]]>"));
        } else {
            out.push_str(body);
        }
        out.push_str(&close);
        rest = &rest[body_at + body_len + close.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_think_removes_span() {
        assert_eq!(strip_think("<think>hmm</think>hello"), "hello");
        assert_eq!(strip_think("a<think>b</think>c<think>d</think>e"), "ace");
        assert_eq!(strip_think("keep <think>dropped to end"), "keep ");
        assert_eq!(strip_think("no think here"), "no think here");
    }

    #[test]
    fn envelope_payload_kept_and_hint_captured() {
        let raw = "<|channel|>commentary to=functions.terminal_run <|constrain|>json<|message|>{\"command\":\"ls\"}<|end|>";
        let (text, hint) = strip_channel_envelopes(raw);
        assert_eq!(text, "{\"command\":\"ls\"}");
        assert_eq!(hint.as_deref(), Some("terminal_run"));
    }

    #[test]
    fn envelope_without_hint() {
        let raw = "<|channel|>final<|message|>done here<|return|>";
        let (text, hint) = strip_channel_envelopes(raw);
        assert_eq!(text, "done here");
        assert!(hint.is_none());
    }

    #[test]
    fn hinted_bare_params_become_hinted_tool() {
        let raw = "<|channel|>commentary to=functions.write_code<|message|>{\"path\":\"a.py\",\"content\":\"x=1\"}<|end|>";
        let normalized = normalize(raw);
        assert!(normalized.starts_with("<write_code>"));
        assert!(normalized.contains("<path>a.py</path>"));
        assert!(normalized.contains("x=1"));
    }

    #[test]
    fn json_type_tool_call_shape() {
        let raw = r#"{"type":"tool_call","name":"read_file","arguments":{"path":"x.py"}}"#;
        assert_eq!(normalize(raw), "<read_file><path>x.py</path></read_file>");
    }

    #[test]
    fn json_name_params_shape_with_string_arguments() {
        let raw = r#"{"name":"terminal_run","arguments":"{\"command\":\"echo hi\"}"}"#;
        let normalized = normalize(raw);
        assert!(normalized.starts_with("<terminal_run>"));
        assert!(normalized.contains("<command>echo hi</command>"));
    }

    #[test]
    fn json_tool_calls_array_shape() {
        let raw = r#"{"tool_calls":[{"function":{"name":"read_file","arguments":{"path":"a"}}},{"function":{"name":"read_file","arguments":{"path":"b"}}}]}"#;
        let normalized = normalize(raw);
        assert_eq!(
            normalized,
            "<read_file><path>a</path></read_file>\n<read_file><path>b</path></read_file>"
        );
    }

    #[test]
    fn json_choices_shape() {
        let raw = r#"{"choices":[{"message":{"tool_calls":[{"function":{"name":"web_search","arguments":{"query":"rust"}}}]}}]}"#;
        let normalized = normalize(raw);
        assert_eq!(normalized, "<web_search><query>rust</query></web_search>");
    }

    #[test]
    fn json_output_array_shape() {
        let raw = r#"{"output":[{"type":"tool_call","name":"read_file","arguments":{"path":"z"}}]}"#;
        assert_eq!(normalize(raw), "<read_file><path>z</path></read_file>");
    }

    #[test]
    fn plain_json_without_tool_shape_untouched() {
        let raw = r#"{"result": 42}"#;
        assert_eq!(normalize(raw), raw);
    }

    #[test]
    fn finish_attribute_form_rewritten() {
        let raw = r#"<finish status="SUCCESS" message="done"/>"#;
        assert_eq!(
            normalize(raw),
            "<finish><status>SUCCESS</status><message><![CDATA[done]]></message></finish>"
        );
    }

    #[test]
    fn finish_nested_form_untouched() {
        let raw = "<finish><status>FAILED</status><message><![CDATA[no]]></message></finish>";
        assert_eq!(normalize(raw), raw);
    }

    #[test]
    fn payload_fields_get_cdata() {
        let raw = "<write_code><path>a.py</path><content>if a < b: pass</content></write_code>";
        let normalized = normalize(raw);
        assert!(normalized.contains("<content><![CDATA[if a < b: pass]]></content>"));
        // Convergent.
        assert_eq!(normalize(&normalized), normalized);
    }

    #[test]
    fn existing_cdata_not_double_wrapped() {
        let raw = "<write_code><path>a</path><content><![CDATA[x < y]]></content></write_code>";
        assert_eq!(normalize(raw), raw);
    }

    #[test]
    fn ampersand_triggers_cdata() {
        let raw = "<replace_code_block><path>a</path><code_block>a && b</code_block></replace_code_block>";
        let normalized = normalize(raw);
        assert!(normalized.contains("<code_block><![CDATA[a && b]]></code_block>"));
    }

    #[test]
    fn plain_text_untouched() {
        let raw = "nothing interesting here";
        assert_eq!(normalize(raw), raw);
    }
}

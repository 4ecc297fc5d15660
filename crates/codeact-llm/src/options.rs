use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Allow-listed pass-through options for a chat-completion request. Unknown
/// keys in the source value are dropped on construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stop: Option<Value>,
    pub stream: Option<bool>,
    pub assistant_id: Option<String>,
    pub response_format: Option<Value>,
    pub tools: Option<Value>,
    pub enable_thinking: Option<bool>,
}

impl ChatOptions {
    /// Build from an arbitrary JSON object, keeping only recognized keys.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Merge the set options into a request body.
    pub fn apply(&self, body: &mut Map<String, Value>) {
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                body.insert(key.to_owned(), v);
            }
        };
        put("temperature", self.temperature.and_then(|v| serde_json::Number::from_f64(v).map(Value::Number)));
        put("top_p", self.top_p.and_then(|v| serde_json::Number::from_f64(v).map(Value::Number)));
        put("max_tokens", self.max_tokens.map(|v| Value::Number(v.into())));
        put("stop", self.stop.clone());
        put("stream", self.stream.map(Value::Bool));
        put("assistant_id", self.assistant_id.clone().map(Value::String));
        put("response_format", self.response_format.clone());
        put("tools", self.tools.clone());
        put("enable_thinking", self.enable_thinking.map(Value::Bool));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_options_are_dropped() {
        let opts = ChatOptions::from_value(&json!({
            "temperature": 0.2,
            "max_tokens": 4096,
            "frequency_penalty": 1.5,
            "logit_bias": {"50256": -100}
        }));
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(4096));

        let mut body = Map::new();
        opts.apply(&mut body);
        assert!(body.contains_key("temperature"));
        assert!(!body.contains_key("frequency_penalty"));
        assert!(!body.contains_key("logit_bias"));
    }

    #[test]
    fn apply_skips_unset_fields() {
        let opts = ChatOptions::default();
        let mut body = Map::new();
        opts.apply(&mut body);
        assert!(body.is_empty());
    }

    #[test]
    fn stop_and_tools_pass_through_verbatim() {
        let opts = ChatOptions::from_value(&json!({
            "stop": ["\n\n"],
            "tools": [{"type": "function"}],
            "enable_thinking": true
        }));
        let mut body = Map::new();
        opts.apply(&mut body);
        assert_eq!(body["stop"], json!(["\n\n"]));
        assert_eq!(body["enable_thinking"], json!(true));
    }
}

//! OpenAI-compatible completion types.
//!
//! Reference: https://platform.openai.com/docs/api-reference/completions

use serde::{Deserialize, Serialize};

/// Request body for POST /v1/completions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionsRequest {
    /// Model ID or tag
    #[serde(default)]
    pub model: String,

    /// Prompt text (the code before the cursor)
    #[serde(default)]
    pub prompt: String,

    /// Text after the insertion point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0-2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Frequency penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Presence penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Streaming is not supported; always sent as `false`
    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub echo: bool,
}

/// One generated choice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,
}

/// Response body of POST /v1/completions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionsResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub object: String,

    #[serde(default)]
    pub created: i64,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<Choice>,

    #[serde(default)]
    pub usage: Usage,
}

impl CompletionsResponse {
    /// Text of the first choice, if any
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text.as_str()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_skips_unset_fields() {
        let request = CompletionsRequest {
            model: "deepseek-coder".to_string(),
            prompt: "def add(a, b):".to_string(),
            max_tokens: Some(64),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["stream"], false);
        assert!(json.get("suffix").is_none());
        assert!(json.get("stop").is_none());
        assert!(json.get("echo").is_none());
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let rsp: CompletionsResponse =
            serde_json::from_str(r#"{"choices":[{"text":"    return a + b"}]}"#).unwrap();
        assert_eq!(rsp.text(), "    return a + b");
        assert_eq!(rsp.usage.total_tokens, 0);

        let rsp: CompletionsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(rsp.text(), "");
    }
}

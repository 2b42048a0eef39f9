//! Editor plugin (v1) completion request.

use serde::{Deserialize, Serialize};

/// Prompt fragments around the cursor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOptions {
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub suffix: String,

    /// Related code gathered by the client
    #[serde(default)]
    pub code_context: String,
}

/// Request body for POST /code-completion/api/v1/completions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionInput {
    /// Model name or tag; empty means any pool
    #[serde(default)]
    pub model: String,

    /// Legacy prompt, used as the prefix when `prompt_options` is absent
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub language_id: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub completion_id: String,

    #[serde(default)]
    pub temperature: f32,

    /// How the completion was triggered (e.g. "auto", "manual")
    #[serde(default)]
    pub trigger_mode: String,

    #[serde(default)]
    pub parent_id: String,

    #[serde(default)]
    pub stop: Vec<String>,

    /// Attach the downstream exchange to the reply
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub prompt_options: Option<PromptOptions>,
}

impl CompletionInput {
    /// Prompt fragments, falling back to the legacy `prompt` field
    pub fn prompts(&self) -> PromptOptions {
        match &self.prompt_options {
            Some(options) => options.clone(),
            None => PromptOptions { prefix: self.prompt.clone(), ..Default::default() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_prefer_prompt_options() {
        let input: CompletionInput = serde_json::from_str(
            r#"{
                "client_id": "alice",
                "completion_id": "c1",
                "prompt": "legacy",
                "prompt_options": {"prefix": "fn main() {", "suffix": "}", "code_context": "use std::io;"}
            }"#,
        )
        .unwrap();
        let prompts = input.prompts();
        assert_eq!(prompts.prefix, "fn main() {");
        assert_eq!(prompts.code_context, "use std::io;");
    }

    #[test]
    fn test_prompts_fall_back_to_legacy_prompt() {
        let input: CompletionInput = serde_json::from_str(r#"{"prompt": "let x = "}"#).unwrap();
        let prompts = input.prompts();
        assert_eq!(prompts.prefix, "let x = ");
        assert!(prompts.suffix.is_empty());
    }
}

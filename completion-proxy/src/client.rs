//! Downstream client for models speaking the OpenAI completions protocol.
//!
//! One [`OpenAiModel`] is built per configured model and owned by that
//! model's pool. The pool bounds each call by the request's deadline and
//! cancellation, so this client only applies the per-model HTTP timeout.

use async_trait::async_trait;
use completion_core::{
    CompletionParameter, CompletionVerbose, Llm, LlmCompletion, LlmError, LlmUsage, ModelConfig,
};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::convert;
use crate::error::ProxyError;
use crate::types::openai::{CompletionsRequest, CompletionsResponse};

/// OpenAI-compatible completion model
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    cfg: ModelConfig,
    client: Client,
}

impl OpenAiModel {
    /// Create a client for `cfg`
    pub fn new(cfg: ModelConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        info!(
            model = %cfg.pool_name(),
            url = %cfg.completions_url,
            fim = cfg.fim_mode,
            "Creating completion model client"
        );
        Ok(Self { cfg, client })
    }

    /// Body sent downstream for `para`
    pub fn request_body(&self, para: &CompletionParameter) -> CompletionsRequest {
        convert::parameter_to_openai(&self.cfg, para)
    }

    fn verbose(&self, para: &CompletionParameter, input: &Value, output: Option<Value>) -> Option<CompletionVerbose> {
        para.verbose.then(|| CompletionVerbose {
            id: self.cfg.model_title.clone(),
            input: input.clone(),
            output,
        })
    }
}

#[async_trait]
impl Llm for OpenAiModel {
    #[instrument(skip(self, para), fields(model = %self.cfg.pool_name(), completion_id = %para.completion_id))]
    async fn completions(&self, para: &CompletionParameter) -> Result<LlmCompletion, LlmError> {
        let body = self.request_body(para);
        let input = serde_json::to_value(&body).map_err(|e| LlmError::request(e.to_string()))?;

        let mut request = self.client.post(&self.cfg.completions_url).json(&body);
        if !self.cfg.authorization.is_empty() {
            request = request.header(AUTHORIZATION, &self.cfg.authorization);
        }

        debug!(url = %self.cfg.completions_url, "Sending completion request");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Completion request failed");
                return Err(attach(map_reqwest_error(e), self.verbose(para, &input, None)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Model returned error");
            let output = serde_json::from_str(&text).unwrap_or(Value::String(text));
            let err = LlmError::model(format!("Invalid StatusCode({})", status.as_u16()));
            return Err(attach(err, self.verbose(para, &input, Some(output))));
        }

        let output: Value = match response.json().await {
            Ok(output) => output,
            Err(e) => return Err(attach(map_reqwest_error(e), self.verbose(para, &input, None))),
        };
        let parsed: CompletionsResponse = serde_json::from_value(output.clone()).map_err(|e| {
            attach(
                LlmError::server(format!("invalid completion response: {e}")),
                self.verbose(para, &input, Some(output.clone())),
            )
        })?;

        debug!(
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "Completion received"
        );
        Ok(LlmCompletion {
            text: parsed.text().to_string(),
            usage: LlmUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
            },
            verbose: self.verbose(para, &input, Some(output)),
        })
    }

    fn config(&self) -> &ModelConfig {
        &self.cfg
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::timeout(e.to_string())
    } else if e.is_builder() {
        LlmError::request(e.to_string())
    } else {
        LlmError::server(e.to_string())
    }
}

fn attach(err: LlmError, verbose: Option<CompletionVerbose>) -> LlmError {
    match verbose {
        Some(verbose) => err.with_verbose(verbose),
        None => err,
    }
}

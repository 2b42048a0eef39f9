//! Conversion between wire requests and the completion parameter.
//!
//! Inbound: v1 plugin requests and OpenAI requests become a
//! [`CompletionParameter`]. Outbound: a parameter becomes the OpenAI
//! completions body sent to a downstream model, with the prompt assembled
//! according to the model's FIM settings.

use completion_core::{CompletionParameter, ModelConfig};
use tracing::debug;
use uuid::Uuid;

use crate::types::openai;
use crate::types::v1;

/// End-of-text marker emitted by DeepSeek coder models
pub const END_OF_SENTENCE: &str = "<｜end▁of▁sentence｜>";

/// Convert a v1 plugin request into a completion parameter.
/// Model-specific limits are applied later by [`adapt_to_model`].
pub fn v1_to_parameter(input: &v1::CompletionInput) -> CompletionParameter {
    let prompts = input.prompts();
    CompletionParameter {
        completion_id: input.completion_id.clone(),
        client_id: input.client_id.clone(),
        language: input.language_id.clone(),
        model: input.model.clone(),
        max_tokens: 0,
        temperature: input.temperature,
        stop: input.stop.clone(),
        prefix: prompts.prefix,
        suffix: prompts.suffix,
        code_context: prompts.code_context,
        verbose: input.verbose,
    }
}

/// Fit a parameter to the model that will serve it: truncate the prompt,
/// add stop words and cap the output length.
pub fn adapt_to_model(cfg: &ModelConfig, para: &mut CompletionParameter) {
    truncate_prompt(cfg, para);
    para.stop = prepare_stop_words(&para.stop, &para.suffix);
    para.max_tokens = cfg.max_output;
    debug!(
        model = %cfg.pool_name(),
        completion_id = %para.completion_id,
        prefix = para.prefix.len(),
        suffix = para.suffix.len(),
        context = para.code_context.len(),
        "Adapted completion request"
    );
}

/// Convert an OpenAI request. The caller has no client identity, so the
/// completion gets a generated id.
pub fn openai_to_parameter(request: &openai::CompletionsRequest) -> CompletionParameter {
    CompletionParameter {
        completion_id: format!("cmpl-{}", Uuid::new_v4().simple()),
        client_id: String::new(),
        language: String::new(),
        model: request.model.clone(),
        max_tokens: request.max_tokens.unwrap_or(0),
        temperature: request.temperature.unwrap_or(0.0),
        stop: request.stop.clone(),
        prefix: request.prompt.clone(),
        suffix: request.suffix.clone().unwrap_or_default(),
        code_context: String::new(),
        verbose: false,
    }
}

/// Build the downstream OpenAI completions body for `para`
pub fn parameter_to_openai(cfg: &ModelConfig, para: &CompletionParameter) -> openai::CompletionsRequest {
    let mut stop = para.stop.clone();
    if cfg.fim_mode {
        for word in &cfg.fim_stop {
            if !stop.contains(word) {
                stop.push(word.clone());
            }
        }
    }

    let max_tokens = effective_max_tokens(para.max_tokens, cfg.max_output);
    openai::CompletionsRequest {
        model: cfg.model_name.clone(),
        prompt: build_prompt(cfg, para),
        suffix: (!cfg.fim_mode && !para.suffix.is_empty()).then(|| para.suffix.clone()),
        max_tokens: (max_tokens > 0).then_some(max_tokens),
        temperature: Some(para.temperature),
        stop,
        stream: false,
        ..Default::default()
    }
}

/// Assemble the prompt text.
///
/// FIM mode: `begin + context + "\n" + prefix + hole + suffix + end`.
/// Otherwise the context is prepended to the prefix and the suffix travels
/// in its own field.
pub fn build_prompt(cfg: &ModelConfig, para: &CompletionParameter) -> String {
    if cfg.fim_mode {
        return format!(
            "{}{}\n{}{}{}{}",
            cfg.fim_begin, para.code_context, para.prefix, cfg.fim_hole, para.suffix, cfg.fim_end
        );
    }
    if para.code_context.is_empty() {
        para.prefix.clone()
    } else {
        format!("{}\n{}", para.code_context, para.prefix)
    }
}

/// Requested token budget capped by the model's limit; zero means unset
fn effective_max_tokens(requested: u32, max_output: u32) -> u32 {
    match (requested, max_output) {
        (0, limit) => limit,
        (requested, 0) => requested,
        (requested, limit) => requested.min(limit),
    }
}

/// Cut the prompt to the model's limits, counted in characters.
///
/// The prefix budget covers prefix plus context. Context is dropped first;
/// if the prefix alone is too long it is cut from the front and the partial
/// first line removed. A long suffix is cut from the back and its partial
/// last line removed.
pub fn truncate_prompt(cfg: &ModelConfig, para: &mut CompletionParameter) {
    let prefix_len = para.prefix.chars().count();
    let context_len = para.code_context.chars().count();

    if cfg.max_prefix > 0 && prefix_len + context_len > cfg.max_prefix {
        if prefix_len >= cfg.max_prefix {
            let tail = skip_chars(&para.prefix, prefix_len - cfg.max_prefix);
            para.prefix = trim_first_line(tail).to_string();
            para.code_context.clear();
        } else {
            let cut = prefix_len + context_len - cfg.max_prefix;
            para.code_context = skip_chars(&para.code_context, cut).to_string();
        }
    }

    if cfg.max_suffix > 0 && para.suffix.chars().count() > cfg.max_suffix {
        let head = take_chars(&para.suffix, cfg.max_suffix);
        para.suffix = trim_last_line(head).to_string();
    }
}

/// Caller stop words, the end-of-text marker, and blank-line stops when
/// nothing follows the cursor.
pub fn prepare_stop_words(stop: &[String], suffix: &str) -> Vec<String> {
    let mut words = stop.to_vec();
    words.push(END_OF_SENTENCE.to_string());
    if suffix.trim().is_empty() {
        words.push("\n\n".to_string());
        words.push("\n\n\n".to_string());
    }
    words
}

fn skip_chars(text: &str, n: usize) -> &str {
    text.char_indices().nth(n).map_or("", |(i, _)| &text[i..])
}

fn take_chars(text: &str, n: usize) -> &str {
    text.char_indices().nth(n).map_or(text, |(i, _)| &text[..i])
}

/// Drop the first line unless it is empty (it was likely cut mid-line)
fn trim_first_line(text: &str) -> &str {
    if text.starts_with('\n') || text.starts_with("\r\n") {
        return text;
    }
    text.find('\n').map_or("", |pos| &text[pos + 1..])
}

/// Drop an unterminated last line when there is more than one line
fn trim_last_line(text: &str) -> &str {
    match text.rfind('\n') {
        Some(pos) if pos + 1 < text.len() => &text[..=pos],
        _ => text,
    }
}

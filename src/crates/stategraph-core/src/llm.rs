//! Language model boundary
//!
//! Graph nodes talk to a language model only through [`ChatModel`]. The
//! executor never inspects prompts or replies; applications pass an
//! `Arc<dyn ChatModel>` into the nodes that need one. Tests plug in
//! deterministic stubs.

use crate::error::{GraphError, Result};
use crate::messages::Message;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A chat completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,

    pub config: ChatConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            config: ChatConfig::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.config.stop_sequences = sequences;
        self
    }

    /// Concatenated content of the system messages
    pub fn system_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == crate::messages::Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub temperature: Option<f32>,

    pub max_tokens: Option<usize>,

    pub stop_sequences: Vec<String>,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,

    pub usage: Option<UsageMetadata>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self { message, usage: None }
    }
}

/// An opaque text-generation capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate one reply to the conversation in `request`
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Whether the backing service answers at all
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Ask `model` for a JSON reply and decode it into `T`.
///
/// The reply may wrap the JSON in prose or a fenced code block. Every
/// top-level object or array in the reply is tried in order and the first
/// one that decodes into `T` wins, so a citation like `[1]` ahead of the
/// payload is skipped.
pub async fn structured_output<T: DeserializeOwned>(
    model: &dyn ChatModel,
    request: ChatRequest,
) -> Result<T> {
    let response = model.chat(request).await?;
    let content = &response.message.content;

    let mut first_error = None;
    for candidate in json_candidates(content) {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(match first_error {
        Some(e) => GraphError::Model(format!("reply does not match the expected shape: {}", e)),
        None => GraphError::Model(format!("expected a JSON reply, got: {}", truncate(content, 200))),
    })
}

/// End (exclusive) of the bracket group opening at `start`, if it closes
/// with matching brackets
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => closers.push(b'}'),
            b'[' => closers.push(b']'),
            b'}' | b']' => {
                if closers.pop()? != b {
                    return None;
                }
                if closers.is_empty() {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced, non-overlapping `{...}` / `[...]` spans of `text`, left to right
pub fn json_candidates(text: &str) -> impl Iterator<Item = &str> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        while let Some(found) = text[pos..].find(['{', '[']) {
            let start = pos + found;
            match balanced_end(text, start) {
                Some(end) => {
                    pos = end;
                    return Some(&text[start..end]);
                }
                None => pos = start + 1,
            }
        }
        None
    })
}

/// First valid JSON object embedded in `text`, or the first array when the
/// text holds no object
pub fn extract_json(text: &str) -> Option<&str> {
    let mut first_array = None;
    for candidate in json_candidates(text) {
        if serde_json::from_str::<serde_json::Value>(candidate).is_err() {
            continue;
        }
        if candidate.starts_with('{') {
            return Some(candidate);
        }
        first_array.get_or_insert(candidate);
    }
    first_array
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedModel(&'static str);

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse::new(Message::ai(self.0)))
        }
    }

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let text = "Sure!\n```json\n{\"topic\": \"solar {panels}\", \"n\": [1, 2]}\n```\nDone.";
        let json = extract_json(text).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(json).unwrap(),
            json!({"topic": "solar {panels}", "n": [1, 2]})
        );
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{\"unterminated\": 1").is_none());
    }

    #[test]
    fn test_extract_json_skips_citations_and_mismatched_brackets() {
        let text = "As shown in [1] and [2], the plan is: {\"analysts\": [{\"name\": \"Ada\"}]}";
        assert_eq!(extract_json(text), Some("{\"analysts\": [{\"name\": \"Ada\"}]}"));

        assert!(extract_json("{\"a\": ]}").is_none());
        assert_eq!(extract_json("[see {notes}] then [1, 2]"), Some("[1, 2]"));
        assert_eq!(json_candidates("[1] {\"a\": [2]}").collect::<Vec<_>>(), vec!["[1]", "{\"a\": [2]}"]);
    }

    #[tokio::test]
    async fn test_structured_output() {
        #[derive(Debug, Deserialize)]
        struct Query {
            search_query: String,
        }

        let model = FixedModel("{\"search_query\": \"offshore wind costs\"}");
        let query: Query = structured_output(&model, ChatRequest::new(vec![])).await.unwrap();
        assert_eq!(query.search_query, "offshore wind costs");

        let err = structured_output::<Query>(&FixedModel("I cannot help"), ChatRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Model(_)));
        assert!(FixedModel("").is_available().await.unwrap());

        let cited = FixedModel("Per [1], I would search: {\"search_query\": \"tidal power\"}");
        let query: Query = structured_output(&cited, ChatRequest::new(vec![])).await.unwrap();
        assert_eq!(query.search_query, "tidal power");

        let topics: Vec<String> = structured_output(&FixedModel("Topics: [\"wind\", \"solar\"]"), ChatRequest::new(vec![]))
            .await
            .unwrap();
        assert_eq!(topics, vec!["wind", "solar"]);
    }
}

//! OpenAI-compatible chat completions client
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (OpenAI, Ollama, LM Studio, vLLM).
//!
//! # Example
//!
//! ```rust,ignore
//! use research_agent::{config::ModelSettings, OpenAiChatModel};
//! use stategraph_core::{ChatModel, ChatRequest, Message};
//!
//! let model = OpenAiChatModel::new(&ModelSettings::default())?;
//! let reply = model.chat(ChatRequest::new(vec![Message::human("Hello!")])).await?;
//! ```

use crate::config::ModelSettings;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use stategraph_core::{ChatModel, ChatRequest, ChatResponse, GraphError, Message, Role, UsageMetadata};
use std::time::Duration;
use tracing::debug;

/// Chat model speaking the OpenAI chat completions protocol
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            temperature: settings.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn convert_message(message: &Message) -> WireMessage {
        WireMessage {
            role: match message.role {
                Role::System => "system",
                Role::Human => "user",
                Role::Ai => "assistant",
                Role::Tool => "tool",
            },
            content: message.content.clone(),
            name: message.name.clone(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, request: ChatRequest) -> stategraph_core::Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = WireRequest {
            model: &self.model,
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.config.temperature.unwrap_or(self.temperature),
            max_tokens: request.config.max_tokens,
            stop: if request.config.stop_sequences.is_empty() {
                None
            } else {
                Some(&request.config.stop_sequences)
            },
        };

        debug!(model = %self.model, messages = body.messages.len(), "Sending chat completion");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| GraphError::Model(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GraphError::Model(format!("API error {}: {}", status, text)));
        }

        let reply: WireResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Model(format!("invalid completion payload: {}", e)))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Model("completion returned no choices".to_string()))?;

        Ok(ChatResponse {
            message: Message::ai(choice.message.content.unwrap_or_default()),
            usage: reply.usage.map(|u| UsageMetadata {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn is_available(&self) -> stategraph_core::Result<bool> {
        let mut http = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        Ok(http.send().await.map(|r| r.status().is_success()).unwrap_or(false))
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a Vec<String>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roles_map_to_wire_names() {
        let wire = OpenAiChatModel::convert_message(&Message::ai("hi").with_name("expert"));
        assert_eq!(wire.role, "assistant");
        assert_eq!(wire.name.as_deref(), Some("expert"));
        assert_eq!(OpenAiChatModel::convert_message(&Message::human("q")).role, "user");
    }

    #[test]
    fn test_request_body_shape() {
        let stop = vec!["END".to_string()];
        let body = WireRequest {
            model: "llama3.1",
            messages: vec![OpenAiChatModel::convert_message(&Message::system("be brief"))],
            temperature: 0.0,
            max_tokens: None,
            stop: Some(&stop),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "llama3.1",
                "messages": [{"role": "system", "content": "be brief"}],
                "temperature": 0.0,
                "stop": ["END"]
            })
        );
    }

    #[test]
    fn test_response_without_usage_parses() {
        let reply: WireResponse =
            serde_json::from_value(json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]})).unwrap();
        assert_eq!(reply.choices[0].message.content.as_deref(), Some("ok"));
        assert!(reply.usage.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let settings = ModelSettings {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ModelSettings::default()
        };
        let model = OpenAiChatModel::new(&settings).unwrap();
        assert_eq!(model.base_url, "http://localhost:11434/v1");
        assert_eq!(model.model(), "llama3.1");
    }
}

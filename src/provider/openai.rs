use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

use super::{CompletionProvider, ImagePayload, LlmError};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Chat-completions client for OpenAI-compatible endpoints. The API key
/// is resolved from the configured environment variable on every call,
/// so a missing credential surfaces at call time rather than startup.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key_env: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key_env: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }

    fn api_key(&self) -> Result<String, LlmError> {
        env::var(&self.api_key_env).map_err(|_| LlmError::MissingApiKey(self.api_key_env.clone()))
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = request.model, "sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimit(message));
            }
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;

        // Only the first choice's text is consumed
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn vision_completion(
        &self,
        model: &str,
        prompt: &str,
        image: &ImagePayload,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: &image.data_uri,
                            detail: image.detail.as_str(),
                        },
                    },
                ]),
            }],
            max_tokens,
        };

        self.send(&request).await
    }

    async fn text_completion(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: MessageContent::Text(prompt),
            }],
            max_tokens,
        };

        self.send(&request).await
    }
}

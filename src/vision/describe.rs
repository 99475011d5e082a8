//! Image description service boundary

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::FrameBuffer;
use crate::{Error, Result};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Describes a captured frame in answer to a spoken question
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Describe `frame`; `prompt` is what the user asked
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails or returns nothing
    async fn describe(&self, frame: &FrameBuffer, prompt: &str) -> Result<String>;
}

/// `OpenAI` vision through chat completions
pub struct OpenAiVision {
    client: Client,
    api_key: SecretString,
    model: String,
    instruction: String,
    max_tokens: u32,
}

impl OpenAiVision {
    #[must_use]
    pub fn new(
        client: Client,
        api_key: SecretString,
        model: String,
        instruction: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            api_key,
            model,
            instruction,
            max_tokens,
        }
    }

    /// Whether the endpoint accepts this image type
    #[must_use]
    pub fn is_supported_image(mime_type: &str) -> bool {
        matches!(
            mime_type,
            "image/png" | "image/jpeg" | "image/gif" | "image/webp"
        )
    }
}

#[async_trait]
impl VisionDescriber for OpenAiVision {
    async fn describe(&self, frame: &FrameBuffer, prompt: &str) -> Result<String> {
        if !Self::is_supported_image(&frame.mime_type) {
            return Err(Error::InvalidArgument(format!(
                "unsupported frame type {}",
                frame.mime_type
            )));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&frame.data);
        let data_url = format!("data:{};base64,{encoded}", frame.mime_type);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: format!("{} The user asked: {prompt}", self.instruction),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url,
                            detail: "low",
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            device = %frame.device,
            bytes = frame.data.len(),
            "requesting frame description"
        );

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI vision error");
            return Err(Error::from_status("openai vision", status.as_u16(), &body));
        }

        let result: ChatCompletionResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Vision("vision response had no content".to_string()))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

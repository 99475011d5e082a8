//! Conversation backend boundary
//!
//! Keeps a bounded in-process history behind the system prompt. Nothing is
//! persisted; the history is gone when the process exits.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;
use crate::{Error, Result};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The language-model conversation service
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Reply to one user turn; the exchange joins the history on success
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn reply(&self, text: &str) -> Result<String>;

    /// Record an exchange that did not go through [`ConversationBackend::reply`]
    fn remember(&self, user: &str, assistant: &str);

    /// Forget the history
    fn reset(&self);
}

/// One history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Bounded conversation history
#[derive(Debug)]
pub struct History {
    limit: usize,
    messages: Mutex<VecDeque<ChatMessage>>,
}

impl History {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            messages: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a user/assistant exchange, dropping the oldest past the limit
    pub fn push_exchange(&self, user: &str, assistant: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push_back(ChatMessage::new("user", user));
            messages.push_back(ChatMessage::new("assistant", assistant));
            while messages.len() > self.limit {
                messages.pop_front();
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
    }
}

/// `OpenAI` chat completions
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    history: History,
}

impl OpenAiChat {
    #[must_use]
    pub fn new(client: Client, api_key: SecretString, config: &AssistantConfig) -> Self {
        Self {
            client,
            api_key,
            model: config.chat_model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            history: History::new(config.history_limit),
        }
    }

    /// History as it would be sent with the next turn
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.snapshot()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[async_trait]
impl ConversationBackend for OpenAiChat {
    async fn reply(&self, text: &str) -> Result<String> {
        let mut messages = vec![ChatMessage::new("system", &self.system_prompt)];
        messages.extend(self.history.snapshot());
        messages.push(ChatMessage::new("user", text));

        tracing::debug!(model = %self.model, turns = messages.len(), "sending chat request");

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ChatRequest {
                model: &self.model,
                messages,
                max_tokens: self.max_tokens,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI chat error");
            return Err(Error::from_status("openai chat", status.as_u16(), &body));
        }

        let result: ChatResponse = response.json().await?;
        let reply = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| Error::BackendCallFailed("chat response had no content".to_string()))?;

        self.history.push_exchange(text, &reply);
        Ok(reply)
    }

    fn remember(&self, user: &str, assistant: &str) {
        self.history.push_exchange(user, assistant);
    }

    fn reset(&self) {
        tracing::info!("conversation history cleared");
        self.history.clear();
    }
}

use std::time::Duration;

use crate::errors::AssistantError;

/// Author of a chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of the conversation history sent with a completion request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request payload for one streamed completion.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompletionRequest {
    /// Backend model identifier.
    pub model: String,
    /// Conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Completion length cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Creates a request for the given model with no messages yet.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Appends a message to the conversation history.
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Appends a system message.
    pub fn system(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::system(content))
    }

    /// Appends a user message.
    pub fn user(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::user(content))
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the completion length cap.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AssistantError> {
        if self.model.trim().is_empty() {
            return Err(AssistantError::Validation("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(AssistantError::Validation(
                "at least one message is required".into(),
            ));
        }
        for message in &self.messages {
            if message.content.trim().is_empty() {
                return Err(AssistantError::Validation(
                    "message content must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Runtime behavior options for one session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Maximum gap between network reads before the session fails.
    pub idle_timeout: Duration,
    /// Bounded update buffer size between the session task and the consumer.
    pub update_buffer_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            update_buffer_capacity: 128,
        }
    }
}

impl SessionOptions {
    /// Sets the idle-read timeout.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the bounded update buffer size.
    pub fn update_buffer_capacity(mut self, capacity: usize) -> Self {
        self.update_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AssistantError> {
        if self.update_buffer_capacity == 0 {
            return Err(AssistantError::Validation(
                "update_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_missing_messages() {
        let err = CompletionRequest::new("gpt-4o-mini").validate();
        assert!(
            matches!(err, Err(AssistantError::Validation(msg)) if msg.contains("at least one message"))
        );
    }

    #[test]
    fn validation_rejects_blank_content() {
        let err = CompletionRequest::new("gpt-4o-mini").user("   ").validate();
        assert!(
            matches!(err, Err(AssistantError::Validation(msg)) if msg.contains("message content"))
        );
    }

    #[test]
    fn serialized_request_omits_unset_options() {
        let request = CompletionRequest::new("gpt-4o-mini").user("hi");
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("temperature").is_none());
        assert!(value.get("max_tokens").is_none());
        assert_eq!(
            value["messages"][0]["role"].as_str(),
            Some("user"),
            "roles serialize lowercase"
        );
    }

    #[test]
    fn session_options_default_buffer_capacity() {
        assert_eq!(SessionOptions::default().update_buffer_capacity, 128);
    }
}

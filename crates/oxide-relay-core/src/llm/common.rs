//! Request building shared by the OpenAI-compatible client

use super::{ChatMessage, LlmError, Role};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};

/// Convert a conversation into OpenAI chat messages, preserving order.
///
/// # Errors
///
/// Returns `LlmError::Unknown` if message building fails.
pub fn build_openai_messages(
    messages: &[ChatMessage],
) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    messages
        .iter()
        .map(|msg| {
            let built: ChatCompletionRequestMessage = match msg.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Unknown(e.to_string()))?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Unknown(e.to_string()))?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| LlmError::Unknown(e.to_string()))?
                    .into(),
            };
            Ok(built)
        })
        .collect()
}

/// JSON body of a streaming chat completion request.
///
/// # Errors
///
/// Returns `LlmError::Unknown` if the request cannot be built and
/// `LlmError::JsonError` if it cannot be serialized.
pub fn build_stream_request(
    upstream_model: &str,
    messages: &[ChatMessage],
) -> Result<serde_json::Value, LlmError> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(upstream_model)
        .messages(build_openai_messages(messages)?)
        .stream(true)
        .build()
        .map_err(|e| LlmError::Unknown(e.to_string()))?;

    serde_json::to_value(&request).map_err(|e| LlmError::JsonError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_request_keeps_order_and_roles() -> Result<(), LlmError> {
        let body = build_stream_request(
            "meta-llama/llama-4-maverick",
            &[
                ChatMessage::system("be brief"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("again"),
            ],
        )?;

        assert_eq!(body["model"], "meta-llama/llama-4-maverick");
        assert_eq!(body["stream"], true);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .map(|msgs| msgs.iter().filter_map(|m| m["role"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["messages"][3]["content"], "again");
        Ok(())
    }
}

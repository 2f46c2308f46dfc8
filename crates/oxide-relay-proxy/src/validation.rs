//! Stream request validation
//!
//! Checks run in a fixed order so callers always get the same error for the
//! same request: key, required fields, model, then message shape.

use oxide_relay_core::llm::{ChatMessage, ProviderRegistry, Role};
use serde_json::Value;

use crate::error::ProxyError;

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Logical model name, known to the registry
    pub model: String,
    /// Non-empty conversation
    pub messages: Vec<ChatMessage>,
}

/// Validate a raw `/stream/` body.
///
/// An unset `access_key` rejects every request.
///
/// # Errors
///
/// Returns the first failing check as a [`ProxyError`].
pub fn validate_stream_request(
    body: &Value,
    access_key: Option<&str>,
    registry: &ProviderRegistry,
) -> Result<StreamRequest, ProxyError> {
    let presented = body.get("api_key").and_then(Value::as_str);
    match (presented, access_key) {
        (Some(presented), Some(expected)) if !expected.is_empty() && presented == expected => {}
        _ => return Err(ProxyError::Unauthorized),
    }

    let (Some(model), Some(messages)) = (body.get("model"), body.get("messages")) else {
        return Err(ProxyError::BadRequest(
            "Missing model or messages in request".to_string(),
        ));
    };

    let model = model.as_str().unwrap_or_default();
    if !registry.contains(model) {
        return Err(ProxyError::UnknownModel(model.to_string()));
    }

    let Some(messages) = messages.as_array() else {
        return Err(ProxyError::BadRequest("Messages should be a list".to_string()));
    };
    if messages.is_empty() {
        return Err(ProxyError::BadRequest(
            "Messages list cannot be empty".to_string(),
        ));
    }

    let messages = messages
        .iter()
        .map(parse_message)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            ProxyError::BadRequest(
                "Each message must contain a role (one of ['system', 'user', 'assistant']) and content"
                    .to_string(),
            )
        })?;

    Ok(StreamRequest {
        model: model.to_string(),
        messages,
    })
}

fn parse_message(value: &Value) -> Option<ChatMessage> {
    let role = Role::parse(value.get("role")?.as_str()?)?;
    let content = value.get("content")?.as_str()?.to_string();
    Some(ChatMessage { role, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_relay_core::llm::{Credential, ModelRoute, ProviderEntry};
    use serde_json::json;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::from_routes(vec![ModelRoute {
            logical_model_name: "llama".into(),
            display_name: None,
            entries: vec![ProviderEntry {
                provider_name: "groq".into(),
                upstream_model_id: "llama-3".into(),
                api_base: "http://groq.invalid".into(),
                credential: Credential::new("k"),
                reasoning_separator: None,
            }],
        }])
    }

    fn check(body: &Value) -> Result<StreamRequest, ProxyError> {
        validate_stream_request(body, Some("secret"), &registry())
    }

    #[test]
    fn test_valid_request() -> Result<(), ProxyError> {
        let req = check(&json!({
            "api_key": "secret",
            "model": "llama",
            "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}]
        }))?;
        assert_eq!(req.model, "llama");
        assert_eq!(
            req.messages,
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]
        );
        Ok(())
    }

    #[test]
    fn test_key_is_checked_first() {
        let err = check(&json!({"api_key": "wrong"}));
        assert!(matches!(err, Err(ProxyError::Unauthorized)));
        let err = check(&json!({"model": "nope", "messages": 5}));
        assert!(matches!(err, Err(ProxyError::Unauthorized)));
    }

    #[test]
    fn test_unset_access_key_rejects_everything() {
        let body = json!({"api_key": "", "model": "llama", "messages": []});
        assert!(matches!(
            validate_stream_request(&body, None, &registry()),
            Err(ProxyError::Unauthorized)
        ));
        assert!(matches!(
            validate_stream_request(&body, Some(""), &registry()),
            Err(ProxyError::Unauthorized)
        ));
    }

    #[test]
    fn test_check_order() {
        let missing = check(&json!({"api_key": "secret", "model": "llama"}));
        assert!(matches!(missing, Err(ProxyError::BadRequest(m)) if m.contains("Missing")));

        // Unknown model wins over a malformed message list
        let unknown = check(&json!({"api_key": "secret", "model": "gpt", "messages": "x"}));
        assert!(matches!(unknown, Err(ProxyError::UnknownModel(m)) if m == "gpt"));

        let not_list = check(&json!({"api_key": "secret", "model": "llama", "messages": "x"}));
        assert!(matches!(not_list, Err(ProxyError::BadRequest(m)) if m.contains("list")));

        let empty = check(&json!({"api_key": "secret", "model": "llama", "messages": []}));
        assert!(matches!(empty, Err(ProxyError::BadRequest(m)) if m.contains("empty")));
    }

    #[test]
    fn test_message_shape() {
        for bad in [
            json!([{"role": "tool", "content": "x"}]),
            json!([{"content": "x"}]),
            json!([{"role": "user"}]),
            json!([{"role": "user", "content": 3}]),
            json!(["hello"]),
        ] {
            let result = check(&json!({"api_key": "secret", "model": "llama", "messages": bad}));
            assert!(matches!(result, Err(ProxyError::BadRequest(m)) if m.contains("role")));
        }
    }
}

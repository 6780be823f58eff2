use std::sync::Arc;

use crate::models::Message;
use crate::providers::{CompletionError, CompletionProvider, CompletionRequest, CompletionResponse};
use crate::services::settings::Settings;

/// A completion request ready to be sent, detached from the session so it can
/// run on its own task.
pub struct PendingCompletion {
    provider: Arc<dyn CompletionProvider>,
    pub conversation_id: String,
    pub request: CompletionRequest,
}

/// What came back for a conversation's pending completion.
#[derive(Debug)]
pub struct CompletionOutcome {
    pub conversation_id: String,
    pub result: Result<CompletionResponse, CompletionError>,
}

impl PendingCompletion {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        conversation_id: String,
        request: CompletionRequest,
    ) -> Self {
        Self {
            provider,
            conversation_id,
            request,
        }
    }

    pub async fn run(self) -> CompletionOutcome {
        tracing::debug!(
            "Sending {} messages to {} for {}",
            self.request.messages.len(),
            self.provider.name(),
            self.conversation_id
        );
        let result = self.provider.complete(self.request).await;
        match &result {
            Ok(response) => tracing::debug!(
                "Reply from {} ({:?} tokens in, {:?} out)",
                response.model,
                response.tokens_in,
                response.tokens_out
            ),
            Err(e) => tracing::warn!("Completion failed for {}: {:?}", self.conversation_id, e),
        }
        CompletionOutcome {
            conversation_id: self.conversation_id,
            result,
        }
    }
}

/// Build the request for a conversation's messages. Error turns stay local.
pub fn build_request(api_key: &str, messages: &[Message], settings: &Settings) -> CompletionRequest {
    CompletionRequest {
        api_key: api_key.to_string(),
        model: settings.model.clone(),
        messages: messages
            .iter()
            .filter(|m| m.role.is_sent_upstream())
            .cloned()
            .collect(),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_build_request_skips_error_turns() {
        let messages = vec![
            Message::system("sys"),
            Message::user("X"),
            Message::error("Invalid API key. Please check your key and try again."),
            Message::user("Y"),
        ];
        let request = build_request("sk-test", &messages, &Settings::default());

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, 500);
        assert_eq!(request.temperature, 0.7);
    }
}

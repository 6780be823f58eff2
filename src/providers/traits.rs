use async_trait::async_trait;

use super::types::{CompletionError, CompletionRequest, CompletionResponse};

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Perform exactly one completion call. Implementations never retry.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

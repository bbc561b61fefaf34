//! OpenAI chat-completions dialect. The unified model already matches this
//! wire shape, so both roles are pass-through and the transformer mostly
//! exists to claim the endpoint path.

use super::Transformer;
use crate::error::Result;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct OpenAiTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(OpenAiTransformer))
}

#[async_trait]
impl Transformer for OpenAiTransformer {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self) -> Option<&'static str> {
        Some("/v1/chat/completions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::UnifiedChatRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_out_is_plain_parse() {
        let t = OpenAiTransformer;
        let unified: UnifiedChatRequest = t
            .transform_request_out(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
            }))
            .await
            .unwrap();
        assert_eq!(unified.model, "gpt-4o");
        assert!(unified.is_streaming());
    }
}

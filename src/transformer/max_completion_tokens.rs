//! Renames `max_tokens` to `max_completion_tokens` for models that reject
//! the legacy parameter.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct MaxCompletionTokensTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(MaxCompletionTokensTransformer))
}

#[async_trait]
impl Transformer for MaxCompletionTokensTransformer {
    fn name(&self) -> &'static str {
        "max_completion_tokens"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            if let Some(value) = unified.max_tokens.take() {
                unified
                    .extra
                    .insert("max_completion_tokens".to_string(), value.into());
            }
            Ok(unified)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::UnifiedChatRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_renames_parameter() {
        let t = MaxCompletionTokensTransformer;
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "o3", "messages": [], "max_tokens": 2048,
        }))
        .unwrap();

        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        let body = out.body_json().unwrap();
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["max_completion_tokens"], 2048);
    }
}

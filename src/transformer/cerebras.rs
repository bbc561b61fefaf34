//! Cerebras rejects array-shaped message content; collapse parts to plain
//! strings.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use crate::unified::UnifiedContent;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct CerebrasTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(CerebrasTransformer))
}

#[async_trait]
impl Transformer for CerebrasTransformer {
    fn name(&self) -> &'static str {
        "cerebras"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            unified.strip_cache_control();
            for msg in &mut unified.messages {
                if let Some(content @ UnifiedContent::Parts(_)) = &mut msg.content {
                    *content = UnifiedContent::Text(content.as_text());
                }
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
    async fn test_parts_flattened_to_text() {
        let t = CerebrasTransformer;
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "part one"},
                    {"type": "text", "text": "part two"},
                ],
            }],
        }))
        .unwrap();

        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        let body = out.body_json().unwrap();
        assert_eq!(body["messages"][0]["content"], "part one\npart two");
    }
}

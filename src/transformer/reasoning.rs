//! Generic reasoning support: forces a thinking configuration on requests
//! and relabels `reasoning_content` in responses.

use super::{OutgoingRequest, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::openai_stream::{ReasoningField, ReasoningToThinkingState};
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use crate::unified::{ThinkingConfig, ThinkingContent};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ReasoningTransformer {
    enabled: bool,
    budget_tokens: Option<u64>,
}

pub fn factory(options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(ReasoningTransformer {
        enabled: options
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        budget_tokens: options.get("budget_tokens").and_then(Value::as_u64),
    }))
}

#[async_trait]
impl Transformer for ReasoningTransformer {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            if unified.thinking.is_none() {
                unified.thinking = Some(ThinkingConfig {
                    thinking_type: if self.enabled { "enabled" } else { "disabled" }.to_string(),
                    budget_tokens: self.budget_tokens,
                });
            }
            Ok(unified)
        })
    }

    async fn transform_response_out(
        &self,
        resp: UpstreamResponse,
        _ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        match resp {
            UpstreamResponse::Json { status, mut body } => {
                if let Some(message) = body
                    .pointer_mut("/choices/0/message")
                    .and_then(Value::as_object_mut)
                {
                    if let Some(reasoning) =
                        message.remove("reasoning_content").and_then(|v| match v {
                            Value::String(s) if !s.is_empty() => Some(s),
                            _ => None,
                        })
                    {
                        message.insert(
                            "thinking".to_string(),
                            serde_json::to_value(ThinkingContent {
                                content: Some(reasoning),
                                signature: None,
                            })?,
                        );
                    }
                }
                Ok(UpstreamResponse::Json { status, body })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(
                    stream,
                    ReasoningToThinkingState::new(ReasoningField::ReasoningContent),
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::UnifiedChatRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_thinking_config_applied_once() {
        let t = ReasoningTransformer {
            enabled: true,
            budget_tokens: Some(2048),
        };
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest =
            serde_json::from_value(json!({"model": "m", "messages": []})).unwrap();
        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        let body = out.body_json().unwrap();
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 2048);

        // An explicit thinking config from the caller wins.
        let explicit: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "m", "messages": [], "thinking": {"type": "disabled"},
        }))
        .unwrap();
        let out = t
            .transform_request_in(OutgoingRequest::unified(explicit), &provider)
            .await
            .unwrap();
        assert_eq!(out.body_json().unwrap()["thinking"]["type"], "disabled");
    }
}

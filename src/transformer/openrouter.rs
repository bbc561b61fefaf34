//! OpenRouter: cache markers only survive for Claude-family models, and
//! reasoning text arrives in `delta.reasoning`.

use super::{OutgoingRequest, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::openai_stream::{ReasoningField, ReasoningToThinkingState};
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use crate::unified::ThinkingContent;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct OpenRouterTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(OpenRouterTransformer))
}

#[async_trait]
impl Transformer for OpenRouterTransformer {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            if !unified.model.contains("claude") {
                unified.strip_cache_control();
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
                // Relabel message.reasoning into the thinking shape.
                if let Some(message) = body
                    .pointer_mut("/choices/0/message")
                    .and_then(Value::as_object_mut)
                {
                    if let Some(reasoning) =
                        message.remove("reasoning").and_then(|v| match v {
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
                    ReasoningToThinkingState::new(ReasoningField::Reasoning),
                ),
            }),
        }
    }
}

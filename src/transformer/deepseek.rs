//! DeepSeek: 8192-token output ceiling, and reasoner models put their chain
//! of thought in `reasoning_content`.

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

const MAX_OUTPUT_TOKENS: u64 = 8192;

pub struct DeepSeekTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(DeepSeekTransformer))
}

#[async_trait]
impl Transformer for DeepSeekTransformer {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            unified.strip_cache_control();
            unified.max_tokens = Some(
                unified
                    .max_tokens
                    .map_or(MAX_OUTPUT_TOKENS, |v| v.min(MAX_OUTPUT_TOKENS)),
            );
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

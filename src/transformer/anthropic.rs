//! Anthropic Messages dialect, both roles: the `/v1/messages` endpoint for
//! Anthropic-speaking callers and the provider adapter for Anthropic-shaped
//! upstreams.

use super::{OutgoingRequest, RequestBody, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::anthropic::{
    openai_to_response, request_to_unified, response_to_openai, unified_to_request,
};
use crate::convert::anthropic_stream::AnthropicStreamState;
use crate::convert::anthropic_wire::{MessagesRequest, MessagesResponse};
use crate::convert::openai_stream::OpenAiStreamState;
use crate::convert::openai_wire::ChatCompletionResponse;
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use crate::unified::UnifiedChatRequest;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(AnthropicTransformer))
}

#[async_trait]
impl Transformer for AnthropicTransformer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self) -> Option<&'static str> {
        Some("/v1/messages")
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        provider: &Provider,
    ) -> Result<OutgoingRequest> {
        let RequestBody::Unified(unified) = req.body else {
            return Ok(req);
        };

        let body = serde_json::to_value(unified_to_request(&unified))?;
        let mut out = OutgoingRequest {
            body: RequestBody::Raw(body),
            config: req.config,
        };
        out.config
            .headers
            .insert("x-api-key".to_string(), provider.api_key.clone());
        out.config.headers.insert(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        );
        Ok(out)
    }

    async fn transform_request_out(&self, body: Value) -> Result<UnifiedChatRequest> {
        let request: MessagesRequest = serde_json::from_value(body)?;
        Ok(request_to_unified(request))
    }

    async fn transform_response_in(
        &self,
        resp: UpstreamResponse,
        ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        match resp {
            UpstreamResponse::Json { status, body } => {
                let completion: ChatCompletionResponse = serde_json::from_value(body)?;
                let messages = openai_to_response(&completion, &ctx.model);
                Ok(UpstreamResponse::Json {
                    status,
                    body: serde_json::to_value(messages)?,
                })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, AnthropicStreamState::new(&ctx.model)),
            }),
        }
    }

    async fn transform_response_out(
        &self,
        resp: UpstreamResponse,
        ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        match resp {
            UpstreamResponse::Json { status, body } => {
                let messages: MessagesResponse = serde_json::from_value(body)?;
                Ok(UpstreamResponse::Json {
                    status,
                    body: serde_json::to_value(response_to_openai(&messages))?,
                })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, OpenAiStreamState::new(&ctx.model)),
            }),
        }
    }
}

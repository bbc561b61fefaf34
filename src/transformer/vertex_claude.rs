//! Claude models behind Vertex AI: Messages wire shape via the Anthropic
//! publisher's rawPredict endpoints.

use super::{OutgoingRequest, RequestBody, ResponseContext, Transformer, UpstreamResponse};
use crate::auth::{self, GcpTokenProvider};
use crate::convert::anthropic::response_to_openai;
use crate::convert::anthropic_wire::MessagesResponse;
use crate::convert::openai_stream::OpenAiStreamState;
use crate::convert::vertex;
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

const DEFAULT_LOCATION: &str = "us-east5";

pub struct VertexClaudeTransformer {
    tokens: GcpTokenProvider,
}

pub fn factory(_options: &Map<String, Value>, ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(VertexClaudeTransformer {
        tokens: GcpTokenProvider::new(ctx.client.clone()),
    }))
}

#[async_trait]
impl Transformer for VertexClaudeTransformer {
    fn name(&self) -> &'static str {
        "vertex-claude"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        let RequestBody::Unified(unified) = req.body else {
            return Ok(req);
        };

        let project = auth::project_id()?;
        let location = auth::location(DEFAULT_LOCATION);
        let token = self.tokens.access_token().await?;

        let body = vertex::claude_body(&unified)?;
        let mut out = OutgoingRequest {
            body: RequestBody::Raw(body),
            config: req.config,
        };
        out.config.url = Some(vertex::claude_url(
            &project,
            &location,
            &unified.model,
            unified.is_streaming(),
        ));
        out.config
            .headers
            .insert("Authorization".to_string(), format!("Bearer {token}"));
        Ok(out)
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

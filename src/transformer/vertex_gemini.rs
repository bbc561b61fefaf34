//! Gemini models behind Vertex AI. Same wire dialect as the Gemini API but
//! with OAuth bearer auth and project/location URLs.

use super::{OutgoingRequest, RequestBody, ResponseContext, Transformer, UpstreamResponse};
use crate::auth::{self, GcpTokenProvider};
use crate::convert::gemini::{gemini_to_openai, unified_to_gemini, GeminiToOpenAiState};
use crate::convert::gemini_wire::GenerateContentResponse;
use crate::convert::vertex;
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

const DEFAULT_LOCATION: &str = "us-central1";

pub struct VertexGeminiTransformer {
    tokens: GcpTokenProvider,
}

pub fn factory(_options: &Map<String, Value>, ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(VertexGeminiTransformer {
        tokens: GcpTokenProvider::new(ctx.client.clone()),
    }))
}

#[async_trait]
impl Transformer for VertexGeminiTransformer {
    fn name(&self) -> &'static str {
        "vertex-gemini"
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

        let body = serde_json::to_value(unified_to_gemini(&unified))?;
        let mut out = OutgoingRequest {
            body: RequestBody::Raw(body),
            config: req.config,
        };
        out.config.url = Some(vertex::gemini_url(
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
                let gemini: GenerateContentResponse = serde_json::from_value(body)?;
                Ok(UpstreamResponse::Json {
                    status,
                    body: serde_json::to_value(gemini_to_openai(&gemini, &ctx.model))?,
                })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, GeminiToOpenAiState::new(&ctx.model)),
            }),
        }
    }
}

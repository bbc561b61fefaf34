//! Gemini `generateContent` dialect, both roles.
//!
//! The caller-facing route carries the model and action in the URL, so the
//! server folds them into the body as `model` / `stream` before handing it
//! to `transform_request_out`.

use super::{OutgoingRequest, RequestBody, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::gemini::{
    gemini_to_openai, openai_to_gemini, request_to_unified, unified_to_gemini, GeminiStreamState,
    GeminiToOpenAiState,
};
use crate::convert::gemini_wire::{GenerateContentRequest, GenerateContentResponse};
use crate::convert::openai_wire::ChatCompletionResponse;
use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::sse::reframe_stream;
use crate::transformer::registry::RegistryContext;
use crate::unified::UnifiedChatRequest;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct GeminiTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(GeminiTransformer))
}

/// `{base}/{model}:{action}` with the streaming action carrying `alt=sse`.
pub fn request_url(base: &str, model: &str, stream: bool) -> String {
    let base = base.trim_end_matches('/');
    if stream {
        format!("{base}/{model}:streamGenerateContent?alt=sse")
    } else {
        format!("{base}/{model}:generateContent")
    }
}

#[async_trait]
impl Transformer for GeminiTransformer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn endpoint(&self) -> Option<&'static str> {
        Some("/v1beta/models/:model_and_action")
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        provider: &Provider,
    ) -> Result<OutgoingRequest> {
        let RequestBody::Unified(unified) = req.body else {
            return Ok(req);
        };

        let body = serde_json::to_value(unified_to_gemini(&unified))?;
        let mut out = OutgoingRequest {
            body: RequestBody::Raw(body),
            config: req.config,
        };
        out.config.url = Some(request_url(
            &provider.api_base_url,
            &unified.model,
            unified.is_streaming(),
        ));
        out.config
            .headers
            .insert("x-goog-api-key".to_string(), provider.api_key.clone());
        Ok(out)
    }

    async fn transform_request_out(&self, mut body: Value) -> Result<UnifiedChatRequest> {
        let (model, stream) = match body.as_object_mut() {
            Some(obj) => {
                let model = obj
                    .remove("model")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| GatewayError::conversion("request is missing a model"))?;
                let stream = obj
                    .remove("stream")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                (model, stream)
            }
            None => return Err(GatewayError::conversion("request body must be an object")),
        };

        let request: GenerateContentRequest = serde_json::from_value(body)?;
        Ok(request_to_unified(request, &model, stream))
    }

    async fn transform_response_in(
        &self,
        resp: UpstreamResponse,
        ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        match resp {
            UpstreamResponse::Json { status, body } => {
                let completion: ChatCompletionResponse = serde_json::from_value(body)?;
                Ok(UpstreamResponse::Json {
                    status,
                    body: serde_json::to_value(openai_to_gemini(&completion))?,
                })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, GeminiStreamState::new(&ctx.model)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_url() {
        assert_eq!(
            request_url(
                "https://generativelanguage.googleapis.com/v1beta/models/",
                "gemini-2.5-pro",
                false
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert!(request_url("https://x/models", "g", true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[tokio::test]
    async fn test_request_out_reads_injected_route_fields() {
        let t = GeminiTransformer;
        let unified = t
            .transform_request_out(json!({
                "model": "gemini-2.5-pro",
                "stream": true,
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            }))
            .await
            .unwrap();
        assert_eq!(unified.model, "gemini-2.5-pro");
        assert!(unified.is_streaming());
        assert_eq!(unified.messages[0].role, "user");

        assert!(t.transform_request_out(json!({"contents": []})).await.is_err());
    }

    #[tokio::test]
    async fn test_request_in_builds_vendor_url() {
        let t = GeminiTransformer;
        let provider: Provider = serde_json::from_value(json!({
            "name": "gemini",
            "api_base_url": "https://generativelanguage.googleapis.com/v1beta/models",
            "api_key": "AIza-test",
            "models": ["gemini-2.5-pro"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();

        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        assert_eq!(
            out.config.url.as_deref(),
            Some("https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent")
        );
        assert_eq!(out.config.headers["x-goog-api-key"], "AIza-test");
        let body = out.body_json().unwrap();
        assert!(body.get("contents").is_some());
        assert!(body.get("model").is_none());
    }
}

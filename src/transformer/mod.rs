//! The transformer contract and the built-in transformers.
//!
//! Requests travel provider-ward through `transform_request_in`, responses
//! travel caller-ward through `transform_response_out`. Endpoint
//! transformers additionally translate the caller's dialect at the edge via
//! `transform_request_out` / `transform_response_in`.

use crate::error::Result;
use crate::provider::Provider;
use crate::sse::ByteStream;
use crate::unified::UnifiedChatRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub mod registry;

pub mod anthropic;
pub mod cerebras;
pub mod cleancache;
pub mod custom_params;
pub mod deepseek;
pub mod enhancetool;
pub mod gemini;
pub mod groq;
pub mod max_completion_tokens;
pub mod maxtoken;
pub mod openai;
pub mod openrouter;
pub mod reasoning;
pub mod sampling;
pub mod stream_options;
pub mod tooluse;
pub mod vercel;
pub mod vertex_claude;
pub mod vertex_gemini;

pub use registry::{Registry, RegistryContext};

/// Transport overrides a transformer wants applied to the upstream call.
/// Later stages win on `url`; headers are unioned.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
}

impl TransportConfig {
    pub fn merge(&mut self, other: TransportConfig) {
        if other.url.is_some() {
            self.url = other.url;
        }
        self.headers.extend(other.headers);
    }
}

/// Request body as it moves through a chain. Vendor-shape transformers
/// replace `Unified` with `Raw` once the body leaves the unified model.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Unified(UnifiedChatRequest),
    Raw(Value),
}

/// A request on its way upstream plus accumulated transport overrides.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub body: RequestBody,
    pub config: TransportConfig,
}

impl OutgoingRequest {
    pub fn unified(req: UnifiedChatRequest) -> Self {
        Self {
            body: RequestBody::Unified(req),
            config: TransportConfig::default(),
        }
    }

    pub fn raw(body: Value) -> Self {
        Self {
            body: RequestBody::Raw(body),
            config: TransportConfig::default(),
        }
    }

    pub fn as_unified(&self) -> Option<&UnifiedChatRequest> {
        match &self.body {
            RequestBody::Unified(req) => Some(req),
            RequestBody::Raw(_) => None,
        }
    }

    /// Apply `f` to a unified body; a raw body passes through untouched.
    /// Utility transformers use this so they compose after vendor adapters.
    pub fn map_unified(
        mut self,
        f: impl FnOnce(UnifiedChatRequest) -> Result<UnifiedChatRequest>,
    ) -> Result<Self> {
        if let RequestBody::Unified(req) = self.body {
            self.body = RequestBody::Unified(f(req)?);
        }
        Ok(self)
    }

    /// Serialize whichever body shape is present.
    pub fn body_json(&self) -> Result<Value> {
        match &self.body {
            RequestBody::Unified(req) => Ok(serde_json::to_value(req)?),
            RequestBody::Raw(value) => Ok(value.clone()),
        }
    }

    pub fn is_streaming(&self) -> bool {
        match &self.body {
            RequestBody::Unified(req) => req.is_streaming(),
            RequestBody::Raw(value) => {
                value.get("stream").and_then(Value::as_bool).unwrap_or(false)
            }
        }
    }
}

/// An upstream reply moving back toward the caller. Between the provider
/// adapter and the endpoint adapter the contents are OpenAI-shaped.
pub enum UpstreamResponse {
    Json { status: u16, body: Value },
    Stream { status: u16, stream: ByteStream },
}

impl UpstreamResponse {
    pub fn json(body: Value) -> Self {
        Self::Json { status: 200, body }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Json { status, .. } => *status,
            Self::Stream { status, .. } => *status,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json { status, body } => f
                .debug_struct("Json")
                .field("status", status)
                .field("body", body)
                .finish(),
            Self::Stream { status, .. } => f
                .debug_struct("Stream")
                .field("status", status)
                .finish_non_exhaustive(),
        }
    }
}

/// Carried alongside responses so adapters can stamp the right model name
/// on converted frames. Holds the upstream model on the provider side and
/// the caller's original model at the endpoint.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub model: String,
}

impl ResponseContext {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// A stage in the translation pipeline. Every hook defaults to identity, so
/// a transformer only implements the directions it cares about.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Path this transformer serves as an inbound endpoint, if any.
    fn endpoint(&self) -> Option<&'static str> {
        None
    }

    /// Provider side, request direction: unified (or already-raw) body into
    /// whatever the upstream expects, plus transport overrides.
    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        Ok(req)
    }

    /// Endpoint side, request direction: the caller's wire body into the
    /// unified model.
    async fn transform_request_out(&self, body: Value) -> Result<UnifiedChatRequest> {
        Ok(serde_json::from_value(body)?)
    }

    /// Endpoint side, response direction: OpenAI-shaped response into the
    /// caller's dialect.
    async fn transform_response_in(
        &self,
        resp: UpstreamResponse,
        _ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        Ok(resp)
    }

    /// Provider side, response direction: the upstream's response into the
    /// OpenAI shape.
    async fn transform_response_out(
        &self,
        resp: UpstreamResponse,
        _ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        Ok(resp)
    }
}

//! The forwarding core: resolve the route, fold the transformer chains, and
//! dispatch the call upstream.

use crate::error::{GatewayError, Result};
use crate::logging::{LogEntry, LogLevel, SharedLogger};
use crate::pipeline;
use crate::provider::{Provider, ProviderDirectory};
use crate::sse::ByteStream;
use crate::transformer::{
    OutgoingRequest, Registry, ResponseContext, UpstreamResponse,
};
use crate::unified::UnifiedChatRequest;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Gateway {
    client: reqwest::Client,
    registry: Arc<Registry>,
    directory: Arc<ProviderDirectory>,
    logger: SharedLogger,
    timeout: Duration,
}

impl Gateway {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<Registry>,
        directory: Arc<ProviderDirectory>,
        logger: SharedLogger,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            registry,
            directory,
            logger,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn directory(&self) -> &ProviderDirectory {
        &self.directory
    }

    /// Forward a unified request: resolve the route, run the provider and
    /// model chains, call upstream, and fold the response back to the
    /// OpenAI shape. The endpoint-side dialect conversion happens in the
    /// server, around this call.
    pub async fn forward(&self, mut unified: UnifiedChatRequest) -> Result<UpstreamResponse> {
        let requested = unified.model.clone();
        let (provider, target_model) = self.directory.resolve(&requested)?;
        unified.model = target_model.clone();

        let chain = pipeline::resolve_chain(&self.registry, &provider, &target_model)?;
        let streaming = unified.is_streaming();

        info!(
            provider = %provider.name,
            model = %target_model,
            streaming,
            stages = chain.len(),
            "forwarding request"
        );
        self.logger.log(
            LogEntry::new(
                LogLevel::Info,
                "gateway",
                format!("forward requested={requested} streaming={streaming}"),
            )
            .with_route(&provider.name, &target_model),
        );

        let req =
            pipeline::apply_request(&chain, OutgoingRequest::unified(unified), &provider).await?;
        let resp = self.dispatch(req, &provider, streaming).await?;

        let ctx = ResponseContext::new(&target_model);
        pipeline::apply_response(&chain, resp, &ctx).await
    }

    async fn dispatch(
        &self,
        req: OutgoingRequest,
        provider: &Provider,
        streaming: bool,
    ) -> Result<UpstreamResponse> {
        let url = req
            .config
            .url
            .clone()
            .unwrap_or_else(|| provider.api_base_url.clone());
        let body = req.body_json()?;

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if !carries_auth(&req.config.headers) && !provider.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", provider.api_key));
        }
        for (key, value) in &req.config.headers {
            builder = builder.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, builder.json(&body).send())
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| GatewayError::provider(format!("Request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status, "upstream error");
            self.logger.log(
                LogEntry::new(
                    LogLevel::Warn,
                    "gateway",
                    format!("upstream status={status}"),
                )
                .with_route(&provider.name, &url),
            );
            return Err(GatewayError::Upstream {
                status,
                body: truncate(&body, 2000).to_string(),
            });
        }

        if streaming {
            let upstream: ByteStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
            );
            let stream = stream_with_timeout(upstream, self.timeout);
            Ok(UpstreamResponse::Stream { status, stream })
        } else {
            let body = response
                .json()
                .await
                .map_err(|e| GatewayError::provider(format!("Invalid upstream JSON: {e}")))?;
            Ok(UpstreamResponse::Json { status, body })
        }
    }
}

/// Apply the per-read timeout to a byte stream. A stalled upstream body
/// surfaces as a `TimedOut` error and the stream ends.
fn stream_with_timeout(mut upstream: ByteStream, timeout: Duration) -> ByteStream {
    Box::pin(async_stream::stream! {
        loop {
            match tokio::time::timeout(timeout, upstream.next()).await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(_) => {
                    yield Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("upstream stream stalled for {}s", timeout.as_secs()),
                    ));
                    break;
                }
            }
        }
    })
}

fn carries_auth(headers: &std::collections::HashMap<String, String>) -> bool {
    headers.keys().any(|k| {
        k.eq_ignore_ascii_case("authorization")
            || k.eq_ignore_ascii_case("x-api-key")
            || k.eq_ignore_ascii_case("x-goog-api-key")
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

//! Chain resolution and folding. A request runs the provider-wide chain
//! then the per-model chain on its way upstream; the response runs the same
//! order on the way back. Any failing stage aborts the call.

use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::{
    OutgoingRequest, Registry, ResponseContext, Transformer, UpstreamResponse,
};
use std::sync::Arc;
use tracing::debug;

/// Resolve the provider-wide chain plus the per-model chain, in that order.
pub fn resolve_chain(
    registry: &Registry,
    provider: &Provider,
    model: &str,
) -> Result<Vec<Arc<dyn Transformer>>> {
    let refs = provider
        .transformers
        .chain
        .iter()
        .chain(provider.transformers.model_chain(model));

    let mut chain = Vec::new();
    for reference in refs {
        chain.push(registry.resolve(reference)?);
    }
    Ok(chain)
}

/// Fold the request through every stage's provider-side hook.
pub async fn apply_request(
    chain: &[Arc<dyn Transformer>],
    mut req: OutgoingRequest,
    provider: &Provider,
) -> Result<OutgoingRequest> {
    for stage in chain {
        debug!(stage = stage.name(), "applying request transformer");
        req = stage.transform_request_in(req, provider).await?;
    }
    Ok(req)
}

/// Fold the response through every stage's caller-ward hook.
pub async fn apply_response(
    chain: &[Arc<dyn Transformer>],
    mut resp: UpstreamResponse,
    ctx: &ResponseContext,
) -> Result<UpstreamResponse> {
    for stage in chain {
        debug!(stage = stage.name(), "applying response transformer");
        resp = stage.transform_response_out(resp, ctx).await?;
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::with_builtins(reqwest::Client::new()).unwrap()
    }

    fn provider() -> Provider {
        serde_json::from_value(json!({
            "name": "p",
            "api_base_url": "https://x",
            "models": ["m"],
            "transformers": {
                "use": ["openai", ["maxtoken", {"max_tokens": 100}]],
                "m": {"use": ["stream_options"]},
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_chain_order_is_provider_then_model() {
        let reg = registry();
        let chain = resolve_chain(&reg, &provider(), "m").unwrap();
        let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["openai", "maxtoken", "stream_options"]);

        let chain = resolve_chain(&reg, &provider(), "other").unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_unknown_stage_fails_resolution() {
        let reg = registry();
        let provider: Provider = serde_json::from_value(json!({
            "name": "p",
            "api_base_url": "https://x",
            "models": ["m"],
            "transformers": {"use": ["does-not-exist"]},
        }))
        .unwrap();

        assert!(resolve_chain(&reg, &provider, "m").is_err());
    }

    #[tokio::test]
    async fn test_request_folds_through_chain() {
        let reg = registry();
        let p = provider();
        let chain = resolve_chain(&reg, &p, "m").unwrap();

        let unified = serde_json::from_value(json!({
            "model": "m", "messages": [], "stream": true, "max_tokens": 500,
        }))
        .unwrap();

        let out = apply_request(&chain, OutgoingRequest::unified(unified), &p)
            .await
            .unwrap();
        let body = out.body_json().unwrap();
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }
}

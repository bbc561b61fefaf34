//! Caps `max_tokens` at a configured ceiling.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct MaxTokenTransformer {
    max_tokens: Option<u64>,
}

pub fn factory(options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(MaxTokenTransformer {
        max_tokens: options.get("max_tokens").and_then(Value::as_u64),
    }))
}

#[async_trait]
impl Transformer for MaxTokenTransformer {
    fn name(&self) -> &'static str {
        "maxtoken"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        let Some(cap) = self.max_tokens else {
            return Ok(req);
        };
        req.map_unified(|mut unified| {
            unified.max_tokens = Some(unified.max_tokens.map_or(cap, |v| v.min(cap)));
            Ok(unified)
        })
    }
}

//! Asks OpenAI-compatible upstreams to attach usage to the final stream
//! chunk.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use crate::unified::StreamOptions;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct StreamOptionsTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(StreamOptionsTransformer))
}

#[async_trait]
impl Transformer for StreamOptionsTransformer {
    fn name(&self) -> &'static str {
        "stream_options"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            if unified.is_streaming() && unified.stream_options.is_none() {
                unified.stream_options = Some(StreamOptions {
                    include_usage: true,
                });
            }
            Ok(unified)
        })
    }
}

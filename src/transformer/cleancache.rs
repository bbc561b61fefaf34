//! Strips `cache_control` markers before sending to providers that reject
//! them.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct CleanCacheTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(CleanCacheTransformer))
}

#[async_trait]
impl Transformer for CleanCacheTransformer {
    fn name(&self) -> &'static str {
        "cleancache"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            unified.strip_cache_control();
            Ok(unified)
        })
    }
}

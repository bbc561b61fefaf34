//! Vercel AI Gateway: image parts must be proper URLs or data URIs, and
//! configured passthrough options ride along on the body.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use crate::unified::{ContentPart, UnifiedContent};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct VercelTransformer {
    options: Map<String, Value>,
}

pub fn factory(options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(VercelTransformer {
        options: options.clone(),
    }))
}

fn looks_like_bare_base64(url: &str) -> bool {
    !url.starts_with("data:") && !url.starts_with("http://") && !url.starts_with("https://")
}

#[async_trait]
impl Transformer for VercelTransformer {
    fn name(&self) -> &'static str {
        "vercel"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        let options = self.options.clone();
        req.map_unified(move |mut unified| {
            for msg in &mut unified.messages {
                if let Some(UnifiedContent::Parts(parts)) = &mut msg.content {
                    for part in parts {
                        if let ContentPart::ImageUrl { image_url, .. } = part {
                            if looks_like_bare_base64(&image_url.url) {
                                image_url.url =
                                    format!("data:image/png;base64,{}", image_url.url);
                            }
                        }
                    }
                }
            }
            for (key, value) in options {
                unified.extra.entry(key).or_insert(value);
            }
            Ok(unified)
        })
    }
}

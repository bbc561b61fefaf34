//! Overrides sampling parameters from options: temperature, top_p, top_k
//! and repetition_penalty.

use super::{OutgoingRequest, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct SamplingTransformer {
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<u64>,
    repetition_penalty: Option<f64>,
}

pub fn factory(options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(SamplingTransformer {
        temperature: options.get("temperature").and_then(Value::as_f64),
        top_p: options.get("top_p").and_then(Value::as_f64),
        top_k: options.get("top_k").and_then(Value::as_u64),
        repetition_penalty: options.get("repetition_penalty").and_then(Value::as_f64),
    }))
}

#[async_trait]
impl Transformer for SamplingTransformer {
    fn name(&self) -> &'static str {
        "sampling"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            if self.temperature.is_some() {
                unified.temperature = self.temperature;
            }
            if self.top_p.is_some() {
                unified.top_p = self.top_p;
            }
            if self.top_k.is_some() {
                unified.top_k = self.top_k;
            }
            if let Some(penalty) = self.repetition_penalty {
                if let Some(value) = serde_json::Number::from_f64(penalty) {
                    unified
                        .extra
                        .insert("repetition_penalty".to_string(), Value::Number(value));
                }
            }
            Ok(unified)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::UnifiedChatRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_overrides_apply() {
        let t = SamplingTransformer {
            temperature: Some(0.2),
            top_p: None,
            top_k: Some(40),
            repetition_penalty: Some(1.1),
        };
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "m", "messages": [], "temperature": 0.9, "top_p": 0.5,
        }))
        .unwrap();

        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        let body = out.body_json().unwrap();
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["top_p"], 0.5);
        assert_eq!(body["top_k"], 40);
        assert_eq!(body["repetition_penalty"], 1.1);
    }
}

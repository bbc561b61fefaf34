//! Deep-merges configured defaults into the outgoing body. Values already
//! present in the request win.

use super::{OutgoingRequest, RequestBody, Transformer};
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct CustomParamsTransformer {
    defaults: Map<String, Value>,
}

pub fn factory(options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(CustomParamsTransformer {
        defaults: options.clone(),
    }))
}

fn merge_defaults(target: &mut Value, defaults: &Value) {
    match (target, defaults) {
        (Value::Object(target), Value::Object(defaults)) => {
            for (key, default) in defaults {
                match target.get_mut(key) {
                    Some(existing) => merge_defaults(existing, default),
                    None => {
                        target.insert(key.clone(), default.clone());
                    }
                }
            }
        }
        // Existing non-object values stay as they are.
        (_, _) => {}
    }
}

#[async_trait]
impl Transformer for CustomParamsTransformer {
    fn name(&self) -> &'static str {
        "custom_params"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        if self.defaults.is_empty() {
            return Ok(req);
        }
        let mut body = req.body_json()?;
        merge_defaults(&mut body, &Value::Object(self.defaults.clone()));
        Ok(OutgoingRequest {
            body: match req.body {
                RequestBody::Unified(_) => RequestBody::Unified(serde_json::from_value(body)?),
                RequestBody::Raw(_) => RequestBody::Raw(body),
            },
            config: req.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_values_win() {
        let options = json!({"temperature": 0.1, "provider_options": {"quantization": "fp8"}});
        let t = CustomParamsTransformer {
            defaults: options.as_object().unwrap().clone(),
        };
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let req = OutgoingRequest::raw(json!({
            "model": "m",
            "messages": [],
            "temperature": 0.8,
        }));
        let out = t.transform_request_in(req, &provider).await.unwrap();
        let body = out.body_json().unwrap();

        assert_eq!(body["temperature"], 0.8);
        assert_eq!(body["provider_options"]["quantization"], "fp8");
    }
}

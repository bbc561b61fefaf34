//! Groq quirks: no cache markers, no `$schema` keys in tool parameters,
//! and tool calls sometimes arrive without ids.

use super::{OutgoingRequest, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::anthropic::new_call_id;
use crate::error::Result;
use crate::provider::Provider;
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct GroqTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(GroqTransformer))
}

fn strip_schema_keys(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            obj.remove("$schema");
            for v in obj.values_mut() {
                strip_schema_keys(v);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                strip_schema_keys(v);
            }
        }
        _ => {}
    }
}

#[async_trait]
impl Transformer for GroqTransformer {
    fn name(&self) -> &'static str {
        "groq"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            unified.strip_cache_control();
            if let Some(tools) = &mut unified.tools {
                for tool in tools {
                    strip_schema_keys(&mut tool.function.parameters);
                }
            }
            Ok(unified)
        })
    }

    async fn transform_response_out(
        &self,
        resp: UpstreamResponse,
        _ctx: &ResponseContext,
    ) -> Result<UpstreamResponse> {
        match resp {
            UpstreamResponse::Json { status, mut body } => {
                if let Some(calls) = body
                    .pointer_mut("/choices/0/message/tool_calls")
                    .and_then(Value::as_array_mut)
                {
                    for call in calls {
                        let missing = call
                            .get("id")
                            .and_then(Value::as_str)
                            .map_or(true, str::is_empty);
                        if missing {
                            if let Some(obj) = call.as_object_mut() {
                                obj.insert("id".to_string(), Value::String(new_call_id()));
                            }
                        }
                    }
                }
                Ok(UpstreamResponse::Json { status, body })
            }
            stream => Ok(stream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::UnifiedChatRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_schema_keys_stripped() {
        let t = GroqTransformer;
        let provider: Provider = serde_json::from_value(json!({
            "name": "p", "api_base_url": "https://x", "models": ["m"],
        }))
        .unwrap();

        let unified: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "tools": [{"type": "function", "function": {
                "name": "f",
                "parameters": {
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "properties": {"inner": {"$schema": "x", "type": "string"}},
                },
            }}],
        }))
        .unwrap();

        let out = t
            .transform_request_in(OutgoingRequest::unified(unified), &provider)
            .await
            .unwrap();
        let params = &out.body_json().unwrap()["tools"][0]["function"]["parameters"];
        assert!(params.get("$schema").is_none());
        assert!(params["properties"]["inner"].get("$schema").is_none());
    }

    #[tokio::test]
    async fn test_missing_tool_ids_filled() {
        let t = GroqTransformer;
        let resp = UpstreamResponse::json(json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "", "type": "function", "function": {"name": "f", "arguments": "{}"}},
            ]}}],
        }));

        let out = t
            .transform_response_out(resp, &ResponseContext::new("m"))
            .await
            .unwrap();
        let UpstreamResponse::Json { body, .. } = out else {
            panic!("expected json");
        };
        let id = body["choices"][0]["message"]["tool_calls"][0]["id"]
            .as_str()
            .unwrap();
        assert!(id.starts_with("call_"));
    }
}

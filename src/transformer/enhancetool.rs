//! Tool-argument repair: buffers streamed argument fragments and re-emits
//! each call as one delta with syntactically valid JSON arguments. Some
//! providers stream arguments that only parse under lenient JSON5 rules.

use super::{ResponseContext, Transformer, UpstreamResponse};
use crate::convert::openai_wire::{
    ChatCompletionChunk, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use crate::error::Result;
use crate::sse::{data_frame, data_payload, reframe_stream, LineTransform};
use crate::transformer::registry::RegistryContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct EnhanceToolTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(EnhanceToolTransformer))
}

/// Best-effort argument repair: strict JSON as-is, then JSON5, then the raw
/// text wrapped nowhere (callers get what the model produced).
pub fn repair_arguments(raw: &str) -> String {
    if raw.trim().is_empty() {
        return "{}".to_string();
    }
    if serde_json::from_str::<Value>(raw).is_ok() {
        return raw.to_string();
    }
    if let Ok(value) = json5::from_str::<Value>(raw) {
        if let Ok(repaired) = serde_json::to_string(&value) {
            return repaired;
        }
    }
    raw.to_string()
}

#[async_trait]
impl Transformer for EnhanceToolTransformer {
    fn name(&self) -> &'static str {
        "enhancetool"
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
                        if let Some(args) = call
                            .pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .map(repair_arguments)
                        {
                            if let Some(function) = call
                                .pointer_mut("/function")
                                .and_then(Value::as_object_mut)
                            {
                                function.insert("arguments".to_string(), Value::String(args));
                            }
                        }
                    }
                }
                Ok(UpstreamResponse::Json { status, body })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, ToolArgsBufferState::default()),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct PendingTool {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Buffers tool-call deltas until the finish chunk, then replays each call
/// whole with repaired arguments.
#[derive(Debug, Default)]
pub struct ToolArgsBufferState {
    pending: HashMap<u64, PendingTool>,
    order: Vec<u64>,
    parse_errors: u64,
}

impl ToolArgsBufferState {
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn flush(&mut self, id: &str, model: &str, out: &mut Vec<String>) {
        if self.order.is_empty() {
            return;
        }

        let calls: Vec<ChunkToolCall> = self
            .order
            .drain(..)
            .filter_map(|index| {
                let tool = self.pending.remove(&index)?;
                Some(ChunkToolCall {
                    index,
                    id: tool.id,
                    call_type: Some("function".to_string()),
                    function: Some(ChunkToolCallFunction {
                        name: tool.name,
                        arguments: Some(repair_arguments(&tool.arguments)),
                    }),
                })
            })
            .collect();

        let chunk = ChatCompletionChunk::new(id, model).with_delta(
            ChunkDelta {
                tool_calls: Some(calls),
                ..Default::default()
            },
            None,
        );
        if let Ok(json) = serde_json::to_string(&chunk) {
            out.push(data_frame(&json));
        }
    }

    fn process(&mut self, mut chunk: ChatCompletionChunk, out: &mut Vec<String>) {
        if chunk.choices.is_empty() {
            if let Ok(json) = serde_json::to_string(&chunk) {
                out.push(data_frame(&json));
            }
            return;
        }
        let choice = &mut chunk.choices[0];

        if let Some(calls) = choice.delta.tool_calls.take() {
            for tc in calls {
                let entry = self.pending.entry(tc.index).or_insert_with(|| {
                    self.order.push(tc.index);
                    PendingTool::default()
                });
                if tc.id.as_ref().is_some_and(|id| !id.is_empty()) {
                    entry.id = tc.id;
                }
                if let Some(function) = tc.function {
                    if function.name.as_ref().is_some_and(|n| !n.is_empty()) {
                        entry.name = function.name;
                    }
                    if let Some(args) = function.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }

        if choice.finish_reason.is_some() {
            let (id, model) = (chunk.id.clone(), chunk.model.clone());
            self.flush(&id, &model, out);
        }

        let empty_delta = choice.delta.content.is_none()
            && choice.delta.tool_calls.is_none()
            && choice.delta.role.is_none()
            && choice.delta.thinking.is_none()
            && choice.finish_reason.is_none();
        if empty_delta && chunk.usage.is_none() {
            return;
        }

        if let Ok(json) = serde_json::to_string(&chunk) {
            out.push(data_frame(&json));
        }
    }
}

impl LineTransform for ToolArgsBufferState {
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            return;
        }

        let Some(data) = data_payload(line) else {
            out.push(format!("{line}\n\n"));
            return;
        };

        if data == "[DONE]" {
            out.push(data_frame("[DONE]"));
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process(chunk, out),
            Err(_) => {
                self.parse_errors += 1;
                out.push(format!("{line}\n\n"));
            }
        }
    }

    fn on_end(&mut self, _out: &mut Vec<String>) {}
}

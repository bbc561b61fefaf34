//! Forced tool mode: makes tool selection mandatory and gives the model an
//! `ExitTool` escape hatch, then unwraps ExitTool calls back into plain
//! assistant text on the way out.

use super::{OutgoingRequest, ResponseContext, Transformer, UpstreamResponse};
use crate::convert::openai_wire::{ChatCompletionChunk, ChunkDelta};
use crate::error::Result;
use crate::provider::Provider;
use crate::sse::{data_frame, data_payload, reframe_stream, LineTransform};
use crate::transformer::registry::RegistryContext;
use crate::unified::{UnifiedMessage, UnifiedTool, UnifiedToolChoice};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const EXIT_TOOL: &str = "ExitTool";

const TOOL_MODE_REMINDER: &str = "<system-reminder>Tool mode is active. Proactively execute the most suitable tool for the task. Before invoking a tool, evaluate whether it matches the current task. If no available tool is appropriate, you MUST call `ExitTool` to exit tool mode; that is the only valid way to stop using tools.</system-reminder>";

pub struct ToolUseTransformer;

pub fn factory(_options: &Map<String, Value>, _ctx: &RegistryContext) -> Result<Arc<dyn Transformer>> {
    Ok(Arc::new(ToolUseTransformer))
}

fn exit_tool() -> UnifiedTool {
    UnifiedTool::function(
        EXIT_TOOL,
        "Leave tool mode and answer the user directly. Use when no other tool fits the task.",
        json!({
            "type": "object",
            "properties": {
                "response": {
                    "type": "string",
                    "description": "The direct answer for the user.",
                },
            },
            "required": ["response"],
        }),
    )
}

/// Pull the `response` string out of ExitTool arguments, falling back to
/// the raw argument text.
fn unwrap_exit_args(arguments: &str) -> String {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|v| v.get("response").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| arguments.to_string())
}

#[async_trait]
impl Transformer for ToolUseTransformer {
    fn name(&self) -> &'static str {
        "tooluse"
    }

    async fn transform_request_in(
        &self,
        req: OutgoingRequest,
        _provider: &Provider,
    ) -> Result<OutgoingRequest> {
        req.map_unified(|mut unified| {
            let has_tools = unified.tools.as_ref().is_some_and(|t| !t.is_empty());
            if !has_tools {
                return Ok(unified);
            }

            if !unified.has_tool(EXIT_TOOL) {
                if let Some(tools) = &mut unified.tools {
                    tools.push(exit_tool());
                }
            }
            unified.tool_choice = Some(UnifiedToolChoice::Mode("required".to_string()));
            unified
                .messages
                .push(UnifiedMessage::text("system", TOOL_MODE_REMINDER));
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
                unwrap_exit_tool_json(&mut body);
                Ok(UpstreamResponse::Json { status, body })
            }
            UpstreamResponse::Stream { status, stream } => Ok(UpstreamResponse::Stream {
                status,
                stream: reframe_stream(stream, ExitToolStreamState::default()),
            }),
        }
    }
}

fn unwrap_exit_tool_json(body: &mut Value) {
    let Some(message) = body
        .pointer_mut("/choices/0/message")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let Some(calls) = message.get_mut("tool_calls").and_then(Value::as_array_mut) else {
        return;
    };

    let exit_pos = calls.iter().position(|c| {
        c.pointer("/function/name").and_then(Value::as_str) == Some(EXIT_TOOL)
    });
    let Some(pos) = exit_pos else {
        return;
    };

    let call = calls.remove(pos);
    let arguments = call
        .pointer("/function/arguments")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let response = unwrap_exit_args(arguments);
    let no_other_calls = calls.is_empty();

    message.insert("content".to_string(), Value::String(response));
    if no_other_calls {
        message.remove("tool_calls");
        if let Some(choice) = body
            .pointer_mut("/choices/0")
            .and_then(Value::as_object_mut)
        {
            choice.insert("finish_reason".to_string(), Value::String("stop".to_string()));
        }
    }
}

/// Suppresses ExitTool call deltas in a chunk stream, accumulating their
/// arguments, and replays the unwrapped text before the finish chunk.
#[derive(Debug, Default)]
pub struct ExitToolStreamState {
    exit_index: Option<u64>,
    exit_args: String,
    other_tools_seen: bool,
    parse_errors: u64,
}

impl ExitToolStreamState {
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
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
            let mut kept = Vec::new();
            for tc in calls {
                let is_exit = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.as_deref())
                    .map(|n| n == EXIT_TOOL)
                    .unwrap_or(false)
                    || self.exit_index == Some(tc.index);

                if is_exit {
                    self.exit_index = Some(tc.index);
                    if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
                        self.exit_args.push_str(args);
                    }
                } else {
                    self.other_tools_seen = true;
                    kept.push(tc);
                }
            }
            if !kept.is_empty() {
                choice.delta.tool_calls = Some(kept);
            }
        }

        if choice.finish_reason.is_some() && self.exit_index.is_some() {
            let text_chunk = ChatCompletionChunk::new(&chunk.id, &chunk.model).with_delta(
                ChunkDelta {
                    content: Some(unwrap_exit_args(&self.exit_args)),
                    ..Default::default()
                },
                None,
            );
            if let Ok(json) = serde_json::to_string(&text_chunk) {
                out.push(data_frame(&json));
            }

            if !self.other_tools_seen
                && choice.finish_reason.as_deref() == Some("tool_calls")
            {
                choice.finish_reason = Some("stop".to_string());
            }
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

impl LineTransform for ExitToolStreamState {
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

//! State machine that re-frames an Anthropic Messages SSE stream into OpenAI
//! completion chunks. Applied on the response path of Anthropic-family
//! providers so the rest of the gateway only ever sees the unified shape.

use crate::convert::anthropic::{new_completion_id, stop_to_finish_reason};
use crate::convert::anthropic_wire::{Delta, ResponseContentBlock, StreamEvent};
use crate::convert::openai_wire::{
    ChatCompletionChunk, ChatUsage, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use crate::sse::{data_frame, data_payload, LineTransform};
use crate::unified::ThinkingContent;
use std::collections::HashMap;

#[derive(Debug)]
pub struct OpenAiStreamState {
    completion_id: String,
    model: String,
    finished: bool,
    /// Anthropic content-block index to OpenAI tool-call index.
    tool_indices: HashMap<usize, u64>,
    input_tokens: u64,
    output_tokens: u64,
    finish_reason: Option<String>,
    parse_errors: u64,
}

impl OpenAiStreamState {
    pub fn new(model: &str) -> Self {
        Self {
            completion_id: new_completion_id(),
            model: model.to_string(),
            finished: false,
            tool_indices: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: None,
            parse_errors: 0,
        }
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk::new(&self.completion_id, &self.model).with_delta(delta, finish_reason)
    }

    fn emit(&self, chunk: &ChatCompletionChunk, out: &mut Vec<String>) {
        if let Ok(json) = serde_json::to_string(chunk) {
            out.push(data_frame(&json));
        }
    }

    fn process_event(&mut self, event: StreamEvent, out: &mut Vec<String>) {
        match event {
            StreamEvent::MessageStart { message } => {
                if !message.model.is_empty() {
                    self.model = message.model.clone();
                }
                self.input_tokens = message.usage.input_tokens;
                let chunk = self.chunk(
                    ChunkDelta {
                        role: Some("assistant".to_string()),
                        content: Some(String::new()),
                        ..Default::default()
                    },
                    None,
                );
                self.emit(&chunk, out);
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let ResponseContentBlock::ToolUse { id, name, .. } = content_block {
                    let tool_index = self.tool_indices.len() as u64;
                    self.tool_indices.insert(index, tool_index);
                    let chunk = self.chunk(
                        ChunkDelta {
                            tool_calls: Some(vec![ChunkToolCall {
                                index: tool_index,
                                id: Some(id),
                                call_type: Some("function".to_string()),
                                function: Some(ChunkToolCallFunction {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..Default::default()
                        },
                        None,
                    );
                    self.emit(&chunk, out);
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => {
                    let chunk = self.chunk(
                        ChunkDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                        None,
                    );
                    self.emit(&chunk, out);
                }
                Delta::ThinkingDelta { thinking } => {
                    let chunk = self.chunk(
                        ChunkDelta {
                            thinking: Some(ThinkingContent {
                                content: Some(thinking),
                                signature: None,
                            }),
                            ..Default::default()
                        },
                        None,
                    );
                    self.emit(&chunk, out);
                }
                Delta::SignatureDelta { signature } => {
                    let chunk = self.chunk(
                        ChunkDelta {
                            thinking: Some(ThinkingContent {
                                content: None,
                                signature: Some(signature),
                            }),
                            ..Default::default()
                        },
                        None,
                    );
                    self.emit(&chunk, out);
                }
                Delta::InputJsonDelta { partial_json } => {
                    if let Some(&tool_index) = self.tool_indices.get(&index) {
                        let chunk = self.chunk(
                            ChunkDelta {
                                tool_calls: Some(vec![ChunkToolCall {
                                    index: tool_index,
                                    function: Some(ChunkToolCallFunction {
                                        name: None,
                                        arguments: Some(partial_json),
                                    }),
                                    ..Default::default()
                                }]),
                                ..Default::default()
                            },
                            None,
                        );
                        self.emit(&chunk, out);
                    }
                }
            },
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(stop_to_finish_reason(&reason));
                }
                self.output_tokens = usage.output_tokens;
            }
            StreamEvent::MessageStop => self.finish(out),
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => {}
        }
    }

    fn finish(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let finish_reason = self
            .finish_reason
            .take()
            .unwrap_or_else(|| "stop".to_string());

        let mut chunk = self.chunk(ChunkDelta::default(), Some(finish_reason));
        chunk.usage = Some(ChatUsage::normalized(self.input_tokens, self.output_tokens));
        self.emit(&chunk, out);

        out.push(data_frame("[DONE]"));
    }
}

impl LineTransform for OpenAiStreamState {
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if self.finished || line.is_empty() || line.starts_with("event:") {
            return;
        }

        let Some(data) = data_payload(line) else {
            out.push(format!("{line}\n\n"));
            return;
        };

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => self.process_event(event, out),
            Err(_) => {
                self.parse_errors += 1;
                out.push(format!("{line}\n\n"));
            }
        }
    }

    fn on_end(&mut self, out: &mut Vec<String>) {
        self.finish(out);
    }
}

/// Vendor field carrying reasoning text in OpenAI-compatible chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningField {
    /// `delta.reasoning_content` (DeepSeek and friends).
    ReasoningContent,
    /// `delta.reasoning` (OpenRouter).
    Reasoning,
}

/// Relabels a vendor reasoning field into `thinking` deltas. When the
/// reasoning phase ends a signature delta is emitted, stamped with the
/// current time in milliseconds so downstream Anthropic conversion has a
/// signature to close the block with.
#[derive(Debug)]
pub struct ReasoningToThinkingState {
    field: ReasoningField,
    in_reasoning: bool,
    parse_errors: u64,
}

impl ReasoningToThinkingState {
    pub fn new(field: ReasoningField) -> Self {
        Self {
            field,
            in_reasoning: false,
            parse_errors: 0,
        }
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn signature_chunk(&self, template: &ChatCompletionChunk) -> ChatCompletionChunk {
        ChatCompletionChunk::new(&template.id, &template.model).with_delta(
            ChunkDelta {
                thinking: Some(ThinkingContent {
                    content: None,
                    signature: Some(chrono::Utc::now().timestamp_millis().to_string()),
                }),
                ..Default::default()
            },
            None,
        )
    }

    fn process(&mut self, mut chunk: ChatCompletionChunk, out: &mut Vec<String>) {
        if let Some(choice) = chunk.choices.first_mut() {
            let reasoning = match self.field {
                ReasoningField::ReasoningContent => choice.delta.reasoning_content.take(),
                ReasoningField::Reasoning => choice.delta.reasoning.take(),
            };

            if let Some(text) = reasoning.filter(|t| !t.is_empty()) {
                self.in_reasoning = true;
                choice.delta.thinking = Some(ThinkingContent {
                    content: Some(text),
                    signature: None,
                });
            } else if self.in_reasoning {
                let reasoning_over = choice.delta.content.as_ref().is_some_and(|c| !c.is_empty())
                    || choice.delta.tool_calls.is_some()
                    || choice.finish_reason.is_some();
                if reasoning_over {
                    self.in_reasoning = false;
                    if let Ok(json) = serde_json::to_string(&self.signature_chunk(&chunk)) {
                        out.push(data_frame(&json));
                    }
                }
            }
        }

        if let Ok(json) = serde_json::to_string(&chunk) {
            out.push(data_frame(&json));
        }
    }
}

impl LineTransform for ReasoningToThinkingState {
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

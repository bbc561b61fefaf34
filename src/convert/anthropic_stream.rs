//! State machine that re-frames an OpenAI chunk stream into Anthropic
//! Messages SSE events.
//!
//! Driven one line at a time through [`LineTransform`], so output is
//! byte-identical no matter how the upstream bytes were chunked. Lines that
//! are not `data:` records, and `data:` payloads that fail to parse, pass
//! through verbatim (the latter bump an error counter).

use crate::convert::anthropic::finish_to_stop_reason;
use crate::convert::anthropic::new_call_id;
use crate::convert::anthropic_wire::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
    Usage,
};
use crate::convert::openai_wire::ChatCompletionChunk;
use crate::sse::{data_payload, frame, LineTransform};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    Text(usize),
    Thinking(usize),
    Tool(usize),
}

impl OpenBlock {
    fn index(self) -> usize {
        match self {
            OpenBlock::Text(i) | OpenBlock::Thinking(i) | OpenBlock::Tool(i) => i,
        }
    }
}

/// Re-frames OpenAI completion chunks into Anthropic stream events.
#[derive(Debug)]
pub struct AnthropicStreamState {
    model: String,
    message_id: String,
    started: bool,
    finished: bool,
    current: Option<OpenBlock>,
    next_index: usize,
    /// OpenAI tool-call index to Anthropic content-block index.
    tool_blocks: HashMap<u64, usize>,
    pending_stop: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
    parse_errors: u64,
}

impl AnthropicStreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            current: None,
            next_index: 0,
            tool_blocks: HashMap::new(),
            pending_stop: None,
            input_tokens: 0,
            output_tokens: 0,
            parse_errors: 0,
        }
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn emit(&self, event: &StreamEvent, out: &mut Vec<String>) {
        if let Ok(json) = serde_json::to_string(event) {
            out.push(frame(event.event_name(), &json));
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<String>) {
        if self.started {
            return;
        }
        self.started = true;
        let start = StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.message_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        };
        self.emit(&start, out);
        self.emit(&StreamEvent::Ping, out);
    }

    fn close_current(&mut self, out: &mut Vec<String>) {
        if let Some(block) = self.current.take() {
            self.emit(
                &StreamEvent::ContentBlockStop {
                    index: block.index(),
                },
                out,
            );
        }
    }

    fn open_block(&mut self, block: ResponseContentBlock, out: &mut Vec<String>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.emit(
            &StreamEvent::ContentBlockStart {
                index,
                content_block: block,
            },
            out,
        );
        index
    }

    fn process_chunk(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<String>) {
        if let Some(usage) = &chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        self.ensure_started(out);

        let Some(choice) = chunk.choices.first() else {
            // Usage-only trailer chunk.
            return;
        };

        // Thinking deltas open their own block; a signature closes it.
        if let Some(thinking) = &choice.delta.thinking {
            if let Some(content) = thinking.content.as_ref().filter(|c| !c.is_empty()) {
                let index = match self.current {
                    Some(OpenBlock::Thinking(i)) => i,
                    _ => {
                        self.close_current(out);
                        let i = self.open_block(
                            ResponseContentBlock::Thinking {
                                thinking: String::new(),
                                signature: None,
                            },
                            out,
                        );
                        self.current = Some(OpenBlock::Thinking(i));
                        i
                    }
                };
                self.emit(
                    &StreamEvent::ContentBlockDelta {
                        index,
                        delta: Delta::ThinkingDelta {
                            thinking: content.clone(),
                        },
                    },
                    out,
                );
            }

            if let Some(signature) = &thinking.signature {
                if let Some(OpenBlock::Thinking(index)) = self.current {
                    self.emit(
                        &StreamEvent::ContentBlockDelta {
                            index,
                            delta: Delta::SignatureDelta {
                                signature: signature.clone(),
                            },
                        },
                        out,
                    );
                    self.close_current(out);
                }
            }
        }

        if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
            let index = match self.current {
                Some(OpenBlock::Text(i)) => i,
                _ => {
                    self.close_current(out);
                    let i = self.open_block(
                        ResponseContentBlock::Text {
                            text: String::new(),
                        },
                        out,
                    );
                    self.current = Some(OpenBlock::Text(i));
                    i
                }
            };
            self.emit(
                &StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::TextDelta {
                        text: content.clone(),
                    },
                },
                out,
            );
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let block_index = match self.tool_blocks.get(&tc.index) {
                    Some(&i) => i,
                    None => {
                        self.close_current(out);
                        let id = tc
                            .id
                            .clone()
                            .filter(|i| !i.is_empty())
                            .unwrap_or_else(new_call_id);
                        let name = tc
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .filter(|n| !n.is_empty())
                            .unwrap_or_else(|| format!("tool_{}", tc.index));
                        let i = self.open_block(
                            ResponseContentBlock::ToolUse {
                                id,
                                name,
                                input: serde_json::Value::Object(serde_json::Map::new()),
                            },
                            out,
                        );
                        self.tool_blocks.insert(tc.index, i);
                        self.current = Some(OpenBlock::Tool(i));
                        i
                    }
                };

                if let Some(args) = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_ref())
                    .filter(|a| !a.is_empty())
                {
                    self.emit(
                        &StreamEvent::ContentBlockDelta {
                            index: block_index,
                            delta: Delta::InputJsonDelta {
                                partial_json: args.clone(),
                            },
                        },
                        out,
                    );
                }
            }
        }

        // Finish is terminal: close out and stop translating. Anything the
        // upstream sends after this chunk is ignored.
        if let Some(reason) = &choice.finish_reason {
            self.pending_stop = Some(finish_to_stop_reason(reason));
            self.finish(out);
        }
    }

    fn finish(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.ensure_started(out);
        self.close_current(out);

        let stop_reason = self
            .pending_stop
            .take()
            .unwrap_or_else(|| "end_turn".to_string());

        self.emit(
            &StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.output_tokens,
                    input_tokens: None,
                },
            },
            out,
        );
        self.emit(&StreamEvent::MessageStop, out);
    }
}

impl LineTransform for AnthropicStreamState {
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if self.finished || line.is_empty() {
            return;
        }

        let Some(data) = data_payload(line) else {
            // Comments and event-name lines pass through untouched.
            out.push(format!("{line}\n\n"));
            return;
        };

        if data == "[DONE]" {
            self.finish(out);
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk, out),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::{collect_frames, reframe_stream, ByteStream};
    use bytes::Bytes;
    use futures::stream;

    fn run_lines(lines: &[&str]) -> Vec<String> {
        let mut state = AnthropicStreamState::new("test-model");
        let mut out = Vec::new();
        for line in lines {
            state.on_line(line, &mut out);
        }
        state.on_end(&mut out);
        out
    }

    fn event_names(frames: &[String]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| {
                f.lines()
                    .find_map(|l| l.strip_prefix("event: "))
                    .map(str::to_string)
            })
            .collect()
    }

    #[test]
    fn test_text_stream() {
        let frames = run_lines(&[
            r#"data: {"id":"c1","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#,
            r#"data: {"id":"c1","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"data: {"id":"c1","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
            "data: [DONE]",
        ]);

        let names = event_names(&frames);
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let delta_frame = &frames[frames.len() - 2];
        assert!(delta_frame.contains("\"stop_reason\":\"end_turn\""));
        assert!(delta_frame.contains("\"output_tokens\":2"));
    }

    #[test]
    fn test_text_block_gets_index_zero_tool_gets_next() {
        let frames = run_lines(&[
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"Checking"},"finish_reason":null}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search","arguments":"{\"q\""}}]},"finish_reason":null}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":":1}"}}]},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);

        let starts: Vec<&String> = frames
            .iter()
            .filter(|f| f.starts_with("event: content_block_start"))
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts[0].contains("\"index\":0"));
        assert!(starts[0].contains("\"type\":\"text\""));
        assert!(starts[1].contains("\"index\":1"));
        assert!(starts[1].contains("\"type\":\"tool_use\""));
        assert!(starts[1].contains("\"name\":\"search\""));

        // Argument fragments only, never accumulated state.
        let deltas: Vec<&String> = frames
            .iter()
            .filter(|f| f.contains("input_json_delta"))
            .collect();
        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].contains("{\\\"q\\\""));
        assert!(deltas[1].contains(":1}"));

        assert!(frames
            .iter()
            .any(|f| f.contains("\"stop_reason\":\"tool_use\"")));
    }

    #[test]
    fn test_tool_without_id_gets_synthesized_id_and_name() {
        let frames = run_lines(&[
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":2,"function":{"arguments":"{}"}}]},"finish_reason":null}]}"#,
            "data: [DONE]",
        ]);

        let start = frames
            .iter()
            .find(|f| f.contains("content_block_start"))
            .unwrap();
        assert!(start.contains("\"id\":\"call_"));
        assert!(start.contains("\"name\":\"tool_2\""));
    }

    #[test]
    fn test_unparseable_data_passes_through_and_counts() {
        let mut state = AnthropicStreamState::new("m");
        let mut out = Vec::new();
        state.on_line("data: not json", &mut out);
        assert_eq!(out, vec!["data: not json\n\n"]);
        assert_eq!(state.parse_errors(), 1);
    }

    #[test]
    fn test_finish_reason_is_terminal() {
        let frames = run_lines(&[
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"done"},"finish_reason":null}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"stray"},"finish_reason":null}]}"#,
            "data: [DONE]",
        ]);

        // The finish chunk closes out the message; the stray chunk after it
        // produces nothing.
        let names = event_names(&frames);
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(!frames.iter().any(|f| f.contains("stray")));
    }

    #[test]
    fn test_lines_after_finish_are_ignored() {
        let mut state = AnthropicStreamState::new("m");
        let mut out = Vec::new();
        state.on_line("data: [DONE]", &mut out);
        let after_done = out.len();
        state.on_line(
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"late"},"finish_reason":null}]}"#,
            &mut out,
        );
        assert_eq!(out.len(), after_done);
    }

    #[test]
    fn test_finish_without_any_chunks_still_terminates() {
        let frames = run_lines(&[]);
        let names = event_names(&frames);
        assert_eq!(
            names,
            vec!["message_start", "ping", "message_delta", "message_stop"]
        );
    }

    #[test]
    fn test_thinking_block_closed_by_signature() {
        let frames = run_lines(&[
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"thinking":{"content":"hmm"}},"finish_reason":null}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"thinking":{"signature":"12345"}},"finish_reason":null}]}"#,
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"content":"answer"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);

        let names = event_names(&frames);
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start", // thinking at index 0
                "content_block_delta", // thinking_delta
                "content_block_delta", // signature_delta
                "content_block_stop",  // thinking closed before text opens
                "content_block_start", // text at index 1
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert!(frames[2].contains("\"type\":\"thinking\""));
        assert!(frames[6].contains("\"index\":1"));
    }

    #[tokio::test]
    async fn test_byte_at_a_time_matches_single_chunk() {
        let input = concat!(
            "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n",
            "\n",
            "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "\n",
            "data: [DONE]\n",
        );

        let whole: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(
            input.as_bytes(),
        ))]));
        let bytes: Vec<_> = input
            .as_bytes()
            .iter()
            .map(|b| Ok(Bytes::copy_from_slice(&[*b])))
            .collect();
        let split: ByteStream = Box::pin(stream::iter(bytes));

        let a = collect_frames(reframe_stream(whole, AnthropicStreamState::new("m")))
            .await
            .unwrap();
        let b = collect_frames(reframe_stream(split, AnthropicStreamState::new("m")))
            .await
            .unwrap();

        // Message ids are random; compare with ids normalized.
        let strip = |s: &str| {
            let mut out = String::new();
            let mut rest = s;
            while let Some(pos) = rest.find("msg_") {
                out.push_str(&rest[..pos + 4]);
                rest = &rest[pos + 4..];
                let end = rest
                    .find(|c: char| !c.is_ascii_hexdigit())
                    .unwrap_or(rest.len());
                rest = &rest[end..];
            }
            out.push_str(rest);
            out
        };
        assert_eq!(strip(&a), strip(&b));
    }
}

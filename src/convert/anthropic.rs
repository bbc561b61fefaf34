//! JSON conversions between the Anthropic Messages dialect and the unified
//! (OpenAI-shaped) model, in both directions.
//!
//! A single Anthropic message can expand into multiple unified messages
//! (a user turn carrying `tool_result` blocks becomes separate `tool`-role
//! messages) and the reverse conversion folds them back together.

use crate::convert::anthropic_wire::{
    ContentBlock, Message, MessageContent, MessagesRequest, MessagesResponse,
    ResponseContentBlock, Role, SystemContent, ThinkingParam, Tool, ToolChoice, ToolChoiceAuto,
    ToolChoiceSpecific, ToolResultContent, Usage,
};
use crate::convert::openai_wire::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, ResponseToolCall,
    ResponseToolCallFunction,
};
use crate::unified::{
    ContentPart, ImageUrlDetail, StreamOptions, ThinkingConfig, ThinkingContent, ToolCallFunction,
    ToolChoiceFunction, ToolChoiceFunctionName, ToolFunction, UnifiedChatRequest, UnifiedContent,
    UnifiedMessage, UnifiedTool, UnifiedToolCall, UnifiedToolChoice,
};
use serde_json::Map;

/// Map an OpenAI `finish_reason` to an Anthropic `stop_reason`.
pub fn finish_to_stop_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
    .to_string()
}

/// Map an Anthropic `stop_reason` to an OpenAI `finish_reason`.
pub fn stop_to_finish_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "stop_sequence" => "content_filter",
        _ => "stop",
    }
    .to_string()
}

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Request conversions
// ---------------------------------------------------------------------------

/// Convert an inbound Anthropic Messages request into the unified model.
pub fn request_to_unified(req: MessagesRequest) -> UnifiedChatRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(UnifiedMessage::text("system", system.as_text()));
    }

    for msg in &req.messages {
        match msg.role {
            Role::User => convert_user_message(&msg.content, &mut messages),
            Role::Assistant => messages.push(convert_assistant_message(&msg.content)),
        }
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| UnifiedTool {
                tool_type: "function".to_string(),
                function: ToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => UnifiedToolChoice::Mode("required".to_string()),
            "none" => UnifiedToolChoice::Mode("none".to_string()),
            _ => UnifiedToolChoice::Mode("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            UnifiedToolChoice::Function(ToolChoiceFunction {
                choice_type: "function".to_string(),
                function: ToolChoiceFunctionName { name: name.clone() },
            })
        }
    });

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let thinking = req.thinking.as_ref().map(|t| ThinkingConfig {
        thinking_type: t.thinking_type.clone(),
        budget_tokens: t.budget_tokens,
    });

    UnifiedChatRequest {
        model: req.model,
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences,
        thinking,
        extra: Map::new(),
    }
}

fn convert_user_message(content: &MessageContent, out: &mut Vec<UnifiedMessage>) {
    let blocks = content.blocks();
    let mut parts: Vec<ContentPart> = Vec::new();

    let flush =
        |parts: &mut Vec<ContentPart>, out: &mut Vec<UnifiedMessage>| {
            if parts.is_empty() {
                return;
            }
            out.push(UnifiedMessage {
                role: "user".to_string(),
                content: Some(collapse_parts(std::mem::take(parts))),
                tool_calls: None,
                tool_call_id: None,
                thinking: None,
                cache_control: None,
            });
        };

    for block in &blocks {
        match block {
            ContentBlock::Text { text, cache_control } => {
                parts.push(ContentPart::Text {
                    text: text.clone(),
                    cache_control: cache_control.clone(),
                });
            }
            ContentBlock::Image { source } => {
                let url = match (&source.url, &source.media_type, &source.data) {
                    (Some(url), _, _) => url.clone(),
                    (None, Some(media), Some(data)) => {
                        format!("data:{media};base64,{data}")
                    }
                    _ => continue,
                };
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail { url, detail: None },
                    cache_control: None,
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Tool results become their own tool-role messages.
                flush(&mut parts, out);
                out.push(UnifiedMessage {
                    role: "tool".to_string(),
                    content: Some(UnifiedContent::Text(tool_result_text(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    thinking: None,
                    cache_control: None,
                });
            }
            ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
        }
    }

    flush(&mut parts, out);
}

fn convert_assistant_message(content: &MessageContent) -> UnifiedMessage {
    let blocks = content.blocks();
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<UnifiedToolCall> = Vec::new();
    let mut thinking: Option<ThinkingContent> = None;

    for block in &blocks {
        match block {
            ContentBlock::Text { text, .. } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(UnifiedToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::Thinking {
                thinking: t,
                signature,
            } => {
                thinking = Some(ThinkingContent {
                    content: Some(t.clone()),
                    signature: signature.clone(),
                });
            }
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    UnifiedMessage {
        role: "assistant".to_string(),
        content: if text_parts.is_empty() {
            None
        } else {
            Some(UnifiedContent::Text(text_parts.join("")))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
        thinking,
        cache_control: None,
    }
}

fn collapse_parts(parts: Vec<ContentPart>) -> UnifiedContent {
    if parts.len() == 1 {
        if let ContentPart::Text {
            text,
            cache_control: None,
        } = &parts[0]
        {
            return UnifiedContent::Text(text.clone());
        }
    }
    UnifiedContent::Parts(parts)
}

fn tool_result_text(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

/// Convert a unified request into an outbound Anthropic Messages body.
/// The reverse of [`request_to_unified`]: tool-role messages fold back into
/// `tool_result` blocks on a user turn.
pub fn unified_to_request(req: &UnifiedChatRequest) -> MessagesRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();
    let mut pending_user: Vec<ContentBlock> = Vec::new();

    let flush_user = |pending: &mut Vec<ContentBlock>, messages: &mut Vec<Message>| {
        if pending.is_empty() {
            return;
        }
        messages.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(std::mem::take(pending)),
        });
    };

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.as_text());
                }
            }
            "tool" => {
                pending_user.push(ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg
                        .content
                        .as_ref()
                        .map(|c| ToolResultContent::Text(c.as_text())),
                    is_error: None,
                });
            }
            "assistant" => {
                flush_user(&mut pending_user, &mut messages);
                messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(assistant_blocks(msg)),
                });
            }
            _ => {
                pending_user.extend(user_blocks(msg));
            }
        }
    }
    flush_user(&mut pending_user, &mut messages);

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        UnifiedToolChoice::Mode(mode) => ToolChoice::Auto(ToolChoiceAuto {
            choice_type: match mode.as_str() {
                "required" => "any",
                "none" => "none",
                _ => "auto",
            }
            .to_string(),
        }),
        UnifiedToolChoice::Function(f) => ToolChoice::Specific(ToolChoiceSpecific {
            choice_type: "tool".to_string(),
            name: f.function.name.clone(),
        }),
    });

    let thinking = req.thinking.as_ref().map(|t| ThinkingParam {
        thinking_type: t.thinking_type.clone(),
        budget_tokens: t.budget_tokens,
    });

    MessagesRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(4096),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(SystemContent::Text(system_parts.join("\n")))
        },
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        tools,
        tool_choice,
        metadata: None,
        stop_sequences: req.stop.clone(),
        thinking,
        extra: std::collections::HashMap::new(),
    }
}

fn user_blocks(msg: &UnifiedMessage) -> Vec<ContentBlock> {
    match &msg.content {
        Some(UnifiedContent::Text(t)) => vec![ContentBlock::Text {
            text: t.clone(),
            cache_control: msg.cache_control.clone(),
        }],
        Some(UnifiedContent::Parts(parts)) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text {
                    text,
                    cache_control,
                } => Some(ContentBlock::Text {
                    text: text.clone(),
                    cache_control: cache_control.clone(),
                }),
                ContentPart::ImageUrl { image_url, .. } => {
                    data_uri_to_image(&image_url.url)
                }
            })
            .collect(),
        None => Vec::new(),
    }
}

fn assistant_blocks(msg: &UnifiedMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(thinking) = &msg.thinking {
        blocks.push(ContentBlock::Thinking {
            thinking: thinking.content.clone().unwrap_or_default(),
            signature: thinking.signature.clone(),
        });
    }

    if let Some(content) = &msg.content {
        let text = content.as_text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text,
                cache_control: None,
            });
        }
    }

    if let Some(tool_calls) = &msg.tool_calls {
        for tc in tool_calls {
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
            blocks.push(ContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
            cache_control: None,
        });
    }

    blocks
}

fn data_uri_to_image(url: &str) -> Option<ContentBlock> {
    use crate::convert::anthropic_wire::ImageSource;

    if let Some(rest) = url.strip_prefix("data:") {
        let (media_type, data) = rest.split_once(";base64,")?;
        Some(ContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: Some(media_type.to_string()),
                data: Some(data.to_string()),
                url: None,
            },
        })
    } else {
        Some(ContentBlock::Image {
            source: ImageSource {
                source_type: "url".to_string(),
                media_type: None,
                data: None,
                url: Some(url.to_string()),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Response conversions
// ---------------------------------------------------------------------------

/// Convert an OpenAI-shaped completion into an Anthropic Messages response.
/// `original_model` is what the caller asked for.
pub fn openai_to_response(
    resp: &ChatCompletionResponse,
    original_model: &str,
) -> MessagesResponse {
    let choice = resp.choices.first();
    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        let thinking_text = c
            .message
            .thinking
            .as_ref()
            .and_then(|t| t.content.clone())
            .or_else(|| c.message.reasoning_content.clone());

        if let Some(thinking) = thinking_text.filter(|t| !t.is_empty()) {
            content.push(ResponseContentBlock::Thinking {
                thinking,
                signature: c.message.thinking.as_ref().and_then(|t| t.signature.clone()),
            });
        }

        if let Some(text) = c.message.content.as_ref().filter(|t| !t.is_empty()) {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }

        if let Some(tool_calls) = &c.message.tool_calls {
            for tc in tool_calls {
                let input = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    // Callers expect at least one content block.
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(finish_to_stop_reason)
        .unwrap_or_else(|| "end_turn".to_string());

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    });

    let id = if resp.id.is_empty() {
        new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Convert an Anthropic Messages response into the OpenAI shape.
pub fn response_to_openai(resp: &MessagesResponse) -> ChatCompletionResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ResponseToolCall> = Vec::new();
    let mut thinking: Option<ThinkingContent> = None;

    for block in &resp.content {
        match block {
            ResponseContentBlock::Text { text } => text_parts.push(text.clone()),
            ResponseContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ResponseToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ResponseToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ResponseContentBlock::Thinking {
                thinking: t,
                signature,
            } => {
                thinking = Some(ThinkingContent {
                    content: Some(t.clone()),
                    signature: signature.clone(),
                });
            }
        }
    }

    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(stop_to_finish_reason)
        .unwrap_or_else(|| "stop".to_string());

    ChatCompletionResponse {
        id: new_completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: resp.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: Some("assistant".to_string()),
                content: if text_parts.is_empty() {
                    None
                } else {
                    Some(text_parts.join(""))
                },
                reasoning_content: None,
                reasoning: None,
                thinking,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                annotations: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(ChatUsage::normalized(
            resp.usage.input_tokens,
            resp.usage.output_tokens,
        )),
        system_fingerprint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_request(body: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_simple_request_to_unified() {
        let req = parse_request(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "Hello"}],
        }));

        let unified = request_to_unified(req);
        assert_eq!(unified.model, "claude-sonnet-4-20250514");
        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, "system");
        assert_eq!(unified.messages[1].role, "user");
        assert_eq!(unified.max_tokens, Some(1024));
    }

    #[test]
    fn test_tool_result_becomes_tool_message() {
        let req = parse_request(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "result 1"},
                    {"type": "text", "text": "Now continue"},
                ],
            }],
        }));

        let unified = request_to_unified(req);
        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, "tool");
        assert_eq!(
            unified.messages[0].tool_call_id,
            Some("toolu_1".to_string())
        );
        assert_eq!(unified.messages[1].role, "user");
    }

    #[test]
    fn test_tool_choice_any_maps_to_required() {
        let req = parse_request(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{"name": "f", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "any"},
        }));

        let unified = request_to_unified(req);
        match unified.tool_choice {
            Some(UnifiedToolChoice::Mode(m)) => assert_eq!(m, "required"),
            other => panic!("unexpected tool_choice: {other:?}"),
        }
    }

    #[test]
    fn test_unified_to_request_roundtrip() {
        let req = parse_request(json!({
            "model": "m",
            "max_tokens": 256,
            "system": "sys",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "toolu_9", "name": "lookup", "input": {"q": "x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_9", "content": "found"},
                ]},
            ],
        }));

        let unified = request_to_unified(req);
        let back = unified_to_request(&unified);

        assert_eq!(back.model, "m");
        assert_eq!(back.max_tokens, 256);
        assert!(matches!(back.system, Some(SystemContent::Text(ref s)) if s == "sys"));
        assert_eq!(back.messages.len(), 3);

        // Assistant turn keeps its tool_use block.
        let assistant_blocks = back.messages[1].content.blocks();
        assert!(assistant_blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { id, .. } if id == "toolu_9")));

        // The tool message folded back into a user turn with a tool_result.
        assert_eq!(back.messages[2].role, Role::User);
        let user_blocks = back.messages[2].content.blocks();
        assert!(user_blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_9")));
    }

    #[test]
    fn test_stop_reason_mapping_is_symmetric() {
        for (finish, stop) in [
            ("stop", "end_turn"),
            ("length", "max_tokens"),
            ("tool_calls", "tool_use"),
            ("content_filter", "stop_sequence"),
        ] {
            assert_eq!(finish_to_stop_reason(finish), stop);
            assert_eq!(stop_to_finish_reason(stop), finish);
        }
        assert_eq!(finish_to_stop_reason("unknown"), "end_turn");
        assert_eq!(stop_to_finish_reason("unknown"), "stop");
    }

    #[test]
    fn test_openai_to_response_with_tools() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-xyz",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Let me check.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30},
        }))
        .unwrap();

        let result = openai_to_response(&resp, "requested-model");
        assert_eq!(result.model, "requested-model");
        assert_eq!(result.stop_reason, Some("tool_use".to_string()));
        assert_eq!(result.content.len(), 2);

        if let ResponseContentBlock::ToolUse { id, name, input } = &result.content[1] {
            assert_eq!(id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(input["city"], "London");
        } else {
            panic!("expected tool_use block");
        }
    }

    #[test]
    fn test_response_to_openai_recomputes_total() {
        let resp = MessagesResponse {
            id: "msg_1".to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: vec![ResponseContentBlock::Text {
                text: "hi".to_string(),
            }],
            model: "claude-x".to_string(),
            stop_reason: Some("end_turn".to_string()),
            stop_sequence: None,
            usage: Usage {
                input_tokens: 7,
                output_tokens: 5,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        };

        let openai = response_to_openai(&resp);
        let usage = openai.usage.unwrap();
        assert_eq!(usage.total_tokens, 12);
        assert_eq!(
            openai.choices[0].finish_reason,
            Some("stop".to_string())
        );
        assert_eq!(openai.choices[0].message.content, Some("hi".to_string()));
    }

    #[test]
    fn test_thinking_block_survives_both_ways() {
        let resp = MessagesResponse {
            id: "msg_1".to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: vec![
                ResponseContentBlock::Thinking {
                    thinking: "pondering".to_string(),
                    signature: Some("sig".to_string()),
                },
                ResponseContentBlock::Text {
                    text: "answer".to_string(),
                },
            ],
            model: "m".to_string(),
            stop_reason: Some("end_turn".to_string()),
            stop_sequence: None,
            usage: Usage::default(),
        };

        let openai = response_to_openai(&resp);
        let thinking = openai.choices[0].message.thinking.as_ref().unwrap();
        assert_eq!(thinking.content.as_deref(), Some("pondering"));

        let back = openai_to_response(&openai, "m");
        assert!(matches!(
            &back.content[0],
            ResponseContentBlock::Thinking { thinking, .. } if thinking == "pondering"
        ));
    }
}

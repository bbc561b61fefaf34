//! Conversions between the Gemini `generateContent` dialect and the unified
//! model, both directions, JSON and SSE.

use crate::convert::anthropic::{new_call_id, new_completion_id};
use crate::convert::gemini_wire::{
    Blob, Candidate, Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration,
    FunctionResponse, GeminiTool, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, Part, ToolConfig, UsageMetadata,
};
use crate::convert::openai_wire::{
    Annotation, ChatCompletionChunk, ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage,
    ChunkDelta, ChunkToolCall, ChunkToolCallFunction, ResponseToolCall, ResponseToolCallFunction,
    UrlCitation,
};
use crate::sse::{data_frame, data_payload, LineTransform};
use crate::unified::{
    ContentPart, ImageUrlDetail, ToolCallFunction, ToolFunction, UnifiedChatRequest,
    UnifiedContent, UnifiedMessage, UnifiedTool, UnifiedToolCall, UnifiedToolChoice,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Fingerprint stamped on converted chunks, matching what Gemini-backed
/// OpenAI-compatible endpoints report.
pub const SYSTEM_FINGERPRINT: &str = "fp_a49d71b8a1";

/// Fields Gemini accepts in a function-declaration schema. Everything else
/// (additionalProperties, $schema, ...) gets stripped.
const SCHEMA_FIELDS: &[&str] = &[
    "type",
    "format",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
    "anyOf",
    "minItems",
    "maxItems",
];

/// Rewrite a JSON schema into the subset Gemini's API accepts.
pub fn sanitize_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();

    for (key, value) in obj {
        if !SCHEMA_FIELDS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            "properties" => {
                if let Some(props) = value.as_object() {
                    let sanitized: Map<String, Value> = props
                        .iter()
                        .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                        .collect();
                    out.insert(key.clone(), Value::Object(sanitized));
                }
            }
            "items" => {
                out.insert(key.clone(), sanitize_schema(value));
            }
            "anyOf" => {
                if let Some(arr) = value.as_array() {
                    out.insert(
                        key.clone(),
                        Value::Array(arr.iter().map(sanitize_schema).collect()),
                    );
                }
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    // Type unions are expressed via nullable / anyOf instead.
    if let Some(Value::Array(types)) = out.get("type").cloned() {
        let non_null: Vec<&Value> = types.iter().filter(|t| *t != "null").collect();
        if non_null.len() < types.len() {
            out.insert("nullable".to_string(), Value::Bool(true));
        }
        match non_null.as_slice() {
            [single] => {
                out.insert("type".to_string(), (*single).clone());
            }
            many => {
                out.remove("type");
                out.insert(
                    "anyOf".to_string(),
                    Value::Array(many.iter().map(|t| json!({ "type": t })).collect()),
                );
            }
        }
    }

    // Gemini only understands a couple of string formats.
    if out.get("type") == Some(&Value::String("string".to_string())) {
        if let Some(format) = out.get("format") {
            if format != "enum" && format != "date-time" {
                out.remove("format");
            }
        }
    } else if out.get("type") != Some(&Value::String("integer".to_string()))
        && out.get("type") != Some(&Value::String("number".to_string()))
    {
        out.remove("format");
    }

    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Request conversions
// ---------------------------------------------------------------------------

/// Convert a unified request into a Gemini `generateContent` body.
pub fn unified_to_gemini(req: &UnifiedChatRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = Vec::new();
    let mut system_parts: Vec<Part> = Vec::new();
    // functionResponse needs the tool name; map it from earlier assistant calls.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(Part::Text {
                        text: content.as_text(),
                    });
                }
            }
            "assistant" => {
                let mut parts = content_to_parts(msg.content.as_ref());
                if let Some(tool_calls) = &msg.tool_calls {
                    for tc in tool_calls {
                        call_names.insert(tc.id.clone(), tc.function.name.clone());
                        let args = serde_json::from_str(&tc.function.arguments)
                            .unwrap_or_else(|_| json!({}));
                        parts.push(Part::FunctionCall {
                            function_call: FunctionCall {
                                name: tc.function.name.clone(),
                                args,
                            },
                        });
                    }
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            "tool" => {
                let id = msg.tool_call_id.clone().unwrap_or_default();
                let name = call_names.get(&id).cloned().unwrap_or(id);
                let text = msg
                    .content
                    .as_ref()
                    .map(|c| c.as_text())
                    .unwrap_or_default();
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::FunctionResponse {
                        function_response: FunctionResponse {
                            name,
                            response: json!({ "result": text }),
                        },
                    }],
                });
            }
            _ => {
                let parts = content_to_parts(msg.content.as_ref());
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("user".to_string()),
                        parts,
                    });
                }
            }
        }
    }

    let tools = req.tools.as_ref().map(|tools| {
        let mut declarations = Vec::new();
        let mut out: Vec<GeminiTool> = Vec::new();
        for tool in tools {
            if tool.function.name == "web_search" {
                out.push(GeminiTool {
                    function_declarations: None,
                    google_search: Some(json!({})),
                });
                continue;
            }
            declarations.push(FunctionDeclaration {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters: Some(sanitize_schema(&tool.function.parameters)),
            });
        }
        if !declarations.is_empty() {
            out.push(GeminiTool {
                function_declarations: Some(declarations),
                google_search: None,
            });
        }
        out
    });

    let tool_config = req.tool_choice.as_ref().map(|tc| {
        let (mode, allowed) = match tc {
            UnifiedToolChoice::Mode(mode) => (
                match mode.as_str() {
                    "required" => "ANY",
                    "none" => "NONE",
                    _ => "AUTO",
                },
                None,
            ),
            UnifiedToolChoice::Function(f) => ("ANY", Some(vec![f.function.name.clone()])),
        };
        ToolConfig {
            function_calling_config: FunctionCallingConfig {
                mode: mode.to_string(),
                allowed_function_names: allowed,
            },
        }
    });

    let generation_config = if req.temperature.is_some()
        || req.top_p.is_some()
        || req.top_k.is_some()
        || req.max_tokens.is_some()
        || req.stop.is_some()
    {
        Some(GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: req.max_tokens,
            stop_sequences: req.stop.clone(),
        })
    } else {
        None
    };

    GenerateContentRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
        tools: tools.filter(|t| !t.is_empty()),
        tool_config,
        generation_config,
    }
}

fn content_to_parts(content: Option<&UnifiedContent>) -> Vec<Part> {
    match content {
        Some(UnifiedContent::Text(t)) if !t.is_empty() => vec![Part::Text { text: t.clone() }],
        Some(UnifiedContent::Parts(parts)) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text, .. } => Some(Part::Text { text: text.clone() }),
                ContentPart::ImageUrl { image_url, .. } => {
                    let rest = image_url.url.strip_prefix("data:")?;
                    let (mime_type, data) = rest.split_once(";base64,")?;
                    Some(Part::InlineData {
                        inline_data: Blob {
                            mime_type: mime_type.to_string(),
                            data: data.to_string(),
                        },
                    })
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert an inbound Gemini request into the unified model. The model and
/// streaming flag come from the URL, not the body.
pub fn request_to_unified(
    req: GenerateContentRequest,
    model: &str,
    stream: bool,
) -> UnifiedChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system_instruction {
        let text: String = system
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(UnifiedMessage::text("system", text));
        }
    }

    for content in &req.contents {
        let role = match content.role.as_deref() {
            Some("model") => "assistant",
            _ => "user",
        };

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<UnifiedToolCall> = Vec::new();

        for part in &content.parts {
            match part {
                Part::Text { text } => text_parts.push(text.clone()),
                Part::FunctionCall { function_call } => {
                    tool_calls.push(UnifiedToolCall {
                        id: new_call_id(),
                        call_type: "function".to_string(),
                        function: ToolCallFunction {
                            name: function_call.name.clone(),
                            arguments: serde_json::to_string(&function_call.args)
                                .unwrap_or_default(),
                        },
                    });
                }
                Part::FunctionResponse { function_response } => {
                    let text = function_response
                        .response
                        .get("result")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| function_response.response.to_string());
                    messages.push(UnifiedMessage {
                        role: "tool".to_string(),
                        content: Some(UnifiedContent::Text(text)),
                        tool_calls: None,
                        tool_call_id: Some(function_response.name.clone()),
                        thinking: None,
                        cache_control: None,
                    });
                }
                Part::InlineData { inline_data } => {
                    // Re-encode as a data URI part.
                    messages.push(UnifiedMessage {
                        role: role.to_string(),
                        content: Some(UnifiedContent::Parts(vec![ContentPart::ImageUrl {
                            image_url: ImageUrlDetail {
                                url: format!(
                                    "data:{};base64,{}",
                                    inline_data.mime_type, inline_data.data
                                ),
                                detail: None,
                            },
                            cache_control: None,
                        }])),
                        tool_calls: None,
                        tool_call_id: None,
                        thinking: None,
                        cache_control: None,
                    });
                }
            }
        }

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            messages.push(UnifiedMessage {
                role: role.to_string(),
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
                thinking: None,
                cache_control: None,
            });
        }
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|t| t.function_declarations.iter().flatten())
            .map(|decl| UnifiedTool {
                tool_type: "function".to_string(),
                function: ToolFunction {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    parameters: decl.parameters.clone().unwrap_or_else(|| json!({})),
                },
            })
            .collect::<Vec<_>>()
    });

    let generation = req.generation_config.as_ref();

    UnifiedChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: generation.and_then(|g| g.max_output_tokens),
        temperature: generation.and_then(|g| g.temperature),
        top_p: generation.and_then(|g| g.top_p),
        top_k: generation.and_then(|g| g.top_k),
        stream: if stream { Some(true) } else { None },
        stream_options: None,
        tools: tools.filter(|t: &Vec<UnifiedTool>| !t.is_empty()),
        tool_choice: req.tool_config.as_ref().map(|tc| {
            match tc.function_calling_config.mode.as_str() {
                "ANY" => UnifiedToolChoice::Mode("required".to_string()),
                "NONE" => UnifiedToolChoice::Mode("none".to_string()),
                _ => UnifiedToolChoice::Mode("auto".to_string()),
            }
        }),
        stop: generation.and_then(|g| g.stop_sequences.clone()),
        thinking: None,
        extra: Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Response conversions
// ---------------------------------------------------------------------------

fn map_gemini_finish(reason: Option<&str>, has_tool_calls: bool) -> String {
    if has_tool_calls {
        return "tool_calls".to_string();
    }
    match reason {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            "content_filter"
        }
        _ => "stop",
    }
    .to_string()
}

fn candidate_annotations(candidate: &Candidate) -> Option<Vec<Annotation>> {
    let grounding = candidate.grounding_metadata.as_ref()?;
    let annotations: Vec<Annotation> = grounding
        .grounding_chunks
        .iter()
        .filter_map(|chunk| {
            let web = chunk.web.as_ref()?;
            Some(Annotation::UrlCitation {
                url_citation: UrlCitation {
                    url: web.uri.clone()?,
                    title: web.title.clone(),
                    content: None,
                    start_index: None,
                    end_index: None,
                },
            })
        })
        .collect();
    if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    }
}

/// Convert a unary Gemini response into the OpenAI shape.
pub fn gemini_to_openai(resp: &GenerateContentResponse, model: &str) -> ChatCompletionResponse {
    let candidate = resp.candidates.first();

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ResponseToolCall> = Vec::new();

    if let Some(content) = candidate.and_then(|c| c.content.as_ref()) {
        for part in &content.parts {
            match part {
                Part::Text { text } => text_parts.push(text.clone()),
                Part::FunctionCall { function_call } => {
                    tool_calls.push(ResponseToolCall {
                        id: new_call_id(),
                        call_type: "function".to_string(),
                        function: ResponseToolCallFunction {
                            name: function_call.name.clone(),
                            arguments: serde_json::to_string(&function_call.args)
                                .unwrap_or_default(),
                        },
                    });
                }
                Part::InlineData { .. } | Part::FunctionResponse { .. } => {}
            }
        }
    }

    let finish_reason = map_gemini_finish(
        candidate.and_then(|c| c.finish_reason.as_deref()),
        !tool_calls.is_empty(),
    );

    let usage = resp.usage_metadata.as_ref().map(|u| {
        ChatUsage::normalized(u.prompt_token_count, u.candidates_token_count)
    });

    ChatCompletionResponse {
        id: new_completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
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
                thinking: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                annotations: candidate.and_then(candidate_annotations),
            },
            finish_reason: Some(finish_reason),
        }],
        usage,
        system_fingerprint: Some(SYSTEM_FINGERPRINT.to_string()),
    }
}

/// Convert an OpenAI-shaped completion into a unary Gemini response.
pub fn openai_to_gemini(resp: &ChatCompletionResponse) -> GenerateContentResponse {
    let choice = resp.choices.first();
    let mut parts: Vec<Part> = Vec::new();

    if let Some(c) = choice {
        if let Some(text) = c.message.content.as_ref().filter(|t| !t.is_empty()) {
            parts.push(Part::Text { text: text.clone() });
        }
        if let Some(tool_calls) = &c.message.tool_calls {
            for tc in tool_calls {
                parts.push(Part::FunctionCall {
                    function_call: FunctionCall {
                        name: tc.function.name.clone(),
                        args: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or_else(|_| json!({})),
                    },
                });
            }
        }
    }

    let finish_reason = match choice.and_then(|c| c.finish_reason.as_deref()) {
        Some("length") => "MAX_TOKENS",
        Some("content_filter") => "SAFETY",
        _ => "STOP",
    };

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(finish_reason.to_string()),
            index: 0,
            grounding_metadata: None,
        }],
        usage_metadata: resp.usage.as_ref().map(|u| UsageMetadata {
            prompt_token_count: u.prompt_tokens,
            candidates_token_count: u.completion_tokens,
            total_token_count: u.prompt_tokens + u.completion_tokens,
        }),
        model_version: Some(resp.model.clone()),
    }
}

// ---------------------------------------------------------------------------
// Streaming: Gemini chunks -> OpenAI chunks
// ---------------------------------------------------------------------------

/// Re-frames a Gemini SSE stream into OpenAI completion chunks.
#[derive(Debug)]
pub struct GeminiToOpenAiState {
    completion_id: String,
    model: String,
    started: bool,
    finished: bool,
    tool_count: u64,
    parse_errors: u64,
}

impl GeminiToOpenAiState {
    pub fn new(model: &str) -> Self {
        Self {
            completion_id: new_completion_id(),
            model: model.to_string(),
            started: false,
            finished: false,
            tool_count: 0,
            parse_errors: 0,
        }
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn emit(&self, chunk: &ChatCompletionChunk, out: &mut Vec<String>) {
        if let Ok(json) = serde_json::to_string(chunk) {
            out.push(data_frame(&json));
        }
    }

    fn process(&mut self, resp: &GenerateContentResponse, out: &mut Vec<String>) {
        let candidate = resp.candidates.first();

        let mut delta = ChunkDelta::default();
        if !self.started {
            self.started = true;
            delta.role = Some("assistant".to_string());
        }

        let mut has_tool_calls = false;
        if let Some(content) = candidate.and_then(|c| c.content.as_ref()) {
            for part in &content.parts {
                match part {
                    Part::Text { text } => {
                        let existing = delta.content.get_or_insert_with(String::new);
                        existing.push_str(text);
                    }
                    Part::FunctionCall { function_call } => {
                        has_tool_calls = true;
                        let index = self.tool_count;
                        self.tool_count += 1;
                        delta.tool_calls.get_or_insert_with(Vec::new).push(
                            ChunkToolCall {
                                index,
                                id: Some(new_call_id()),
                                call_type: Some("function".to_string()),
                                function: Some(ChunkToolCallFunction {
                                    name: Some(function_call.name.clone()),
                                    arguments: Some(
                                        serde_json::to_string(&function_call.args)
                                            .unwrap_or_default(),
                                    ),
                                }),
                            },
                        );
                    }
                    Part::InlineData { .. } | Part::FunctionResponse { .. } => {}
                }
            }
        }

        delta.annotations = candidate.and_then(candidate_annotations);

        let finish = candidate.and_then(|c| c.finish_reason.as_deref());
        let finish_reason = finish.map(|r| map_gemini_finish(Some(r), has_tool_calls));

        let mut chunk = ChatCompletionChunk::new(&self.completion_id, &self.model)
            .with_delta(delta, finish_reason.clone());
        chunk.system_fingerprint = Some(SYSTEM_FINGERPRINT.to_string());

        if finish_reason.is_some() {
            chunk.usage = resp.usage_metadata.as_ref().map(|u| {
                ChatUsage::normalized(u.prompt_token_count, u.candidates_token_count)
            });
        }

        self.emit(&chunk, out);
    }

    fn finish(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        out.push(data_frame("[DONE]"));
    }
}

impl LineTransform for GeminiToOpenAiState {
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if self.finished || line.is_empty() {
            return;
        }

        let Some(data) = data_payload(line) else {
            out.push(format!("{line}\n\n"));
            return;
        };

        match serde_json::from_str::<GenerateContentResponse>(data) {
            Ok(resp) => self.process(&resp, out),
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

// ---------------------------------------------------------------------------
// Streaming: OpenAI chunks -> Gemini chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PendingToolCall {
    name: String,
    arguments: String,
}

/// Re-frames an OpenAI chunk stream into Gemini SSE chunks for callers on
/// the Gemini endpoint. Tool-call arguments arrive as fragments but Gemini
/// emits whole `functionCall` parts, so they accumulate until the finish.
#[derive(Debug)]
pub struct GeminiStreamState {
    model: String,
    finished: bool,
    tool_calls: Vec<PendingToolCall>,
    /// OpenAI tool index to position in `tool_calls`.
    tool_indices: HashMap<u64, usize>,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
    parse_errors: u64,
}

impl GeminiStreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            finished: false,
            tool_calls: Vec::new(),
            tool_indices: HashMap::new(),
            finish_reason: None,
            usage: None,
            parse_errors: 0,
        }
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn emit(&self, resp: &GenerateContentResponse, out: &mut Vec<String>) {
        if let Ok(json) = serde_json::to_string(resp) {
            out.push(data_frame(&json));
        }
    }

    fn text_chunk(&self, text: String) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part::Text { text }],
                }),
                finish_reason: None,
                index: 0,
                grounding_metadata: None,
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
        }
    }

    fn process(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<String>) {
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.first() else {
            return;
        };

        if let Some(text) = choice.delta.content.as_ref().filter(|t| !t.is_empty()) {
            self.emit(&self.text_chunk(text.clone()), out);
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let pos = *self.tool_indices.entry(tc.index).or_insert_with(|| {
                    self.tool_calls.push(PendingToolCall::default());
                    self.tool_calls.len() - 1
                });
                if let Some(func) = &tc.function {
                    if let Some(name) = func.name.as_ref().filter(|n| !n.is_empty()) {
                        self.tool_calls[pos].name = name.clone();
                    }
                    if let Some(args) = &func.arguments {
                        self.tool_calls[pos].arguments.push_str(args);
                    }
                }
            }
        }

        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }

    fn finish(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut parts: Vec<Part> = Vec::new();
        for tc in self.tool_calls.drain(..) {
            let args = serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
            parts.push(Part::FunctionCall {
                function_call: FunctionCall {
                    name: tc.name,
                    args,
                },
            });
        }

        let finish_reason = match self.finish_reason.as_deref() {
            Some("length") => "MAX_TOKENS",
            Some("content_filter") => "SAFETY",
            _ => "STOP",
        };

        let final_chunk = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: Some(finish_reason.to_string()),
                index: 0,
                grounding_metadata: None,
            }],
            usage_metadata: self.usage.as_ref().map(|u| UsageMetadata {
                prompt_token_count: u.prompt_tokens,
                candidates_token_count: u.completion_tokens,
                total_token_count: u.prompt_tokens + u.completion_tokens,
            }),
            model_version: Some(self.model.clone()),
        };

        self.emit(&final_chunk, out);
    }
}

impl LineTransform for GeminiStreamState {
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if self.finished || line.is_empty() {
            return;
        }

        let Some(data) = data_payload(line) else {
            out.push(format!("{line}\n\n"));
            return;
        };

        if data == "[DONE]" {
            self.finish(out);
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process(&chunk, out),
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

    #[test]
    fn test_sanitize_schema_strips_unknown_fields() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "city": {"type": "string", "format": "uri", "description": "City"},
                "when": {"type": "string", "format": "date-time"},
            },
            "required": ["city"],
        });

        let out = sanitize_schema(&schema);
        assert!(out.get("$schema").is_none());
        assert!(out.get("additionalProperties").is_none());
        assert!(out["properties"]["city"].get("format").is_none());
        assert_eq!(out["properties"]["when"]["format"], "date-time");
        assert_eq!(out["required"][0], "city");
    }

    #[test]
    fn test_sanitize_schema_flattens_type_union() {
        let schema = json!({"type": ["string", "null"]});
        let out = sanitize_schema(&schema);
        assert_eq!(out["type"], "string");
        assert_eq!(out["nullable"], true);

        let multi = json!({"type": ["string", "number"]});
        let out = sanitize_schema(&multi);
        assert!(out.get("type").is_none());
        assert_eq!(out["anyOf"][0]["type"], "string");
        assert_eq!(out["anyOf"][1]["type"], "number");
    }

    #[test]
    fn test_unified_to_gemini_roles_and_tools() {
        let req: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
            "tools": [
                {"type": "function", "function": {"name": "lookup", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "web_search", "parameters": {}}},
            ],
            "tool_choice": "required",
            "max_tokens": 64,
        }))
        .unwrap();

        let gemini = unified_to_gemini(&req);
        assert!(gemini.system_instruction.is_some());
        assert_eq!(gemini.contents.len(), 2);
        assert_eq!(gemini.contents[0].role.as_deref(), Some("user"));
        assert_eq!(gemini.contents[1].role.as_deref(), Some("model"));

        let tools = gemini.tools.unwrap();
        assert!(tools.iter().any(|t| t.google_search.is_some()));
        assert!(tools
            .iter()
            .any(|t| t.function_declarations.as_ref().is_some_and(|d| d[0].name == "lookup")));

        assert_eq!(
            gemini.tool_config.unwrap().function_calling_config.mode,
            "ANY"
        );
        assert_eq!(
            gemini.generation_config.unwrap().max_output_tokens,
            Some(64)
        );
    }

    #[test]
    fn test_gemini_request_to_unified() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "lookup", "args": {"q": 1}}}]},
            ],
            "systemInstruction": {"parts": [{"text": "be brief"}]},
            "generationConfig": {"maxOutputTokens": 32, "temperature": 0.5},
        }))
        .unwrap();

        let unified = request_to_unified(req, "gemini-2.5-pro", true);
        assert_eq!(unified.model, "gemini-2.5-pro");
        assert_eq!(unified.stream, Some(true));
        assert_eq!(unified.max_tokens, Some(32));
        assert_eq!(unified.messages[0].role, "system");
        assert_eq!(unified.messages[1].role, "user");
        assert_eq!(unified.messages[2].role, "assistant");
        let calls = unified.messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "lookup");
    }

    #[test]
    fn test_gemini_response_to_openai() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "The answer"},
                    {"functionCall": {"name": "lookup", "args": {"q": "x"}}},
                ]},
                "finishReason": "STOP",
                "index": 0,
            }],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 4, "totalTokenCount": 99},
        }))
        .unwrap();

        let openai = gemini_to_openai(&resp, "gemini-2.5-pro");
        let choice = &openai.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("The answer"));
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "lookup");
        assert!(calls[0].id.starts_with("call_"));

        // Bogus vendor total replaced by the recomputed one.
        assert_eq!(openai.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_grounding_becomes_annotations() {
        let mut state = GeminiToOpenAiState::new("g");
        let mut out = Vec::new();
        state.on_line(
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"cited"}]},"groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://example.com","title":"Example"}}]}}]}"#,
            &mut out,
        );

        assert_eq!(out.len(), 1);
        assert!(out[0].contains("url_citation"));
        assert!(out[0].contains("https://example.com"));
    }

    #[test]
    fn test_openai_chunks_to_gemini_accumulates_tool_args() {
        let mut state = GeminiStreamState::new("gemini-2.5-pro");
        let mut out = Vec::new();
        state.on_line(
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":"{\"q\""}}]},"finish_reason":null}]}"#,
            &mut out,
        );
        state.on_line(
            r#"data: {"id":"c","object":"chat.completion.chunk","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":":2}"}}]},"finish_reason":"tool_calls"}]}"#,
            &mut out,
        );
        state.on_line("data: [DONE]", &mut out);

        // No partial tool output until the finish chunk.
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("\"functionCall\""));
        assert!(out[0].contains("\"q\":2"));
        assert!(out[0].contains("STOP"));
    }
}

//! Vertex AI specifics: endpoint URLs for the Google and Anthropic publisher
//! families, and the Claude-on-Vertex request body shape.

use crate::convert::anthropic::unified_to_request;
use crate::error::Result;
use crate::unified::UnifiedChatRequest;
use serde_json::Value;

/// Version tag Vertex expects in Claude request bodies.
pub const ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

fn api_host(location: &str) -> String {
    // The "global" location drops the regional prefix.
    if location == "global" {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{location}-aiplatform.googleapis.com")
    }
}

/// URL for a Gemini model behind Vertex.
pub fn gemini_url(project: &str, location: &str, model: &str, stream: bool) -> String {
    let action = if stream {
        "streamGenerateContent?alt=sse"
    } else {
        "generateContent"
    };
    format!(
        "{}/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:{action}",
        api_host(location)
    )
}

/// URL for a Claude model behind Vertex.
pub fn claude_url(project: &str, location: &str, model: &str, stream: bool) -> String {
    let action = if stream { "streamRawPredict" } else { "rawPredict" };
    format!(
        "{}/v1/projects/{project}/locations/{location}/publishers/anthropic/models/{model}:{action}",
        api_host(location)
    )
}

/// Build the Claude-on-Vertex body: the Messages shape with the model moved
/// into the URL and `anthropic_version` added.
pub fn claude_body(req: &UnifiedChatRequest) -> Result<Value> {
    let messages = unified_to_request(req);
    let mut body = serde_json::to_value(&messages)?;
    if let Some(obj) = body.as_object_mut() {
        obj.remove("model");
        obj.remove("stream");
        obj.insert(
            "anthropic_version".to_string(),
            Value::String(ANTHROPIC_VERSION.to_string()),
        );
        if req.is_streaming() {
            obj.insert("stream".to_string(), Value::Bool(true));
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_urls() {
        assert_eq!(
            gemini_url("proj", "us-central1", "gemini-2.5-pro", true),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/proj/locations/us-central1/publishers/google/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            claude_url("proj", "us-east5", "claude-sonnet-4", false),
            "https://us-east5-aiplatform.googleapis.com/v1/projects/proj/locations/us-east5/publishers/anthropic/models/claude-sonnet-4:rawPredict"
        );
        assert!(gemini_url("proj", "global", "gemini-2.5-pro", false)
            .starts_with("https://aiplatform.googleapis.com/"));
    }

    #[test]
    fn test_claude_body_shape() {
        let req: UnifiedChatRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .unwrap();

        let body = claude_body(&req).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }
}

use llm_bridge::config::GatewayConfig;
use llm_bridge::gateway::Gateway;
use llm_bridge::logging::SharedLogger;
use llm_bridge::provider::{Provider, ProviderDirectory};
use llm_bridge::server::{build_router, AppState};
use llm_bridge::sse::{reframe_stream, ByteStream};
use llm_bridge::transformer::{OutgoingRequest, Registry, Transformer};
use llm_bridge::{convert, pipeline};

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

fn mock_provider(base_url: &str) -> Provider {
    serde_json::from_value(json!({
        "name": "mock",
        "api_base_url": base_url,
        "api_key": "sk-test",
        "models": ["test-model"],
        "transformers": { "use": ["openai"] },
    }))
    .unwrap()
}

fn build_state(base_url: &str, access_key: Option<&str>) -> Arc<AppState> {
    let client = reqwest::Client::new();
    let registry = Arc::new(Registry::with_builtins(client.clone()).unwrap());
    let directory = Arc::new(ProviderDirectory::new());
    directory.register(mock_provider(base_url)).unwrap();

    let logger = SharedLogger::new(None).unwrap();
    let gateway = Arc::new(Gateway::new(
        client,
        registry,
        directory,
        logger.clone(),
        30,
    ));

    Arc::new(AppState {
        config: GatewayConfig {
            api_key: access_key.map(str::to_string),
            ..GatewayConfig::default()
        },
        gateway,
        logger,
    })
}

async fn spawn_gateway(state: Arc<AppState>) -> String {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ────────────────────────────────────────────────────────────────
// Mock upstream speaking the OpenAI chat dialect
// ────────────────────────────────────────────────────────────────

async fn mock_chat(Json(body): Json<Value>) -> Response {
    if body["stream"].as_bool().unwrap_or(false) {
        let frames = concat!(
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"test-model\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"po\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"test-model\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"test-model\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
            "data: [DONE]\n\n",
        );
        Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from(frames))
            .unwrap()
    } else {
        let completion = json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 0,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "pong" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6 }
        });
        Json(completion).into_response()
    }
}

async fn spawn_mock_upstream() -> String {
    let app = Router::new().route("/v1/chat/completions", post(mock_chat));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

// ────────────────────────────────────────────────────────────────
// Library-level tests (no server)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_directory_routing_lifecycle() {
    let directory = ProviderDirectory::new();
    directory.register(mock_provider("https://up.example/v1")).unwrap();

    let (provider, model) = directory.resolve("mock,test-model").unwrap();
    assert_eq!(provider.name, "mock");
    assert_eq!(model, "test-model");

    // Bare model names route to the registering provider.
    let (provider, model) = directory.resolve("test-model").unwrap();
    assert_eq!(provider.name, "mock");
    assert_eq!(model, "test-model");

    directory.set_enabled("mock", false).unwrap();
    assert!(directory.resolve("mock,test-model").is_err());

    directory.set_enabled("mock", true).unwrap();
    assert!(directory.resolve("mock,test-model").is_ok());

    assert!(directory.remove("mock"));
    assert!(directory.resolve("test-model").is_err());
}

#[tokio::test]
async fn test_anthropic_request_through_chain() {
    let registry = Registry::with_builtins(reqwest::Client::new()).unwrap();
    let endpoint = registry.get("anthropic").unwrap();

    let body = json!({
        "model": "test-model",
        "max_tokens": 9000,
        "messages": [{"role": "user", "content": "Hello"}],
        "system": "Be brief.",
    });
    let unified = endpoint.transform_request_out(body).await.unwrap();
    assert_eq!(unified.model, "test-model");
    assert_eq!(unified.messages.len(), 2);
    assert_eq!(unified.messages[0].role, "system");
    assert_eq!(unified.max_tokens, Some(9000));

    let provider: Provider = serde_json::from_value(json!({
        "name": "p",
        "api_base_url": "https://up.example/v1",
        "models": ["test-model"],
        "transformers": { "use": ["openai", ["maxtoken", {"max_tokens": 4096}]] },
    }))
    .unwrap();

    let chain = pipeline::resolve_chain(&registry, &provider, "test-model").unwrap();
    assert_eq!(chain.len(), 2);

    let req = pipeline::apply_request(&chain, OutgoingRequest::unified(unified), &provider)
        .await
        .unwrap();
    let body = req.body_json().unwrap();
    assert_eq!(body["max_tokens"], 4096);
    assert_eq!(body["messages"][1]["content"], "Hello");
}

#[tokio::test]
async fn test_openai_chunks_reframed_as_anthropic_events() {
    let frames = vec![
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    ];
    let upstream: ByteStream = Box::pin(futures::stream::iter(
        frames.into_iter().map(|f| Ok(Bytes::from(f))),
    ));

    let reframed = reframe_stream(
        upstream,
        convert::anthropic_stream::AnthropicStreamState::new("claude-x"),
    );
    let chunks: Vec<Bytes> = reframed
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    let text: String = chunks
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();

    assert!(text.contains("event: message_start"), "missing message_start in {text}");
    assert!(text.contains("content_block_delta"), "missing deltas in {text}");
    assert!(text.contains("\"text\":\"Hi\""), "missing text in {text}");
    assert!(text.contains("event: message_stop"), "missing message_stop in {text}");
}

// ────────────────────────────────────────────────────────────────
// Full server roundtrips against a local mock upstream
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_roundtrip_anthropic_dialect() {
    let upstream = spawn_mock_upstream().await;
    let base = spawn_gateway(build_state(&upstream, None)).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let resp = client
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "mock,test-model",
            "max_tokens": 30,
            "messages": [{"role": "user", "content": "Say 'pong'"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "mock,test-model");
    assert_eq!(body["content"][0]["text"], "pong");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 5);
}

#[tokio::test]
async fn test_server_roundtrip_openai_dialect() {
    let upstream = spawn_mock_upstream().await;
    let base = spawn_gateway(build_state(&upstream, None)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "mock,test-model",
            "messages": [{"role": "user", "content": "Say 'pong'"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_server_streaming_roundtrip() {
    let upstream = spawn_mock_upstream().await;
    let base = spawn_gateway(build_state(&upstream, None)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "mock,test-model",
            "max_tokens": 30,
            "stream": true,
            "messages": [{"role": "user", "content": "Say 'pong'"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let text = resp.text().await.unwrap();
    assert!(text.contains("event: message_start"), "missing message_start in {text}");
    assert!(text.contains("\"text\":\"po\""), "missing first delta in {text}");
    assert!(text.contains("\"text\":\"ng\""), "missing second delta in {text}");
    assert!(text.contains("event: message_stop"), "missing message_stop in {text}");
}

#[tokio::test]
async fn test_server_requires_access_key_when_configured() {
    let upstream = spawn_mock_upstream().await;
    let base = spawn_gateway(build_state(&upstream, Some("secret"))).await;
    let client = reqwest::Client::new();

    let req_body = json!({
        "model": "mock,test-model",
        "max_tokens": 30,
        "messages": [{"role": "user", "content": "hi"}],
    });

    let denied = client
        .post(format!("{base}/v1/messages"))
        .json(&req_body)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let allowed = client
        .post(format!("{base}/v1/messages"))
        .header("x-api-key", "secret")
        .json(&req_body)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    let bearer = client
        .post(format!("{base}/v1/chat/completions"))
        .header("authorization", "Bearer secret")
        .json(&req_body)
        .send()
        .await
        .unwrap();
    assert_eq!(bearer.status(), 200);
}

#[tokio::test]
async fn test_unknown_model_maps_to_not_found() {
    let upstream = spawn_mock_upstream().await;
    let base = spawn_gateway(build_state(&upstream, None)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "mock,no-such-model",
            "max_tokens": 30,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
}

#[tokio::test]
async fn test_provider_management_endpoints() {
    let state = {
        let client = reqwest::Client::new();
        let registry = Arc::new(Registry::with_builtins(client.clone()).unwrap());
        let directory = Arc::new(ProviderDirectory::new());
        let logger = SharedLogger::new(None).unwrap();
        let gateway = Arc::new(Gateway::new(client, registry, directory, logger.clone(), 30));
        Arc::new(AppState {
            config: GatewayConfig::default(),
            gateway,
            logger,
        })
    };
    let base = spawn_gateway(state).await;
    let client = reqwest::Client::new();

    // No models listed yet.
    let models: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["data"].as_array().map(Vec::len), Some(0));

    // Missing models list is rejected.
    let bad = client
        .post(format!("{base}/providers"))
        .json(&json!({ "name": "late", "api_base_url": "https://up.example/v1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let created = client
        .post(format!("{base}/providers"))
        .json(&json!({
            "name": "late",
            "api_base_url": "https://up.example/v1",
            "api_key": "sk-live",
            "models": ["late-model"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    // Listing never leaks keys.
    let listing: Value = client
        .get(format!("{base}/providers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["providers"][0]["api_key"], "***");

    let models: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(ids.contains(&"late,late-model"));
    assert!(models["data"][0]["created"].as_i64().unwrap() > 0);

    // Partial update keeps the fields the body omits.
    let updated = client
        .put(format!("{base}/providers/late"))
        .json(&json!({ "models": ["late-model", "later-model"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);

    let listing: Value = client
        .get(format!("{base}/providers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["providers"][0]["api_key"], "***");
    assert_eq!(
        listing["providers"][0]["models"].as_array().map(Vec::len),
        Some(2)
    );

    let toggled = client
        .post(format!("{base}/providers/late/toggle"))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(toggled.status(), 200);

    let deleted = client
        .delete(format!("{base}/providers/late"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let gone = client
        .delete(format!("{base}/providers/late"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

// ────────────────────────────────────────────────────────────────
// Live provider tests (need OPENROUTER_API_KEY)
// ────────────────────────────────────────────────────────────────

fn openrouter_provider() -> Provider {
    serde_json::from_value(json!({
        "name": "openrouter",
        "api_base_url": "https://openrouter.ai/api/v1/chat/completions",
        "api_key": std::env::var("OPENROUTER_API_KEY").unwrap_or_default(),
        "models": ["openai/gpt-4o-mini"],
        "transformers": { "use": ["openrouter"] },
    }))
    .unwrap()
}

#[tokio::test]
#[ignore = "requires OPENROUTER_API_KEY"]
async fn test_live_openrouter_roundtrip() {
    let client = reqwest::Client::new();
    let registry = Arc::new(Registry::with_builtins(client.clone()).unwrap());
    let directory = Arc::new(ProviderDirectory::new());
    directory.register(openrouter_provider()).unwrap();
    let logger = SharedLogger::new(None).unwrap();
    let gateway = Gateway::new(client, registry, directory, logger, 120);

    let unified = serde_json::from_value(json!({
        "model": "openrouter,openai/gpt-4o-mini",
        "max_tokens": 30,
        "messages": [{"role": "user", "content": "Say 'pong' and nothing else."}],
    }))
    .unwrap();

    let resp = gateway.forward(unified).await.expect("forward failed");
    let llm_bridge::transformer::UpstreamResponse::Json { status, body } = resp else {
        panic!("expected a JSON response");
    };
    assert_eq!(status, 200);
    println!("Response: {body}");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chat_relay::config::{AppConfig, ProviderConfig};
use chat_relay::routing::dispatch::dispatch_request;
use chat_relay::state::AppState;
use chat_relay::transport::{HttpTransport, PreparedUpstreams};
use serde_json::{json, Value};

const HI_CHUNK: &str =
    "data: {\"id\":\"1\",\"model\":\"m\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n";
const STOP_CHUNK: &str =
    "data: {\"id\":\"1\",\"model\":\"m\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";
const HI_FRAME: &str = "data: {\"content\":\"Hi\",\"id\":\"1\",\"model\":\"m\",\"created\":1}\n\n";
const FINISH_FRAME: &str = "event: finish\ndata: {\"finish_reason\":\"stop\",\"id\":\"1\"}\n\n";
const DONE_FRAME: &str = "event: done\ndata: [DONE]\n\n";

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl Captured {
    fn record(&self, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        self.requests.lock().expect("lock").push((auth, body));
    }

    fn single(&self) -> (Option<String>, Value) {
        let requests = self.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1, "expected exactly one upstream call");
        requests[0].clone()
    }

    fn count(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

/// Stream `chunks` as the response body with a short pause between them so
/// each arrives as its own read on the client side.
fn chunked_body(chunks: Vec<Result<Bytes, std::io::Error>>) -> Body {
    let stream = futures_util::stream::unfold(chunks.into_iter(), |mut chunks| async move {
        let next = chunks.next()?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some((next, chunks))
    });
    Body::from_stream(stream)
}

fn ok_chunks(chunks: &[&str]) -> Vec<Result<Bytes, std::io::Error>> {
    chunks
        .iter()
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
        .collect()
}

fn event_stream_response(body: Body) -> Response {
    ([("content-type", "text/event-stream")], body).into_response()
}

async fn spawn_upstream<F>(captured: Captured, respond: F) -> (String, tokio::task::JoinHandle<()>)
where
    F: Fn() -> Response + Clone + Send + Sync + 'static,
{
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let captured = captured.clone();
            let respond = respond.clone();
            async move {
                captured.record(&headers, body);
                respond()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1"), server)
}

fn build_state(base_url: &str, api_key: Option<&str>) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.providers.deepseek = ProviderConfig {
        base_url: Some(base_url.to_string()),
        default_model: None,
        api_key: api_key.map(ToString::to_string),
    };
    config.providers.chatgpt = ProviderConfig {
        base_url: Some(base_url.to_string()),
        default_model: Some("gpt-4o-mini".to_string()),
        api_key: api_key.map(ToString::to_string),
    };
    let upstreams = PreparedUpstreams::new(&config.providers).expect("prepare upstreams");
    let transport = HttpTransport::new(&config.server).expect("build transport");
    Arc::new(AppState::new(config, transport, upstreams))
}

fn chat_request(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

fn hello_body() -> Value {
    json!({
        "messages": [{"role": "user", "content": "hello"}],
        "token": "sk-test"
    })
}

async fn dispatch(state: Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

#[tokio::test]
async fn test_chat_stream_end_to_end() {
    let captured = Captured::default();
    // Split inside the JSON payload and between the two newlines.
    let (split_a, split_b) = HI_CHUNK.split_at(17);
    let (split_b, split_c) = split_b.split_at(split_b.len() - 1);
    let chunks = [split_a, split_b, split_c, "data: [DONE]\n\n"];
    let (base_url, server) = spawn_upstream(captured.clone(), move || {
        event_stream_response(chunked_body(ok_chunks(&chunks)))
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let text = body_text(response).await;
    assert_eq!(text, format!("{HI_FRAME}{DONE_FRAME}"));

    let (auth, upstream_body) = captured.single();
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(upstream_body["model"], "deepseek-chat");
    assert_eq!(upstream_body["stream"], true);
    assert_eq!(upstream_body["messages"][0]["content"], "hello");

    server.abort();
}

#[tokio::test]
async fn test_chat_stream_without_done_sentinel_ends_with_single_done() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(ok_chunks(&[HI_CHUNK, STOP_CHUNK])))
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    let text = body_text(response).await;
    assert_eq!(text, format!("{HI_FRAME}{FINISH_FRAME}{DONE_FRAME}"));
    assert_eq!(text.matches("event: done").count(), 1);

    server.abort();
}

#[tokio::test]
async fn test_chat_stream_skips_malformed_and_foreign_lines() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(ok_chunks(&[
            ": keep-alive\n\n",
            "event: message\n",
            "data: {not json\n\n",
            HI_CHUNK,
            "data: [DONE]\n\n",
        ])))
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    assert_eq!(body_text(response).await, format!("{HI_FRAME}{DONE_FRAME}"));

    server.abort();
}

#[tokio::test]
async fn test_chat_stream_read_error_yields_single_error_frame() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(vec![
            Ok(Bytes::from_static(HI_CHUNK.as_bytes())),
            Err(std::io::Error::other("upstream reset")),
        ]))
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.starts_with(HI_FRAME), "unexpected body: {text}");
    assert_eq!(text.matches("event: error\n").count(), 1);
    assert!(!text.contains("event: done"));
    assert!(text.ends_with("\n\n"));
    let last_frame = text.trim_end().rsplit("\n\n").next().expect("last frame");
    assert!(last_frame.starts_with("event: error\ndata: {\"error\":"));

    server.abort();
}

#[tokio::test]
async fn test_upstream_rejection_is_not_forwarded() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key sk-leaked"}})),
        )
            .into_response()
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let text = body_text(response).await;
    let payload: Value = serde_json::from_str(&text).expect("json error body");
    assert_eq!(payload["error"]["message"], "DeepSeek API error: 401");
    assert!(!text.contains("sk-leaked"));

    server.abort();
}

#[tokio::test]
async fn test_missing_credential_fails_before_upstream_call() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(ok_chunks(&["data: [DONE]\n\n"])))
    })
    .await;
    let state = build_state(&base_url, None);

    let body = json!({"messages": [{"role": "user", "content": "hello"}]});
    let response = dispatch(state, chat_request("/chat/api", &body)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(
        payload["error"]["message"],
        "Config error: API key not configured"
    );
    assert_eq!(captured.count(), 0);

    server.abort();
}

#[tokio::test]
async fn test_configured_key_and_chatgpt_variant() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(ok_chunks(&[HI_CHUNK, "data: [DONE]\n\n"])))
    })
    .await;
    let state = build_state(&base_url, Some("sk-configured"));

    let body = json!({
        "messages": [{"role": "user", "content": "hello"}],
        "type": "chatgpt"
    });
    let response = dispatch(state, chat_request("/chat/api", &body)).await;
    assert_eq!(body_text(response).await, format!("{HI_FRAME}{DONE_FRAME}"));

    let (auth, upstream_body) = captured.single();
    assert_eq!(auth.as_deref(), Some("Bearer sk-configured"));
    assert_eq!(upstream_body["model"], "gpt-4o-mini");

    server.abort();
}

#[tokio::test]
async fn test_unknown_variant_and_bad_body_are_rejected() {
    let state = build_state("http://127.0.0.1:9/v1", Some("sk-configured"));

    let body = json!({"messages": [], "type": "gemini"});
    let response = dispatch(Arc::clone(&state), chat_request("/chat/api", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/chat/api")
        .body(Body::from("not json"))
        .expect("build request");
    let response = dispatch(state, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let state = build_state(&format!("http://{addr}/v1"), None);

    let response = dispatch(state, chat_request("/chat/api", &hello_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_subscription_endpoint_emits_next_and_complete() {
    let captured = Captured::default();
    let (base_url, server) = spawn_upstream(captured.clone(), || {
        event_stream_response(chunked_body(ok_chunks(&[HI_CHUNK, STOP_CHUNK, "data: [DONE]\n\n"])))
    })
    .await;
    let state = build_state(&base_url, None);

    let response = dispatch(state, chat_request("/chat/subscribe", &hello_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let text = body_text(response).await;

    let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 3, "unexpected frames: {text}");
    let first: Value = serde_json::from_str(
        frames[0].strip_prefix("event: next\ndata: ").expect("next frame"),
    )
    .expect("json");
    assert_eq!(first["data"]["chatStream"]["content"], "Hi");
    assert_eq!(first["data"]["chatStream"]["id"], "1");
    assert_eq!(first["data"]["chatStream"]["created"], 1);
    assert!(first["data"]["chatStream"]["finish_reason"].is_null());

    let second: Value = serde_json::from_str(
        frames[1].strip_prefix("event: next\ndata: ").expect("next frame"),
    )
    .expect("json");
    assert_eq!(second["data"]["chatStream"]["finish_reason"], "stop");
    assert!(second["data"]["chatStream"]["content"].is_null());

    assert_eq!(frames[2], "event: complete\ndata: ");

    server.abort();
}

#[tokio::test]
async fn test_preflight_health_and_unknown_routes() {
    let state = build_state("http://127.0.0.1:9/v1", None);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/chat/api")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch(Arc::clone(&state), request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, POST, OPTIONS"
    );

    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch(Arc::clone(&state), request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(payload["providers"]["deepseek"]["api_key_configured"], false);
    assert_eq!(payload["providers"]["chatgpt"]["default_model"], "gpt-4o-mini");

    let request = Request::builder()
        .method("GET")
        .uri("/chat/api")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch(Arc::clone(&state), request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("POST")
        .uri("/nope")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch(state, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let state = build_state("http://127.0.0.1:9/v1", None);
    let request = Request::builder()
        .method("POST")
        .uri("/chat/api")
        .body(Body::from(vec![b'x'; 3 * 1024 * 1024]))
        .expect("build request");
    let response = dispatch(state, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

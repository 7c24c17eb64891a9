//! End-to-end tests of the HTTP server against a mock model backend and a
//! mock Tavily endpoint, both served by axum on local ports.

use std::sync::{Arc, Mutex};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use ragchat::config::parse_config;
use ragchat::server::run_server;

type Recorded = Arc<Mutex<Vec<Value>>>;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server on port {} did not become healthy", port);
}

async fn serve_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}

/// Chat-completions mock. Records every body; replies 503 when the last
/// message mentions `trigger-503`.
async fn mock_completions(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.lock().unwrap().push(body.clone());

    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    if last.contains("trigger-503") {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!("model not loaded")),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "model": "mock-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "mock reply"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}
        })),
    )
}

async fn mock_tavily(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["api_key"], "tvly-test");
    Json(json!({
        "results": [
            {
                "title": "<b>Rust</b> 1.80 released",
                "url": "https://blog.rust-lang.org/1.80",
                "content": "LazyCell &amp; LazyLock are stable."
            },
            {
                "title": "Tokio",
                "url": "https://tokio.rs",
                "content": "An async runtime."
            }
        ]
    }))
}

struct Harness {
    _tmp: TempDir,
    base: String,
    backend_requests: Recorded,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let backend = serve_mock(
            Router::new()
                .route("/v1/chat/completions", post(mock_completions))
                .with_state(recorded.clone()),
        )
        .await;
        let tavily = serve_mock(Router::new().route("/search", post(mock_tavily))).await;

        let tmp = TempDir::new().unwrap();
        let port = find_free_port();
        let config = parse_config(&format!(
            r#"
[db]
path = "{}/ragchat.sqlite"

[server]
bind = "127.0.0.1:{}"

[inference]
backend_url = "{}/v1"
default_model = "local-model"
timeout_secs = 10

[search]
tavily_key = "tvly-test"
tavily_url = "{}"
scrape_fallback = false
"#,
            tmp.path().display(),
            port,
            backend,
            tavily
        ))
        .unwrap();

        tokio::spawn(async move {
            run_server(&config).await.ok();
        });
        wait_for_server(port).await;

        Self {
            _tmp: tmp,
            base: format!("http://127.0.0.1:{}", port),
            backend_requests: recorded,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    fn last_backend_request(&self) -> Value {
        self.backend_requests.lock().unwrap().last().cloned().unwrap()
    }

    async fn create_project(&self, system_prompt: &str) -> String {
        let (status, project) = self
            .post(
                "/api/projects",
                json!({"userId": "alice", "name": "Handbook", "systemPrompt": system_prompt}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        project["id"].as_str().unwrap().to_string()
    }

    async fn upload_text(&self, project_id: &str, filename: &str, text: &str) -> Value {
        use base64::Engine;
        let (status, doc) = self
            .post(
                &format!("/api/projects/{}/documents", project_id),
                json!({
                    "userId": "alice",
                    "filename": filename,
                    "contentBase64": base64::engine::general_purpose::STANDARD.encode(text),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "upload failed: {}", doc);
        doc
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::start().await;
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_plain_chat_sends_single_turn() {
    let h = Harness::start().await;

    let (status, body) = h
        .post("/api/chat", json!({"message": "hello", "userId": "alice"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "mock reply");
    assert!(body.get("sources").is_none());
    assert!(body.get("webSources").is_none());

    let sent = h.last_backend_request();
    assert_eq!(sent["messages"], json!([{"role": "user", "content": "hello"}]));
    assert_eq!(sent["model"], "local-model");
    assert_eq!(sent["max_tokens"], 2000);

    let session_id = body["sessionId"].as_str().unwrap();
    let (_, sessions) = h.get("/api/sessions?userId=alice").await;
    assert_eq!(sessions[0]["id"], session_id);
    assert_eq!(sessions[0]["title"], "hello...");

    let (_, messages) = h
        .get(&format!("/api/messages?sessionId={}&userId=alice", session_id))
        .await;
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant"]);
}

#[tokio::test]
async fn test_session_history_is_replayed_in_order() {
    let h = Harness::start().await;
    let (_, first) = h
        .post("/api/chat", json!({"message": "hi", "userId": "alice"}))
        .await;
    let session_id = first["sessionId"].as_str().unwrap().to_string();

    let (status, _) = h
        .post(
            "/api/chat",
            json!({"message": "bye", "userId": "alice", "sessionId": session_id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let sent = h.last_backend_request();
    assert_eq!(
        sent["messages"],
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "mock reply"},
            {"role": "user", "content": "bye"}
        ])
    );
}

#[tokio::test]
async fn test_project_chat_with_knowledge_base() {
    let h = Harness::start().await;
    let project_id = h.create_project("Be terse.").await;
    let doc = h
        .upload_text(
            &project_id,
            "policy.txt",
            "Refunds are accepted within 30 days of purchase.",
        )
        .await;

    let (status, body) = h
        .post(
            "/api/chat",
            json!({"message": "When are refunds accepted?", "userId": "alice", "projectId": project_id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["documentId"], doc["id"]);
    assert_eq!(sources[0]["filename"], "policy.txt");
    assert!(sources[0]["contentPreview"]
        .as_str()
        .unwrap()
        .ends_with("..."));
    assert!(body.get("webSources").is_none());

    let sent = h.last_backend_request();
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], json!({"role": "system", "content": "Be terse."}));
    assert_eq!(
        messages[1]["content"],
        "When are refunds accepted?\n\nRelevant information from knowledge base:\n\
         [Source 1]: Refunds are accepted within 30 days of purchase."
    );
}

#[tokio::test]
async fn test_empty_project_returns_empty_sources() {
    let h = Harness::start().await;
    let project_id = h.create_project("").await;

    let (status, body) = h
        .post(
            "/api/chat",
            json!({"message": "anything there?", "userId": "alice", "projectId": project_id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"], json!([]));

    let sent = h.last_backend_request();
    assert_eq!(
        sent["messages"],
        json!([{"role": "user", "content": "anything there?"}])
    );
}

#[tokio::test]
async fn test_web_search_context_and_sources() {
    let h = Harness::start().await;

    let (status, body) = h
        .post(
            "/api/chat",
            json!({"message": "rust news", "userId": "alice", "webSearchEnabled": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let web = body["webSources"].as_array().unwrap();
    assert_eq!(web.len(), 2);
    assert_eq!(web[0]["title"], "Rust 1.80 released");
    assert_eq!(web[0]["snippet"], "LazyCell & LazyLock are stable.");
    assert!(body.get("sources").is_none());

    let sent = h.last_backend_request();
    let content = sent["messages"][0]["content"].as_str().unwrap();
    assert!(content.starts_with(
        "rust news\n\nWeb search results:\n[1] Rust 1.80 released\n\
         LazyCell & LazyLock are stable.\nSource: https://blog.rust-lang.org/1.80"
    ));
}

#[tokio::test]
async fn test_search_endpoint() {
    let h = Harness::start().await;
    let (status, body) = h.post("/api/search", json!({"query": "rust"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "rust");
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert!(body["timestamp"].is_string());

    let (status, body) = h.post("/api/search", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_validation_and_not_found_errors() {
    let h = Harness::start().await;

    let (status, body) = h.post("/api/chat", json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "Message and userId are required");

    let (status, body) = h
        .post(
            "/api/chat",
            json!({"message": "hi", "userId": "alice", "projectId": "missing"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    assert!(h.backend_requests.lock().unwrap().is_empty());
    let (_, sessions) = h.get("/api/sessions?userId=alice").await;
    assert_eq!(sessions, json!([]));
}

#[tokio::test]
async fn test_backend_failure_is_passed_through() {
    let h = Harness::start().await;

    let (status, body) = h
        .post(
            "/api/chat",
            json!({"message": "please trigger-503", "userId": "alice"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "inference_error");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("Service Unavailable"), "{}", message);
    assert!(message.contains("model not loaded"), "{}", message);

    // The user turn stays recorded.
    let (_, sessions) = h.get("/api/sessions?userId=alice").await;
    let session_id = sessions[0]["id"].as_str().unwrap();
    let (_, messages) = h
        .get(&format!("/api/messages?sessionId={}&userId=alice", session_id))
        .await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_project_delete_cascades_documents() {
    let h = Harness::start().await;
    let project_id = h.create_project("x").await;
    h.upload_text(&project_id, "a.txt", "alpha").await;

    let (_, docs) = h
        .get(&format!("/api/projects/{}/documents?userId=alice", project_id))
        .await;
    assert_eq!(docs.as_array().unwrap().len(), 1);
    assert!(docs[0].get("extractedText").is_none());

    let resp = h
        .client
        .delete(format!("{}/api/projects/{}?userId=alice", h.base, project_id))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let (status, _) = h
        .get(&format!("/api/projects/{}?userId=alice", project_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, docs) = h
        .get(&format!("/api/projects/{}/documents?userId=alice", project_id))
        .await;
    assert_eq!(docs, json!([]));
}

#[tokio::test]
async fn test_openai_endpoint_requires_valid_key() {
    let h = Harness::start().await;
    let url = format!("{}/v1/chat/completions", h.base);
    let request = json!({"messages": [{"role": "user", "content": "ping"}], "stream": true});

    let resp = h.client.post(&url).json(&request).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(
        body["error"]["message"],
        "Missing or invalid authorization header"
    );

    let resp = h
        .client
        .post(&url)
        .bearer_auth("sk-proj-not-a-real-key")
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid API key");
    assert!(h.backend_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_openai_endpoint_forwards_with_defaults() {
    let h = Harness::start().await;
    let (status, issued) = h
        .post("/api/keys", json!({"userId": "alice", "name": "cli"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let key = issued["key"].as_str().unwrap().to_string();

    let resp = h
        .client
        .post(format!("{}/v1/chat/completions", h.base))
        .bearer_auth(&key)
        .json(&json!({"messages": [{"role": "user", "content": "ping"}], "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "cmpl-1");
    assert_eq!(body["usage"]["total_tokens"], 9);

    let sent = h.last_backend_request();
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["model"], "local-model");
    assert_eq!(sent["max_tokens"], 2000);

    let (_, listed) = h.get("/api/keys?userId=alice").await;
    assert!(listed[0]["lastUsed"].is_i64());
    assert_ne!(listed[0]["key"], key.as_str());

    let resp = h
        .client
        .post(format!("{}/v1/chat/completions", h.base))
        .bearer_auth(&key)
        .json(&json!({"messages": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_openai_endpoint_checks_key_before_body() {
    let h = Harness::start().await;
    let url = format!("{}/v1/chat/completions", h.base);

    for body in ["not json", "{bad"] {
        let resp = h.client.post(&url).body(body).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 401, "body {:?}", body);
        let reply: Value = resp.json().await.unwrap();
        assert_eq!(reply["error"]["type"], "invalid_request_error");
        assert_eq!(
            reply["error"]["message"],
            "Missing or invalid authorization header"
        );
    }

    let (_, issued) = h
        .post("/api/keys", json!({"userId": "alice", "name": "cli"}))
        .await;
    let resp = h
        .client
        .post(&url)
        .bearer_auth(issued["key"].as_str().unwrap())
        .body("{bad")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let reply: Value = resp.json().await.unwrap();
    assert_eq!(reply["error"]["type"], "invalid_request_error");
    assert!(h.backend_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_bodies_use_error_contract() {
    let h = Harness::start().await;

    let (status, body) = h.post("/api/projects", json!({"name": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "userId and name are required");

    let resp = h
        .client
        .post(format!("{}/api/chat", h.base))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = h
        .client
        .post(format!("{}/api/chat", h.base))
        .header("content-type", "application/json")
        .body("{\"message\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_project_update_changes_system_prompt() {
    let h = Harness::start().await;
    let project_id = h.create_project("Be terse.").await;
    let url = format!("{}/api/projects/{}", h.base, project_id);

    let resp = h
        .client
        .put(&url)
        .json(&json!({"userId": "alice", "systemPrompt": "Answer in French."}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let project: Value = resp.json().await.unwrap();
    assert_eq!(project["systemPrompt"], "Answer in French.");
    assert_eq!(project["name"], "Handbook");

    let (status, _) = h
        .post(
            "/api/chat",
            json!({"message": "hi", "userId": "alice", "projectId": project_id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let sent = h.last_backend_request();
    assert_eq!(
        sent["messages"][0],
        json!({"role": "system", "content": "Answer in French."})
    );

    let resp = h
        .client
        .put(&url)
        .json(&json!({"userId": "mallory", "name": "Mine"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = h
        .client
        .put(&url)
        .json(&json!({"name": "Renamed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

use async_trait::async_trait;
use rcrt_agent_runner::definition::{AgentDefinition, Capabilities, ContextBudget, Subscriptions};
use rcrt_agent_runner::llm::{ChatMessage, LlmClient, SamplingParams};
use rcrt_agent_runner::worker::AgentWorker;
use rcrt_client::{BusEvent, RcrtClient};
use rcrt_core::journal::DedupJournal;
use rcrt_core::RcrtError;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StubLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StubLlm {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(StubLlm {
            replies: Mutex::new(replies.into_iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _params: &SamplingParams,
    ) -> Result<String, RcrtError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RcrtError::Transport("stub llm exhausted".into()))
    }
}

struct SlowLlm;

#[async_trait]
impl LlmClient for SlowLlm {
    async fn chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _params: &SamplingParams,
    ) -> Result<String, RcrtError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok("too late".into())
    }
}

fn definition(max_iterations: u32, llm_timeout_secs: u64) -> AgentDefinition {
    AgentDefinition {
        name: "chat-assistant".into(),
        model: "test/stub".into(),
        temperature: None,
        max_tokens: None,
        system_prompt: "You are a test agent.".into(),
        capabilities: Capabilities { can_delete: false },
        subscriptions: Subscriptions::default(),
        llm_timeout_secs,
        max_iterations,
        context_budget: ContextBudget::default(),
    }
}

async fn server_with_auth() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "t1" })))
        .mount(&server)
        .await;
    // Context assembly lists sessions and contexts; none exist by default.
    Mock::given(method("GET"))
        .and(path("/breadcrumbs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    server
}

async fn build_worker(server: &MockServer, llm: Arc<dyn LlmClient>, def: AgentDefinition) -> (AgentWorker, tempfile::TempDir) {
    let client = Arc::new(
        RcrtClient::connect(&server.uri(), "owner", "agent-runner").await.unwrap(),
    );
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(DedupJournal::open(dir.path().join("journal.jsonl"), 24).unwrap());
    (
        AgentWorker::new(client, llm, journal, def, "workspace:tools".into()),
        dir,
    )
}

async fn mount_breadcrumb(server: &MockServer, id: Uuid, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn user_message(id: Uuid, text: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": "User message",
        "context": {"message": text, "session_id": "s1"},
        "tags": ["workspace:tools", "user:message", "session:s1"],
        "schema_name": "user.message.v1",
        "version": 1,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

fn created_event(id: Uuid, schema: &str, tags: &[&str], stamp: &str) -> BusEvent {
    BusEvent {
        event_type: "breadcrumb.created".into(),
        breadcrumb_id: Some(id),
        tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        schema_name: Some(schema.into()),
        timestamp: Some(stamp.into()),
        context: None,
        message: None,
    }
}

fn tool_response(id: Uuid, tool: &str, request_id: &str, output: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("{} response for {}", tool, request_id),
        "context": {
            "tool": tool,
            "status": "success",
            "output": output,
            "execution_time_ms": 3,
            "requestId": request_id,
            "requestedBy": "chat-assistant"
        },
        "tags": ["workspace:tools", "tool:response", format!("tool:{}", tool)],
        "schema_name": "tool.response.v1",
        "version": 1,
        "created_at": "2026-01-01T00:00:01Z",
        "updated_at": "2026-01-01T00:00:01Z"
    })
}

#[tokio::test]
async fn one_reply_with_two_tool_requests_publishes_both_then_responds() {
    let server = server_with_auth().await;

    let first_reply = r#"{
        "action": "create",
        "breadcrumb": {
            "schema_name": "agent.response.v1",
            "title": "Working on it",
            "tags": [],
            "context": {
                "message": "Picking a number, then echoing it.",
                "tool_requests": [
                    {"tool": "random_number", "input": {"min": 1, "max": 10}, "requestId": "req-rand"},
                    {"tool": "echo", "input": {"message": "7"}, "requestId": "req-echo"}
                ]
            }
        }
    }"#;
    let ack_reply = r#"{
        "action": "create",
        "breadcrumb": {
            "schema_name": "agent.response.v1",
            "title": "Got the number",
            "tags": [],
            "context": {"message": "Random number received."}
        }
    }"#;
    let final_reply = r#"{
        "action": "create",
        "breadcrumb": {
            "schema_name": "agent.response.v1",
            "title": "Done",
            "tags": [],
            "context": {"message": "The echoed number is 7"}
        }
    }"#;
    let llm = StubLlm::new(vec![first_reply, ack_reply, final_reply]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(
        &server,
        trigger_id,
        user_message(trigger_id, "pick a random number between 1 and 10, then echo it"),
    )
    .await;

    // Both nested requests go out, tagged for this agent and session.
    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "schema_name": "tool.request.v1",
            "tags": ["workspace:tools", "tool:request", "agent:chat-assistant", "session:s1"],
            "context": {"tool": "random_number", "requestId": "req-rand", "requestedBy": "chat-assistant"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "schema_name": "tool.request.v1",
            "context": {"tool": "echo", "requestId": "req-echo"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "schema_name": "agent.response.v1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(3)
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 1);

    // Responses arrive in whatever order the executors finished.
    let rand_response_id = Uuid::new_v4();
    mount_breadcrumb(
        &server,
        rand_response_id,
        tool_response(rand_response_id, "random_number", "req-rand", json!({"number": 7})),
    )
    .await;
    worker
        .handle_event(created_event(
            rand_response_id,
            "tool.response.v1",
            &["workspace:tools", "tool:response", "tool:random_number"],
            "ts-2",
        ))
        .await
        .unwrap();

    let echo_response_id = Uuid::new_v4();
    mount_breadcrumb(
        &server,
        echo_response_id,
        tool_response(echo_response_id, "echo", "req-echo", json!({"message": "7"})),
    )
    .await;
    worker
        .handle_event(created_event(
            echo_response_id,
            "tool.response.v1",
            &["workspace:tools", "tool:response", "tool:echo"],
            "ts-3",
        ))
        .await
        .unwrap();

    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn malformed_reply_gets_one_repair_attempt() {
    let server = server_with_auth().await;
    let llm = StubLlm::new(vec![
        "Happy to help! Let me think about that.",
        r#"{"action": "create", "breadcrumb": {"schema_name": "agent.response.v1", "title": "Hi", "tags": [], "context": {"message": "hello"}}}"#,
    ]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "hi")).await;

    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "schema_name": "agent.response.v1",
            "context": {"message": "hello"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn twice_malformed_reply_becomes_an_agent_error() {
    let server = server_with_auth().await;
    let llm = StubLlm::new(vec!["nonsense the first time", "nonsense the second time"]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "hi")).await;

    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "schema_name": "agent.response.v1",
            "tags": ["workspace:tools", "agent:error", "agent:chat-assistant", "session:s1"],
            "context": {
                "error_kind": "llm-parse",
                "raw": "nonsense the first time"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn llm_timeout_publishes_an_agent_error() {
    let server = server_with_auth().await;
    let (worker, _dir) = build_worker(&server, Arc::new(SlowLlm), definition(8, 1)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "hi")).await;

    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "context": {"error_kind": "llm-timeout"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn iteration_bound_stops_runaway_loops() {
    let server = server_with_auth().await;
    let first_reply = r#"{
        "action": "create",
        "breadcrumb": {
            "schema_name": "agent.response.v1",
            "title": "Working",
            "tags": [],
            "context": {
                "tool_requests": [{"tool": "echo", "input": {"message": "x"}, "requestId": "req-loop"}]
            }
        }
    }"#;
    let llm = StubLlm::new(vec![first_reply, "unused"]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(1, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "loop")).await;

    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 1);

    // The response to req-loop would be iteration 2 of a 1-iteration budget.
    let response_id = Uuid::new_v4();
    mount_breadcrumb(
        &server,
        response_id,
        tool_response(response_id, "echo", "req-loop", json!({"message": "x"})),
    )
    .await;
    worker
        .handle_event(created_event(
            response_id,
            "tool.response.v1",
            &["workspace:tools", "tool:response", "tool:echo"],
            "ts-2",
        ))
        .await
        .unwrap();

    // No further LLM call happened.
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn replayed_event_is_handled_once() {
    let server = server_with_auth().await;
    let reply = r#"{"action": "create", "breadcrumb": {"schema_name": "agent.response.v1", "title": "Hi", "tags": [], "context": {"message": "hello"}}}"#;
    let llm = StubLlm::new(vec![reply, reply]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "hi")).await;
    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;

    let event = created_event(
        trigger_id,
        "user.message.v1",
        &["workspace:tools", "user:message", "session:s1"],
        "ts-1",
    );
    worker.handle_event(event.clone()).await.unwrap();
    // Same SSE event redelivered after a reconnect.
    worker.handle_event(event).await.unwrap();

    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn own_responses_do_not_retrigger_the_agent() {
    let server = server_with_auth().await;
    let llm = StubLlm::new(vec![]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let own_id = Uuid::new_v4();
    mount_breadcrumb(
        &server,
        own_id,
        json!({
            "id": own_id,
            "title": "Done",
            "context": {"message": "previous answer"},
            "tags": ["workspace:tools", "agent:chat-assistant", "session:s1"],
            "schema_name": "agent.response.v1",
            "version": 1,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }),
    )
    .await;

    worker
        .handle_event(created_event(
            own_id,
            "agent.response.v1",
            &["workspace:tools", "agent:chat-assistant", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn delete_without_capability_is_refused() {
    let server = server_with_auth().await;
    let reply = r#"{"action": "delete", "breadcrumb_id": "6ff95bbe-9fd5-4e69-8d12-2f586e71e77a"}"#;
    let llm = StubLlm::new(vec![reply]);
    let (worker, _dir) = build_worker(&server, llm.clone(), definition(8, 30)).await;

    let trigger_id = Uuid::new_v4();
    mount_breadcrumb(&server, trigger_id, user_message(trigger_id, "delete that")).await;

    // The only POST is the validation error breadcrumb; no DELETE happens.
    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(body_partial_json(json!({
            "context": {"error_kind": "validation"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": Uuid::new_v4() })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    worker
        .handle_event(created_event(
            trigger_id,
            "user.message.v1",
            &["workspace:tools", "user:message", "session:s1"],
            "ts-1",
        ))
        .await
        .unwrap();
}

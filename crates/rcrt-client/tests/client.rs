use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::{BreadcrumbCreate, BreadcrumbUpdate};
use rcrt_core::RcrtError;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_with_auth(token: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .mount(&server)
        .await;
    server
}

fn breadcrumb_body(id: Uuid, version: i32) -> serde_json::Value {
    json!({
        "id": id,
        "title": "Echo request",
        "context": {"tool": "echo", "requestId": "r1"},
        "tags": ["workspace:tools", "tool:request"],
        "schema_name": "tool.request.v1",
        "version": version,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn create_sends_bearer_token_and_returns_initial_version() {
    let server = server_with_auth("t1").await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/breadcrumbs"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let created = client
        .create(&BreadcrumbCreate {
            title: "Echo request".into(),
            context: json!({"tool": "echo"}),
            tags: vec!["workspace:tools".into()],
            schema_name: Some("tool.request.v1".into()),
            ttl: None,
        })
        .await
        .unwrap();

    assert_eq!(created.id, id);
    assert_eq!(created.version, 1);
}

#[tokio::test]
async fn create_without_schema_name_fails_validation_locally() {
    let server = server_with_auth("t1").await;
    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();

    let err = client
        .create(&BreadcrumbCreate {
            title: "untyped".into(),
            context: json!({}),
            tags: vec![],
            schema_name: None,
            ttl: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RcrtError::Validation(_)));
    // No POST /breadcrumbs was attempted.
    assert!(server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .all(|r| r.url.path() != "/breadcrumbs"));
}

#[tokio::test]
async fn update_returns_incremented_version() {
    let server = server_with_auth("t1").await;
    let id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .and(header("if-match", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let new_version = client
        .update(
            id,
            3,
            &BreadcrumbUpdate {
                context: Some(json!({"x": 1})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(new_version, 4);
}

#[tokio::test]
async fn stale_update_surfaces_conflict() {
    let server = server_with_auth("t1").await;
    let id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .respond_with(ResponseTemplate::new(412).set_body_string("version_mismatch"))
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let err = client.update(id, 2, &BreadcrumbUpdate::default()).await.unwrap_err();
    match err {
        RcrtError::Conflict { id: got, expected } => {
            assert_eq!(got, id);
            assert_eq!(expected, 2);
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn get_retries_transient_server_errors() {
    let server = server_with_auth("t1").await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(breadcrumb_body(id, 1)))
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let bc = client.get(id).await.unwrap();
    assert_eq!(bc.id, id);
    assert_eq!(bc.version, 1);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = server_with_auth("t1").await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let err = client.get(id).await.unwrap_err();
    assert!(matches!(err, RcrtError::NotFound(_)));
}

#[tokio::test]
async fn rejected_token_is_reacquired_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "t1" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "t2" })))
        .mount(&server)
        .await;

    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/breadcrumbs/{}", id)))
        .and(header("authorization", "Bearer t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(breadcrumb_body(id, 1)))
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let bc = client.get(id).await.unwrap();
    assert_eq!(bc.id, id);
}

#[tokio::test]
async fn list_applies_remaining_filters_client_side() {
    let server = server_with_auth("t1").await;

    // Server honors only the first tag; it over-delivers on the second.
    Mock::given(method("GET"))
        .and(path("/breadcrumbs"))
        .and(query_param("tag", "workspace:tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": Uuid::new_v4(),
                "title": "request",
                "tags": ["workspace:tools", "tool:request"],
                "schema_name": "tool.request.v1",
                "version": 1,
                "updated_at": "2026-01-01T00:00:00Z"
            },
            {
                "id": Uuid::new_v4(),
                "title": "catalog",
                "tags": ["workspace:tools", "tool:catalog"],
                "schema_name": "tool.catalog.v1",
                "version": 4,
                "updated_at": "2026-01-01T00:00:00Z"
            },
            {
                "id": Uuid::new_v4(),
                "title": "request elsewhere",
                "tags": ["workspace:other", "tool:request"],
                "schema_name": "tool.request.v1",
                "version": 1,
                "updated_at": "2026-01-01T00:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let items = client
        .list(
            &ListQuery::schema("tool.request.v1")
                .tag("workspace:tools")
                .tag("tool:request"),
        )
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title.as_deref(), Some("request"));
}

#[tokio::test]
async fn list_treats_404_as_empty() {
    let server = server_with_auth("t1").await;
    Mock::given(method("GET"))
        .and(path("/breadcrumbs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap();
    let items = client.list(&ListQuery::default()).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn auth_rejection_at_connect_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_json_string(
            json!({"owner_id": "owner", "agent_id": "agent", "roles": ["curator", "emitter", "subscriber"]})
                .to_string(),
        ))
        .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
        .mount(&server)
        .await;

    let err = RcrtClient::connect(&server.uri(), "owner", "agent").await.unwrap_err();
    assert!(matches!(err, RcrtError::Auth(_)));
}

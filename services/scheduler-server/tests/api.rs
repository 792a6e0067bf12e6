//! HTTP surface, driven through the router without a listener.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use sched_server::{
    api::create_router,
    dispatch::JobDispatcher,
    liveness::PingList,
    repository::Repository,
    scheduler::QueueScheduler,
    starter::QueueJobStarter,
    state::AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    sched_testing::init_tracing();
    let repo = Repository::new().unwrap();
    let ping_list = Arc::new(PingList::new());
    let dispatcher = Arc::new(JobDispatcher::new(
        repo.clone(),
        Arc::new(QueueScheduler::new()),
        Arc::new(QueueJobStarter::new()),
        ping_list.clone(),
    ));
    create_router(AppState::new(repo, dispatcher, ping_list))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn connected_server(app: &Router) -> u64 {
    let (status, scope) = send(
        app,
        Method::POST,
        "/v1/scopes",
        Some(json!({ "name": "node-1", "kind": "server" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = scope["id"].as_u64().unwrap();

    let (status, connect) = send(app, Method::POST, &format!("/v1/scopes/{id}/connect"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(connect["timeout_secs"], 300);
    id
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "scheduler-server");
}

#[tokio::test]
async fn test_request_id_is_generated_or_echoed() {
    let app = app();
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let generated = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(generated.starts_with("req_"));

    let request = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "trace-7")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "trace-7");
}

#[tokio::test]
async fn test_readyz_reports_versions() {
    let app = app();
    connected_server(&app).await;
    let (status, body) = send(&app, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["repository"]["last_committed"], 2);
    assert_eq!(body["repository"]["open_transactions"], 0);
}

#[tokio::test]
async fn test_submit_poll_and_reconnect() {
    let app = app();
    let scope_id = connected_server(&app).await;

    let (status, job) = send(
        &app,
        Method::POST,
        "/v1/jobs",
        Some(json!({ "job_name": "nightly", "scope_id": scope_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["state"], "SUBMITTED");
    assert!(job.get("access_key").is_none());
    let job_id = job["id"].as_u64().unwrap();

    let (status, directive) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/poll"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(directive["command"], "job_start");
    assert_eq!(directive["job_id"], job_id);
    let token = directive["access_key"].as_str().unwrap().to_string();

    let (status, queue) = send(&app, Method::GET, &format!("/v1/scopes/{scope_id}/queue"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue, json!([{ "id": queue[0]["id"], "sme_id": job_id, "state": "STARTING" }]));

    let (status, access) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/access"),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(access["job_id"], job_id);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/started"),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/finished"),
        Some(json!({ "token": token, "exit_code": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, job) = send(&app, Method::GET, &format!("/v1/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["state"], "FINAL");
    assert_eq!(job["exit_code"], 0);
}

#[tokio::test]
async fn test_job_reports_require_access_key() {
    let app = app();
    let scope_id = connected_server(&app).await;
    let (_, job) = send(
        &app,
        Method::POST,
        "/v1/jobs",
        Some(json!({ "job_name": "nightly", "scope_id": scope_id })),
    )
    .await;
    let job_id = job["id"].as_u64().unwrap();
    let (_, directive) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/poll"), None).await;
    let token = directive["access_key"].as_str().unwrap().to_string();

    let (status, problem) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/started"),
        Some(json!({ "token": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(problem["code"], "invalid_credentials");
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/finished"),
        Some(json!({ "token": "1", "exit_code": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, job) = send(&app, Method::GET, &format!("/v1/jobs/{job_id}"), None).await;
    assert_eq!(job["state"], "STARTING");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/finished"),
        Some(json!({ "token": token, "exit_code": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/jobs/{job_id}/finished"),
        Some(json!({ "token": token, "exit_code": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_token_is_unauthorized_problem() {
    let app = app();
    let scope_id = connected_server(&app).await;
    let (_, job) = send(
        &app,
        Method::POST,
        "/v1/jobs",
        Some(json!({ "job_name": "nightly", "scope_id": scope_id })),
    )
    .await;
    let job_id = job["id"].as_u64().unwrap();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/v1/jobs/{job_id}/access"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "token": "nope" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let problem: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(problem["detail"], "Invalid username or password");
}

#[tokio::test]
async fn test_second_connect_conflicts() {
    let app = app();
    let scope_id = connected_server(&app).await;

    let (status, problem) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/connect"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(problem["code"], "already_connected");

    let (status, _) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/disconnect"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/connect"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_then_config_push() {
    let app = app();
    let scope_id = connected_server(&app).await;

    let (status, _) = send(&app, Method::POST, &format!("/v1/scopes/{scope_id}/shutdown"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/v1/scopes/{scope_id}/config"),
        Some(json!({ "items": { "NOP_DELAY": "30" } })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let poll = format!("/v1/scopes/{scope_id}/poll");
    let (_, first) = send(&app, Method::POST, &poll, None).await;
    assert_eq!(first, json!({ "command": "shutdown" }));
    let (_, second) = send(&app, Method::POST, &poll, None).await;
    assert_eq!(second, json!({ "command": "config_push", "config": { "NOP_DELAY": "30" } }));
    let (_, third) = send(&app, Method::POST, &poll, None).await;
    assert_eq!(third, json!({ "command": "no_op" }));
}

#[tokio::test]
async fn test_unknown_scope_is_not_found() {
    let app = app();
    let (status, problem) = send(&app, Method::GET, "/v1/scopes/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(problem["code"], "not_found");

    let (status, _) = send(&app, Method::POST, "/v1/scopes/999/poll", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_kill_of_idle_job_is_rejected() {
    let app = app();
    let (_, job) = send(&app, Method::POST, "/v1/jobs", Some(json!({ "job_name": "idle" }))).await;
    let job_id = job["id"].as_u64().unwrap();

    let (status, problem) = send(&app, Method::POST, &format!("/v1/jobs/{job_id}/kill"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["code"], "rejected");
}

#[tokio::test]
async fn test_membership_is_idempotent() {
    let app = app();
    for _ in 0..2 {
        let (status, _) = send(&app, Method::PUT, "/v1/groups/10/members/20", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (status, body) = send(&app, Method::GET, "/v1/groups/10/members", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "group_id": 10, "members": [20] }));

    let (status, _) = send(&app, Method::DELETE, "/v1/groups/10/members/20", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::DELETE, "/v1/groups/10/members/20", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//! API integration tests driving the router directly with tower's
//! `oneshot`, no TCP listener involved.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use procflow_core::domain::forms::memory::InMemoryFormsProvider;
use procflow_server::{api, cache::InMemoryCache, ProcflowServer, ServerConfig};

struct TestContext {
    app: Router,
    forms: Arc<InMemoryFormsProvider>,
}

fn setup() -> TestContext {
    let forms = Arc::new(InMemoryFormsProvider::new());
    let server = ProcflowServer::new(
        ServerConfig::default(),
        Arc::new(InMemoryCache::new()),
        forms.clone(),
    );
    TestContext {
        app: api::build_router(Arc::new(server)),
        forms,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("X-User-Id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Create a two-step sequential process; the second step's form carries
/// the given password. Returns (process_id, step ids).
async fn seed_process(
    ctx: &TestContext,
    mode: &str,
    second_password: Option<&str>,
) -> (String, Vec<String>) {
    let form1 = ctx.forms.register_form(None, Vec::new());
    let form2 = ctx
        .forms
        .register_form(second_password.map(|p| p.to_string()), Vec::new());

    let (status, body) = send(
        &ctx.app,
        post_json(
            "/v1/processes",
            Some("owner"),
            json!({
                "title": "intake",
                "mode": mode,
                "steps": [
                    { "form_id": form1.0, "order": 1 },
                    { "form_id": form2.0, "order": 2 },
                ],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let process_id = body["id"].as_str().unwrap().to_string();
    let steps = body["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    (process_id, steps)
}

#[tokio::test]
async fn test_process_creation_requires_identity() {
    let ctx = setup();
    let (status, body) = send(
        &ctx.app,
        post_json(
            "/v1/processes",
            None,
            json!({ "title": "intake", "mode": "sequential" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorDetails"]["errorCode"], "ERR_AUTH");
}

#[tokio::test]
async fn test_listing_is_public_and_filters() {
    let ctx = setup();
    seed_process(&ctx, "sequential", None).await;
    seed_process(&ctx, "free_flow", None).await;

    let (status, body) = send(&ctx.app, get("/v1/processes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&ctx.app, get("/v1/processes?mode=free_flow")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["mode"], "free_flow");
}

#[tokio::test]
async fn test_sequential_guest_run_over_http() {
    let ctx = setup();
    let (process_id, steps) = seed_process(&ctx, "sequential", Some("1234")).await;

    // Guest start: token in the response, never on the instance payload
    let (status, body) = send(
        &ctx.app,
        post_json(&format!("/v1/processes/{}/start", process_id), None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["access_token"].as_str().unwrap().to_string();
    let instance_id = body["instance"]["id"].as_str().unwrap().to_string();
    assert!(body["instance"].get("access_token").is_none());

    // Current step requires the token
    let (status, _) = send(
        &ctx.app,
        get(&format!("/v1/instances/{}/current-step", instance_id)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &ctx.app,
        get(&format!(
            "/v1/instances/{}/current-step?token={}",
            instance_id, token
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["id"], steps[0].as_str());

    // Out-of-order submission is refused
    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorDetails"]["errorCode"], "ERR_CONFLICT");

    // Step 1, token via header this time
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/instances/{}/submit-step", instance_id))
        .header("content-type", "application/json")
        .header("X-Instance-Token", &token)
        .body(Body::from(json!({ "step_id": steps[0] }).to_string()))
        .unwrap();
    let (status, body) = send(&ctx.app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "running");
    assert_eq!(body["current_step"], steps[1].as_str());

    // Step 2 without and with the wrong password
    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token, "password": "9999" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Right password finishes the run
    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token, "password": "1234" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "completed");
    assert!(body["current_step"].is_null());
}

#[tokio::test]
async fn test_free_flow_duplicate_submission_conflicts() {
    let ctx = setup();
    let (process_id, steps) = seed_process(&ctx, "free_flow", None).await;

    let (_, body) = send(
        &ctx.app,
        post_json(&format!("/v1/processes/{}/start", process_id), None, json!({})),
    )
    .await;
    let token = body["access_token"].as_str().unwrap().to_string();
    let instance_id = body["instance"]["id"].as_str().unwrap().to_string();

    // Order is irrelevant in free-flow
    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[1], "token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &ctx.app,
        get(&format!(
            "/v1/instances/{}/current-steps?token={}",
            instance_id, token
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let views = body.as_array().unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0]["is_submitted"], false);
    assert_eq!(views[1]["is_submitted"], true);

    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/v1/instances/{}/submit-step", instance_id),
            None,
            json!({ "step_id": steps[0], "token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_mutation_locked_after_first_instance() {
    let ctx = setup();
    let (process_id, _) = seed_process(&ctx, "sequential", None).await;

    send(
        &ctx.app,
        post_json(&format!("/v1/processes/{}/start", process_id), None, json!({})),
    )
    .await;

    let form = ctx.forms.register_form(None, Vec::new());
    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/v1/processes/{}/steps", process_id),
            Some("owner"),
            json!({ "form_id": form.0, "order": 3 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorDetails"]["errorCode"], "ERR_CONFLICT");
}

#[tokio::test]
async fn test_unknown_instance_is_404() {
    let ctx = setup();
    let (status, body) = send(
        &ctx.app,
        post_json(
            "/v1/instances/nope/submit-step",
            None,
            json!({ "step_id": "also-nope" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorDetails"]["errorCode"], "ERR_NOT_FOUND");
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = ProcflowServer::in_memory(ServerConfig::default());
    let app = api::build_router(Arc::new(server));
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert_eq!(body["dependencies"]["credentialCache"]["status"], "UP");
}

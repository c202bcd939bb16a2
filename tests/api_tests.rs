//! API integration tests

mod common;

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value};
use uuid::Uuid;
use webhook_indexer::api::{
    create_app, ApiState, ErrorResponse, SIGNATURE_HEADER, USER_ID_HEADER, WEBHOOK_ID_HEADER,
};
use webhook_indexer::IndexerConfig;
use tower::ServiceExt; // for `oneshot`

fn router(h: &TestHarness) -> Router {
    create_app(ApiState::new(&h.container), &h.container.config.server)
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn get(uri: &str, user: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(USER_ID_HEADER, user)
        .body(Body::empty())?)
}

fn post_json(uri: &str, user: &str, body: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_ID_HEADER, user)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let h = harness().await?;
    let request = Request::builder().uri("/health").body(Body::empty())?;

    let (status, body) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "webhook-indexer");
    Ok(())
}

#[tokio::test]
async fn test_create_and_list_jobs() -> Result<()> {
    let h = harness().await?;
    let request = post_json(
        "/api/jobs",
        USER,
        json!({
            "connectionId": h.connection_id,
            "categories": { "transactions": true },
            "filters": { "accountAddresses": [key(40)], "endSlot": 5000 }
        }),
    )?;

    let (status, created) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "initializing");
    assert_eq!(created["progress"], 0);
    assert_eq!(created["config"]["filters"]["endSlot"], 5000);
    let job_id = created["id"].as_str().unwrap_or_default().to_string();

    let (status, list) = send(router(&h), get("/api/jobs", USER)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["jobs"][0]["id"], job_id.as_str());

    let (status, list) = send(router(&h), get("/api/jobs", OTHER_USER)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_caller_is_unauthorized() -> Result<()> {
    let h = harness().await?;
    let request = Request::builder().uri("/api/jobs").body(Body::empty())?;

    let (status, body) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = serde_json::from_value(body)?;
    assert_eq!(error.code, 401);
    Ok(())
}

#[tokio::test]
async fn test_invalid_job_request() -> Result<()> {
    let h = harness().await?;
    let request = post_json(
        "/api/jobs",
        USER,
        json!({ "connectionId": h.connection_id, "categories": {} }),
    )?;

    let (status, body) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    Ok(())
}

#[tokio::test]
async fn test_get_job_and_actions() -> Result<()> {
    let h = harness().await?;
    let (job, webhook) = h.running_job().await?;
    let uri = format!("/api/jobs/{}", job.id);

    let (status, view) = send(router(&h), get(&uri, USER)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "running");
    assert_eq!(view["webhooks"][0]["subscriptionId"], webhook.subscription_id.as_str());
    assert!(view["webhooks"][0].get("secret").is_none());

    let (status, _) = send(router(&h), get(&uri, OTHER_USER)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let action = format!("{}/action", uri);
    let (status, paused) =
        send(router(&h), post_json(&action, USER, json!({ "action": "pause" }))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");

    let (status, body) =
        send(router(&h), post_json(&action, USER, json!({ "action": "pause" }))?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);

    let (status, cancelled) =
        send(router(&h), post_json(&action, USER, json!({ "action": "cancel" }))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let retry = format!("{}/retry", uri);
    let (status, _) = send(router(&h), post_json(&retry, USER, json!({}))?).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header(USER_ID_HEADER, USER)
        .body(Body::empty())?;
    let (status, _) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(router(&h), get(&uri, USER)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_delivery_endpoint_and_logs() -> Result<()> {
    let h = harness().await?;
    let (job, webhook) = h.running_job().await?;
    let body = delivery_body(&webhook.subscription_id, vec![transaction_event(1, 42)]);
    let signature = sign(&webhook, &body);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", job.id))
        .header("content-type", "application/json")
        .header(WEBHOOK_ID_HEADER, webhook.subscription_id.as_str())
        .header(SIGNATURE_HEADER, format!("sha256={}", signature))
        .body(Body::from(body.clone()))?;
    let (status, ack) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], true);
    assert_eq!(ack["result"], "processed");
    assert_eq!(ack["inserted"], 3);

    let bad = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", job.id))
        .header(WEBHOOK_ID_HEADER, webhook.subscription_id.as_str())
        .header(SIGNATURE_HEADER, "00".repeat(32))
        .body(Body::from(body.clone()))?;
    let (status, _) = send(router(&h), bad).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", Uuid::new_v4()))
        .header(WEBHOOK_ID_HEADER, webhook.subscription_id.as_str())
        .header(SIGNATURE_HEADER, signature.as_str())
        .body(Body::from(body))?;
    let (status, _) = send(router(&h), unknown).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, logs) =
        send(router(&h), get(&format!("/api/jobs/{}/logs?limit=10", job.id), USER)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["logs"][0]["status"], "success");
    Ok(())
}

#[tokio::test]
async fn test_reconcile_endpoint() -> Result<()> {
    let h = harness().await?;
    let (_, webhook) = h.running_job().await?;

    let (status, report) =
        send(router(&h), post_json("/api/webhooks/reconcile", USER, json!({}))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 1);
    assert_eq!(report["deleted"], json!([]));
    assert!(h.provider.contains(&webhook.subscription_id));
    Ok(())
}

#[tokio::test]
async fn test_cron_tick_requires_secret() -> Result<()> {
    // Disabled without a configured secret
    let h = harness().await?;
    let request = Request::builder()
        .method("POST")
        .uri("/api/cron/tick")
        .header("authorization", "Bearer anything")
        .body(Body::empty())?;
    let (status, _) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut config: IndexerConfig = test_config();
    config.scheduler.cron_secret = Some("tick-secret".to_string());
    let h = harness_with(config).await?;

    let wrong = Request::builder()
        .method("POST")
        .uri("/api/cron/tick")
        .header("authorization", "Bearer nope")
        .body(Body::empty())?;
    let (status, _) = send(router(&h), wrong).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .method("POST")
        .uri("/api/cron/tick")
        .header("authorization", "Bearer tick-secret")
        .body(Body::empty())?;
    let (status, report) = send(router(&h), right).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["processed"], 0);
    assert_eq!(report["recovered"], 0);
    Ok(())
}

#[tokio::test]
async fn test_job_socket_requires_caller() -> Result<()> {
    let h = harness().await?;
    let request = Request::builder()
        .uri("/ws/jobs?user_id=user-1")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())?;

    let (status, body) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    Ok(())
}

#[tokio::test]
async fn test_delivery_with_provider_auth_header() -> Result<()> {
    let h = harness().await?;
    let (job, webhook) = h.running_job().await?;
    let body = delivery_body(&webhook.subscription_id, vec![transaction_event(2, 60)]);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", job.id))
        .header("content-type", "application/json")
        .header("authorization", webhook.secret.as_str())
        .body(Body::from(body.clone()))?;
    let (status, ack) = send(router(&h), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "processed");

    let wrong = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", job.id))
        .header("authorization", "guess")
        .body(Body::from(body))?;
    let (status, _) = send(router(&h), wrong).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_oversized_delivery_is_rejected() -> Result<()> {
    let mut config = test_config();
    config.server.max_request_size_mb = 1;
    let h = harness_with(config).await?;
    let (job, webhook) = h.running_job().await?;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{}", job.id))
        .header("authorization", webhook.secret.as_str())
        .body(Body::from(vec![b' '; 1024 * 1024 + 1]))?;
    let response = router(&h).oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    Ok(())
}

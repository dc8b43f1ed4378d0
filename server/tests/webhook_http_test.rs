//! Webhook HTTP Tests
//!
//! Drives `/webhooks/{source}`, `/health` and `/metrics` through the full
//! router with a fake agent and publisher. Replies are dispatched inline.
//!
//! Run with: `cargo test --test webhook_http_test`

mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use helpers::{body_to_json, mention_body, TestApp};
use mentionbot_server::agent::{AgentError, AgentFailureCause};
use mentionbot_server::config::Config;
use mentionbot_server::replies::GENERIC_ERROR_REPLY;
use serde_json::json;

#[tokio::test]
async fn test_missing_data_returns_400_and_enqueues_nothing() {
    let app = TestApp::new();

    let resp = app.post_webhook(r#"{"type":"cast.created"}"#).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_to_json(resp).await,
        json!({"status": "nok", "error": "No data received."})
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.agent.calls().is_empty());
    assert_eq!(app.publisher.attempts(), 0);
}

#[tokio::test]
async fn test_non_json_body_returns_400() {
    let app = TestApp::new();

    let resp = app.post_webhook("definitely not json").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_to_json(resp).await["status"], "nok");
}

#[tokio::test]
async fn test_invalid_cast_is_acknowledged_nok() {
    let app = TestApp::new();

    let resp = app.post_webhook(r#"{"data":{"text":"@bot hi"}}"#).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await["status"], "nok");
    assert!(app.agent.calls().is_empty());
}

#[tokio::test]
async fn test_mention_without_tag_never_calls_agent() {
    let app = TestApp::new();

    let resp = app.post_webhook(&mention_body("gm everyone")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await, json!({"status": "nok"}));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.agent.calls().is_empty());
    assert_eq!(app.publisher.attempts(), 0);
}

#[tokio::test]
async fn test_mention_is_acked_then_answered() {
    let app = TestApp::new();
    app.agent.answer(
        "Deploying now.\n```json\n{\"message\":\"FooCoin is live\",\"tokenAddress\":\"0xfoo\",\"chain\":\"base\"}\n```",
    );

    let resp = app
        .post_webhook(&mention_body("hello @bot deploy FooCoin FOO"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await, json!({"status": "ok"}));

    let posts = app.wait_for_posts(1).await;
    let calls = app.agent.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "deploy FooCoin FOO");
    assert_eq!(calls[0].context.author_fid, Some(42));
    assert_eq!(calls[0].context.author_address.as_deref(), Some("0xalice"));
    assert_eq!(calls[0].context.cast_hash, "0xcast");

    assert_eq!(posts[0].text, "FooCoin is live");
    assert_eq!(posts[0].options.reply_to.as_deref(), Some("0xcast"));
    assert_eq!(
        posts[0].options.embeds[0].url,
        format!(
            "https://frames.test/frames/{}",
            calls[0].context.correlation_id
        )
    );
}

#[tokio::test]
async fn test_unparseable_agent_output_posts_fallback() {
    let app = TestApp::new();
    app.agent.answer("not json at all");

    app.post_webhook(&mention_body("@bot deploy")).await;

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].text, "An error occurred, try again...");
}

#[tokio::test]
async fn test_agent_failure_posts_cause() {
    let app = TestApp::new();
    app.agent.fail(AgentError::Rejected {
        message: "HTTP 400".into(),
        cause: Some(AgentFailureCause {
            error: Some("Token symbol is required".into()),
        }),
    });

    app.post_webhook(&mention_body("@bot deploy FooCoin")).await;

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].text, "Token symbol is required");
    assert!(posts[0].options.embeds.is_empty());
}

#[tokio::test]
async fn test_agent_failure_without_cause_posts_generic_reply() {
    let app = TestApp::new();
    app.agent
        .fail(AgentError::InvalidResponse("truncated".into()));

    app.post_webhook(&mention_body("@bot deploy FooCoin")).await;

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].text, GENERIC_ERROR_REPLY);
}

#[tokio::test]
async fn test_unknown_source_uses_same_gateway() {
    let app = TestApp::new();
    app.agent.answer(r#"{"message":"hi"}"#);

    let req = TestApp::request(Method::POST, "/webhooks/somewhere-else")
        .header("content-type", "application/json")
        .body(Body::from(mention_body("@bot hello")))
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].text, "hi");
}

// ============================================================================
// Signature
// ============================================================================

fn signed_config() -> Config {
    Config {
        webhook_secret: Some("s3cret".into()),
        ..Config::default_for_test()
    }
}

#[tokio::test]
async fn test_signed_webhook_is_accepted() {
    let app = TestApp::with_config(signed_config());
    app.agent.answer(r#"{"message":"signed"}"#);

    let resp = app.post_webhook(&mention_body("@bot hi")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await["status"], "ok");
    app.wait_for_posts(1).await;
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = TestApp::with_config(signed_config());

    let req = TestApp::request(Method::POST, "/webhooks/neynar")
        .header("content-type", "application/json")
        .body(Body::from(mention_body("@bot hi")))
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(app.agent.calls().is_empty());
}

#[tokio::test]
async fn test_wrong_signature_is_rejected() {
    let app = TestApp::with_config(signed_config());

    let req = TestApp::request(Method::POST, "/webhooks/neynar")
        .header("content-type", "application/json")
        .header(
            "x-signature",
            mentionbot_server::mentions::sign_payload("other", b"whatever"),
        )
        .body(Body::from(mention_body("@bot hi")))
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Health & metrics
// ============================================================================

#[tokio::test]
async fn test_health_reports_inline_mode() {
    let app = TestApp::with_config(signed_config());

    let req = TestApp::request(Method::GET, "/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_to_json(resp).await,
        json!({"status": "ok", "durable_queue": false, "signature_check": true})
    );
}

#[tokio::test]
async fn test_metrics_shape_in_inline_mode() {
    let app = TestApp::new();

    let req = TestApp::request(Method::GET, "/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await, json!({"result": {"replies": {}}}));
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limited_reply_cools_down_later_replies() {
    let app = TestApp::new();
    app.publisher.rate_limit_next(1);
    app.agent.answer(r#"{"message":"first"}"#);
    app.agent.answer(r#"{"message":"second"}"#);

    let start = tokio::time::Instant::now();
    app.post_webhook(&mention_body("@bot one")).await;
    // First reply hits 429 and is dropped inline
    while app.publisher.attempts() < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    app.post_webhook(&mention_body("@bot two")).await;
    let posts = app.wait_for_posts(1).await;

    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].text, "second");
    assert!(tokio::time::Instant::now() - start >= app.config.replies.cool_down);
}

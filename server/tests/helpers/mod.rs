//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router, with
//! scripted fakes standing in for the agent and the Farcaster publisher.
//!
//! Replies run on background tasks, so use [`TestApp::wait_for_posts`] after a
//! webhook instead of asserting right away.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::OnceCell;
use tower::ServiceExt;

use mentionbot_server::agent::{Agent, AgentContext, AgentError, AgentOutput};
use mentionbot_server::api::{create_router, AppState};
use mentionbot_server::audit::{AuditLog, LogAuditSink};
use mentionbot_server::config::Config;
use mentionbot_server::db;
use mentionbot_server::mentions::{sign_payload, GatewaySettings, MentionGateway};
use mentionbot_server::publish::{PublishError, PublishOptions, Publisher};
use mentionbot_server::replies::{
    ChannelPublishers, InlineDispatcher, ReplyDispatcher, ReplyProcessor,
};

// ============================================================================
// Shared resources
// ============================================================================

static SHARED_REDIS: OnceCell<fred::clients::Client> = OnceCell::const_new();

/// Shared Redis client for `#[ignore]`d tests that need a live server.
pub async fn shared_redis() -> &'static fred::clients::Client {
    SHARED_REDIS
        .get_or_init(|| async {
            let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
            db::create_redis_client(&url)
                .await
                .expect("Failed to connect to test Redis")
        })
        .await
}

// ============================================================================
// Fakes
// ============================================================================

/// One agent call as seen by the fake.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub prompt: String,
    pub context: AgentContext,
}

/// Agent answering from a script; unscripted calls fail.
#[derive(Default)]
pub struct FakeAgent {
    responses: Mutex<VecDeque<Result<AgentOutput, AgentError>>>,
    calls: Mutex<Vec<AgentCall>>,
}

impl FakeAgent {
    pub fn answer(&self, output: &str) {
        self.responses.lock().unwrap().push_back(Ok(AgentOutput {
            output: output.to_string(),
            transaction: None,
        }));
    }

    pub fn fail(&self, error: AgentError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for FakeAgent {
    async fn invoke(
        &self,
        prompt: &str,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push(AgentCall {
            prompt: prompt.to_string(),
            context: context.clone(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::InvalidResponse("unscripted call".into())))
    }
}

/// One post as seen by the fake publisher.
#[derive(Debug, Clone)]
pub struct Post {
    pub text: String,
    pub options: PublishOptions,
    pub published_at: tokio::time::Instant,
}

/// Publisher recording posts; can be told to answer 429 first.
#[derive(Default)]
pub struct FakePublisher {
    rate_limited: Mutex<u32>,
    attempts: Mutex<u32>,
    posts: Mutex<Vec<Post>>,
    refusals: Mutex<Vec<tokio::time::Instant>>,
}

impl FakePublisher {
    /// Answer the next `n` publish calls with a rate-limit error.
    pub fn rate_limit_next(&self, n: u32) {
        *self.rate_limited.lock().unwrap() = n;
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    /// When each rate-limit error was returned.
    pub fn refusals(&self) -> Vec<tokio::time::Instant> {
        self.refusals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, text: &str, options: PublishOptions) -> Result<String, PublishError> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut limited = self.rate_limited.lock().unwrap();
            if *limited > 0 {
                *limited -= 1;
                self.refusals.lock().unwrap().push(tokio::time::Instant::now());
                return Err(PublishError::RateLimited { retry_after: None });
            }
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push(Post {
            text: text.to_string(),
            options,
            published_at: tokio::time::Instant::now(),
        });
        Ok(format!("0xreply{}", posts.len()))
    }
}

// ============================================================================
// TestApp
// ============================================================================

/// Full router wired to fakes, with inline reply dispatch.
pub struct TestApp {
    pub router: Router,
    pub config: Arc<Config>,
    pub agent: Arc<FakeAgent>,
    pub publisher: Arc<FakePublisher>,
    pub dispatcher: Arc<dyn ReplyDispatcher>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let agent = Arc::new(FakeAgent::default());
        let publisher = Arc::new(FakePublisher::default());

        let processor = ReplyProcessor::new(ChannelPublishers {
            farcaster: publisher.clone(),
        });
        let dispatcher: Arc<dyn ReplyDispatcher> = Arc::new(InlineDispatcher::new(
            processor,
            config.replies.rate_limit,
            config.replies.cool_down,
        ));
        let gateway = MentionGateway::new(
            GatewaySettings::from_config(&config),
            agent.clone(),
            dispatcher.clone(),
            AuditLog::new(Arc::new(LogAuditSink)),
            None,
        );

        let state = AppState::new(config.clone(), gateway, dispatcher.clone());
        Self {
            router: create_router(state),
            config: Arc::new(config),
            agent,
            publisher,
            dispatcher,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// POST a raw body to `/webhooks/neynar`, signed when the config has a secret.
    pub async fn post_webhook(&self, body: &str) -> Response<Body> {
        let mut request = Self::request(Method::POST, "/webhooks/neynar")
            .header("content-type", "application/json");
        if let Some(secret) = &self.config.webhook_secret {
            request = request.header("x-signature", sign_payload(secret, body.as_bytes()));
        }
        self.oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Wait until the publisher has recorded `n` posts.
    pub async fn wait_for_posts(&self, n: usize) -> Vec<Post> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let posts = self.publisher.posts();
            if posts.len() >= n {
                return posts;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} posts, got {}",
                posts.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Webhook body for a cast with the given text.
pub fn mention_body(text: &str) -> String {
    serde_json::json!({
        "created_at": 1_700_000_000,
        "type": "cast.created",
        "data": {
            "object": "cast",
            "hash": "0xcast",
            "text": text,
            "author": {
                "fid": 42,
                "username": "alice",
                "custody_address": "0xcustody",
                "verified_addresses": {"eth_addresses": ["0xalice"]}
            },
            "embeds": [{"url": "https://img.test/a.png"}]
        }
    })
    .to_string()
}

/// Collect a response body and parse it as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

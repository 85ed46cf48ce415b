#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use daznode_api::{
    create_app_router,
    services::{InMemoryNodeStore, InMemoryOtpStore, InMemoryProfileStore, MailerError, OtpMailer},
    state::{AppState, Backends},
};
use parking_lot::Mutex;
use serde_json::Value;
use shared::Config;
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Captures every code handed to the transport.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl OtpMailer for RecordingMailer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_code(&self, email: &str, code: &str, _expires_in_minutes: i64) -> Result<(), MailerError> {
        self.sent.lock().push((email.to_string(), code.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub config: Config,
    pub codes: Arc<InMemoryOtpStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub nodes: Arc<InMemoryNodeStore>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::in_memory(JWT_SECRET))
    }

    pub fn with_config(config: Config) -> Self {
        let codes = Arc::new(InMemoryOtpStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let nodes = Arc::new(InMemoryNodeStore::new());
        let mailer = Arc::new(RecordingMailer::default());

        let mut backends = Backends::in_memory(mailer.clone());
        backends.otp_store = codes.clone();
        backends.profiles = profiles.clone();
        backends.nodes = nodes.clone();

        let state = AppState::with_backends(config.clone(), backends).expect("app state");

        Self {
            router: create_app_router(Arc::new(state)),
            config,
            codes,
            profiles,
            nodes,
            mailer,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("router is infallible")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        read_json(self.send(request).await).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::get(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        read_json(self.send(builder.body(Body::empty()).unwrap()).await).await
    }

    /// Full send + verify round trip, returning the verify response body.
    pub async fn login(&self, email: &str) -> Value {
        let (status, _) = self
            .post_json("/api/otp/send-code", serde_json::json!({ "email": email }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let code = self.mailer.last_code_for(email).expect("code was mailed");
        let (status, body) = self
            .post_json(
                "/api/otp/verify-code",
                serde_json::json!({ "email": email, "code": code }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "verify failed: {}", body);
        body
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

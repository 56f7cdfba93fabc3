use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use homequeue::config::Config;
use homequeue::control::{ControlAction, ControlError, ControlExecutor, ControlResult};
use homequeue::db::MemoryStore;
use homequeue::events::EventHub;
use homequeue::handlers::HandlerRegistry;
use homequeue::queue::QueueService;
use homequeue::state::{AppState, SharedState};

/// Control executor that answers by entity id prefix:
/// `invalid.` is rejected for good, `busy.` is rejected but retryable.
#[derive(Default)]
pub struct FakeHome {
    pub calls: Mutex<Vec<ControlAction>>,
}

impl FakeHome {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ControlExecutor for FakeHome {
    async fn execute_action(&self, action: ControlAction) -> Result<ControlResult, ControlError> {
        self.calls.lock().unwrap().push(action.clone());
        if action.entity_id.starts_with("invalid.") {
            return Ok(ControlResult::rejected("INVALID_TARGET", "no such entity"));
        }
        if action.entity_id.starts_with("busy.") {
            return Ok(ControlResult::rejected("DEVICE_BUSY", "try again"));
        }
        Ok(ControlResult::ok(Some(json!("on"))))
    }
}

/// A running test server backed by the in-memory store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub service: Arc<QueueService>,
    pub home: Arc<FakeHome>,
    pub token: Option<String>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> (Value, StatusCode) {
        let resp = self
            .authed(builder)
            .send()
            .await
            .expect("request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        self.send(self.client.get(self.url(path))).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        self.send(self.client.put(self.url(path)).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> (Value, StatusCode) {
        self.send(self.client.delete(self.url(path))).await
    }

    /// Enqueue an action and return its JSON, asserting it was accepted.
    pub async fn enqueue(&self, body: Value) -> Value {
        let (action, status) = self.post("/api/v1/queue/actions", &body).await;
        assert_eq!(status, StatusCode::CREATED, "enqueue failed: {action}");
        action
    }

    pub async fn turn_on(&self, entity_id: &str) -> Value {
        self.enqueue(json!({
            "action_type": "entity_state_change",
            "payload": { "entity_id": entity_id, "state": "on" }
        }))
        .await
    }
}

fn test_config(admin_token: Option<String>) -> Config {
    Config {
        database_url: None,
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        admin_token,
        max_body_size: 1024 * 1024,
        worker_count: Some(2),
        poll_interval: Some(Duration::from_millis(20)),
        cleanup_interval: Duration::from_secs(600),
        shutdown_timeout: Duration::from_secs(5),
        control: None,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_token(None).await
}

/// The worker pool is not started; tests drive processing through the API.
pub async fn spawn_app_with_token(admin_token: Option<&str>) -> TestApp {
    let config = test_config(admin_token.map(str::to_string));
    let home = Arc::new(FakeHome::default());

    let service = Arc::new(QueueService::new(
        Arc::new(MemoryStore::new()),
        HandlerRegistry::with_builtins(home.clone()),
        Arc::new(EventHub::new()),
        config.runtime_settings(),
    ));
    let overrides = service
        .update_settings(config.setting_overrides())
        .await
        .expect("failed to pin settings");
    assert!(overrides.errors.is_empty(), "rejected overrides: {:?}", overrides.errors);

    let state: SharedState = Arc::new(AppState {
        service: service.clone(),
        config,
    });
    let app = homequeue::build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        client: Client::new(),
        service,
        home,
        token: admin_token.map(str::to_string),
    }
}

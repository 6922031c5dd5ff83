#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use formrelay::actions::payload::{
    EmailPayload, NotifyEmailPayload, NotifyLetterPayload, TicketPayload, WebhookPayload,
};
use formrelay::actions::{ActionError, ActionTable, DeliveryBackend, DeliveryReceipt};
use formrelay::auth::signature;
use formrelay::config::{Config, HelpdeskConfig};
use formrelay::models::{DeliveryTask, Sender, Submission};
use formrelay::state::SharedState;
use formrelay::{crypto, db};

pub const ENCRYPTION_KEY: &str = "test-encryption-key-32-chars-ok!";

/// Delivery backend that records every attempt. Scripted errors are
/// returned first, then every send succeeds.
pub struct Recorder<P> {
    sent: Mutex<Vec<P>>,
    script: Mutex<VecDeque<ActionError>>,
}

impl<P: Clone> Recorder<P> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn fail_next(&self, error: ActionError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn attempts(&self) -> Vec<P> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl<P> DeliveryBackend<P> for Recorder<P>
where
    P: Clone + Send + Sync,
{
    async fn send(&self, payload: &P) -> Result<DeliveryReceipt, ActionError> {
        self.sent.lock().unwrap().push(payload.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => Ok(DeliveryReceipt::new("recorded")),
        }
    }
}

pub struct Backends {
    pub email: Arc<Recorder<EmailPayload>>,
    pub helpdesk: Arc<Recorder<TicketPayload>>,
    pub notify_email: Arc<Recorder<NotifyEmailPayload>>,
    pub notify_letter: Arc<Recorder<NotifyLetterPayload>>,
    pub webhook: Arc<Recorder<WebhookPayload>>,
}

impl Backends {
    fn new() -> Self {
        Self {
            email: Recorder::new(),
            helpdesk: Recorder::new(),
            notify_email: Recorder::new(),
            notify_letter: Recorder::new(),
            webhook: Recorder::new(),
        }
    }

    fn table(&self) -> ActionTable {
        ActionTable::new(
            self.email.clone(),
            self.helpdesk.clone(),
            self.notify_email.clone(),
            self.notify_letter.clone(),
            self.webhook.clone(),
        )
    }
}

/// A running test server instance with a dedicated test database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: PgPool,
    pub client: Client,
    pub db_name: String,
    pub state: SharedState,
    pub backends: Backends,
    pub client_id: Uuid,
    pub access_key: String,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn signature(&self, method: &str, path: &str, body: &[u8]) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        signature::sign(
            self.client_id,
            &self.access_key,
            method,
            path,
            body,
            Utc::now().timestamp(),
            &nonce,
        )
    }

    /// Send a signed request, return (body, status).
    pub async fn signed(&self, method: Method, path: &str, body: Option<&Value>) -> (Value, StatusCode) {
        let bytes = body
            .map(|b| serde_json::to_vec(b).unwrap())
            .unwrap_or_default();
        let signature = self.signature(method.as_str(), path, &bytes);

        let resp = self
            .client
            .request(method, self.url(path))
            .header("x-signature", signature)
            .header("content-type", "application/json")
            .body(bytes)
            .send()
            .await
            .expect("signed request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn submit(&self, body: &Value) -> (Value, StatusCode) {
        self.signed(Method::POST, "/submission", Some(body)).await
    }

    pub async fn submit_bulk(&self, body: &Value) -> (Value, StatusCode) {
        self.signed(Method::POST, "/v2/bulk-notify-email", Some(body)).await
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        sqlx::query_as::<_, Submission>("SELECT * FROM submissions ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    pub async fn submission(&self, id: Uuid) -> Submission {
        db::submissions::find_by_id(&self.pool, id).await.unwrap().unwrap()
    }

    pub async fn tasks(&self) -> Vec<DeliveryTask> {
        sqlx::query_as::<_, DeliveryTask>("SELECT * FROM delivery_tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    pub async fn sender(&self, email: &str) -> Option<Sender> {
        db::senders::find_by_email(&self.pool, email).await.unwrap()
    }

    /// Drain the queue, returning how many tasks were processed.
    pub async fn run_worker(&self) -> usize {
        let mut processed = 0;
        while formrelay::worker::process_next(&self.state).await.unwrap() {
            processed += 1;
        }
        processed
    }

    /// Make every retrying task due now.
    pub async fn fast_forward_retries(&self) {
        sqlx::query("UPDATE delivery_tasks SET next_retry_at = now() WHERE status = 'retrying'")
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

pub fn test_config(database_url: String) -> Config {
    Config {
        database_url,
        encryption_key: ENCRYPTION_KEY.to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        max_body_size: 1_048_576,
        log_level: "warn".to_string(),
        worker_count: 1,
        rate_limit: None,
        task_max_attempts: 5,
        delivery_timeout: Duration::from_secs(5),
        sweep_interval: Duration::from_secs(900),
        sweep_window: chrono::Duration::hours(72),
        signature_max_skew_secs: 60,
        smtp: None,
        helpdesk: HelpdeskConfig::default(),
        notify: None,
    }
}

/// Spawn a test app with a fresh temporary database.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    // Create a unique test database
    let db_name = format!("formrelay_test_{}", Uuid::now_v7().to_string().replace('-', ""));

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    // Connect to test DB and run migrations
    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    let mut config = test_config(test_url);
    configure(&mut config);

    let access_key = crypto::generate_access_key();
    let sealed = crypto::encrypt(&access_key, ENCRYPTION_KEY).unwrap();
    let api_client = db::clients::create(&pool, "test-client", &sealed)
        .await
        .expect("Failed to create API client");

    let backends = Backends::new();
    let (app, state) = formrelay::build_app_with_actions(pool.clone(), config, backends.table());

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    // Spawn server in background
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp {
        addr,
        pool,
        client,
        db_name,
        state,
        backends,
        client_id: api_client.id,
        access_key,
    }
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}

/// Drop stale test databases (useful after test crashes).
pub async fn cleanup_stale_test_dbs() {
    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    if let Ok(admin_pool) = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
    {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT datname FROM pg_database WHERE datname LIKE 'formrelay_test_%'",
        )
        .fetch_all(&admin_pool)
        .await
        .unwrap_or_default();

        for db_name in rows {
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
                .execute(&admin_pool)
                .await;
        }
        admin_pool.close().await;
    }
}

/// Drop the test database after tests complete.
pub async fn cleanup(app: TestApp) {
    let db_name = app.db_name.clone();
    app.pool.close().await;

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use grasp_backend::auth::jwt::{SessionService, TokenVerifier};
use grasp_backend::auth::roles::RoleCache;
use grasp_backend::config::AppConfig;
use grasp_backend::db::{self, PgPool};
use grasp_backend::models::{NewSample, NewUser};
use grasp_backend::routes;
use grasp_backend::state::AppState;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
const TEST_SECRET: &str = "test-secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            session_secret: TEST_SECRET.to_string(),
            session_cookie_secure: false,
            session_token_expiry_minutes: 60,
            user_cache_ttl_secs: 3600,
            mcm_url: "http://localhost:0".to_string(),
            mcm_dev_url: "http://localhost:0".to_string(),
            mcm_cookie: None,
            xsdb_url: "http://localhost:0".to_string(),
            oidc: None,
        };

        let pool = db::init_pool(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let sessions = SessionService::new(TEST_SECRET, config.session_token_expiry_minutes);
        let verifier = TokenVerifier::hs256(TEST_SECRET);
        let roles = RoleCache::new(Duration::from_secs(config.user_cache_ttl_secs));
        let state = AppState::new(pool.clone(), config, sessions, verifier, None, roles);
        let router = routes::create_router(state.clone());

        Ok(Self { state, router })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    /// Insert a user row and return a bearer token for it. The token is a
    /// locally issued HS256 one, the same kind the server accepts when no
    /// identity provider is configured.
    pub async fn user_token(&self, username: &str, fullname: &str, role: &str) -> Result<String> {
        let user = NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            fullname: fullname.to_string(),
            role: role.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(grasp_backend::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(())
        })
        .await?;
        self.state.sessions.issue_local_token(username, fullname)
    }

    /// A token for a username without a user row, treated as anonymous.
    #[allow(dead_code)]
    pub fn anonymous_token(&self, username: &str) -> Result<String> {
        self.state.sessions.issue_local_token(username, username)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.request(Method::PUT, path, Some(body), token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::DELETE, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.request(Method::DELETE, path, Some(body), token).await
    }

    /// POST a text file as one field of a multipart form.
    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        path: &str,
        field: &str,
        filename: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend(b"Content-Type: text/plain\r\n\r\n");
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn insert_samples(&self, rows: Vec<NewSample>) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(grasp_backend::schema::samples::table)
                .values(&rows)
                .execute(conn)
                .context("failed to insert samples")?;
            Ok(())
        })
        .await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

/// A sample row with the given identifiers and neutral values everywhere
/// else. Tests tweak the fields they care about before inserting.
#[allow(dead_code)]
pub fn new_sample(campaign: &str, dataset: &str, root: &str) -> NewSample {
    NewSample {
        id: Uuid::new_v4(),
        campaign: campaign.to_string(),
        chained_request: String::new(),
        dataset: dataset.to_string(),
        root: root.to_string(),
        root_priority: 110000,
        root_total_events: 1000,
        root_done_events: 0,
        root_status: "submitted".to_string(),
        root_output: String::new(),
        root_processing_string: String::new(),
        miniaod: String::new(),
        miniaod_priority: 0,
        miniaod_total_events: 0,
        miniaod_done_events: 0,
        miniaod_status: String::new(),
        miniaod_output: String::new(),
        miniaod_processing_string: String::new(),
        nanoaod: String::new(),
        nanoaod_priority: 0,
        nanoaod_total_events: 0,
        nanoaod_done_events: 0,
        nanoaod_status: String::new(),
        nanoaod_output: String::new(),
        nanoaod_processing_string: String::new(),
        tags: Vec::new(),
        ref_tags: Vec::new(),
        pwgs: Vec::new(),
        ref_pwgs: Vec::new(),
        updated: 0,
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Read a body and unwrap the `{response, success, message}` envelope,
/// returning the `response` value.
pub async fn envelope_response(body: Body) -> Result<Value> {
    let bytes = body_to_vec(body).await?;
    let parsed: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("not JSON: {}", String::from_utf8_lossy(&bytes)))?;
    parsed
        .get("response")
        .cloned()
        .ok_or_else(|| anyhow!("no response field in {parsed}"))
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE action_history, future_campaign_entries, future_campaigns, samples, tags, campaigns, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

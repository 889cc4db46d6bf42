use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Barrier;
use tower::ServiceExt;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::db::{Keys, MemoryStore, StoreError, Swap, TtlStore};
use crate::models::user::{Role, User};
use crate::services::jwt_service::{JwtService, SignerSettings};
use crate::AppState;

static INIT: Once = Once::new();

pub const PRIMARY_PRIVATE_KEY: &[u8] = include_bytes!("keys/primary_private.pem");
pub const PRIMARY_PUBLIC_KEY: &[u8] = include_bytes!("keys/primary_public.pem");
pub const SECONDARY_PRIVATE_KEY: &[u8] = include_bytes!("keys/secondary_private.pem");
pub const SECONDARY_PUBLIC_KEY: &[u8] = include_bytes!("keys/secondary_public.pem");

pub const TEST_ISSUER: &str = "gallery-test";
pub const REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
pub const TEST_PASSWORD: &str = "password123";
const TEST_BCRYPT_COST: u32 = 4;

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_max_level(Level::ERROR)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

pub fn signer_settings() -> SignerSettings {
    SignerSettings {
        issuer: TEST_ISSUER.to_string(),
        access_ttl: Duration::from_secs(15 * 60),
        refresh_ttl: REFRESH_TTL,
        leeway: Duration::ZERO,
    }
}

pub fn test_jwt() -> JwtService {
    JwtService::new(signer_settings(), PRIMARY_PRIVATE_KEY, PRIMARY_PUBLIC_KEY)
        .expect("test keys are valid")
}

pub fn test_keys() -> Keys {
    Keys::new("test")
}

/// Store whose every call fails, like Redis being down.
pub struct FailingStore;

#[async_trait]
impl TtlStore for FailingStore {
    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(down())
    }
    async fn compare_and_swap(&self, _: &str, _: &str, _: &str) -> Result<Swap, StoreError> {
        Err(down())
    }
    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(down())
    }
    async fn exists(&self, _: &str) -> Result<bool, StoreError> {
        Err(down())
    }
    async fn delete(&self, _: &[String]) -> Result<(), StoreError> {
        Err(down())
    }
    async fn set_add(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(down())
    }
    async fn set_remove(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(down())
    }
    async fn set_members(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(down())
    }
}

fn down() -> StoreError {
    StoreError::Unavailable("connection refused: redis://store.internal:6379".to_string())
}

/// `MemoryStore` with switchable faults and a pause point after reads.
#[derive(Default)]
pub struct HookedStore {
    inner: MemoryStore,
    fail_set_add: AtomicBool,
    fail_compare_and_swap: AtomicBool,
    paused_gets: Mutex<Option<(Arc<Barrier>, usize)>>,
}

impl HookedStore {
    pub fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ..Default::default()
        })
    }

    pub fn fail_set_add(&self) {
        self.fail_set_add.store(true, Ordering::SeqCst);
    }

    pub fn fail_compare_and_swap(&self) {
        self.fail_compare_and_swap.store(true, Ordering::SeqCst);
    }

    /// The next `n` reads each wait after reading until all `n` have read.
    pub fn pause_next_gets(&self, n: usize) {
        *self.paused_gets.lock().unwrap() = Some((Arc::new(Barrier::new(n)), n));
    }

    fn take_pause(&self) -> Option<Arc<Barrier>> {
        let mut paused = self.paused_gets.lock().unwrap();
        let (barrier, left) = paused.as_mut()?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        Some(barrier.clone())
    }
}

#[async_trait]
impl TtlStore for HookedStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set_ex(key, value, ttl).await
    }
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<Swap, StoreError> {
        if self.fail_compare_and_swap.load(Ordering::SeqCst) {
            return Err(down());
        }
        self.inner.compare_and_swap(key, expected, value).await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.inner.get(key).await?;
        let pause = self.take_pause();
        if let Some(barrier) = pause {
            barrier.wait().await;
        }
        Ok(value)
    }
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        self.inner.delete(keys).await
    }
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_set_add.load(Ordering::SeqCst) {
            return Err(down());
        }
        self.inner.set_add(key, member, ttl).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.set_remove(key, member).await
    }
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.inner.set_members(key).await
    }
}

pub async fn setup_test_db() -> SqlitePool {
    init_tracing();
    info!("Setting up test database");

    // One connection: every new in-memory connection would be a fresh database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    info!("Test database setup complete");
    pool
}

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub store: MemoryStore,
    pub jwt: JwtService,
}

pub async fn create_test_app() -> TestApp {
    let pool = setup_test_db().await;
    let store = MemoryStore::new();
    let app = app_with_store(pool.clone(), Arc::new(store.clone()));

    TestApp {
        app,
        pool,
        store,
        jwt: test_jwt(),
    }
}

pub fn app_with_store(pool: SqlitePool, store: Arc<dyn TtlStore>) -> Router {
    let state = AppState::new(
        pool,
        store,
        test_keys(),
        test_jwt(),
        REFRESH_TTL,
        TEST_BCRYPT_COST,
    );
    crate::create_router(state)
}

pub async fn create_admin(pool: &SqlitePool, email: &str) -> User {
    let hash = bcrypt::hash(TEST_PASSWORD, TEST_BCRYPT_COST).expect("hash");
    User::create(pool, email, &hash, Role::Admin)
        .await
        .expect("Failed to create admin")
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    );
    headers
}

pub async fn test_request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: Option<HeaderMap>,
) -> (StatusCode, String, HeaderMap) {
    info!(method = %method, uri = %uri, "Making test request");

    let body = if let Some(json) = body {
        Body::from(serde_json::to_string(&json).unwrap())
    } else {
        Body::empty()
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    // Add custom headers if provided
    if let Some(custom_headers) = headers {
        for (key, value) in custom_headers.iter() {
            request = request.header(key, value);
        }
    }

    let request = request.body(body).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();

    info!(status = %status, body = %body, "Test response received");
    (status, body, headers)
}

pub async fn register(app: &Router, email: &str) {
    let (status, body, _) = test_request(
        app.clone(),
        "POST",
        "/register",
        Some(json!({ "email": email, "password": TEST_PASSWORD })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
}

/// Log in and return the parsed token pair.
pub async fn login(app: &Router, email: &str, headers: Option<HeaderMap>) -> Value {
    let (status, body, _) = test_request(
        app.clone(),
        "POST",
        "/login",
        Some(json!({ "email": email, "password": TEST_PASSWORD })),
        headers,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    serde_json::from_str(&body).unwrap()
}

pub async fn refresh(app: &Router, refresh_token: &str) -> (StatusCode, Value) {
    let (status, body, _) = test_request(
        app.clone(),
        "POST",
        "/refresh",
        Some(json!({ "refresh_token": refresh_token })),
        None,
    )
    .await;
    (status, serde_json::from_str(&body).unwrap_or(Value::Null))
}

use std::{
    collections::HashMap,
    convert::Infallible,
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::ApiError;
use crate::supabase::SupabaseClient;

/// Resolved request identity, inserted as an extension by the middleware.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct AuthState {
    supabase: Option<SupabaseClient>,
    static_keys: Arc<HashMap<String, Uuid>>,
    sessions: Arc<Mutex<HashMap<String, CachedSession>>>,
    session_ttl: Duration,
    limiter: Arc<TokenBuckets>,
}

#[derive(Clone)]
struct CachedSession {
    context: AuthContext,
    resolved_at: Instant,
}

impl AuthState {
    pub fn from_env(supabase: Option<SupabaseClient>) -> Self {
        let static_keys = Arc::new(load_static_keys());
        if supabase.is_none() && static_keys.is_empty() {
            warn!(
                target = "teed.auth",
                "no Supabase client and no TEED_API_KEYS; every request will be rejected"
            );
        }
        Self {
            supabase,
            static_keys,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            session_ttl: session_ttl_from_env(),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    /// Static keys first (offline dev), then the hosted auth endpoint with a
    /// short-lived cache so a burst of requests costs one lookup.
    async fn resolve(&self, token: &str) -> Option<AuthContext> {
        if let Some(user_id) = self.static_keys.get(token) {
            return Some(AuthContext {
                user_id: *user_id,
                email: None,
            });
        }

        {
            let sessions = self.sessions.lock().await;
            if let Some(cached) = sessions.get(token)
                && cached.resolved_at.elapsed() < self.session_ttl
            {
                return Some(cached.context.clone());
            }
        }

        let client = self.supabase.as_ref()?;
        let user = match client.fetch_auth_user(token).await {
            Ok(user) => user?,
            Err(err) => {
                warn!(target = "teed.auth", error = %err, "session lookup failed");
                return None;
            }
        };

        let context = AuthContext {
            user_id: user.id,
            email: user.email,
        };
        info!(
            target = "teed.auth",
            user_id = %context.user_id,
            email = context.email.as_deref().unwrap_or(""),
            "session resolved"
        );
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.resolved_at.elapsed() < self.session_ttl);
        sessions.insert(
            token.to_string(),
            CachedSession {
                context: context.clone(),
                resolved_at: Instant::now(),
            },
        );
        Some(context)
    }

    async fn consume(&self, user_id: Uuid) -> Result<RatePermit, RateExceeded> {
        self.limiter.consume(&user_id.to_string()).await
    }
}

pub async fn require_session(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(token) = extract_bearer(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_token",
            "Provide Authorization: Bearer <token> or X-Teed-Key",
        ));
    };

    let Some(context) = state.resolve(&token).await else {
        return Ok(unauthorized_response(
            "invalid_token",
            "Session not recognized or expired",
        ));
    };

    match state.consume(context.user_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response = too_many_requests("rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

/// Admin routes sit behind a separate shared secret; there is no admin role
/// in the session model.
#[derive(Clone)]
pub struct AdminState {
    key: Option<String>,
}

impl AdminState {
    pub fn from_env() -> Self {
        let key = env::var("ADMIN_KEY").ok().filter(|key| !key.is_empty());
        if key.is_none() {
            warn!(
                target = "teed.auth",
                "ADMIN_KEY is not set; admin routes are disabled"
            );
        }
        Self { key }
    }
}

pub async fn require_admin(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(expected) = &state.key else {
        return Ok(unauthorized_response("admin_disabled", "ADMIN_KEY is not configured"));
    };
    let presented = request
        .headers()
        .get("X-Admin-Key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if presented != expected {
        return Ok(unauthorized_response("invalid_admin_key", "Key not recognized"));
    }
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Teed-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

/// `TEED_API_KEYS` holds `user-uuid:secret` pairs for local development,
/// where no hosted identity provider is reachable.
fn load_static_keys() -> HashMap<String, Uuid> {
    let Ok(raw) = env::var("TEED_API_KEYS") else {
        return HashMap::new();
    };
    let mut entries = HashMap::new();
    for token in raw.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let user = parts.next().and_then(|part| Uuid::parse_str(part.trim()).ok());
        let secret = parts.next().map(str::trim).filter(|part| !part.is_empty());
        match (user, secret) {
            (Some(user_id), Some(secret)) => {
                entries.insert(secret.to_string(), user_id);
            }
            _ => warn!(
                target = "teed.auth",
                "ignored malformed TEED_API_KEYS entry: {trimmed}"
            ),
        }
    }
    if !entries.is_empty() {
        info!(
            target = "teed.auth",
            key_count = entries.len(),
            "loaded static API keys from env"
        );
    }
    entries
}

fn session_ttl_from_env() -> Duration {
    let secs = env::var("SESSION_CACHE_TTL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60);
    Duration::from_secs(secs)
}

#[derive(Clone)]
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            let retry_after = (deficit / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone)]
pub struct RatePermit {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.tokens.max(0.0).floor() as u64;
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from_str(&(self.capacity as u64).to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert(
            "X-RateLimit-Remaining",
            HeaderValue::from_str(&remaining.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert(
            "X-RateLimit-Reset",
            HeaderValue::from_str(&reset.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(0.0) as u64;
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&retry.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("1")),
        );
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from_str(&(self.capacity as u64).to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert(
            "X-RateLimit-Reset",
            HeaderValue::from_str(&reset.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
    }
}

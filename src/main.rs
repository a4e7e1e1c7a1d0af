mod admin;
mod classify;
mod extract;
mod http;
mod llm;
mod mcp;
mod metrics;
mod models;
mod pipeline;
mod save;
mod security;
mod store;
mod stream;
mod supabase;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use extract::ExtractorSet;
use models::{
    AnalyzeRequest, ApiError, Bag, BagDetail, BagItem, BagPatch, CreateBagRequest, ExtractedItem,
    IngestRequest, ItemPatch, NewBag, ReorderRequest, SaveReport, SaveRequest, ServiceError,
    ServiceErrorKind,
};
use pipeline::{IngestConfig, IngestPipeline};
use security::{AdminState, AuthContext, AuthState, require_admin, require_session};
use store::BagStore;
use supabase::SupabaseClient;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "teed.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let supabase =
        SupabaseClient::from_env().ok_or_else(|| eyre::eyre!("SUPABASE_URL and a service key are required"))?;
    let store: Arc<dyn BagStore> = Arc::new(supabase.clone());
    let auth_state = AuthState::from_env(Some(supabase));
    let admin_state = AdminState::from_env();

    let outbound = http::build_client();
    let llm = Arc::new(llm::LlmClient::new(llm::LlmConfig::from_env()));
    let ingest_config = IngestConfig::from_env();
    let extractors = ExtractorSet::standard(llm.clone(), outbound.clone());
    let ingest = IngestPipeline::new(extractors.clone(), ingest_config);

    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .wrap_err("docs/openapi.yaml is not valid YAML")?;
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| eyre::eyre!("prometheus recorder: {err}"))?;

    let state = AppState {
        store: store.clone(),
        ingest,
        llm,
        http: outbound,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/bags", post(create_bag).get(list_bags))
        .route(
            "/bags/{id}",
            get(get_bag).patch(update_bag).delete(delete_bag),
        )
        .route("/bags/{id}/ingest", post(ingest_batch))
        .route("/bags/{id}/items/save", post(save_items))
        .route("/bags/{id}/items/reorder", post(reorder_items))
        .route("/items/{id}", patch(update_item).delete(delete_item))
        .route("/items/analyze", post(analyze_photos))
        .route("/ingest/preview", post(preview_batch))
        .route_layer(middleware::from_fn_with_state(auth_state, require_session));

    let admin = admin::routes().route_layer(middleware::from_fn_with_state(
        admin_state,
        require_admin,
    ));

    let mcp_handler = mcp::TeedMcp::new(store, extractors, ingest_config.token_timeout);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/shared/{handle}", get(shared_bag))
        .merge(protected)
        .nest("/admin", admin)
        .nest_service("/mcp", mcp_handler.http_service())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "teed.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BagStore>,
    ingest: IngestPipeline,
    llm: Arc<llm::LlmClient>,
    http: reqwest::Client,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "teed-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Teed API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(2 * 1024 * 1024)
}

// -------- Bags --------

/// Create a bag.
///
/// - Method: `POST`
/// - Path: `/bags`
/// - Auth: session bearer token
async fn create_bag(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<CreateBagRequest>,
) -> Result<Json<Bag>, AppError> {
    crate::metrics::inc_requests("/bags");
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(ServiceError::invalid_input("bags", "title is empty").into());
    }

    let handle = match payload.handle.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(requested) => {
            let slug = slugify(requested);
            if slug.is_empty() {
                return Err(ServiceError::invalid_input("bags", "handle has no usable characters").into());
            }
            if state
                .store
                .bag_by_handle(&slug)
                .await
                .map_err(ServiceError::from)?
                .is_some()
            {
                return Err(ServiceError::invalid_input("bags", "handle is taken").into());
            }
            slug
        }
        None => generate_handle(state.store.as_ref(), &title)
            .await
            .map_err(ServiceError::from)?,
    };

    let bag = state
        .store
        .create_bag(NewBag {
            owner_id: context.user_id,
            handle,
            title,
            description: payload.description,
            is_public: payload.is_public,
        })
        .await
        .map_err(ServiceError::from)?;
    info!(target = "teed.api", bag_id = %bag.id, owner_id = %bag.owner_id, "bag created");
    Ok(Json(bag))
}

async fn list_bags(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<Bag>>, AppError> {
    let bags = state
        .store
        .bags_for_owner(context.user_id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(bags))
}

async fn get_bag(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<BagDetail>, AppError> {
    let bag = owned_bag(&state, id, &context).await?;
    let items = state
        .store
        .items_for_bag(bag.id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(BagDetail { bag, items }))
}

async fn update_bag(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(patch): Json<BagPatch>,
) -> Result<Json<Bag>, AppError> {
    let bag = owned_bag(&state, id, &context).await?;
    let updated = state
        .store
        .update_bag(bag.id, patch)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(updated))
}

async fn delete_bag(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bag = owned_bag(&state, id, &context).await?;
    state
        .store
        .delete_bag(bag.id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(json!({ "deleted": bag.id })))
}

/// Public view of a shared bag, by handle. No session required; only bags
/// marked public resolve here.
async fn shared_bag(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<BagDetail>, AppError> {
    let bag = state
        .store
        .bag_by_handle(&handle)
        .await
        .map_err(ServiceError::from)?
        .filter(|bag| bag.is_public)
        .ok_or_else(|| ServiceError::not_found("shared", "no public bag with that handle"))?;
    let items = state
        .store
        .items_for_bag(bag.id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(BagDetail { bag, items }))
}

// -------- Ingestion --------

/// Bulk ingestion: classify the pasted batch, then stream one NDJSON event
/// per stage/token, ending with a summary. Durable writes happen only in
/// the save endpoint.
///
/// - Method: `POST`
/// - Path: `/bags/{id}/ingest`
/// - Response: `application/x-ndjson`
async fn ingest_batch(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<IngestRequest>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/bags/ingest");
    let bag = owned_bag(&state, id, &context).await?;
    let tokens = state.ingest.classify_batch(&payload.input)?;
    info!(
        target = "teed.ingest",
        bag_id = %bag.id,
        owner_id = %context.user_id,
        tokens = tokens.len(),
        "ingestion batch accepted"
    );

    let (tx, rx) = pipeline::event_channel();
    let runner = state.ingest.clone();
    tokio::spawn(async move { runner.run(tokens, tx).await });
    Ok(stream::ndjson_response(rx))
}

/// Classification preview: the same splitting and classification as the
/// ingest endpoint, without any extraction calls.
async fn preview_batch(
    State(state): State<AppState>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tokens = state.ingest.classify_batch(&payload.input)?;
    Ok(Json(json!({ "count": tokens.len(), "tokens": tokens })))
}

/// The explicit save step for client-confirmed items.
///
/// - Method: `POST`
/// - Path: `/bags/{id}/items/save`
/// - Response: per-item results; HTTP 200 even when some items failed
async fn save_items(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveRequest>,
) -> Result<Json<SaveReport>, AppError> {
    crate::metrics::inc_requests("/bags/items/save");
    let bag = owned_bag(&state, id, &context).await?;
    if payload.items.is_empty() {
        return Err(ServiceError::invalid_input("save", "no items to save").into());
    }
    let report = save::save_items(state.store.as_ref(), &state.http, &bag, payload.items)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(report))
}

async fn reorder_items(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<Vec<BagItem>>, AppError> {
    let bag = owned_bag(&state, id, &context).await?;
    save::reorder_items(state.store.as_ref(), bag.id, &payload.item_ids)
        .await
        .map_err(ServiceError::from)?;
    let items = state
        .store
        .items_for_bag(bag.id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(items))
}

// -------- Items --------

async fn update_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<BagItem>, AppError> {
    if patch.is_empty() {
        return Err(ServiceError::invalid_input("items", "patch is empty").into());
    }
    let item = owned_item(&state, id, &context).await?;
    let updated = state
        .store
        .update_item(item.id, patch)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(updated))
}

async fn delete_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = owned_item(&state, id, &context).await?;
    state
        .store
        .delete_item(item.id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(json!({ "deleted": item.id })))
}

/// Image-to-item extraction: photo URLs in, one candidate item out. The
/// result is not persisted; the client feeds it back through the save step.
async fn analyze_photos(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<ExtractedItem>, AppError> {
    crate::metrics::inc_requests("/items/analyze");
    let photos = payload.photos.into_vec();
    if photos.is_empty() {
        return Err(ServiceError::invalid_input("analyze", "no photos provided").into());
    }
    if photos.len() > 6 {
        return Err(ServiceError::invalid_input("analyze", "at most 6 photos per item").into());
    }
    if photos.iter().any(|url| !url.starts_with("http")) {
        return Err(ServiceError::invalid_input("analyze", "photos must be http(s) URLs").into());
    }

    info!(
        target = "teed.api",
        owner_id = %context.user_id,
        photos = photos.len(),
        "photo analysis invoked"
    );
    let item = extract::infer::item_from_photos(&state.llm, &photos, payload.hint.as_deref())
        .await
        .map_err(|err| ServiceError::internal("analyze", err.to_string()))?;
    Ok(Json(item))
}

// -------- Helpers --------

/// Loads the bag and checks ownership. A bag that exists but belongs to
/// someone else reads as not-found, so handles stay unguessable.
async fn owned_bag(state: &AppState, id: Uuid, context: &AuthContext) -> Result<Bag, AppError> {
    let bag = state
        .store
        .bag_by_id(id)
        .await
        .map_err(ServiceError::from)?
        .filter(|bag| bag.owner_id == context.user_id)
        .ok_or_else(|| ServiceError::not_found("bags", "bag not found"))?;
    Ok(bag)
}

async fn owned_item(state: &AppState, id: Uuid, context: &AuthContext) -> Result<BagItem, AppError> {
    let item = state
        .store
        .item_by_id(id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::not_found("items", "item not found"))?;
    owned_bag(state, item.bag_id, context).await?;
    Ok(item)
}

fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(40);
    slug
}

/// Slug from the title plus a short random suffix, retried on the unlikely
/// collision.
async fn generate_handle(
    store: &dyn BagStore,
    title: &str,
) -> Result<String, store::StoreError> {
    let base = {
        let slug = slugify(title);
        if slug.is_empty() { "bag".to_string() } else { slug }
    };
    loop {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let candidate = format!("{base}-{}", suffix.to_ascii_lowercase());
        if store.bag_by_handle(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Service(ServiceError),
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Service(err) => {
                let status = match err.kind() {
                    ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ServiceErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.op().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[test]
    fn slugs_are_lowercase_dashed_and_bounded() {
        assert_eq!(slugify("Sunday Carry Setup"), "sunday-carry-setup");
        assert_eq!(slugify("  WITB // 2026!  "), "witb-2026");
        assert_eq!(slugify("🏌️"), "");
        assert_eq!(slugify("a".repeat(60).as_str()).len(), 40);
    }

    #[tokio::test]
    async fn generated_handles_keep_the_title_slug() {
        let store = MemoryStore::new();
        let handle = generate_handle(&store, "Sunday Carry Setup").await.unwrap();
        assert!(handle.starts_with("sunday-carry-setup-"));
        assert_eq!(handle.len(), "sunday-carry-setup-".len() + 6);

        let fallback = generate_handle(&store, "🏌️").await.unwrap();
        assert!(fallback.starts_with("bag-"));
    }

    #[test]
    fn service_errors_map_to_http_statuses() {
        let cases = [
            (ServiceError::invalid_input("op", "x"), StatusCode::BAD_REQUEST),
            (ServiceError::unauthorized("op", "x"), StatusCode::UNAUTHORIZED),
            (ServiceError::not_found("op", "x"), StatusCode::NOT_FOUND),
            (
                ServiceError::internal("op", "x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}

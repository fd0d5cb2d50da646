use axum::{
    extract::{Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use whodat::{
    config::Config,
    errors::LookupError,
    index::IndexStats,
    metrics::{self, PROTOCOL_RDAP, PROTOCOL_WHOIS},
    query, RegistryClient,
};

const RDAP_PREFIX: &str = "/rdap";

#[derive(Clone)]
pub struct AppState {
    client: RegistryClient,
    config: Arc<Config>,
}

/// `?ref=<anything>` turns on referral chasing; `?flat=<anything>` flattens `data`.
#[derive(Debug, Default, Deserialize)]
struct LookupParams {
    #[serde(default, rename = "ref")]
    referral: Option<String>,
    #[serde(default)]
    flat: Option<String>,
}

impl LookupParams {
    fn follow_referral(&self) -> bool {
        self.referral.as_deref().is_some_and(|v| !v.is_empty())
    }

    fn flatten(&self) -> bool {
        self.flat.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn respond<T: Serialize>(data: T, flat: bool) -> Result<Response, LookupError> {
    let data = serde_json::to_value(data).map_err(|e| LookupError::Parse(e.to_string()))?;
    let data = if flat { Value::Object(flatten(&data)) } else { data };

    let body = Envelope {
        success: true,
        data: Some(data),
        error: None,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn failure(status: StatusCode, message: &str) -> Response {
    let body: Envelope<Value> = Envelope {
        success: false,
        data: None,
        error: Some(message.to_string()),
    };
    (status, Json(body)).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    index: IndexStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("whodat=info,tower_http=debug")),
        )
        .init();

    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    let client = RegistryClient::new_with_config(config.clone()).await?;
    info!("Resolution index ready: {:?}", client.stats());

    metrics::init_metrics();

    let app_state = AppState {
        client,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/reload", post(reload))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/rdap/", get(rdap_lookup))
        .route("/rdap/*query", get(rdap_lookup))
        .fallback(whois_lookup)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!("whodat listening on {}", addr);
    info!("WHOIS: http://{}/<query>  RDAP: http://{}/rdap/<query>", addr, addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl-C handler, shutdown only by kill: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, gracefully shutting down...");
}

/// The lookup target is everything after `prefix` in the path.
fn query_from_path<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix).unwrap_or(path).trim_matches('/').trim()
}

async fn whois_lookup(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(params): Query<LookupParams>,
) -> Result<Response, LookupError> {
    if method != Method::GET {
        return Ok(failure(StatusCode::METHOD_NOT_ALLOWED, "please use a GET request"));
    }

    let target = query_from_path(uri.path(), "");
    if target.is_empty() {
        return Ok(failure(StatusCode::BAD_REQUEST, "query not specified"));
    }

    let start_time = Instant::now();
    metrics::increment_requests(PROTOCOL_WHOIS, query::classify(target));

    let result = state.client.whois(target, params.follow_referral()).await;
    metrics::record_duration(PROTOCOL_WHOIS, start_time.elapsed());

    let lookup = match result {
        Ok(lookup) => lookup,
        Err(e) => {
            track_error(PROTOCOL_WHOIS, target, &e);
            return Err(e);
        }
    };

    if lookup.parsed.domain.is_none() && query::classify(target) == query::QueryKind::Domain {
        return Ok(failure(StatusCode::NOT_FOUND, "WHOIS data empty"));
    }

    respond(lookup, params.flatten())
}

async fn rdap_lookup(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<LookupParams>,
) -> Result<Response, LookupError> {
    let target = query_from_path(uri.path(), RDAP_PREFIX);
    if target.is_empty() {
        return Ok(failure(StatusCode::BAD_REQUEST, "query not specified"));
    }

    let start_time = Instant::now();
    metrics::increment_requests(PROTOCOL_RDAP, query::classify(target));

    let result = state.client.rdap(target, params.follow_referral()).await;
    metrics::record_duration(PROTOCOL_RDAP, start_time.elapsed());

    match result {
        Ok(info) => respond(info, params.flatten()),
        Err(e) => {
            track_error(PROTOCOL_RDAP, target, &e);
            Err(e)
        }
    }
}

fn track_error(protocol: &'static str, target: &str, error: &LookupError) {
    metrics::increment_errors(protocol, error);
    if error.is_not_found() {
        info!("{} lookup for {} found nothing: {}", protocol, target, error);
    } else {
        warn!("{} lookup for {} failed: {}", protocol, target, error);
    }
}

async fn reload(State(state): State<AppState>) -> Result<Response, LookupError> {
    let stats = state.client.reload().await?;
    respond(stats, false)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.config.start_time.elapsed().as_secs(),
        index: state.client.stats(),
    })
}

/// Collapse nested objects and arrays into dotted keys, dropping nulls and empty values.
fn flatten(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, String::new(), value);
    out
}

fn flatten_into(out: &mut Map<String, Value>, key: String, value: &Value) {
    let join = |child: &str| {
        if key.is_empty() {
            child.to_string()
        } else {
            format!("{}.{}", key, child)
        }
    };

    match value {
        Value::Null => {}
        Value::String(s) if s.is_empty() => {}
        Value::Object(map) => {
            for (child, v) in map {
                flatten_into(out, join(child), v);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(out, join(&i.to_string()), v);
            }
        }
        scalar => {
            out.insert(key, scalar.clone());
        }
    }
}

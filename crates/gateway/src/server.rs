use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, Path, Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::json,
    switchboard_agents::{AgentBridge, HttpAgentBridge},
    switchboard_channels::{
        AccessRuleStore, ConnectionStatus, Error as ChannelError, HandlerRegistry, InstanceStore,
        Result as ChannelResult, TraceQuery, TraceStatus, TraceStore,
    },
    switchboard_config::SwitchboardConfig,
    switchboard_discord::DiscordHandler,
    switchboard_slack::SlackHandler,
    switchboard_whatsapp::WhatsAppHandler,
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{MetricsRecorderConfig, init_metrics};

use crate::{
    access_store::SqliteAccessRuleStore,
    dispatch::{DispatchError, DispatchOutcome, Dispatcher},
    instance_store::SqliteInstanceStore,
    retention::spawn_retention,
    state::GatewayState,
    trace_store::SqliteTraceStore,
};

/// Upper bound on a webhook body. Bridges may inline base64 media.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

type AppState = Arc<GatewayState>;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(default_webhook_handler))
        .route("/webhook/{instance}", post(instance_webhook_handler))
        .route("/traces", get(list_traces_handler))
        .route("/traces/{trace_id}", get(get_trace_handler))
        .route("/instances/{name}/status", get(instance_status_handler))
        .route("/instances/{name}/connect", post(instance_connect_handler))
        .route(
            "/instances/{name}/disconnect",
            post(instance_disconnect_handler),
        )
        .route("/instances/{name}/restart", post(instance_restart_handler));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(prometheus_metrics_handler));

    #[cfg(feature = "metrics")]
    let router = router.layer(axum::middleware::from_fn(
        crate::metrics_middleware::http_metrics_middleware,
    ));

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Channel handlers compiled into the gateway.
pub fn default_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(Arc::new(WhatsAppHandler::new()))
        .with(Arc::new(DiscordHandler::new()))
        .with(Arc::new(SlackHandler::new()))
}

/// Open the database, wire the dispatcher and serve until Ctrl-C.
pub async fn start_gateway(config: SwitchboardConfig) -> anyhow::Result<()> {
    let pool = sqlx::SqlitePool::connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    crate::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let instances: Arc<dyn InstanceStore> = Arc::new(SqliteInstanceStore::new(pool.clone()));
    let rules: Arc<dyn AccessRuleStore> = Arc::new(SqliteAccessRuleStore::new(pool.clone()));
    let traces: Arc<dyn TraceStore> = Arc::new(SqliteTraceStore::new(pool));

    let mut bridge = HttpAgentBridge::new()
        .with_max_timeout(Duration::from_secs(config.agent.max_timeout_secs));
    if let Some(dir) = &config.agent.temp_dir {
        bridge = bridge.with_temp_dir(dir.clone());
    }
    let agent: Arc<dyn AgentBridge> = Arc::new(bridge);

    let handlers = default_handlers();
    info!(channels = ?handlers.list(), "channel handlers registered");

    let dispatcher = Dispatcher::new(
        instances,
        rules,
        handlers,
        agent,
        Arc::clone(&traces),
    )
    .with_fallback_text(config.dispatch.fallback_text.clone())
    .with_stale_after(Duration::from_secs(config.traces.stale_after_secs));
    let state = GatewayState::new(Arc::new(dispatcher));

    #[cfg(feature = "metrics")]
    let state = if config.metrics.enabled {
        let handle = init_metrics(MetricsRecorderConfig {
            enabled: true,
            global_labels: Vec::new(),
        })?;
        state.with_metrics(handle)
    } else {
        state
    };

    let cancel = CancellationToken::new();
    let retention = spawn_retention(traces, &config.traces, cancel.clone());

    let app = build_gateway_app(Arc::new(state));
    let listener = tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    info!(addr = %listener.local_addr()?, "switchboard gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Some(handle) = retention
        && let Err(e) = handle.await
    {
        warn!(error = %e, "retention task ended abnormally");
    }
    info!("switchboard gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Errors ───────────────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::TenantNotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::InvalidEvent { .. } => StatusCode::BAD_REQUEST,
            DispatchError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            DispatchError::HandlerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

/// Lifecycle errors come from the store or a remote bridge; anything that is
/// not a lookup or configuration problem is reported as a bad gateway.
impl From<ChannelError> for ApiError {
    fn from(e: ChannelError) -> Self {
        let status = match &e {
            ChannelError::InstanceNotFound { .. } | ChannelError::NoDefaultInstance => {
                StatusCode::NOT_FOUND
            },
            ChannelError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            ChannelError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ChannelError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ChannelError::External { .. } | ChannelError::SerdeJson(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
    }))
}

async fn default_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run_webhook(state, None, headers, body).await
}

async fn instance_webhook_handler(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run_webhook(state, Some(instance), headers, body).await
}

/// Dispatch on a separate task so the message is still traced if the client
/// goes away mid-request. Dropping the request future cancels the token,
/// which abandons the reply after the agent call.
async fn run_webhook(
    state: AppState,
    instance: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let dispatcher = Arc::clone(&state.dispatcher);
    let task = tokio::spawn(async move {
        dispatcher
            .handle_webhook(instance.as_deref(), &headers, &body, &cancel)
            .await
    });
    let joined = task.await;
    guard.disarm();

    let outcome = joined.map_err(|e| {
        warn!(error = %e, "dispatch task panicked");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "dispatch task failed")
    })??;
    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Handshake { response } => Json(response).into_response(),
        DispatchOutcome::Duplicate { trace_id, status } => Json(json!({
            "status": "duplicate",
            "trace_id": trace_id,
            "trace_status": status,
        }))
        .into_response(),
        DispatchOutcome::Ignored { reason } => Json(json!({
            "status": "ignored",
            "trace_id": null,
            "reason": reason,
        }))
        .into_response(),
        other => Json(json!({
            "status": other.as_str(),
            "trace_id": other.trace_id(),
        }))
        .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TraceListParams {
    instance: Option<String>,
    status: Option<String>,
    limit: Option<u32>,
}

async fn list_traces_handler(
    State(state): State<AppState>,
    Query(params): Query<TraceListParams>,
) -> Result<Response, ApiError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TraceStatus>)
        .transpose()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let query = TraceQuery {
        instance_name: params.instance.filter(|s| !s.is_empty()),
        status,
        limit: params.limit.unwrap_or(TraceQuery::DEFAULT_LIMIT),
    };
    let traces = state
        .traces()
        .list(&query)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "traces": traces })).into_response())
}

async fn get_trace_handler(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.traces().get(&trace_id).await {
        Ok(Some(trace)) => Ok(Json(trace).into_response()),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("unknown trace: {trace_id}"),
        )),
        Err(e) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.to_string(),
        )),
    }
}

fn status_response(result: ChannelResult<ConnectionStatus>) -> Result<Response, ApiError> {
    Ok(Json(result?).into_response())
}

async fn instance_status_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    status_response(state.lifecycle.status(&name).await)
}

async fn instance_connect_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    status_response(state.lifecycle.connect(&name).await)
}

async fn instance_disconnect_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    status_response(state.lifecycle.disconnect(&name).await)
}

async fn instance_restart_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    status_response(state.lifecycle.restart(&name).await)
}

#[cfg(feature = "prometheus")]
async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics are disabled").into_response(),
    }
}

//! HTTP 层
//!
//! 所有业务端点挂在 /api/v1 下；另有 /healthz、/metrics、/openapi.json

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{
        header::{
            CACHE_CONTROL, CONTENT_SECURITY_POLICY, PRAGMA, REFERRER_POLICY,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderValue, Method,
    },
    middleware::{from_fn, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{OpenApi, ToSchema};

use crate::{
    app_state::AppState,
    error::{AppError, RelayError},
};

pub mod funding_api;
pub mod middleware;
pub mod relay_api;
pub mod response;
pub mod wallet_api;

use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ballot Relay API",
        version = "1.0.0",
        description = "Gasless meta-transaction relay for poll voting and reward claims"
    ),
    paths(
        wallet_api::get_wallet_address,
        wallet_api::deploy_wallet,
        relay_api::get_nonce,
        relay_api::submit_vote,
        relay_api::submit_claim,
        relay_api::get_relay_result,
        relay_api::get_reward_entry,
        funding_api::plan_poll_funding,
        funding_api::execute_poll_funding,
        healthz,
    ),
    components(schemas(
        crate::error::ErrorBodyDoc,
        crate::error::ErrorClass,
        wallet_api::WalletAddressResponse,
        wallet_api::DeployWalletResponse,
        relay_api::NonceResponse,
        relay_api::RelayLookupResponse,
        funding_api::FundingPlanRequest,
        funding_api::FundingExecuteRequest,
        crate::domain::SignedEnvelope,
        crate::domain::meta_tx::TypedDataPayload,
        crate::domain::meta_tx::WireDomain,
        crate::domain::meta_tx::TypedField,
        crate::domain::RelayResult,
        crate::domain::RelayStatus,
        crate::domain::BlockRef,
        crate::domain::RewardLedgerEntry,
        crate::service::settlement_orchestrator::FundingPlan,
        crate::service::settlement_orchestrator::FundingCosts,
        crate::service::settlement_orchestrator::FundingStepKind,
        crate::service::settlement_orchestrator::PlannedCall,
        crate::service::settlement_orchestrator::FundingExecution,
        HealthResponse,
    )),
    tags(
        (name = "wallets", description = "Smart wallet derivation and deployment"),
        (name = "relay", description = "Signed vote and reward-claim relaying"),
        (name = "funding", description = "Poll funding plans"),
    )
)]
pub struct ApiDoc;

/// 领域错误 → HTTP 错误，并附上当前请求的 trace_id
pub(crate) fn relay_error(trace: &TraceId) -> impl Fn(RelayError) -> AppError + '_ {
    move |err| {
        tracing::warn!(
            trace_id = %trace.0,
            error_class = err.error_class().as_str(),
            error = %err,
            "request rejected"
        );
        AppError::from(err).with_trace_id(trace.0.clone())
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    let api = Router::new()
        .route(
            "/api/v1/wallets/:owner/address",
            get(wallet_api::get_wallet_address),
        )
        .route(
            "/api/v1/wallets/:owner/deploy",
            post(wallet_api::deploy_wallet),
        )
        .route(
            "/api/v1/nonces/:contract/:signer",
            get(relay_api::get_nonce),
        )
        .route("/api/v1/polls/:poll/votes", post(relay_api::submit_vote))
        .route("/api/v1/polls/:poll/claims", post(relay_api::submit_claim))
        .route("/api/v1/relays/:tx_hash", get(relay_api::get_relay_result))
        .route(
            "/api/v1/rewards/:poll/:voter",
            get(relay_api::get_reward_entry),
        )
        .route(
            "/api/v1/funding/plan",
            post(funding_api::plan_poll_funding),
        )
        .route(
            "/api/v1/funding/execute",
            post(funding_api::execute_poll_funding),
        )
        .route("/healthz", get(healthz))
        .route_layer(from_fn(track_metrics));

    Router::new()
        .merge(api)
        .route(
            "/metrics",
            get(|| async { crate::metrics::render_prometheus().into_response() }),
        )
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(from_fn(trace_id_middleware))
                .layer(from_fn(add_security_headers)),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(TRACE_ID_HEADER),
        ])
        .expose_headers([axum::http::HeaderName::from_static(TRACE_ID_HEADER)]);

    // 未配置白名单时放开（开发环境）
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    resp
}

// 按路由模板计数，避免地址参数撑爆标签
async fn track_metrics(matched: Option<MatchedPath>, req: Request, next: Next) -> Response {
    let endpoint = matched
        .as_ref()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let resp = next.run(req).await;
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        crate::metrics::count_err(&endpoint);
    } else {
        crate::metrics::count_ok(&endpoint);
    }
    resp
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub chain_id: u64,
    pub relayer: String,
    pub factory_configured: bool,
}

/// GET /healthz
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        chain_id: state.config.chain.chain_id,
        relayer: format!("{:?}", state.relay.relayer_address()),
        factory_configured: state.config.chain.wallet_factory_address.is_some(),
    })
}

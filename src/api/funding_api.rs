//! 投票注资 API
//!
//! 先规划（只读：成本与余额），所有者签名计划中的 `authorization` 后按 planId 执行

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::{
        middleware::TraceId,
        relay_error,
        response::{success_response, ApiResult},
    },
    app_state::AppState,
    domain::TokenAmount,
    service::settlement_orchestrator::{FundingExecution, FundingPlan},
    utils::AddressValidator,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundingPlanRequest {
    pub owner: String,
    pub poll_factory: String,
    /// 十进制字符串，例如 "2.00"
    pub reward_per_voter: String,
    pub vote_limit: u64,
    #[serde(default)]
    pub fund_amount: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundingExecuteRequest {
    pub plan_id: Uuid,
    /// 所有者对 `FundPoll` 类型化数据的签名（0x 开头 65 字节）
    pub signature: String,
}

/// POST /api/v1/funding/plan
#[utoipa::path(
    post,
    path = "/api/v1/funding/plan",
    request_body = FundingPlanRequest,
    responses(
        (status = 200, description = "Funding plan with cost breakdown", body = FundingPlan),
        (status = 400, description = "Invalid amount or address", body = crate::error::ErrorBodyDoc),
        (status = 422, description = "Insufficient balance", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn plan_poll_funding(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Json(req): Json<FundingPlanRequest>,
) -> ApiResult<FundingPlan> {
    let owner = AddressValidator::parse("owner", &req.owner).map_err(relay_error(&trace))?;
    let poll_factory =
        AddressValidator::parse("pollFactory", &req.poll_factory).map_err(relay_error(&trace))?;
    let reward_per_voter =
        TokenAmount::parse_decimal(&req.reward_per_voter).map_err(relay_error(&trace))?;
    let fund_amount = req
        .fund_amount
        .as_deref()
        .map(TokenAmount::parse_decimal)
        .transpose()
        .map_err(relay_error(&trace))?;

    let plan = state
        .relay
        .plan_poll_funding(owner, poll_factory, reward_per_voter, req.vote_limit, fund_amount)
        .await
        .map_err(relay_error(&trace))?;
    success_response(plan)
}

/// POST /api/v1/funding/execute
///
/// 授权未确认时不会发出注资交易（`funding` 为空）
#[utoipa::path(
    post,
    path = "/api/v1/funding/execute",
    request_body = FundingExecuteRequest,
    responses(
        (status = 200, description = "Relay outcomes of approval and funding", body = FundingExecution),
        (status = 400, description = "Unknown, expired or already executed plan", body = crate::error::ErrorBodyDoc),
        (status = 401, description = "Authorization not signed by the wallet owner", body = crate::error::ErrorBodyDoc),
        (status = 422, description = "Insufficient balance", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn execute_poll_funding(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Json(req): Json<FundingExecuteRequest>,
) -> ApiResult<FundingExecution> {
    let execution = state
        .relay
        .execute_poll_funding(req.plan_id, &req.signature)
        .await
        .map_err(relay_error(&trace))?;
    success_response(execution)
}

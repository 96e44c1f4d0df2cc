//! 元交易中继 API
//!
//! 签名投票 / 领奖都以 `{ typedData, signature }` 信封提交，nonce 在 message 中

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use ethers::types::H256;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    api::{
        middleware::TraceId,
        relay_error,
        response::{success_response, ApiResult},
    },
    app_state::AppState,
    domain::{ActionType, RelayResult, RewardLedgerEntry, SignedEnvelope},
    error::{AppError, RelayError},
    service::relay_journal::JournalEntry,
    utils::AddressValidator,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NonceResponse {
    pub verifying_contract: String,
    pub signer: String,
    /// 下一次签名应使用的 nonce
    pub next_nonce: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayLookupResponse {
    pub label: String,
    pub result: RelayResult,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<JournalEntry> for RelayLookupResponse {
    fn from(e: JournalEntry) -> Self {
        Self {
            label: e.label,
            result: e.result,
            submitted_at: e.submitted_at,
            updated_at: e.updated_at,
        }
    }
}

fn parse_tx_hash(raw: &str) -> Result<H256, RelayError> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .map_err(|_| RelayError::InvalidRequest("tx_hash is not hex".into()))?;
    if bytes.len() != 32 {
        return Err(RelayError::InvalidRequest("tx_hash must be 32 bytes".into()));
    }
    Ok(H256::from_slice(&bytes))
}

/// GET /api/v1/nonces/:contract/:signer
#[utoipa::path(
    get,
    path = "/api/v1/nonces/{contract}/{signer}",
    params(
        ("contract" = String, Path, description = "Verifying (poll) contract"),
        ("signer" = String, Path, description = "Signer EOA")
    ),
    responses(
        (status = 200, description = "Next expected nonce", body = NonceResponse),
        (status = 400, description = "Invalid address", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn get_nonce(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path((contract, signer)): Path<(String, String)>,
) -> ApiResult<NonceResponse> {
    let contract = AddressValidator::parse("contract", &contract).map_err(relay_error(&trace))?;
    let signer = AddressValidator::parse("signer", &signer).map_err(relay_error(&trace))?;
    let next_nonce = state
        .relay
        .get_nonce(contract, signer)
        .await
        .map_err(relay_error(&trace))?;

    success_response(NonceResponse {
        verifying_contract: format!("{:?}", contract),
        signer: format!("{:?}", signer),
        next_nonce,
    })
}

/// POST /api/v1/polls/:poll/votes
///
/// 链上 revert 作为结果返回（HTTP 200，status = Reverted）
#[utoipa::path(
    post,
    path = "/api/v1/polls/{poll}/votes",
    params(("poll" = String, Path, description = "Poll contract")),
    request_body = SignedEnvelope,
    responses(
        (status = 200, description = "Relay outcome", body = RelayResult),
        (status = 401, description = "Invalid signature", body = crate::error::ErrorBodyDoc),
        (status = 409, description = "Nonce mismatch", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn submit_vote(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path(poll): Path<String>,
    Json(envelope): Json<SignedEnvelope>,
) -> ApiResult<RelayResult> {
    submit(state, trace, poll, ActionType::Vote, envelope).await
}

/// POST /api/v1/polls/:poll/claims
#[utoipa::path(
    post,
    path = "/api/v1/polls/{poll}/claims",
    params(("poll" = String, Path, description = "Poll contract")),
    request_body = SignedEnvelope,
    responses(
        (status = 200, description = "Relay outcome", body = RelayResult),
        (status = 401, description = "Invalid signature", body = crate::error::ErrorBodyDoc),
        (status = 409, description = "Nonce mismatch", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn submit_claim(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path(poll): Path<String>,
    Json(envelope): Json<SignedEnvelope>,
) -> ApiResult<RelayResult> {
    submit(state, trace, poll, ActionType::ClaimReward, envelope).await
}

async fn submit(
    state: Arc<AppState>,
    trace: TraceId,
    poll: String,
    action: ActionType,
    envelope: SignedEnvelope,
) -> ApiResult<RelayResult> {
    let poll = AddressValidator::parse("poll", &poll).map_err(relay_error(&trace))?;
    let result = state
        .relay
        .submit_signed(poll, action, envelope)
        .await
        .map_err(relay_error(&trace))?;
    success_response(result)
}

/// GET /api/v1/relays/:tx_hash
#[utoipa::path(
    get,
    path = "/api/v1/relays/{tx_hash}",
    params(("tx_hash" = String, Path, description = "Transaction hash")),
    responses(
        (status = 200, description = "Journaled relay outcome", body = RelayLookupResponse),
        (status = 404, description = "Unknown transaction", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn get_relay_result(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path(tx_hash): Path<String>,
) -> ApiResult<RelayLookupResponse> {
    let hash = parse_tx_hash(&tx_hash).map_err(relay_error(&trace))?;
    let entry = state.relay.relay_result(&hash).ok_or_else(|| {
        AppError::not_found(format!("no relay recorded for {}", tx_hash)).with_trace_id(trace.0.clone())
    })?;
    success_response(RelayLookupResponse::from(entry))
}

/// GET /api/v1/rewards/:poll/:voter
#[utoipa::path(
    get,
    path = "/api/v1/rewards/{poll}/{voter}",
    params(
        ("poll" = String, Path, description = "Poll contract"),
        ("voter" = String, Path, description = "Voter EOA")
    ),
    responses(
        (status = 200, description = "Reward ledger entry", body = RewardLedgerEntry),
        (status = 404, description = "No claim recorded", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn get_reward_entry(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path((poll, voter)): Path<(String, String)>,
) -> ApiResult<RewardLedgerEntry> {
    let poll = AddressValidator::parse("poll", &poll).map_err(relay_error(&trace))?;
    let voter = AddressValidator::parse("voter", &voter).map_err(relay_error(&trace))?;
    let entry = state.relay.reward_entry(poll, voter).ok_or_else(|| {
        AppError::not_found("no reward claim recorded").with_trace_id(trace.0.clone())
    })?;
    success_response(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tx_hash() {
        let h = parse_tx_hash(&format!("0x{}", "ab".repeat(32))).unwrap();
        assert_eq!(h, H256::repeat_byte(0xab));
        assert!(parse_tx_hash("0x1234").is_err());
        assert!(parse_tx_hash("nothex").is_err());
    }
}

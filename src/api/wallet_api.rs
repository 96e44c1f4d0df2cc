//! 智能钱包 API
//!
//! - GET  /api/v1/wallets/:owner/address  派生地址（附带当前部署状态）
//! - POST /api/v1/wallets/:owner/deploy   按需部署

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    api::{
        middleware::TraceId,
        response::{success_response, ApiResult},
        relay_error,
    },
    app_state::AppState,
    domain::SmartWallet,
    utils::AddressValidator,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 响应模型
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddressResponse {
    pub owner_address: String,
    pub wallet_address: String,
    pub salt: String,
    pub deployed: bool,
}

impl From<&SmartWallet> for WalletAddressResponse {
    fn from(w: &SmartWallet) -> Self {
        let mut salt = [0u8; 32];
        w.salt.to_big_endian(&mut salt);
        Self {
            owner_address: format!("{:?}", w.owner_address),
            wallet_address: format!("{:?}", w.wallet_address),
            salt: format!("0x{}", hex::encode(salt)),
            deployed: w.deployed,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployWalletResponse {
    pub wallet: WalletAddressResponse,
    /// 本次请求是否发出了部署交易
    pub newly_deployed: bool,
    pub tx_hash: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/v1/wallets/:owner/address
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{owner}/address",
    params(("owner" = String, Path, description = "Owner EOA address")),
    responses(
        (status = 200, description = "Derived wallet address", body = WalletAddressResponse),
        (status = 400, description = "Invalid address", body = crate::error::ErrorBodyDoc),
        (status = 503, description = "Factory not configured", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn get_wallet_address(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path(owner): Path<String>,
) -> ApiResult<WalletAddressResponse> {
    let owner = AddressValidator::parse("owner", &owner).map_err(relay_error(&trace))?;
    let wallet = state
        .relay
        .get_wallet_address(owner)
        .await
        .map_err(relay_error(&trace))?;
    success_response(WalletAddressResponse::from(&wallet))
}

/// POST /api/v1/wallets/:owner/deploy
///
/// 已部署时直接返回，不发交易
#[utoipa::path(
    post,
    path = "/api/v1/wallets/{owner}/deploy",
    params(("owner" = String, Path, description = "Owner EOA address")),
    responses(
        (status = 200, description = "Wallet deployed or already present", body = DeployWalletResponse),
        (status = 422, description = "Deployment reverted or unverifiable", body = crate::error::ErrorBodyDoc),
        (status = 504, description = "RPC timeout", body = crate::error::ErrorBodyDoc)
    )
)]
pub async fn deploy_wallet(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Path(owner): Path<String>,
) -> ApiResult<DeployWalletResponse> {
    let owner = AddressValidator::parse("owner", &owner).map_err(relay_error(&trace))?;
    let outcome = state
        .relay
        .deploy_if_needed(owner)
        .await
        .map_err(relay_error(&trace))?;

    success_response(DeployWalletResponse {
        wallet: WalletAddressResponse::from(&outcome.wallet),
        newly_deployed: outcome.newly_deployed,
        tx_hash: outcome.tx_hash.map(|h| format!("{:?}", h)),
    })
}

//! 奖励台账条目

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::Serialize;
use utoipa::ToSchema;

use super::amount::TokenAmount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RewardLedgerEntry {
    #[schema(value_type = String)]
    pub poll_address: Address,
    #[schema(value_type = String)]
    pub voter: Address,
    #[schema(value_type = String)]
    pub amount: TokenAmount,
    #[schema(value_type = String)]
    pub fee_amount: TokenAmount,
    pub settled: bool,
    #[schema(value_type = Option<String>)]
    pub tx_hash: Option<H256>,
    pub recorded_at: DateTime<Utc>,
}

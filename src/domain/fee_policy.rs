//! Gas 费用策略
//!
//! 每次分发都显式携带一个带版本号的 `FeePolicy`，结果里记录是哪个版本定的价

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Serialize;
use utoipa::ToSchema;

/// 策略来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum FeeSource {
    /// 刚从网络获取
    Live,
    /// 查询失败，沿用上一次成功的值
    LastKnown,
    /// 从未成功查询过，使用配置下限
    Floor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePolicy {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub gas_limit: U256,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
    pub source: FeeSource,
}

impl FeePolicy {
    /// 两个费用字段同时上浮 `percent`%（重试时使用）
    pub fn bumped(&self, percent: u32) -> Self {
        Self {
            max_fee_per_gas: apply_gas_bump(self.max_fee_per_gas, percent),
            max_priority_fee_per_gas: apply_gas_bump(self.max_priority_fee_per_gas, percent),
            ..self.clone()
        }
    }
}

/// 应用 Gas 价格增加百分比
pub fn apply_gas_bump(base: U256, bump_percent: u32) -> U256 {
    base.saturating_mul(U256::from(100u64 + bump_percent as u64)) / U256::from(100u64)
}

/// 平台代付的操作种类，用于确定 gasLimit 上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum OperationKind {
    Vote,
    ClaimReward,
    DeployWallet,
    TokenApproval,
    PollFunding,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Vote,
        OperationKind::ClaimReward,
        OperationKind::DeployWallet,
        OperationKind::TokenApproval,
        OperationKind::PollFunding,
    ];

    /// 各操作的 gas 上限（含智能钱包 execute 的转发开销）
    pub fn gas_ceiling(&self) -> u64 {
        match self {
            OperationKind::Vote => 180_000,
            OperationKind::ClaimReward => 160_000,
            OperationKind::DeployWallet => 450_000,
            OperationKind::TokenApproval => 120_000,
            OperationKind::PollFunding => 1_500_000,
        }
    }
}

/// 最昂贵的受支持操作所需的 gas 上限
pub fn max_gas_ceiling() -> u64 {
    OperationKind::ALL
        .iter()
        .map(|k| k.gas_ceiling())
        .max()
        .unwrap_or(0)
}

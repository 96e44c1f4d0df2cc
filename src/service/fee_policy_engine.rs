//! 费用策略引擎
//!
//! `refresh()` 从网络获取 EIP-1559 费用并按配置夹紧：
//! - priority fee ≥ 下限
//! - max fee ≥ 下限，且 ≥ priority fee，且 ≤ 上限
//! - gasLimit 固定为最昂贵操作的上限
//!
//! 查询失败不向调用方抛错：返回上一次成功的策略，从未成功过则返回下限策略

use std::{
    cmp::{max, min},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use ethers::types::U256;
use tokio::sync::RwLock;

use crate::{
    config::FeesConfig,
    domain::fee_policy::{max_gas_ceiling, FeePolicy, FeeSource},
    infrastructure::chain_client::{ChainClient, FeeEstimate},
};

pub struct FeePolicyEngine {
    client: Arc<dyn ChainClient>,
    config: FeesConfig,
    last_known: RwLock<Option<FeePolicy>>,
    version: AtomicU64,
}

impl FeePolicyEngine {
    pub fn new(client: Arc<dyn ChainClient>, config: FeesConfig) -> Self {
        Self {
            client,
            config,
            last_known: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    pub fn retry_bump_percent(&self) -> u32 {
        self.config.retry_bump_percent
    }

    fn gas_limit(&self) -> U256 {
        U256::from(self.config.gas_limit_override.unwrap_or_else(max_gas_ceiling))
    }

    fn clamp(&self, estimate: FeeEstimate) -> (U256, U256) {
        let cap = self.config.max_fee_cap();
        let priority = max(estimate.max_priority_fee_per_gas, self.config.min_priority_fee());
        let max_fee = max(estimate.max_fee_per_gas, self.config.min_max_fee());
        let max_fee = min(max(max_fee, priority), cap);
        // 上限压低了 max fee 时，priority 也不能超过它
        (max_fee, min(priority, max_fee))
    }

    /// 刷新费用策略（永不失败）
    pub async fn refresh(&self) -> FeePolicy {
        crate::metrics::inc_fee_refresh();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

        match self.client.estimate_fees().await {
            Ok(estimate) => {
                let (max_fee, priority) = self.clamp(estimate);
                let policy = FeePolicy {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority,
                    gas_limit: self.gas_limit(),
                    last_updated: Utc::now(),
                    version,
                    source: FeeSource::Live,
                };
                *self.last_known.write().await = Some(policy.clone());
                tracing::debug!(
                    version,
                    max_fee_per_gas = %policy.max_fee_per_gas,
                    max_priority_fee_per_gas = %policy.max_priority_fee_per_gas,
                    "fee policy refreshed"
                );
                policy
            }
            Err(e) => {
                crate::metrics::inc_fee_fallback();
                let last = self.last_known.read().await.clone();
                match last {
                    Some(prev) => {
                        tracing::warn!(error = %e, version, last_updated = %prev.last_updated, "fee query failed, using last-known policy");
                        FeePolicy {
                            version,
                            source: FeeSource::LastKnown,
                            ..prev
                        }
                    }
                    None => {
                        tracing::warn!(error = %e, version, "fee query failed, using floor policy");
                        self.floor_policy(version)
                    }
                }
            }
        }
    }

    fn floor_policy(&self, version: u64) -> FeePolicy {
        let priority = self.config.min_priority_fee();
        let max_fee = max(self.config.min_max_fee(), priority);
        FeePolicy {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
            gas_limit: self.gas_limit(),
            last_updated: Utc::now(),
            version,
            source: FeeSource::Floor,
        }
    }

    /// 最近一次成功获取的策略
    pub async fn last_known(&self) -> Option<FeePolicy> {
        self.last_known.read().await.clone()
    }
}

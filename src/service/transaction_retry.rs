// 交易提交重试
//
// 提供：
// - 显式的提交循环（每次尝试前刷新费用策略）
// - 每次重试按百分比上浮 Gas 价格
// - 发送前用 eth_call 预执行，revert 直接返回，不发送任何交易
// - 拿到交易哈希后绝不重发
// - 发送超时（交易可能已广播）不再重试，返回 Indeterminate

use std::{sync::Arc, time::Duration};

use ethers::types::{Address, H256};
use tokio::time::sleep;

use crate::{
    domain::FeePolicy,
    error::{NetworkError, RelayError},
    infrastructure::chain_client::{CallRequest, ChainClient, ChainError, OutgoingTransaction},
    service::fee_policy_engine::FeePolicyEngine,
};

/// 交易重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// Gas 价格增加百分比（每次重试）
    pub gas_price_bump_percent: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            gas_price_bump_percent: 10, // 每次重试增加 10% Gas
        }
    }
}

/// 成功拿到交易哈希
#[derive(Debug, Clone)]
pub struct Submission {
    pub tx_hash: H256,
    pub fee_policy: FeePolicy,
    pub attempts: u32,
}

/// 提交失败（尚未拿到交易哈希）
#[derive(Debug, Clone)]
pub enum SubmitError {
    /// 预执行或节点返回 revert，不会重试
    Reverted {
        data: Option<Vec<u8>>,
        message: String,
        attempts: u32,
        fee_policy: FeePolicy,
    },
    /// 网络错误（重试耗尽）或节点拒绝；确定没有交易被广播
    Failed {
        error: RelayError,
        attempts: u32,
        fee_policy: Option<FeePolicy>,
    },
    /// 发送阶段出错，交易是否已被广播无法确定
    Indeterminate {
        error: RelayError,
        attempts: u32,
        fee_policy: Option<FeePolicy>,
    },
}

/// 节点拒绝时对外的固定原因（节点原文只进日志）
pub const REJECTED_REASON: &str = "transaction rejected by node";

/// 广播结果未知时对外的固定原因
pub const INDETERMINATE_REASON: &str = "broadcast outcome unknown, re-read the nonce before retrying";

/// 一次尝试在哪个阶段失败
enum Stage {
    Simulate,
    Send,
}

/// 交易提交器
pub struct TransactionRetrier {
    client: Arc<dyn ChainClient>,
    fees: Arc<FeePolicyEngine>,
    config: RetryConfig,
}

impl TransactionRetrier {
    pub fn new(client: Arc<dyn ChainClient>, fees: Arc<FeePolicyEngine>, config: RetryConfig) -> Self {
        Self {
            client,
            fees,
            config,
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// 带重试的提交
    ///
    /// 每次尝试：刷新费用 → 按尝试次数上浮 → 预执行 → 发送
    pub async fn submit(&self, label: &str, to: Address, data: Vec<u8>) -> Result<Submission, SubmitError> {
        let relayer = self.client.relayer_address();
        let mut backoff = self.config.initial_backoff;
        let mut last_error: Option<RelayError> = None;
        let mut last_policy: Option<FeePolicy> = None;
        // 之前某次发送可能已经上链
        let mut broadcast_uncertain = false;

        for attempt in 1..=self.config.max_attempts {
            let gas_bump = (attempt - 1) * self.config.gas_price_bump_percent;
            let policy = self.fees.refresh().await.bumped(gas_bump);
            last_policy = Some(policy.clone());

            tracing::info!(
                label,
                attempt,
                max_attempts = self.config.max_attempts,
                gas_bump_percent = gas_bump,
                fee_version = policy.version,
                "Attempting transaction submission"
            );

            // 预执行
            let simulation = self
                .client
                .call(&CallRequest::new(to, data.clone()).from(relayer))
                .await;
            let (stage, failure) = match simulation {
                Ok(_) => {
                    let tx = OutgoingTransaction {
                        to,
                        data: data.clone(),
                        gas_limit: policy.gas_limit,
                        max_fee_per_gas: policy.max_fee_per_gas,
                        max_priority_fee_per_gas: policy.max_priority_fee_per_gas,
                    };
                    match self.client.send_transaction(&tx).await {
                        Ok(tx_hash) => {
                            tracing::info!(label, tx_hash = ?tx_hash, attempt, "Transaction submission successful");
                            return Ok(Submission {
                                tx_hash,
                                fee_policy: policy,
                                attempts: attempt,
                            });
                        }
                        Err(e) => (Stage::Send, e),
                    }
                }
                Err(e) => (Stage::Simulate, e),
            };

            match (stage, failure) {
                (_, ChainError::Reverted { data, message }) => {
                    if broadcast_uncertain {
                        // 可能是前一次发送已经上链导致的 revert
                        tracing::warn!(label, attempt, reason = %message, "revert after an uncertain broadcast");
                        return Err(Self::indeterminate(attempt, Some(policy)));
                    }
                    tracing::info!(label, attempt, reason = %message, "Transaction reverted before inclusion");
                    return Err(SubmitError::Reverted {
                        data,
                        message,
                        attempts: attempt,
                        fee_policy: policy,
                    });
                }
                (_, ChainError::Rejected(reason)) => {
                    tracing::error!(label, attempt, reason = %reason, "Transaction rejected by node");
                    if broadcast_uncertain {
                        return Err(Self::indeterminate(attempt, Some(policy)));
                    }
                    return Err(SubmitError::Failed {
                        error: NetworkError::SubmissionFailed {
                            reason: REJECTED_REASON.to_string(),
                        }
                        .into(),
                        attempts: attempt,
                        fee_policy: Some(policy),
                    });
                }
                (Stage::Send, ChainError::Timeout { operation }) => {
                    tracing::error!(label, attempt, operation = %operation, "send timed out, transaction may be in flight");
                    return Err(Self::indeterminate(attempt, Some(policy)));
                }
                (Stage::Simulate, ChainError::Timeout { operation }) => {
                    last_error = Some(RelayError::rpc_timeout(operation));
                }
                (stage, ChainError::Transport { operation, detail }) => {
                    tracing::debug!(label, operation = %operation, detail = %detail, "transport failure");
                    if matches!(stage, Stage::Send) {
                        broadcast_uncertain = true;
                    }
                    last_error = Some(
                        NetworkError::SubmissionFailed {
                            reason: format!("transport failure during {}", operation),
                        }
                        .into(),
                    );
                }
            }

            if attempt < self.config.max_attempts {
                tracing::warn!(
                    label,
                    attempt,
                    error = ?last_error,
                    next_retry_in_ms = backoff.as_millis() as u64,
                    "Transaction submission failed, will retry"
                );
                // 指数退避
                sleep(backoff).await;
                backoff = backoff.mul_f64(self.config.backoff_multiplier);
            }
        }

        // 所有重试都失败
        let error = last_error.unwrap_or_else(|| {
            NetworkError::SubmissionFailed {
                reason: "no attempts were made".into(),
            }
            .into()
        });
        tracing::error!(
            label,
            error = %error,
            broadcast_uncertain,
            "Transaction submission failed after all retries"
        );
        if broadcast_uncertain {
            return Err(Self::indeterminate(self.config.max_attempts, last_policy));
        }
        Err(SubmitError::Failed {
            error,
            attempts: self.config.max_attempts,
            fee_policy: last_policy,
        })
    }

    fn indeterminate(attempts: u32, fee_policy: Option<FeePolicy>) -> SubmitError {
        SubmitError::Indeterminate {
            error: NetworkError::SubmissionFailed {
                reason: INDETERMINATE_REASON.to_string(),
            }
            .into(),
            attempts,
            fee_policy,
        }
    }
}

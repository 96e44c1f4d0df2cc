//! 中继分发器
//!
//! 编码目标调用 → 平台签名者提交（带重试）→ 等待回执 → 结果分类
//!
//! 结果四选一：
//! - Confirmed
//! - Reverted：预执行或回执失败，解码为领域错误，不重试
//! - SubmissionFailed：上链前的网络错误，重试耗尽；或广播结果未知
//! - Pending：确认等待超时，后台继续跟进并写入日志
//!
//! 只有确定一笔都没广播时才归还 nonce

use std::{sync::Arc, time::Duration};

use ethers::{
    abi::AbiEncode,
    types::{Address, Bytes, U256},
};

use crate::{
    config::RelayConfig,
    contracts::{ClaimRewardBySigCall, VoteBySigCall},
    domain::{
        revert::revert_from_node, ActionPayload, BlockRef, MetaTransactionRequest, RelayResult,
    },
    error::ContractError,
    infrastructure::chain_client::{CallRequest, ChainClient, ChainError, ReceiptSummary},
    service::{
        meta_tx_verifier::VerifiedRequest,
        relay_journal::RelayJournal,
        transaction_retry::{SubmitError, Submission, TransactionRetrier},
    },
};

/// 投票合约上的 `voteBySig` / `claimRewardBySig` calldata
pub fn encode_relay_call(request: &MetaTransactionRequest) -> Vec<u8> {
    let signature = Bytes::from(request.signature.to_vec());
    let nonce = U256::from(request.nonce);
    match &request.payload {
        ActionPayload::Vote { option } => VoteBySigCall {
            voter: request.signer,
            option: *option,
            nonce,
            signature,
        }
        .encode(),
        ActionPayload::ClaimReward => ClaimRewardBySigCall {
            claimer: request.signer,
            nonce,
            signature,
        }
        .encode(),
    }
}

pub struct RelayDispatcher {
    client: Arc<dyn ChainClient>,
    retrier: Arc<TransactionRetrier>,
    journal: Arc<RelayJournal>,
    receipt_timeout: Duration,
    poll_interval: Duration,
    follow_up_timeout: Duration,
}

impl RelayDispatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        retrier: Arc<TransactionRetrier>,
        journal: Arc<RelayJournal>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            client,
            retrier,
            journal,
            receipt_timeout: config.receipt_timeout(),
            poll_interval: config.receipt_poll_interval(),
            follow_up_timeout: config.follow_up_timeout(),
        }
    }

    pub fn journal(&self) -> &Arc<RelayJournal> {
        &self.journal
    }

    /// 分发已验证的元交易
    ///
    /// 拿到交易哈希后立刻释放 nonce 租约；一笔都没发出时归还 nonce，
    /// 广播结果未知时保持已消费并让注册表按链上重新同步
    pub async fn relay(&self, verified: VerifiedRequest) -> RelayResult {
        let VerifiedRequest { request, lease } = verified;
        let label = request.action_type().primary_type();
        let target = request.verifying_contract();
        let data = encode_relay_call(&request);

        let submission = self.retrier.submit(label, target, data.clone()).await;
        let result = match submission {
            Ok(sub) => {
                drop(lease);
                self.await_outcome(label, target, data, sub).await
            }
            Err(e @ SubmitError::Indeterminate { .. }) => {
                lease.mark_indeterminate();
                failure_result(e)
            }
            Err(e) => {
                lease.rollback();
                failure_result(e)
            }
        };
        self.finish(label, result)
    }

    /// 平台自身的调用（部署、结算步骤），不涉及 nonce
    pub async fn dispatch_call(&self, label: &str, to: Address, data: Vec<u8>) -> RelayResult {
        let result = match self.retrier.submit(label, to, data.clone()).await {
            Ok(sub) => self.await_outcome(label, to, data, sub).await,
            Err(e) => failure_result(e),
        };
        self.finish(label, result)
    }

    fn finish(&self, label: &str, result: RelayResult) -> RelayResult {
        crate::metrics::record_relay_outcome(result.status, result.attempts);
        self.journal.record(label, &result);
        tracing::info!(
            label,
            status = ?result.status,
            tx_hash = ?result.tx_hash,
            error_class = ?result.error_class,
            attempts = result.attempts,
            "relay finished"
        );
        result
    }

    async fn await_outcome(&self, label: &str, to: Address, data: Vec<u8>, sub: Submission) -> RelayResult {
        let started = std::time::Instant::now();
        let waited = self
            .client
            .wait_for_receipt(sub.tx_hash, self.receipt_timeout, self.poll_interval)
            .await;

        match waited {
            Ok(Some(receipt)) => {
                crate::metrics::observe_confirmation_latency_ms(started.elapsed().as_millis());
                classify_receipt(
                    self.client.as_ref(),
                    to,
                    data,
                    receipt,
                    sub.attempts,
                    sub.fee_policy.version,
                )
                .await
            }
            Ok(None) => {
                tracing::warn!(label, tx_hash = ?sub.tx_hash, "confirmation wait timed out, following up in background");
                self.pending(label, to, data, &sub)
            }
            Err(e) => {
                tracing::warn!(label, tx_hash = ?sub.tx_hash, error = %e, "receipt lookup failed, following up in background");
                self.pending(label, to, data, &sub)
            }
        }
    }

    /// 先把 Pending 写进日志再启动跟进任务
    fn pending(&self, label: &str, to: Address, data: Vec<u8>, sub: &Submission) -> RelayResult {
        let result = RelayResult::pending(sub.tx_hash, sub.attempts, sub.fee_policy.version);
        self.journal.record(label, &result);
        self.spawn_follow_up(label, to, data, sub);
        result
    }

    /// 已提交的交易不会被取消，后台继续等回执并把结果写回日志
    fn spawn_follow_up(&self, label: &str, to: Address, data: Vec<u8>, sub: &Submission) {
        let client = self.client.clone();
        let journal = self.journal.clone();
        let label = label.to_string();
        let tx_hash = sub.tx_hash;
        let attempts = sub.attempts;
        let version = sub.fee_policy.version;
        let wait = self.follow_up_timeout;
        let interval = self.poll_interval;

        tokio::spawn(async move {
            match client.wait_for_receipt(tx_hash, wait, interval).await {
                Ok(Some(receipt)) => {
                    let result =
                        classify_receipt(client.as_ref(), to, data, receipt, attempts, version).await;
                    tracing::info!(label = %label, tx_hash = ?tx_hash, status = ?result.status, "pending relay resolved");
                    crate::metrics::record_relay_outcome(result.status, 0);
                    journal.resolve(&label, tx_hash, result);
                }
                Ok(None) => {
                    tracing::warn!(label = %label, tx_hash = ?tx_hash, "relay still unconfirmed after follow-up window");
                }
                Err(e) => {
                    tracing::warn!(label = %label, tx_hash = ?tx_hash, error = %e, "follow-up receipt lookup failed");
                }
            }
        });
    }
}

/// 上链前失败 → Reverted（零交易）或 SubmissionFailed
fn failure_result(err: SubmitError) -> RelayResult {
    match err {
        SubmitError::Reverted {
            data,
            message,
            attempts,
            fee_policy,
        } => {
            let contract_err = revert_from_node(data.as_deref(), &message);
            reverted(None, contract_err, None, attempts, Some(fee_policy.version))
        }
        SubmitError::Failed {
            error,
            attempts,
            fee_policy,
        }
        | SubmitError::Indeterminate {
            error,
            attempts,
            fee_policy,
        } => RelayResult::submission_failed(&error, attempts, fee_policy.map(|p| p.version)),
    }
}

fn reverted(
    tx_hash: Option<ethers::types::H256>,
    err: ContractError,
    block_ref: Option<BlockRef>,
    attempts: u32,
    fee_version: Option<u64>,
) -> RelayResult {
    RelayResult::reverted(
        tx_hash,
        err.error_class(),
        err.to_string(),
        block_ref,
        attempts,
        fee_version,
    )
}

/// 回执 → 结果；失败的回执在其区块重放调用以取回 revert 原因
async fn classify_receipt(
    client: &dyn ChainClient,
    to: Address,
    data: Vec<u8>,
    receipt: ReceiptSummary,
    attempts: u32,
    fee_version: u64,
) -> RelayResult {
    let block_ref = BlockRef {
        number: receipt.block_number,
        hash: receipt.block_hash,
    };
    if receipt.success {
        return RelayResult::confirmed(receipt.tx_hash, block_ref, attempts, fee_version);
    }

    let replay = CallRequest::new(to, data)
        .from(client.relayer_address())
        .at_block(receipt.block_number);
    let err = match client.call(&replay).await {
        Err(ChainError::Reverted { data, message }) => revert_from_node(data.as_deref(), &message),
        Ok(_) => ContractError::TransactionReverted {
            reason: "reverted on-chain, replay succeeded".to_string(),
        },
        Err(e) => {
            tracing::debug!(tx_hash = ?receipt.tx_hash, error = %e, "revert replay failed");
            ContractError::TransactionReverted {
                reason: "execution reverted".to_string(),
            }
        }
    };
    reverted(
        Some(receipt.tx_hash),
        err,
        Some(block_ref),
        attempts,
        Some(fee_version),
    )
}

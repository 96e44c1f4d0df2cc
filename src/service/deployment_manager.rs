//! 智能钱包部署管理
//!
//! `deploy_if_needed(owner)`：
//! 1. 派生钱包地址
//! 2. 读取字节码，非空直接返回
//! 3. 按 owner 加锁后再读一次（并发调用方可能已经部署）
//! 4. 平台签名者提交 `createAccount`，等待回执
//! 5. 重新读取字节码，仍为空则 `DeploymentVerificationFailed`
//! 6. 等待区块确认（读不到区块高度时退化为固定延迟）

use std::{sync::Arc, time::Duration};

use ethers::{
    abi::AbiEncode,
    types::{Address, H256},
};
use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::{
    config::{DeploymentConfig, RelayConfig},
    contracts::CreateAccountCall,
    domain::{revert::revert_from_node, wallet_salt, BlockRef, RelayResult, SmartWallet},
    error::{ContractError, RelayError, StateError},
    infrastructure::{chain_client::ChainClient, keyed_lock::KeyedLock},
    service::{
        address_deriver::AddressDeriver,
        relay_journal::RelayJournal,
        transaction_retry::{SubmitError, TransactionRetrier},
    },
};

const DEPLOY_LABEL: &str = "deploy_wallet";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub wallet: SmartWallet,
    /// 本次调用是否真正发出了部署交易
    pub newly_deployed: bool,
    pub tx_hash: Option<H256>,
}

pub struct DeploymentManager {
    client: Arc<dyn ChainClient>,
    deriver: Arc<AddressDeriver>,
    retrier: Arc<TransactionRetrier>,
    journal: Arc<RelayJournal>,
    locks: KeyedLock<Address>,
    config: DeploymentConfig,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl DeploymentManager {
    pub fn new(
        client: Arc<dyn ChainClient>,
        deriver: Arc<AddressDeriver>,
        retrier: Arc<TransactionRetrier>,
        journal: Arc<RelayJournal>,
        config: DeploymentConfig,
        relay: &RelayConfig,
    ) -> Self {
        Self {
            client,
            deriver,
            retrier,
            journal,
            locks: KeyedLock::new(),
            config,
            receipt_timeout: relay.receipt_timeout(),
            poll_interval: relay.receipt_poll_interval(),
        }
    }

    pub fn deriver(&self) -> &Arc<AddressDeriver> {
        &self.deriver
    }

    async fn is_deployed(&self, wallet: Address) -> Result<bool, RelayError> {
        let code = self
            .client
            .get_code(wallet)
            .await
            .map_err(|e| e.into_read_error("get_code"))?;
        Ok(!code.as_ref().is_empty())
    }

    /// 当前链上状态（部署与否每次重新读取）
    pub async fn wallet_status(&self, owner: Address) -> Result<SmartWallet, RelayError> {
        let wallet = self.deriver.derive(owner).await?;
        let deployed = self.is_deployed(wallet).await?;
        Ok(SmartWallet::new(owner, wallet, deployed))
    }

    /// 幂等部署；同一 owner 并发调用只会发出一笔部署交易
    pub async fn deploy_if_needed(&self, owner: Address) -> Result<DeploymentOutcome, RelayError> {
        let wallet = self.deriver.derive(owner).await?;
        if self.is_deployed(wallet).await? {
            crate::metrics::inc_deployment_skipped();
            return Ok(already_deployed(owner, wallet));
        }

        let _guard = self
            .locks
            .acquire(owner, Duration::from_millis(self.config.lock_timeout_ms))
            .await
            .map_err(|_| {
                tracing::warn!(owner = ?owner, "timed out waiting for deployment lock");
                RelayError::rpc_timeout("deployment lock")
            })?;

        // 加锁后再探测一次
        if self.is_deployed(wallet).await? {
            tracing::debug!(owner = ?owner, wallet = ?wallet, "wallet deployed by concurrent caller");
            crate::metrics::inc_deployment_skipped();
            return Ok(already_deployed(owner, wallet));
        }

        match self.deploy_locked(owner, wallet).await {
            Ok(outcome) => {
                crate::metrics::inc_deployment_submitted();
                Ok(outcome)
            }
            Err(e) => {
                crate::metrics::inc_deployment_failure();
                tracing::error!(owner = ?owner, wallet = ?wallet, error = %e, "smart wallet deployment failed");
                Err(e)
            }
        }
    }

    async fn deploy_locked(&self, owner: Address, wallet: Address) -> Result<DeploymentOutcome, RelayError> {
        let factory = self.deriver.factory()?;
        let data = CreateAccountCall {
            owner,
            salt: wallet_salt(owner),
        }
        .encode();

        tracing::info!(owner = ?owner, wallet = ?wallet, factory = ?factory, "deploying smart wallet");

        let sub = match self.retrier.submit(DEPLOY_LABEL, factory, data).await {
            Ok(sub) => sub,
            Err(SubmitError::Reverted { data, message, .. }) => {
                // 预执行 revert 可能是别人刚部署完，再确认一次
                if self.is_deployed(wallet).await? {
                    return Ok(already_deployed(owner, wallet));
                }
                return Err(deployment_reverted(revert_from_node(data.as_deref(), &message)));
            }
            Err(SubmitError::Indeterminate { error, .. }) => {
                // 部署可能已经上链
                if self.is_deployed(wallet).await? {
                    return Ok(already_deployed(owner, wallet));
                }
                return Err(error);
            }
            Err(SubmitError::Failed { error, .. }) => return Err(error),
        };

        let receipt = self
            .client
            .wait_for_receipt(sub.tx_hash, self.receipt_timeout, self.poll_interval)
            .await
            .map_err(|e| e.into_read_error("deployment receipt"))?;
        let Some(receipt) = receipt else {
            // 交易可能稍后上链，后续调用重新探测即可收敛
            self.journal.record(
                DEPLOY_LABEL,
                &RelayResult::pending(sub.tx_hash, sub.attempts, sub.fee_policy.version),
            );
            return Err(RelayError::rpc_timeout("deployment confirmation"));
        };

        let block_ref = BlockRef {
            number: receipt.block_number,
            hash: receipt.block_hash,
        };
        if !receipt.success {
            let err = ContractError::TransactionReverted {
                reason: "createAccount reverted".to_string(),
            };
            self.journal.record(
                DEPLOY_LABEL,
                &RelayResult::reverted(
                    Some(sub.tx_hash),
                    err.error_class(),
                    err.to_string(),
                    Some(block_ref),
                    sub.attempts,
                    Some(sub.fee_policy.version),
                ),
            );
            return Err(deployment_reverted(err));
        }
        self.journal.record(
            DEPLOY_LABEL,
            &RelayResult::confirmed(sub.tx_hash, block_ref, sub.attempts, sub.fee_policy.version),
        );

        self.verify_bytecode(wallet).await?;
        self.settle(receipt.block_number).await;

        tracing::info!(owner = ?owner, wallet = ?wallet, tx_hash = ?sub.tx_hash, "smart wallet deployed");
        Ok(DeploymentOutcome {
            wallet: SmartWallet::new(owner, wallet, true),
            newly_deployed: true,
            tx_hash: Some(sub.tx_hash),
        })
    }

    /// 部署后多次重新读取字节码
    async fn verify_bytecode(&self, wallet: Address) -> Result<(), RelayError> {
        let attempts = self.config.verify_attempts.max(1);
        for attempt in 1..=attempts {
            if self.is_deployed(wallet).await? {
                return Ok(());
            }
            tracing::debug!(wallet = ?wallet, attempt, "bytecode not visible yet");
            if attempt < attempts {
                sleep(Duration::from_millis(self.config.verify_interval_ms)).await;
            }
        }
        Err(StateError::DeploymentVerificationFailed {
            wallet: format!("{:?}", wallet),
        }
        .into())
    }

    /// 等链头达到所需确认数；读不到区块高度时固定等待
    async fn settle(&self, receipt_block: u64) {
        let target = receipt_block + self.config.confirmations.saturating_sub(1);
        let deadline = Instant::now() + Duration::from_millis(self.config.settle_budget_ms);

        loop {
            match self.client.block_number().await {
                Ok(head) if head >= target => return,
                Ok(head) => {
                    if Instant::now() + self.poll_interval > deadline {
                        tracing::warn!(head, target, "settle budget exhausted before confirmations");
                        return;
                    }
                    sleep(self.poll_interval).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "block number unavailable, using fixed settle delay");
                    sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
                    return;
                }
            }
        }
    }
}

fn already_deployed(owner: Address, wallet: Address) -> DeploymentOutcome {
    DeploymentOutcome {
        wallet: SmartWallet::new(owner, wallet, true),
        newly_deployed: false,
        tx_hash: None,
    }
}

/// 部署失败统一归为 TransactionReverted，原因附在其中
fn deployment_reverted(err: ContractError) -> RelayError {
    match err {
        ContractError::TransactionReverted { .. } => err.into(),
        other => ContractError::TransactionReverted {
            reason: other.to_string(),
        }
        .into(),
    }
}

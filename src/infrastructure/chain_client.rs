//! 链客户端 - 显式注入的链上能力接口
//!
//! 能力：读字节码、eth_call、费用估算、发送交易、查回执、查区块高度
//! 生产实现基于 ethers（HTTP Provider + 本地签名 + NonceManager），测试使用内存替身

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    middleware::{NonceManagerMiddleware, SignerMiddleware},
    providers::{Http, Middleware, MiddlewareError, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes,
        Eip1559TransactionRequest, H256, U256, U64,
    },
};
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};

use crate::{
    domain::revert::revert_from_node,
    error::RelayError,
};

/// 链调用失败（已脱敏，不包含私钥或完整 RPC 负载）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("rpc timeout during {operation}")]
    Timeout { operation: String },
    #[error("transport failure during {operation}: {detail}")]
    Transport { operation: String, detail: String },
    /// 执行 revert（eth_call / 估算 / 发送时节点返回）
    #[error("execution reverted: {message}")]
    Reverted { data: Option<Vec<u8>>, message: String },
    /// 节点拒绝了请求（参数错误、余额不足等），重试无意义
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// 只读调用失败映射为领域错误
    ///
    /// 超时 / 传输失败 → RpcTimeout（可重试）；revert → 解码后的合约错误；节点拒绝 → 配置错误
    pub fn into_read_error(self, operation: &str) -> RelayError {
        match self {
            ChainError::Timeout { .. } | ChainError::Transport { .. } => {
                RelayError::rpc_timeout(operation)
            }
            ChainError::Reverted { data, message } => {
                revert_from_node(data.as_deref(), &message).into()
            }
            ChainError::Rejected(msg) => {
                tracing::error!(operation, reason = %msg, "rpc node rejected read");
                RelayError::config(format!("rpc node rejected {}", operation))
            }
        }
    }
}

/// 只读调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub from: Option<Address>,
    /// None 表示 latest
    pub block: Option<u64>,
}

impl CallRequest {
    pub fn new(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            from: None,
            block: None,
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// 由平台签名者发出的 EIP-1559 交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTransaction {
    pub to: Address,
    pub data: Vec<u8>,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: H256,
    pub success: bool,
    pub block_number: u64,
    pub block_hash: Option<H256>,
    pub gas_used: Option<U256>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 平台代付地址
    fn relayer_address(&self) -> Address;

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError>;

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError>;

    async fn send_transaction(&self, tx: &OutgoingTransaction) -> Result<H256, ChainError>;

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// 轮询回执直到出现或超时；超时返回 `Ok(None)`
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        wait: Duration,
        poll_interval: Duration,
    ) -> Result<Option<ReceiptSummary>, ChainError> {
        let deadline = Instant::now() + wait;
        loop {
            match self.get_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(Some(receipt)),
                Ok(None) => {}
                // 单次查询超时不终止等待
                Err(ChainError::Timeout { .. }) | Err(ChainError::Transport { .. }) => {
                    tracing::debug!(tx_hash = ?tx_hash, "receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() + poll_interval > deadline {
                return Ok(None);
            }
            sleep(poll_interval).await;
        }
    }
}

/// RPC 调用策略
#[derive(Debug, Clone)]
pub struct RpcPolicy {
    /// 单次 RPC 超时
    pub timeout: Duration,
    /// 只读调用的额外重试次数
    pub read_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RpcPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            read_retries: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

type RelayerMiddleware = NonceManagerMiddleware<SignerMiddleware<Provider<Http>, LocalWallet>>;

/// 基于 ethers 的生产实现
pub struct EthersChainClient {
    client: Arc<RelayerMiddleware>,
    relayer: Address,
    policy: RpcPolicy,
}

impl EthersChainClient {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        relayer_private_key: &str,
        policy: RpcPolicy,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?.interval(Duration::from_millis(500));
        let wallet = relayer_private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()?
            .with_chain_id(chain_id);
        let relayer = wallet.address();
        let signer = SignerMiddleware::new(provider, wallet);
        let client = NonceManagerMiddleware::new(signer, relayer);

        tracing::info!(relayer = ?relayer, chain_id, "ethers chain client ready");

        Ok(Self {
            client: Arc::new(client),
            relayer,
            policy,
        })
    }

    /// 只读调用：单次超时 + 有限次重试
    async fn read<T, F, Fut, E>(&self, operation: &str, mut f: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: MiddlewareError,
    {
        let mut attempt = 0;
        loop {
            let outcome = match timeout(self.policy.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => classify(operation, e),
                Err(_) => ChainError::Timeout {
                    operation: operation.to_string(),
                },
            };
            let transient = matches!(
                outcome,
                ChainError::Timeout { .. } | ChainError::Transport { .. }
            );
            if !transient || attempt >= self.policy.read_retries {
                if transient {
                    tracing::warn!(operation, attempts = attempt + 1, error = %outcome, "rpc read failed");
                }
                return Err(outcome);
            }
            attempt += 1;
            sleep(self.policy.retry_delay).await;
        }
    }

    fn block_id(block: Option<u64>) -> Option<BlockId> {
        block.map(|n| BlockId::Number(BlockNumber::Number(U64::from(n))))
    }
}

/// 将 ethers 中间件错误映射为 `ChainError`
fn classify<E: MiddlewareError>(operation: &str, err: E) -> ChainError {
    if let Some(resp) = err.as_error_response() {
        if resp.is_revert() {
            return ChainError::Reverted {
                data: resp.as_revert_data().map(|b| b.to_vec()),
                message: resp.message.clone(),
            };
        }
        // nonce 冲突可通过重新同步恢复，按传输错误处理
        let lower = resp.message.to_lowercase();
        if lower.contains("nonce") || lower.contains("underpriced") {
            return ChainError::Transport {
                operation: operation.to_string(),
                detail: resp.message.clone(),
            };
        }
        return ChainError::Rejected(resp.message.clone());
    }
    ChainError::Transport {
        operation: operation.to_string(),
        detail: err.to_string(),
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        self.read("get_code", || self.client.get_code(address, None)).await
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let mut tx = Eip1559TransactionRequest::new()
            .to(request.to)
            .data(request.data.clone());
        if let Some(from) = request.from {
            tx = tx.from(from);
        }
        let typed: TypedTransaction = tx.into();
        let block = Self::block_id(request.block);
        self.read("eth_call", || self.client.call(&typed, block)).await
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .read("estimate_fees", || self.client.estimate_eip1559_fees(None))
            .await?;
        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    /// 发送只尝试一次（由上层决定是否重试），失败时重新同步 nonce
    async fn send_transaction(&self, tx: &OutgoingTransaction) -> Result<H256, ChainError> {
        let request = Eip1559TransactionRequest::new()
            .from(self.relayer)
            .to(tx.to)
            .data(tx.data.clone())
            .gas(tx.gas_limit)
            .max_fee_per_gas(tx.max_fee_per_gas)
            .max_priority_fee_per_gas(tx.max_priority_fee_per_gas);

        let result = timeout(
            self.policy.timeout,
            self.client.send_transaction(request, None),
        )
        .await;

        let err = match result {
            Ok(Ok(pending)) => return Ok(pending.tx_hash()),
            Ok(Err(e)) => classify("send_transaction", e),
            Err(_) => ChainError::Timeout {
                operation: "send_transaction".to_string(),
            },
        };

        if matches!(err, ChainError::Transport { .. } | ChainError::Timeout { .. }) {
            // 本地 nonce 可能已经前移，按链上状态重新初始化
            if let Err(e) = self.client.initialize_nonce(None).await {
                tracing::warn!(error = %e, "failed to resync relayer nonce");
            }
        }
        Err(err)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainError> {
        let receipt = self
            .read("get_transaction_receipt", || {
                self.client.get_transaction_receipt(tx_hash)
            })
            .await?;
        Ok(receipt.and_then(|r| {
            // 尚未打包的回执没有区块号
            let block_number = r.block_number?.as_u64();
            Some(ReceiptSummary {
                tx_hash: r.transaction_hash,
                success: r.status.map(|s| s.as_u64() == 1).unwrap_or(false),
                block_number,
                block_hash: r.block_hash,
                gas_used: r.gas_used,
            })
        }))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let n = self
            .read("block_number", || self.client.get_block_number())
            .await?;
        Ok(n.as_u64())
    }
}

/// 单元测试用的静态替身：`call` 固定返回给定字节，不发送任何交易
#[cfg(test)]
pub(crate) struct StaticChain {
    pub call_result: Bytes,
}

#[cfg(test)]
#[async_trait]
impl ChainClient for StaticChain {
    fn relayer_address(&self) -> Address {
        Address::zero()
    }

    async fn get_code(&self, _address: Address) -> Result<Bytes, ChainError> {
        Ok(Bytes::default())
    }

    async fn call(&self, _request: &CallRequest) -> Result<Bytes, ChainError> {
        Ok(self.call_result.clone())
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError> {
        Err(ChainError::Rejected("static chain".into()))
    }

    async fn send_transaction(&self, _tx: &OutgoingTransaction) -> Result<H256, ChainError> {
        Err(ChainError::Rejected("static chain".into()))
    }

    async fn get_receipt(&self, _tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainError> {
        Ok(None)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(0)
    }
}

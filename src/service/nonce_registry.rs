//! Nonce 注册表（防重放）
//!
//! 每个 (verifyingContract, signer) 一个严格递增的计数器。
//! 读取并前移在同一个临界区内完成；接受后返回租约，租约存活期间同一 key 串行，
//! 保证链上提交顺序与 nonce 顺序一致。
//!
//! 广播结果未知的 nonce 保持已消费，并把槽位标记为待同步：
//! 下一次读取或消费时以链上 `nonces()` 为准。

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{Address, U256},
};
use tokio::{
    sync::{Mutex, Notify, OnceCell, OwnedMutexGuard},
    time::{timeout_at, Instant},
};

use crate::{
    contracts::NoncesCall,
    error::{RelayError, SignatureError},
    infrastructure::chain_client::{CallRequest, ChainClient, ChainError},
};

type SlotKey = (Address, Address);

/// 单个 key 的状态
#[derive(Default)]
struct NonceSlot {
    next: AtomicU64,
    gate: Arc<Mutex<()>>,
    advanced: Notify,
    seeded: OnceCell<()>,
    stale: AtomicBool,
}

/// 已消费 nonce 的租约
///
/// Drop 时释放串行锁并唤醒等待后续 nonce 的请求
pub struct NonceLease {
    pub contract: Address,
    pub signer: Address,
    pub nonce: u64,
    slot: Arc<NonceSlot>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NonceLease {
    /// 交易一笔都没有发出时归还 nonce（链上计数器没有变化）
    pub fn rollback(mut self) {
        let restored = self
            .slot
            .next
            .compare_exchange(self.nonce + 1, self.nonce, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        tracing::debug!(
            contract = ?self.contract,
            signer = ?self.signer,
            nonce = self.nonce,
            restored,
            "nonce lease rolled back"
        );
        self.release();
    }

    /// 交易可能已经广播：nonce 不归还，槽位待按链上同步
    pub fn mark_indeterminate(mut self) {
        self.slot.stale.store(true, Ordering::SeqCst);
        tracing::warn!(
            contract = ?self.contract,
            signer = ?self.signer,
            nonce = self.nonce,
            "nonce kept consumed after uncertain broadcast"
        );
        self.release();
    }

    fn release(&mut self) {
        if self.guard.take().is_some() {
            self.slot.advanced.notify_waiters();
        }
    }
}

impl Drop for NonceLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for NonceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLease")
            .field("contract", &self.contract)
            .field("signer", &self.signer)
            .field("nonce", &self.nonce)
            .finish()
    }
}

pub struct NonceRegistry {
    client: Arc<dyn ChainClient>,
    seed_from_chain: bool,
    slots: DashMap<SlotKey, Arc<NonceSlot>>,
}

impl NonceRegistry {
    pub fn new(client: Arc<dyn ChainClient>, seed_from_chain: bool) -> Self {
        Self {
            client,
            seed_from_chain,
            slots: DashMap::new(),
        }
    }

    async fn slot(&self, contract: Address, signer: Address) -> Result<Arc<NonceSlot>, RelayError> {
        let slot = self
            .slots
            .entry((contract, signer))
            .or_insert_with(|| Arc::new(NonceSlot::default()))
            .clone();

        slot.seeded
            .get_or_try_init(|| async {
                if self.seed_from_chain {
                    let start = self.read_chain_nonce(contract, signer).await?.unwrap_or(0);
                    slot.next.store(start, Ordering::SeqCst);
                }
                Ok::<(), RelayError>(())
            })
            .await?;
        Ok(slot)
    }

    /// 链上 `nonces(signer)`；合约不提供时为 `None`
    async fn read_chain_nonce(&self, contract: Address, signer: Address) -> Result<Option<u64>, RelayError> {
        let data = NoncesCall { owner: signer }.encode();
        match self.client.call(&CallRequest::new(contract, data)).await {
            Ok(raw) => {
                let value = U256::decode(raw.as_ref()).map_err(|e| {
                    tracing::warn!(contract = ?contract, error = %e, "undecodable nonces() result");
                    RelayError::InvalidRequest("verifying contract returned malformed nonce".into())
                })?;
                if value > U256::from(u64::MAX) {
                    return Err(RelayError::InvalidRequest("nonce out of range".into()));
                }
                Ok(Some(value.as_u64()))
            }
            Err(ChainError::Reverted { message, .. }) => {
                tracing::warn!(contract = ?contract, reason = %message, "nonces() reverted");
                Ok(None)
            }
            Err(e) => Err(e.into_read_error("poll.nonces")),
        }
    }

    /// 待同步的槽位按链上计数器修正；调用方必须持有串行锁
    ///
    /// 读取失败时保持本地值，下次再试
    async fn resync(&self, slot: &NonceSlot, contract: Address, signer: Address) {
        if !slot.stale.load(Ordering::SeqCst) {
            return;
        }
        match self.read_chain_nonce(contract, signer).await {
            Ok(Some(on_chain)) => {
                let local = slot.next.swap(on_chain, Ordering::SeqCst);
                slot.stale.store(false, Ordering::SeqCst);
                tracing::info!(contract = ?contract, signer = ?signer, local, on_chain, "nonce resynced from chain");
            }
            Ok(None) => {
                slot.stale.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(contract = ?contract, signer = ?signer, error = %e, "nonce resync failed, keeping local value");
            }
        }
    }

    /// 下一个期望的 nonce
    pub async fn next_nonce(&self, contract: Address, signer: Address) -> Result<u64, RelayError> {
        let slot = self.slot(contract, signer).await?;
        if slot.stale.load(Ordering::SeqCst) {
            // 有租约在途时不等待，沿用本地值
            if let Ok(_guard) = slot.gate.clone().try_lock_owned() {
                self.resync(&slot, contract, signer).await;
            }
        }
        Ok(slot.next.load(Ordering::SeqCst))
    }

    /// 不等待的快速检查：已被消费的 nonce 直接拒绝
    pub async fn precheck(&self, contract: Address, signer: Address, nonce: u64) -> Result<(), RelayError> {
        let expected = self.next_nonce(contract, signer).await?;
        if nonce < expected {
            crate::metrics::inc_nonce_rejection();
            return Err(SignatureError::NonceMismatch {
                expected,
                provided: nonce,
            }
            .into());
        }
        Ok(())
    }

    /// 消费 nonce
    ///
    /// - 等于期望值：前移并返回租约
    /// - 小于期望值：`NonceMismatch`
    /// - 大于期望值：在 `wait` 内等待前面的 nonce 被消费，超时 `NonceMismatch`
    pub async fn consume(
        &self,
        contract: Address,
        signer: Address,
        nonce: u64,
        wait: Duration,
    ) -> Result<NonceLease, RelayError> {
        let slot = self.slot(contract, signer).await?;
        let deadline = Instant::now() + wait;

        loop {
            // 先登记通知再检查，避免错过唤醒
            let notified = slot.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let guard = match timeout_at(deadline, slot.gate.clone().lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => return Err(self.reject(&slot, contract, signer, nonce)),
            };
            self.resync(&slot, contract, signer).await;

            let expected = slot.next.load(Ordering::SeqCst);
            if nonce == expected {
                slot.next.store(expected + 1, Ordering::SeqCst);
                tracing::debug!(contract = ?contract, signer = ?signer, nonce, "nonce consumed");
                return Ok(NonceLease {
                    contract,
                    signer,
                    nonce,
                    slot: slot.clone(),
                    guard: Some(guard),
                });
            }
            if nonce < expected {
                return Err(self.reject(&slot, contract, signer, nonce));
            }

            // 还没轮到，放锁等待
            drop(guard);
            tracing::debug!(contract = ?contract, signer = ?signer, nonce, expected, "nonce ahead, waiting");
            if timeout_at(deadline, notified).await.is_err() {
                return Err(self.reject(&slot, contract, signer, nonce));
            }
        }
    }

    fn reject(&self, slot: &NonceSlot, contract: Address, signer: Address, nonce: u64) -> RelayError {
        let expected = slot.next.load(Ordering::SeqCst);
        crate::metrics::inc_nonce_rejection();
        tracing::info!(contract = ?contract, signer = ?signer, expected, provided = nonce, "nonce rejected");
        SignatureError::NonceMismatch {
            expected,
            provided: nonce,
        }
        .into()
    }
}

//! 奖励台账（内存存储）
//!
//! 领取奖励的中继结果为 Confirmed / Pending 时记一条；Pending 的条目在查询时按中继日志刷新

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{Address, U256},
};

use crate::{
    contracts::RewardPerVoterCall,
    domain::{RelayResult, RelayStatus, RewardLedgerEntry, TokenAmount},
    error::RelayError,
    infrastructure::chain_client::{CallRequest, ChainClient},
    service::relay_journal::RelayJournal,
};

pub struct RewardLedger {
    client: Arc<dyn ChainClient>,
    journal: Arc<RelayJournal>,
    fee_bps: u32,
    entries: DashMap<(Address, Address), RewardLedgerEntry>,
}

impl RewardLedger {
    pub fn new(client: Arc<dyn ChainClient>, journal: Arc<RelayJournal>, fee_bps: u32) -> Self {
        Self {
            client,
            journal,
            fee_bps,
            entries: DashMap::new(),
        }
    }

    async fn reward_per_voter(&self, poll: Address) -> Result<TokenAmount, RelayError> {
        let raw = self
            .client
            .call(&CallRequest::new(poll, RewardPerVoterCall.encode()))
            .await
            .map_err(|e| e.into_read_error("poll.rewardPerVoter"))?;
        let units = U256::decode(raw.as_ref())
            .map_err(|_| RelayError::InvalidRequest("poll returned malformed rewardPerVoter".into()))?;
        Ok(TokenAmount::from_base_units(units))
    }

    /// 根据领取结果记账；失败的领取不记
    pub async fn record_claim(&self, poll: Address, voter: Address, result: &RelayResult) {
        if !matches!(result.status, RelayStatus::Confirmed | RelayStatus::Pending) {
            return;
        }
        let amount = match self.reward_per_voter(poll).await {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!(poll = ?poll, voter = ?voter, error = %e, "reward amount unavailable, claim not recorded");
                return;
            }
        };
        let entry = RewardLedgerEntry {
            poll_address: poll,
            voter,
            amount,
            fee_amount: amount.mul_bps(self.fee_bps),
            settled: result.is_confirmed(),
            tx_hash: result.tx_hash,
            recorded_at: Utc::now(),
        };
        tracing::info!(poll = ?poll, voter = ?voter, amount = %amount, settled = entry.settled, "reward claim recorded");
        self.entries.insert((poll, voter), entry);
    }

    /// 查询条目；未结清的条目按中继日志的最新结果刷新
    pub fn get(&self, poll: Address, voter: Address) -> Option<RewardLedgerEntry> {
        let mut entry = self.entries.get_mut(&(poll, voter))?;
        if !entry.settled {
            if let Some(journaled) = entry.tx_hash.and_then(|h| self.journal.get(&h)) {
                if journaled.result.is_confirmed() {
                    entry.settled = true;
                }
            }
        }
        Some(entry.clone())
    }
}

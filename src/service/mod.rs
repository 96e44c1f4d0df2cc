pub mod address_deriver;
pub mod deployment_manager; // 智能钱包按需部署（按 owner 串行）
pub mod fee_policy_engine;
pub mod meta_tx_verifier;
pub mod nonce_registry; // 防重放 nonce
pub mod relay_dispatcher;
pub mod relay_journal;
pub mod relay_service;
pub mod reward_ledger;
pub mod settlement_orchestrator; // 奖励投票注资：授权 → 注资
pub mod transaction_retry;

pub use relay_service::{ClaimSubmission, RelayService, VoteSubmission};

//! Domain 模块
//!
//! 纯领域模型：金额、智能钱包、元交易签名、费用策略、中继结果

pub mod amount;
pub mod fee_policy;
pub mod funding_authorization;
pub mod meta_tx;
pub mod relay_result;
pub mod revert;
pub mod reward_ledger;
pub mod smart_wallet;

// 重新导出常用类型
pub use amount::TokenAmount;
pub use fee_policy::{FeePolicy, FeeSource, OperationKind};
pub use funding_authorization::{FundingAuthorization, FundingTerms};
pub use meta_tx::{
    ActionPayload, ActionType, MetaTransactionRequest, SignedEnvelope, SigningDomain,
};
pub use relay_result::{BlockRef, RelayResult, RelayStatus};
pub use reward_ledger::RewardLedgerEntry;
pub use smart_wallet::{wallet_salt, SmartWallet};

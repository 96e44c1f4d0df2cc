//! 中继结果
//!
//! 四种状态互斥：Confirmed / Reverted / SubmissionFailed / Pending

use ethers::types::H256;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ErrorClass, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum RelayStatus {
    Confirmed,
    Reverted,
    SubmissionFailed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub number: u64,
    #[schema(value_type = Option<String>)]
    pub hash: Option<H256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayResult {
    #[schema(value_type = Option<String>)]
    pub tx_hash: Option<H256>,
    pub status: RelayStatus,
    pub error_class: Option<ErrorClass>,
    pub reason: Option<String>,
    pub block_ref: Option<BlockRef>,
    /// 仅对 SubmissionFailed 有意义
    pub retryable: bool,
    pub attempts: u32,
    pub fee_policy_version: Option<u64>,
}

impl RelayResult {
    pub fn confirmed(tx_hash: H256, block_ref: BlockRef, attempts: u32, fee_version: u64) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: RelayStatus::Confirmed,
            error_class: None,
            reason: None,
            block_ref: Some(block_ref),
            retryable: false,
            attempts,
            fee_policy_version: Some(fee_version),
        }
    }

    /// 交易哈希为空表示预执行阶段就已 revert（没有发送任何交易）
    pub fn reverted(
        tx_hash: Option<H256>,
        class: ErrorClass,
        reason: String,
        block_ref: Option<BlockRef>,
        attempts: u32,
        fee_version: Option<u64>,
    ) -> Self {
        Self {
            tx_hash,
            status: RelayStatus::Reverted,
            error_class: Some(class),
            reason: Some(reason),
            block_ref,
            retryable: false,
            attempts,
            fee_policy_version: fee_version,
        }
    }

    pub fn submission_failed(err: &RelayError, attempts: u32, fee_version: Option<u64>) -> Self {
        Self {
            tx_hash: None,
            status: RelayStatus::SubmissionFailed,
            error_class: Some(err.error_class()),
            reason: Some(err.to_string()),
            block_ref: None,
            retryable: err.is_retryable(),
            attempts,
            fee_policy_version: fee_version,
        }
    }

    pub fn pending(tx_hash: H256, attempts: u32, fee_version: u64) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: RelayStatus::Pending,
            error_class: None,
            reason: None,
            block_ref: None,
            retryable: false,
            attempts,
            fee_policy_version: Some(fee_version),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RelayStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == RelayStatus::Confirmed
    }
}

//! Revert 原因解码
//!
//! 支持 `Error(string)`、`Panic(uint256)` 以及投票合约 / ERC20 的自定义错误选择器

use ethers::{
    abi::{self, ParamType},
    utils::id,
};

use crate::error::ContractError;

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// 对外暴露的原因最长长度
const MAX_REASON_LEN: usize = 200;

/// 解码 revert 返回数据
pub fn decode_revert(data: &[u8]) -> ContractError {
    if data.len() < 4 {
        return ContractError::TransactionReverted {
            reason: "execution reverted".to_string(),
        };
    }
    let (selector, body) = data.split_at(4);

    if selector == ERROR_STRING_SELECTOR {
        return match abi::decode(&[ParamType::String], body) {
            Ok(tokens) => {
                let msg = tokens
                    .into_iter()
                    .next()
                    .and_then(|t| t.into_string())
                    .unwrap_or_default();
                classify_reason(&msg)
            }
            Err(_) => ContractError::TransactionReverted {
                reason: "malformed Error(string) payload".to_string(),
            },
        };
    }

    if selector == PANIC_SELECTOR {
        let code = abi::decode(&[ParamType::Uint(256)], body)
            .ok()
            .and_then(|t| t.into_iter().next())
            .and_then(|t| t.into_uint())
            .map(|c| format!("{:#x}", c))
            .unwrap_or_else(|| "unknown".to_string());
        return ContractError::TransactionReverted {
            reason: format!("panic code {}", code),
        };
    }

    if selector == id("AlreadyVoted()") {
        return ContractError::AlreadyVoted;
    }
    if selector == id("PollInactive()") || selector == id("PollNotActive()") {
        return ContractError::PollInactive;
    }
    if selector == id("CreatorCannotVote()") {
        return ContractError::CreatorCannotVote;
    }
    if selector == id("ERC20InsufficientAllowance(address,uint256,uint256)") {
        return ContractError::InsufficientAllowance;
    }

    ContractError::TransactionReverted {
        reason: format!("custom error 0x{}", hex::encode(selector)),
    }
}

/// 节点返回的 revert：优先解码返回数据，没有数据时按消息归类
pub fn revert_from_node(data: Option<&[u8]>, message: &str) -> ContractError {
    match data {
        Some(data) if !data.is_empty() => decode_revert(data),
        _ => classify_reason(message),
    }
}

/// 按 revert 字符串归类到领域错误
pub fn classify_reason(message: &str) -> ContractError {
    let lower = message.to_lowercase();
    if lower.contains("already voted") {
        ContractError::AlreadyVoted
    } else if lower.contains("not active") || lower.contains("inactive") || lower.contains("poll ended") {
        ContractError::PollInactive
    } else if lower.contains("creator") && lower.contains("vote") {
        ContractError::CreatorCannotVote
    } else if lower.contains("allowance") {
        ContractError::InsufficientAllowance
    } else {
        ContractError::TransactionReverted {
            reason: truncate_reason(message),
        }
    }
}

pub fn truncate_reason(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "execution reverted".to_string();
    }
    trimmed.chars().take(MAX_REASON_LEN).collect()
}

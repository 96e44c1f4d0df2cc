//! 地址验证模块
//!
//! EVM 地址：0x + 40 位十六进制；含大写字母时必须通过 EIP-55 校验

use ethers::{types::Address, utils::to_checksum};

use crate::error::RelayError;

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 解析并验证地址，`field` 用于错误信息
    pub fn parse(field: &str, raw: &str) -> Result<Address, RelayError> {
        let raw = raw.trim();
        if !Self::is_well_formed(raw) {
            return Err(RelayError::InvalidRequest(format!(
                "{} is not a valid address",
                field
            )));
        }

        let address: Address = raw
            .parse()
            .map_err(|_| RelayError::InvalidRequest(format!("{} is not a valid address", field)))?;

        // 全小写或全大写不做校验和检查
        let hex_part = &raw[2..];
        let mixed_case = hex_part.chars().any(|c| c.is_ascii_uppercase())
            && hex_part.chars().any(|c| c.is_ascii_lowercase());
        if mixed_case && to_checksum(&address, None) != raw {
            return Err(RelayError::InvalidRequest(format!(
                "{} fails EIP-55 checksum",
                field
            )));
        }
        Ok(address)
    }

    /// 基本格式检查
    fn is_well_formed(raw: &str) -> bool {
        raw.len() == 42
            && raw.starts_with("0x")
            && raw[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}

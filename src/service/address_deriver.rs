//! 智能钱包地址派生
//!
//! owner → salt = keccak256(owner) → 工厂 `getAddress(owner, salt)`（只读调用）
//! 地址一旦派生即不可变，成功结果按 owner 缓存；缓存里不存部署状态

use std::sync::Arc;

use dashmap::DashMap;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::Address,
};

use crate::{
    contracts::GetAddressCall,
    domain::wallet_salt,
    error::RelayError,
    infrastructure::chain_client::{CallRequest, ChainClient},
};

pub struct AddressDeriver {
    client: Arc<dyn ChainClient>,
    factory: Option<Address>,
    memo: DashMap<Address, Address>,
}

impl AddressDeriver {
    pub fn new(client: Arc<dyn ChainClient>, factory: Option<Address>) -> Self {
        Self {
            client,
            factory,
            memo: DashMap::new(),
        }
    }

    /// 工厂地址；未配置时为致命的配置错误
    pub fn factory(&self) -> Result<Address, RelayError> {
        self.factory
            .ok_or_else(|| RelayError::config("wallet factory address is not configured"))
    }

    /// 派生钱包地址（与部署状态无关，幂等）
    pub async fn derive(&self, owner: Address) -> Result<Address, RelayError> {
        let factory = self.factory()?;
        if let Some(cached) = self.memo.get(&owner) {
            return Ok(*cached);
        }

        let data = GetAddressCall {
            owner,
            salt: wallet_salt(owner),
        }
        .encode();

        let raw = self
            .client
            .call(&CallRequest::new(factory, data))
            .await
            .map_err(|e| match e.into_read_error("factory.getAddress") {
                // 工厂调用 revert 说明地址配置有误
                RelayError::Contract(c) => {
                    tracing::error!(factory = ?factory, error = %c, "wallet factory getAddress reverted");
                    RelayError::config("wallet factory rejected getAddress")
                }
                other => other,
            })?;

        let wallet = Address::decode(raw.as_ref()).map_err(|e| {
            tracing::error!(factory = ?factory, error = %e, "undecodable getAddress result");
            RelayError::config("wallet factory returned malformed data")
        })?;
        if wallet.is_zero() {
            return Err(RelayError::config("wallet factory returned the zero address"));
        }

        tracing::debug!(owner = ?owner, wallet = ?wallet, "derived smart wallet address");
        self.memo.insert(owner, wallet);
        Ok(wallet)
    }
}

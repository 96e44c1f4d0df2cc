//! 智能合约钱包领域模型
//!
//! 钱包地址只由 (owner, salt) 决定；`deployed` 每次都从链上字节码重新推导，不做权威缓存

use ethers::{
    types::{Address, U256},
    utils::keccak256,
};
use serde::Serialize;

/// salt = keccak256(owner 地址的 20 字节)
pub fn wallet_salt(owner: Address) -> U256 {
    U256::from_big_endian(&keccak256(owner.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartWallet {
    pub owner_address: Address,
    pub wallet_address: Address,
    #[serde(serialize_with = "serialize_salt")]
    pub salt: U256,
    pub deployed: bool,
}

impl SmartWallet {
    pub fn new(owner_address: Address, wallet_address: Address, deployed: bool) -> Self {
        Self {
            owner_address,
            wallet_address,
            salt: wallet_salt(owner_address),
            deployed,
        }
    }
}

fn serialize_salt<S: serde::Serializer>(salt: &U256, s: S) -> Result<S::Ok, S::Error> {
    let mut buf = [0u8; 32];
    salt.to_big_endian(&mut buf);
    s.serialize_str(&format!("0x{}", hex::encode(buf)))
}

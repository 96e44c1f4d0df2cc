//! 注资授权（钱包所有者的 EIP-712 签名）
//!
//! `FundPoll(address owner,bytes32 planId,address pollFactory,uint256 totalRequired,uint256 fundAmount,uint256 nonce)`
//!
//! 验证合约为所有者的智能钱包；planId 把签名绑定到唯一的一份计划

use std::collections::BTreeMap;

use ethers::{
    abi::{self, Token},
    types::{Address, Signature, H256, U256},
    utils::keccak256,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    domain::meta_tx::{
        signing_digest, SigningDomain, TypedDataPayload, TypedField, WireDomain,
        EIP712_DOMAIN_TYPE,
    },
    error::SignatureError,
};

pub const FUND_POLL_PRIMARY_TYPE: &str = "FundPoll";

const FUND_POLL_TYPE: &str = "FundPoll(address owner,bytes32 planId,address pollFactory,uint256 totalRequired,uint256 fundAmount,uint256 nonce)";

const FUND_POLL_FIELDS: &[(&str, &str)] = &[
    ("owner", "address"),
    ("planId", "bytes32"),
    ("pollFactory", "address"),
    ("totalRequired", "uint256"),
    ("fundAmount", "uint256"),
    ("nonce", "uint256"),
];

const DOMAIN_FIELDS: &[(&str, &str)] = &[
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
];

/// 计划 ID 左补零为 bytes32
pub fn plan_id_word(plan_id: &Uuid) -> H256 {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(plan_id.as_bytes());
    H256::from(word)
}

/// 所有者签名前的授权内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingTerms {
    pub owner: Address,
    pub plan_id: Uuid,
    pub poll_factory: Address,
    pub total_required: U256,
    pub fund_amount: U256,
    pub nonce: u64,
    pub domain: SigningDomain,
}

impl FundingTerms {
    pub fn type_hash() -> [u8; 32] {
        keccak256(FUND_POLL_TYPE)
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        keccak256(abi::encode(&[
            Token::FixedBytes(Self::type_hash().to_vec()),
            Token::Address(self.owner),
            Token::FixedBytes(plan_id_word(&self.plan_id).as_bytes().to_vec()),
            Token::Address(self.poll_factory),
            Token::Uint(self.total_required),
            Token::Uint(self.fund_amount),
            Token::Uint(U256::from(self.nonce)),
        ]))
    }

    pub fn signing_digest(&self) -> H256 {
        signing_digest(&self.domain, self.struct_hash())
    }

    /// 交给钱包 `eth_signTypedData_v4` 的载荷
    pub fn typed_data(&self) -> TypedDataPayload {
        let fields = |list: &[(&str, &str)]| -> Vec<TypedField> {
            list.iter()
                .map(|(name, kind)| TypedField {
                    name: name.to_string(),
                    kind: kind.to_string(),
                })
                .collect()
        };
        let mut types = BTreeMap::new();
        types.insert(EIP712_DOMAIN_TYPE.to_string(), fields(DOMAIN_FIELDS));
        types.insert(FUND_POLL_PRIMARY_TYPE.to_string(), fields(FUND_POLL_FIELDS));

        let message = json!({
            "owner": format!("{:?}", self.owner),
            "planId": format!("{:?}", plan_id_word(&self.plan_id)),
            "pollFactory": format!("{:?}", self.poll_factory),
            "totalRequired": self.total_required.to_string(),
            "fundAmount": self.fund_amount.to_string(),
            "nonce": self.nonce.to_string(),
        });

        TypedDataPayload {
            domain: WireDomain {
                name: self.domain.name.clone(),
                version: self.domain.version.clone(),
                chain_id: json!(self.domain.chain_id),
                verifying_contract: format!("{:?}", self.domain.verifying_contract),
            },
            types,
            primary_type: Some(FUND_POLL_PRIMARY_TYPE.to_string()),
            message: match message {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    }

    pub fn with_signature(self, signature: Signature) -> FundingAuthorization {
        FundingAuthorization {
            terms: self,
            signature,
        }
    }
}

/// 已签名的注资授权
#[derive(Debug, Clone)]
pub struct FundingAuthorization {
    pub terms: FundingTerms,
    pub signature: Signature,
}

impl FundingAuthorization {
    pub fn recover_signer(&self) -> Result<Address, SignatureError> {
        self.signature
            .recover(self.terms.signing_digest())
            .map_err(|_| SignatureError::InvalidSignature)
    }
}

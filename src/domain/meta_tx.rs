//! 元交易（EIP-712 类型化签名）领域模型
//!
//! 支持两种动作：
//! - `Vote(address voter,uint256 option,uint256 nonce)`
//! - `ClaimReward(address claimer,uint256 nonce)`
//!
//! 摘要 = keccak256(0x1901 ‖ domainSeparator ‖ structHash)，验证合约固定为目标投票合约

use std::{collections::BTreeMap, str::FromStr};

use ethers::{
    abi::{self, Token},
    types::{transaction::eip712::EIP712Domain, Address, Signature, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{RelayError, SignatureError};

pub const EIP712_DOMAIN_TYPE: &str = "EIP712Domain";

const VOTE_TYPE: &str = "Vote(address voter,uint256 option,uint256 nonce)";
const CLAIM_REWARD_TYPE: &str = "ClaimReward(address claimer,uint256 nonce)";

const VOTE_FIELDS: &[(&str, &str)] = &[
    ("voter", "address"),
    ("option", "uint256"),
    ("nonce", "uint256"),
];
const CLAIM_REWARD_FIELDS: &[(&str, &str)] = &[("claimer", "address"), ("nonce", "uint256")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ActionType {
    Vote,
    ClaimReward,
}

impl ActionType {
    pub fn primary_type(&self) -> &'static str {
        match self {
            ActionType::Vote => "Vote",
            ActionType::ClaimReward => "ClaimReward",
        }
    }

    pub fn from_primary_type(name: &str) -> Result<Self, SignatureError> {
        match name {
            "Vote" => Ok(ActionType::Vote),
            "ClaimReward" => Ok(ActionType::ClaimReward),
            other => Err(SignatureError::UnknownAction(other.to_string())),
        }
    }

    /// 规范字段列表（名称、类型、顺序都必须一致）
    pub fn canonical_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ActionType::Vote => VOTE_FIELDS,
            ActionType::ClaimReward => CLAIM_REWARD_FIELDS,
        }
    }

    pub fn type_string(&self) -> &'static str {
        match self {
            ActionType::Vote => VOTE_TYPE,
            ActionType::ClaimReward => CLAIM_REWARD_TYPE,
        }
    }

    pub fn type_hash(&self) -> [u8; 32] {
        keccak256(self.type_string())
    }
}

/// 动作负载（签名者地址与 nonce 由请求本身携带）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Vote { option: U256 },
    ClaimReward,
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionPayload::Vote { .. } => ActionType::Vote,
            ActionPayload::ClaimReward => ActionType::ClaimReward,
        }
    }
}

/// EIP-712 域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl SigningDomain {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> [u8; 32] {
        EIP712Domain {
            name: Some(self.name.clone()),
            version: Some(self.version.clone()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(self.verifying_contract),
            salt: None,
        }
        .separator()
    }
}

/// 一次用户动作的签名请求，验证成功后 nonce 被消费
#[derive(Debug, Clone)]
pub struct MetaTransactionRequest {
    pub signer: Address,
    pub payload: ActionPayload,
    pub nonce: u64,
    pub signature: Signature,
    pub domain: SigningDomain,
}

impl MetaTransactionRequest {
    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }

    pub fn verifying_contract(&self) -> Address {
        self.domain.verifying_contract
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        let action = self.action_type();
        let mut tokens = vec![
            Token::FixedBytes(action.type_hash().to_vec()),
            Token::Address(self.signer),
        ];
        if let ActionPayload::Vote { option } = &self.payload {
            tokens.push(Token::Uint(*option));
        }
        tokens.push(Token::Uint(U256::from(self.nonce)));
        keccak256(abi::encode(&tokens))
    }

    pub fn signing_digest(&self) -> H256 {
        signing_digest(&self.domain, self.struct_hash())
    }

    /// 从签名中恢复地址（纯计算，不访问网络）
    pub fn recover_signer(&self) -> Result<Address, SignatureError> {
        self.signature
            .recover(self.signing_digest())
            .map_err(|_| SignatureError::InvalidSignature)
    }
}

pub fn signing_digest(domain: &SigningDomain, struct_hash: [u8; 32]) -> H256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(&domain.separator());
    buf.extend_from_slice(&struct_hash);
    H256::from(keccak256(buf))
}

/// 解析 65 字节 (r, s, v) 十六进制签名
pub fn parse_signature(raw: &str) -> Result<Signature, SignatureError> {
    let stripped = raw.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped).map_err(|_| SignatureError::InvalidSignature)?;
    if bytes.len() != 65 {
        return Err(SignatureError::InvalidSignature);
    }
    Signature::try_from(bytes.as_slice()).map_err(|_| SignatureError::InvalidSignature)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 线上格式
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WireDomain {
    pub name: String,
    pub version: String,
    #[schema(value_type = u64)]
    pub chain_id: serde_json::Value,
    pub verifying_contract: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataPayload {
    pub domain: WireDomain,
    pub types: BTreeMap<String, Vec<TypedField>>,
    #[serde(default)]
    pub primary_type: Option<String>,
    #[schema(value_type = Object)]
    pub message: serde_json::Map<String, serde_json::Value>,
}

/// 前端提交的签名信封：`{ typedData, signature }`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    pub typed_data: TypedDataPayload,
    pub signature: String,
}

impl SignedEnvelope {
    /// 校验线上格式并转换为规范请求
    ///
    /// - `types` 必须与规范结构完全一致，否则 `UnknownAction`
    /// - 域与配置不一致时签名必然无法通过，直接返回 `InvalidSignature`
    pub fn into_request(self, expected: &SigningDomain) -> Result<MetaTransactionRequest, RelayError> {
        let TypedDataPayload {
            domain,
            types,
            primary_type,
            message,
        } = self.typed_data;

        let action = resolve_action(primary_type.as_deref(), &types)?;
        check_schema(action, &types)?;

        let chain_id = parse_u64(&domain.chain_id)
            .ok_or_else(|| RelayError::InvalidRequest("domain.chainId is not a number".into()))?;
        let verifying_contract = parse_address(&domain.verifying_contract, "domain.verifyingContract")?;
        if domain.name != expected.name
            || domain.version != expected.version
            || chain_id != expected.chain_id
            || verifying_contract != expected.verifying_contract
        {
            return Err(SignatureError::InvalidSignature.into());
        }

        let nonce_value = message
            .get("nonce")
            .ok_or_else(|| RelayError::InvalidRequest("message.nonce is missing".into()))?;
        let nonce = parse_u64(nonce_value)
            .ok_or_else(|| RelayError::InvalidRequest("message.nonce is not a u64".into()))?;

        let (signer, payload) = match action {
            ActionType::Vote => {
                let voter = message_address(&message, "voter")?;
                let option = message
                    .get("option")
                    .and_then(parse_u256)
                    .ok_or_else(|| RelayError::InvalidRequest("message.option is invalid".into()))?;
                (voter, ActionPayload::Vote { option })
            }
            ActionType::ClaimReward => {
                (message_address(&message, "claimer")?, ActionPayload::ClaimReward)
            }
        };

        Ok(MetaTransactionRequest {
            signer,
            payload,
            nonce,
            signature: parse_signature(&self.signature)?,
            domain: expected.clone(),
        })
    }
}

fn resolve_action(
    primary_type: Option<&str>,
    types: &BTreeMap<String, Vec<TypedField>>,
) -> Result<ActionType, SignatureError> {
    if let Some(name) = primary_type {
        return ActionType::from_primary_type(name);
    }
    let mut candidates = types.keys().filter(|k| k.as_str() != EIP712_DOMAIN_TYPE);
    match (candidates.next(), candidates.next()) {
        (Some(name), None) => ActionType::from_primary_type(name),
        _ => Err(SignatureError::UnknownAction(
            "cannot infer primary type".to_string(),
        )),
    }
}

fn check_schema(
    action: ActionType,
    types: &BTreeMap<String, Vec<TypedField>>,
) -> Result<(), SignatureError> {
    // 除 EIP712Domain 外只允许出现规范类型本身
    if types
        .keys()
        .any(|k| k != EIP712_DOMAIN_TYPE && k != action.primary_type())
    {
        return Err(SignatureError::UnknownAction(
            "unexpected auxiliary types".to_string(),
        ));
    }
    let fields = types
        .get(action.primary_type())
        .ok_or_else(|| SignatureError::UnknownAction(action.primary_type().to_string()))?;
    let canonical = action.canonical_fields();
    let matches = fields.len() == canonical.len()
        && fields
            .iter()
            .zip(canonical.iter())
            .all(|(f, (name, kind))| f.name == *name && f.kind == *kind);
    if !matches {
        return Err(SignatureError::UnknownAction(format!(
            "{} schema mismatch",
            action.primary_type()
        )));
    }
    Ok(())
}

fn parse_address(raw: &str, field: &str) -> Result<Address, RelayError> {
    Address::from_str(raw.trim())
        .map_err(|_| RelayError::InvalidRequest(format!("{} is not an address", field)))
}

fn message_address(
    message: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<Address, RelayError> {
    let raw = message
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RelayError::InvalidRequest(format!("message.{} is missing", field)))?;
    parse_address(raw, &format!("message.{}", field))
}

/// 接受 JSON 数字、十进制字符串或 0x 十六进制字符串
pub fn parse_u256(value: &serde_json::Value) -> Option<U256> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(U256::from),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Some(hex_part) = s.strip_prefix("0x") {
                U256::from_str_radix(hex_part, 16).ok()
            } else {
                U256::from_dec_str(s).ok()
            }
        }
        _ => None,
    }
}

pub fn parse_u64(value: &serde_json::Value) -> Option<u64> {
    let v = parse_u256(value)?;
    if v > U256::from(u64::MAX) {
        return None;
    }
    Some(v.as_u64())
}

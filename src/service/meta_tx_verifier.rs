//! 元交易验证器
//!
//! 恢复签名地址 → 与 signer 比较 → 在注册表中消费 nonce
//!
//! 注资授权使用独立的注册表，key 为 (智能钱包, 所有者)

use std::{sync::Arc, time::Duration};

use ethers::types::Address;

use crate::{
    config::SigningConfig,
    domain::{FundingAuthorization, MetaTransactionRequest, SigningDomain},
    error::{RelayError, SignatureError},
    service::nonce_registry::{NonceLease, NonceRegistry},
};

/// 已通过验证的请求，持有 nonce 租约直到交易交给网络
#[derive(Debug)]
pub struct VerifiedRequest {
    pub request: MetaTransactionRequest,
    pub lease: NonceLease,
}

pub struct MetaTxVerifier {
    registry: Arc<NonceRegistry>,
    authorizations: Arc<NonceRegistry>,
    signing: SigningConfig,
    chain_id: u64,
    nonce_wait: Duration,
}

impl MetaTxVerifier {
    pub fn new(
        registry: Arc<NonceRegistry>,
        authorizations: Arc<NonceRegistry>,
        signing: SigningConfig,
        chain_id: u64,
        nonce_wait: Duration,
    ) -> Self {
        Self {
            registry,
            authorizations,
            signing,
            chain_id,
            nonce_wait,
        }
    }

    pub fn registry(&self) -> &Arc<NonceRegistry> {
        &self.registry
    }

    /// 某个投票合约的签名域
    pub fn domain_for(&self, poll: Address) -> SigningDomain {
        SigningDomain::new(
            self.signing.domain_name.clone(),
            self.signing.domain_version.clone(),
            self.chain_id,
            poll,
        )
    }

    /// 只校验签名（不触碰 nonce）
    pub fn authenticate(&self, request: &MetaTransactionRequest) -> Result<(), RelayError> {
        if request.domain.chain_id != self.chain_id {
            return Err(SignatureError::InvalidSignature.into());
        }
        let recovered = request.recover_signer()?;
        // Address 按字节比较，天然大小写无关
        if recovered != request.signer {
            tracing::info!(
                signer = ?request.signer,
                recovered = ?recovered,
                action = request.action_type().primary_type(),
                "signature does not match signer"
            );
            return Err(SignatureError::InvalidSignature.into());
        }
        Ok(())
    }

    /// 签名校验通过后原子地消费 nonce
    pub async fn verify(&self, request: MetaTransactionRequest) -> Result<VerifiedRequest, RelayError> {
        self.authenticate(&request)?;
        let lease = self
            .registry
            .consume(
                request.verifying_contract(),
                request.signer,
                request.nonce,
                self.nonce_wait,
            )
            .await?;
        tracing::info!(
            signer = ?request.signer,
            contract = ?request.verifying_contract(),
            nonce = request.nonce,
            action = request.action_type().primary_type(),
            "meta-transaction accepted"
        );
        Ok(VerifiedRequest { request, lease })
    }

    /// 下一个注资授权 nonce
    pub async fn next_funding_nonce(&self, wallet: Address, owner: Address) -> Result<u64, RelayError> {
        self.authorizations.next_nonce(wallet, owner).await
    }

    /// 只校验所有者签名（不触碰 nonce）
    pub fn authenticate_funding(&self, auth: &FundingAuthorization) -> Result<(), RelayError> {
        let terms = &auth.terms;
        if terms.domain.chain_id != self.chain_id {
            return Err(SignatureError::InvalidSignature.into());
        }
        let recovered = auth.recover_signer()?;
        if recovered != terms.owner {
            tracing::info!(
                owner = ?terms.owner,
                recovered = ?recovered,
                plan_id = %terms.plan_id,
                "funding authorization not signed by owner"
            );
            return Err(SignatureError::InvalidSignature.into());
        }
        Ok(())
    }

    /// 所有者签名校验通过后消费注资授权 nonce
    pub async fn verify_funding(&self, auth: &FundingAuthorization) -> Result<NonceLease, RelayError> {
        self.authenticate_funding(auth)?;
        let terms = &auth.terms;
        let lease = self
            .authorizations
            .consume(
                terms.domain.verifying_contract,
                terms.owner,
                terms.nonce,
                self.nonce_wait,
            )
            .await?;
        tracing::info!(
            owner = ?terms.owner,
            wallet = ?terms.domain.verifying_contract,
            plan_id = %terms.plan_id,
            nonce = terms.nonce,
            "funding authorization accepted"
        );
        Ok(lease)
    }
}

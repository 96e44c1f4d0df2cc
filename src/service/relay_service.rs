//! 中继服务门面
//!
//! 对外暴露的全部操作：地址派生、部署、nonce 查询、签名投票 / 领奖、注资规划与执行、结果查询

use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use uuid::Uuid;

use crate::{
    config::Config,
    domain::{
        meta_tx::parse_signature, ActionPayload, ActionType, MetaTransactionRequest, RelayResult,
        RewardLedgerEntry, SignedEnvelope, SmartWallet, TokenAmount,
    },
    error::{RelayError, SignatureError},
    infrastructure::chain_client::ChainClient,
    service::{
        address_deriver::AddressDeriver,
        deployment_manager::{DeploymentManager, DeploymentOutcome},
        fee_policy_engine::FeePolicyEngine,
        meta_tx_verifier::MetaTxVerifier,
        nonce_registry::NonceRegistry,
        relay_dispatcher::RelayDispatcher,
        relay_journal::{JournalEntry, RelayJournal},
        reward_ledger::RewardLedger,
        settlement_orchestrator::{FundingExecution, FundingPlan, SettlementOrchestrator},
        transaction_retry::{RetryConfig, TransactionRetrier},
    },
};

/// 按字段提交的签名投票
#[derive(Debug, Clone)]
pub struct VoteSubmission {
    pub poll: Address,
    pub option: U256,
    pub signer: Address,
    pub nonce: u64,
    pub signature: String,
}

/// 按字段提交的签名领奖
#[derive(Debug, Clone)]
pub struct ClaimSubmission {
    pub poll: Address,
    pub signer: Address,
    pub nonce: u64,
    pub signature: String,
}

pub struct RelayService {
    config: Arc<Config>,
    client: Arc<dyn ChainClient>,
    fees: Arc<FeePolicyEngine>,
    deployments: Arc<DeploymentManager>,
    verifier: Arc<MetaTxVerifier>,
    dispatcher: Arc<RelayDispatcher>,
    settlement: Arc<SettlementOrchestrator>,
    ledger: Arc<RewardLedger>,
    journal: Arc<RelayJournal>,
}

impl RelayService {
    /// 按配置装配所有组件
    pub fn new(config: Arc<Config>, client: Arc<dyn ChainClient>) -> Self {
        let journal = Arc::new(RelayJournal::new());
        let fees = Arc::new(FeePolicyEngine::new(client.clone(), config.fees.clone()));
        let retrier = Arc::new(TransactionRetrier::new(
            client.clone(),
            fees.clone(),
            RetryConfig {
                max_attempts: config.relay.max_attempts.max(1),
                initial_backoff: std::time::Duration::from_millis(config.relay.initial_backoff_ms),
                backoff_multiplier: config.relay.backoff_multiplier,
                gas_price_bump_percent: config.fees.retry_bump_percent,
            },
        ));

        let deriver = Arc::new(AddressDeriver::new(
            client.clone(),
            config.chain.wallet_factory_address,
        ));
        let deployments = Arc::new(DeploymentManager::new(
            client.clone(),
            deriver,
            retrier.clone(),
            journal.clone(),
            config.deployment.clone(),
            &config.relay,
        ));

        let registry = Arc::new(NonceRegistry::new(
            client.clone(),
            config.relay.seed_nonces_from_chain,
        ));
        // 注资授权 nonce 只在本地计数（钱包可能尚未部署）
        let authorizations = Arc::new(NonceRegistry::new(client.clone(), false));
        let verifier = Arc::new(MetaTxVerifier::new(
            registry,
            authorizations,
            config.signing.clone(),
            config.chain.chain_id,
            config.relay.nonce_wait(),
        ));

        let dispatcher = Arc::new(RelayDispatcher::new(
            client.clone(),
            retrier,
            journal.clone(),
            &config.relay,
        ));
        let settlement = Arc::new(SettlementOrchestrator::new(
            client.clone(),
            deployments.clone(),
            dispatcher.clone(),
            verifier.clone(),
            config.chain.reward_token_address,
            config.settlement.clone(),
        ));
        let ledger = Arc::new(RewardLedger::new(
            client.clone(),
            journal.clone(),
            config.settlement.platform_fee_bps,
        ));

        Self {
            config,
            client,
            fees,
            deployments,
            verifier,
            dispatcher,
            settlement,
            ledger,
            journal,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn relayer_address(&self) -> Address {
        self.client.relayer_address()
    }

    pub fn fees(&self) -> &Arc<FeePolicyEngine> {
        &self.fees
    }

    /// 钱包地址与当前部署状态
    pub async fn get_wallet_address(&self, owner: Address) -> Result<SmartWallet, RelayError> {
        self.deployments.wallet_status(owner).await
    }

    pub async fn deploy_if_needed(&self, owner: Address) -> Result<DeploymentOutcome, RelayError> {
        self.deployments.deploy_if_needed(owner).await
    }

    pub async fn get_nonce(&self, contract: Address, signer: Address) -> Result<u64, RelayError> {
        self.verifier.registry().next_nonce(contract, signer).await
    }

    pub async fn submit_vote(&self, vote: VoteSubmission) -> Result<RelayResult, RelayError> {
        let request = MetaTransactionRequest {
            signer: vote.signer,
            payload: ActionPayload::Vote {
                option: vote.option,
            },
            nonce: vote.nonce,
            signature: parse_signature(&vote.signature)?,
            domain: self.verifier.domain_for(vote.poll),
        };
        self.submit(request).await
    }

    pub async fn submit_claim(&self, claim: ClaimSubmission) -> Result<RelayResult, RelayError> {
        let request = MetaTransactionRequest {
            signer: claim.signer,
            payload: ActionPayload::ClaimReward,
            nonce: claim.nonce,
            signature: parse_signature(&claim.signature)?,
            domain: self.verifier.domain_for(claim.poll),
        };
        self.submit(request).await
    }

    /// 提交前端的类型化签名信封；动作类型必须与端点一致
    pub async fn submit_signed(
        &self,
        poll: Address,
        expected: ActionType,
        envelope: SignedEnvelope,
    ) -> Result<RelayResult, RelayError> {
        let request = envelope.into_request(&self.verifier.domain_for(poll))?;
        if request.action_type() != expected {
            return Err(SignatureError::UnknownAction(format!(
                "{} is not accepted here",
                request.action_type().primary_type()
            ))
            .into());
        }
        self.submit(request).await
    }

    /// 签名 → nonce 预检 → 部署钱包 → 消费 nonce → 中继
    ///
    /// 签名与 nonce 错误返回 `Err`；链上 revert 作为 `Ok(RelayResult)` 返回
    async fn submit(&self, request: MetaTransactionRequest) -> Result<RelayResult, RelayError> {
        self.verifier.authenticate(&request)?;
        self.verifier
            .registry()
            .precheck(request.verifying_contract(), request.signer, request.nonce)
            .await?;

        self.deployments.deploy_if_needed(request.signer).await?;

        let poll = request.verifying_contract();
        let signer = request.signer;
        let action = request.action_type();

        let verified = self.verifier.verify(request).await?;
        let result = self.dispatcher.relay(verified).await;

        if action == ActionType::ClaimReward {
            self.ledger.record_claim(poll, signer, &result).await;
        }
        Ok(result)
    }

    pub async fn plan_poll_funding(
        &self,
        owner: Address,
        poll_factory: Address,
        reward_per_voter: TokenAmount,
        vote_limit: u64,
        fund_amount: Option<TokenAmount>,
    ) -> Result<FundingPlan, RelayError> {
        self.settlement
            .plan_poll_funding(owner, poll_factory, reward_per_voter, vote_limit, fund_amount)
            .await
    }

    pub fn funding_plan(&self, plan_id: &Uuid) -> Option<FundingPlan> {
        self.settlement.plan(plan_id)
    }

    /// 执行此前生成的计划；`signature` 为所有者对计划中 `authorization` 的签名
    pub async fn execute_poll_funding(
        &self,
        plan_id: Uuid,
        signature: &str,
    ) -> Result<FundingExecution, RelayError> {
        self.settlement.execute(plan_id, signature).await
    }

    pub fn relay_result(&self, tx_hash: &H256) -> Option<JournalEntry> {
        self.journal.get(tx_hash)
    }

    pub fn reward_entry(&self, poll: Address, voter: Address) -> Option<RewardLedgerEntry> {
        self.ledger.get(poll, voter)
    }

    pub fn journal(&self) -> &Arc<RelayJournal> {
        self.dispatcher.journal()
    }
}

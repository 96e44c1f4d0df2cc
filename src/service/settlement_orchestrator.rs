//! 奖励投票注资编排
//!
//! totalReward = rewardPerVoter × voteLimit
//! platformFee = totalReward × feeBps / 10000
//! totalRequired = (fundAmount 或 totalReward) + platformFee
//!
//! 两步严格按序执行：授权（钱包 approve 工厂）→ 创建并注资。
//! 规划阶段余额不足直接本地拒绝，不发出任何交易。
//!
//! 执行需要钱包所有者对计划签名（EIP-712 `FundPoll`）；计划只能执行一次，过期作废。
//! 投票工厂必须在白名单内。

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{Address, Bytes, U256},
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::SettlementConfig,
    contracts::{ApproveCall, BalanceOfCall, CreateFundedPollCall, ExecuteCall},
    domain::{
        meta_tx::{parse_signature, TypedDataPayload},
        FundingTerms, RelayResult, TokenAmount,
    },
    error::{RelayError, StateError},
    infrastructure::chain_client::{CallRequest, ChainClient},
    service::{
        address_deriver::AddressDeriver, deployment_manager::DeploymentManager,
        meta_tx_verifier::MetaTxVerifier, relay_dispatcher::RelayDispatcher,
    },
};

/// 注资费用拆分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundingCosts {
    #[schema(value_type = String)]
    pub total_reward: TokenAmount,
    /// 实际注入奖池的金额（默认等于 totalReward）
    #[schema(value_type = String)]
    pub fund_amount: TokenAmount,
    #[schema(value_type = String)]
    pub platform_fee: TokenAmount,
    #[schema(value_type = String)]
    pub total_required: TokenAmount,
    pub fee_bps: u32,
}

impl FundingCosts {
    pub fn compute(
        reward_per_voter: TokenAmount,
        vote_limit: u64,
        fund_amount: Option<TokenAmount>,
        fee_bps: u32,
    ) -> Result<Self, RelayError> {
        if reward_per_voter.is_zero() {
            return Err(RelayError::InvalidAmount(
                "rewardPerVoter must be positive".into(),
            ));
        }
        if vote_limit == 0 {
            return Err(RelayError::InvalidAmount("voteLimit must be positive".into()));
        }

        let total_reward = reward_per_voter
            .checked_mul_u64(vote_limit)
            .ok_or_else(|| RelayError::InvalidAmount("total reward overflows".into()))?;
        let fund = match fund_amount {
            Some(f) if f < total_reward => {
                return Err(RelayError::InvalidAmount(format!(
                    "fundAmount {} is below total reward {}",
                    f, total_reward
                )))
            }
            Some(f) => f,
            None => total_reward,
        };
        let platform_fee = total_reward.mul_bps(fee_bps);
        let total_required = fund
            .checked_add(platform_fee)
            .ok_or_else(|| RelayError::InvalidAmount("total required overflows".into()))?;

        Ok(Self {
            total_reward,
            fund_amount: fund,
            platform_fee,
            total_required,
            fee_bps,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum FundingStepKind {
    TokenApproval,
    PollFunding,
}

/// 由智能钱包执行的一次外部调用（`execute(target, 0, data)`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCall {
    pub kind: FundingStepKind,
    /// 交易的 to：智能钱包
    #[schema(value_type = String)]
    pub target: Address,
    /// 钱包内部调用的目标合约
    #[schema(value_type = String)]
    pub inner_target: Address,
    #[schema(value_type = String)]
    pub data: Bytes,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundingPlan {
    #[schema(value_type = String)]
    pub plan_id: Uuid,
    #[schema(value_type = String)]
    pub owner: Address,
    #[schema(value_type = String)]
    pub wallet: Address,
    #[schema(value_type = String)]
    pub poll_factory: Address,
    #[schema(value_type = String)]
    pub reward_token: Address,
    #[schema(value_type = String)]
    pub reward_per_voter: TokenAmount,
    pub vote_limit: u64,
    pub costs: FundingCosts,
    #[schema(value_type = String)]
    pub balance: TokenAmount,
    /// 按序执行：先授权，后注资
    pub steps: Vec<PlannedCall>,
    /// 所有者需签名的 `FundPoll` 类型化数据
    pub authorization: TypedDataPayload,
    pub authorization_nonce: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundingExecution {
    #[schema(value_type = String)]
    pub plan_id: Uuid,
    pub approval: RelayResult,
    /// 授权未确认时为空
    pub funding: Option<RelayResult>,
}

pub struct SettlementOrchestrator {
    client: Arc<dyn ChainClient>,
    deriver: Arc<AddressDeriver>,
    deployments: Arc<DeploymentManager>,
    dispatcher: Arc<RelayDispatcher>,
    verifier: Arc<MetaTxVerifier>,
    reward_token: Option<Address>,
    settings: SettlementConfig,
    plans: DashMap<Uuid, FundingPlan>,
}

impl SettlementOrchestrator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        deployments: Arc<DeploymentManager>,
        dispatcher: Arc<RelayDispatcher>,
        verifier: Arc<MetaTxVerifier>,
        reward_token: Option<Address>,
        settings: SettlementConfig,
    ) -> Self {
        Self {
            client,
            deriver: deployments.deriver().clone(),
            deployments,
            dispatcher,
            verifier,
            reward_token,
            settings,
            plans: DashMap::new(),
        }
    }

    fn ensure_factory_allowed(&self, poll_factory: Address) -> Result<(), RelayError> {
        if self.settings.allowed_poll_factories.is_empty() {
            return Err(RelayError::config("no poll factory is allowlisted"));
        }
        if !self.settings.is_factory_allowed(poll_factory) {
            tracing::warn!(poll_factory = ?poll_factory, "poll factory not allowlisted");
            return Err(RelayError::InvalidRequest(format!(
                "poll factory {:?} is not allowlisted",
                poll_factory
            )));
        }
        Ok(())
    }

    fn terms(&self, plan: &FundingPlan) -> FundingTerms {
        FundingTerms {
            owner: plan.owner,
            plan_id: plan.plan_id,
            poll_factory: plan.poll_factory,
            total_required: plan.costs.total_required.base_units(),
            fund_amount: plan.costs.fund_amount.base_units(),
            nonce: plan.authorization_nonce,
            domain: self.verifier.domain_for(plan.wallet),
        }
    }

    fn prune_expired(&self, now: DateTime<Utc>) {
        let before = self.plans.len();
        self.plans.retain(|_, plan| plan.expires_at > now);
        let pruned = before.saturating_sub(self.plans.len());
        if pruned > 0 {
            tracing::debug!(pruned, "expired funding plans dropped");
        }
    }

    fn reward_token(&self) -> Result<Address, RelayError> {
        self.reward_token
            .ok_or_else(|| RelayError::config("reward token address is not configured"))
    }

    async fn token_balance(&self, token: Address, wallet: Address) -> Result<TokenAmount, RelayError> {
        let data = BalanceOfCall { account: wallet }.encode();
        let raw = self
            .client
            .call(&CallRequest::new(token, data))
            .await
            .map_err(|e| e.into_read_error("token.balanceOf"))?;
        let units = U256::decode(raw.as_ref()).map_err(|e| {
            tracing::error!(token = ?token, error = %e, "undecodable balanceOf result");
            RelayError::config("reward token returned malformed balance")
        })?;
        Ok(TokenAmount::from_base_units(units))
    }

    fn ensure_covered(balance: TokenAmount, required: TokenAmount) -> Result<(), RelayError> {
        if balance < required {
            return Err(StateError::InsufficientBalance {
                required: required.to_string(),
                available: balance.to_string(),
                shortfall: required.saturating_sub(balance).to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// 生成两步注资计划（只读，不发交易）
    pub async fn plan_poll_funding(
        &self,
        owner: Address,
        poll_factory: Address,
        reward_per_voter: TokenAmount,
        vote_limit: u64,
        fund_amount: Option<TokenAmount>,
    ) -> Result<FundingPlan, RelayError> {
        self.ensure_factory_allowed(poll_factory)?;
        let costs = FundingCosts::compute(
            reward_per_voter,
            vote_limit,
            fund_amount,
            self.settings.platform_fee_bps,
        )?;
        let token = self.reward_token()?;
        let wallet = self.deriver.derive(owner).await?;

        let balance = self.token_balance(token, wallet).await?;
        if let Err(e) = Self::ensure_covered(balance, costs.total_required) {
            tracing::info!(owner = ?owner, wallet = ?wallet, error = %e, "poll funding rejected");
            return Err(e);
        }

        let authorization_nonce = self.verifier.next_funding_nonce(wallet, owner).await?;
        let created_at = Utc::now();
        let ttl = ChronoDuration::from_std(self.settings.plan_ttl())
            .unwrap_or_else(|_| ChronoDuration::seconds(900));

        let plan_id = Uuid::new_v4();
        let authorization = FundingTerms {
            owner,
            plan_id,
            poll_factory,
            total_required: costs.total_required.base_units(),
            fund_amount: costs.fund_amount.base_units(),
            nonce: authorization_nonce,
            domain: self.verifier.domain_for(wallet),
        }
        .typed_data();

        let plan = FundingPlan {
            plan_id,
            owner,
            wallet,
            poll_factory,
            reward_token: token,
            reward_per_voter,
            vote_limit,
            costs,
            balance,
            steps: build_steps(wallet, token, poll_factory, reward_per_voter, vote_limit, &costs),
            authorization,
            authorization_nonce,
            created_at,
            expires_at: created_at + ttl,
        };
        tracing::info!(
            plan_id = %plan.plan_id,
            owner = ?owner,
            total_required = %costs.total_required,
            expires_at = %plan.expires_at,
            "poll funding planned"
        );
        self.prune_expired(created_at);
        self.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    pub fn plan(&self, plan_id: &Uuid) -> Option<FundingPlan> {
        self.plans
            .get(plan_id)
            .filter(|p| p.expires_at > Utc::now())
            .map(|p| p.clone())
    }

    /// 校验所有者授权并取走计划，然后执行
    ///
    /// 签名无效时计划保留；取走是原子的，同一计划并发执行只有一个成功
    pub async fn execute(&self, plan_id: Uuid, signature: &str) -> Result<FundingExecution, RelayError> {
        let unknown = || RelayError::InvalidRequest(format!("unknown funding plan {}", plan_id));
        let plan = self.plans.get(&plan_id).map(|p| p.clone()).ok_or_else(unknown)?;

        if plan.expires_at <= Utc::now() {
            self.plans.remove(&plan_id);
            tracing::info!(plan_id = %plan_id, "funding plan expired");
            return Err(RelayError::InvalidRequest(format!(
                "funding plan {} has expired",
                plan_id
            )));
        }
        self.ensure_factory_allowed(plan.poll_factory)?;

        let authorization = self.terms(&plan).with_signature(parse_signature(signature)?);
        self.verifier.authenticate_funding(&authorization)?;

        let Some((_, plan)) = self.plans.remove(&plan_id) else {
            return Err(unknown());
        };
        // 计划已取走；nonce 随之前移
        drop(self.verifier.verify_funding(&authorization).await?);

        self.run(&plan).await
    }

    /// 部署 → 余额复查 → 授权（必须确认）→ 注资
    async fn run(&self, plan: &FundingPlan) -> Result<FundingExecution, RelayError> {
        self.deployments.deploy_if_needed(plan.owner).await?;

        let balance = self.token_balance(plan.reward_token, plan.wallet).await?;
        Self::ensure_covered(balance, plan.costs.total_required)?;

        // calldata 始终由计划参数重新生成
        let steps = build_steps(
            plan.wallet,
            plan.reward_token,
            plan.poll_factory,
            plan.reward_per_voter,
            plan.vote_limit,
            &plan.costs,
        );
        let mut steps = steps.into_iter();
        let (Some(approval_step), Some(funding_step)) = (steps.next(), steps.next()) else {
            return Err(RelayError::InvalidRequest("funding plan has no steps".into()));
        };

        let approval = self
            .dispatcher
            .dispatch_call("token_approval", approval_step.target, approval_step.data.to_vec())
            .await;
        if !approval.is_confirmed() {
            tracing::warn!(plan_id = %plan.plan_id, status = ?approval.status, "approval not confirmed, funding skipped");
            return Ok(FundingExecution {
                plan_id: plan.plan_id,
                approval,
                funding: None,
            });
        }

        let funding = self
            .dispatcher
            .dispatch_call("poll_funding", funding_step.target, funding_step.data.to_vec())
            .await;
        tracing::info!(plan_id = %plan.plan_id, status = ?funding.status, "poll funding executed");
        Ok(FundingExecution {
            plan_id: plan.plan_id,
            approval,
            funding: Some(funding),
        })
    }
}

fn build_steps(
    wallet: Address,
    token: Address,
    poll_factory: Address,
    reward_per_voter: TokenAmount,
    vote_limit: u64,
    costs: &FundingCosts,
) -> Vec<PlannedCall> {
    let approve = ApproveCall {
        spender: poll_factory,
        amount: costs.total_required.base_units(),
    }
    .encode();
    let create = CreateFundedPollCall {
        reward_token: token,
        reward_per_voter: reward_per_voter.base_units(),
        vote_limit: U256::from(vote_limit),
        fund_amount: costs.fund_amount.base_units(),
    }
    .encode();

    vec![
        PlannedCall {
            kind: FundingStepKind::TokenApproval,
            target: wallet,
            inner_target: token,
            data: wallet_execute(token, approve),
            description: format!("approve {} for poll factory", costs.total_required),
        },
        PlannedCall {
            kind: FundingStepKind::PollFunding,
            target: wallet,
            inner_target: poll_factory,
            data: wallet_execute(poll_factory, create),
            description: format!("create poll funded with {}", costs.fund_amount),
        },
    ]
}

fn wallet_execute(target: Address, data: Vec<u8>) -> Bytes {
    ExecuteCall {
        target,
        value: U256::zero(),
        data: data.into(),
    }
    .encode()
    .into()
}

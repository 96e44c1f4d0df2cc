//! 测试辅助模块
//! 内存链替身 + 服务装配 + 签名工具

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ballot_relay::{
    app_state::AppState,
    config::Config,
    contracts::{
        BalanceOfCall, ClaimRewardBySigCall, CreateAccountCall, GetAddressCall, NoncesCall,
        RewardPerVoterCall, VoteBySigCall,
    },
    domain::{ActionPayload, MetaTransactionRequest, SignedEnvelope, SigningDomain},
    infrastructure::chain_client::{
        CallRequest, ChainClient, ChainError, FeeEstimate, OutgoingTransaction, ReceiptSummary,
    },
    service::{settlement_orchestrator::FundingPlan, RelayService},
};
use ethers::{
    abi::{AbiDecode, AbiEncode},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip712::{Eip712, TypedData},
        Address, Bytes, Signature, H256, U256,
    },
    utils::{id, keccak256},
};
use serde_json::json;

pub const CHAIN_ID: u64 = 31337;
pub const DOMAIN_NAME: &str = "BallotPoll";

// anvil 默认账户
pub const VOTER_KEYS: [&str; 3] = [
    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    "7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
];

pub fn voter(i: usize) -> LocalWallet {
    VOTER_KEYS[i].parse().unwrap()
}

pub fn factory() -> Address {
    Address::repeat_byte(0xfa)
}

pub fn reward_token() -> Address {
    Address::repeat_byte(0x70)
}

pub fn relayer() -> Address {
    Address::repeat_byte(0xee)
}

pub fn poll(i: u8) -> Address {
    Address::repeat_byte(0x40 + i)
}

/// 白名单内的投票工厂
pub fn poll_factory() -> Address {
    Address::repeat_byte(0xbf)
}

/// 模拟工厂的 counterfactual 地址
pub fn wallet_of(owner: Address) -> Address {
    Address::from_slice(&keccak256(owner.as_bytes())[12..])
}

/// 6 位小数代币的整数金额
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::exp10(6)
}

#[derive(Default)]
struct ChainState {
    code: HashSet<Address>,
    balances: HashMap<Address, U256>,
    inactive_polls: HashSet<Address>,
    voted: HashSet<(Address, Address)>,
    receipts: HashMap<H256, ReceiptSummary>,
    sent: Vec<OutgoingTransaction>,
    block: u64,
    failing_sends: u32,
    timed_out_sends: u32,
    dropped_send_responses: u32,
    rejected_sends: u32,
    rejection_message: String,
    fees: Option<FeeEstimate>,
    withhold_receipts: bool,
    refuse_first_receipt_lookup: bool,
    looked_up: HashSet<H256>,
    nonces: HashMap<(Address, Address), u64>,
    reward_per_voter: U256,
}

/// 可编程的内存链
///
/// - 工厂 `getAddress` 返回 `wallet_of(owner)`，`createAccount` 上链后钱包有字节码
/// - 投票合约：未激活的投票 revert `PollInactive()`，重复投票 revert `AlreadyVoted()`，
///   成功的 `voteBySig` / `claimRewardBySig` 前移 `nonces(signer)`
/// - 每笔发送立刻出块并生成成功回执（可暂扣回执）
/// - 可注入发送失败：未广播的传输错误、已上链但超时或断连、节点拒绝
pub struct MockChain {
    state: Mutex<ChainState>,
    sends: AtomicUsize,
    send_delay: Duration,
}

impl MockChain {
    pub fn new() -> Self {
        Self::with_send_delay(Duration::ZERO)
    }

    /// 发送前等待一段时间，放大并发窗口
    pub fn with_send_delay(send_delay: Duration) -> Self {
        let state = ChainState {
            block: 100,
            fees: Some(FeeEstimate {
                max_fee_per_gas: U256::from(30_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_500_000_000u64),
            }),
            reward_per_voter: tokens(2),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            sends: AtomicUsize::new(0),
            send_delay,
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingTransaction> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn mark_deployed(&self, owner: Address) {
        self.state.lock().unwrap().code.insert(wallet_of(owner));
    }

    pub fn is_deployed(&self, owner: Address) -> bool {
        self.state.lock().unwrap().code.contains(&wallet_of(owner))
    }

    pub fn set_balance(&self, holder: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert(holder, amount);
    }

    pub fn deactivate(&self, poll: Address) {
        self.state.lock().unwrap().inactive_polls.insert(poll);
    }

    /// 接下来 n 次发送在广播前断连
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().failing_sends = n;
    }

    /// 接下来 n 次发送上链成功，但调用方看到超时
    pub fn time_out_next_sends(&self, n: u32) {
        self.state.lock().unwrap().timed_out_sends = n;
    }

    /// 接下来 n 次发送上链成功，但响应在传输中丢失
    pub fn drop_next_send_responses(&self, n: u32) {
        self.state.lock().unwrap().dropped_send_responses = n;
    }

    /// 接下来 n 次发送被节点拒绝（不上链）
    pub fn reject_next_sends(&self, n: u32, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.rejected_sends = n;
        state.rejection_message = message.to_string();
    }

    /// 每笔交易的第一次回执查询返回错误，之后正常
    pub fn refuse_first_receipt_lookup(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_first_receipt_lookup = refuse;
    }

    pub fn chain_nonce(&self, poll: Address, signer: Address) -> u64 {
        self.state
            .lock()
            .unwrap()
            .nonces
            .get(&(poll, signer))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_fees(&self, fees: Option<FeeEstimate>) {
        self.state.lock().unwrap().fees = fees;
    }

    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().unwrap().withhold_receipts = withhold;
    }

    fn revert(signature: &str) -> ChainError {
        ChainError::Reverted {
            data: Some(id(signature).to_vec()),
            message: "execution reverted".into(),
        }
    }

    /// 预执行一笔调用；`from` 只在模拟投票时用于区分调用方
    fn simulate(state: &ChainState, to: Address, data: &[u8]) -> Result<Bytes, ChainError> {
        if let Ok(call) = GetAddressCall::decode(data) {
            return Ok(wallet_of(call.owner).encode().into());
        }
        if CreateAccountCall::decode(data).is_ok() {
            return Ok(Bytes::new());
        }
        if let Ok(call) = BalanceOfCall::decode(data) {
            let balance = state.balances.get(&call.account).copied().unwrap_or_default();
            return Ok(balance.encode().into());
        }
        if let Ok(call) = NoncesCall::decode(data) {
            let nonce = state.nonces.get(&(to, call.owner)).copied().unwrap_or(0);
            return Ok(U256::from(nonce).encode().into());
        }
        if RewardPerVoterCall::decode(data).is_ok() {
            return Ok(state.reward_per_voter.encode().into());
        }
        if let Ok(call) = VoteBySigCall::decode(data) {
            if state.inactive_polls.contains(&to) {
                return Err(Self::revert("PollInactive()"));
            }
            if state.voted.contains(&(to, call.voter)) {
                return Err(Self::revert("AlreadyVoted()"));
            }
            return Ok(Bytes::new());
        }
        if ClaimRewardBySigCall::decode(data).is_ok() && state.inactive_polls.contains(&to) {
            return Err(Self::revert("PollInactive()"));
        }
        Ok(Bytes::new())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn relayer_address(&self) -> Address {
        relayer()
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        let state = self.state.lock().unwrap();
        if state.code.contains(&address) {
            Ok(Bytes::from(vec![0x60, 0x80, 0x60, 0x40]))
        } else {
            Ok(Bytes::new())
        }
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let state = self.state.lock().unwrap();
        Self::simulate(&state, request.to, &request.data)
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError> {
        self.state
            .lock()
            .unwrap()
            .fees
            .ok_or_else(|| ChainError::Transport {
                operation: "estimate_fees".into(),
                detail: "fee oracle unavailable".into(),
            })
    }

    async fn send_transaction(&self, tx: &OutgoingTransaction) -> Result<H256, ChainError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(ChainError::Transport {
                operation: "send_transaction".into(),
                detail: "connection reset".into(),
            });
        }
        if state.rejected_sends > 0 {
            state.rejected_sends -= 1;
            return Err(ChainError::Rejected(state.rejection_message.clone()));
        }

        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let success = Self::simulate(&state, tx.to, &tx.data).is_ok();
        if success {
            if let Ok(call) = CreateAccountCall::decode(&tx.data) {
                state.code.insert(wallet_of(call.owner));
            }
            if let Ok(call) = VoteBySigCall::decode(&tx.data) {
                state.voted.insert((tx.to, call.voter));
                *state.nonces.entry((tx.to, call.voter)).or_insert(0) += 1;
            }
            if let Ok(call) = ClaimRewardBySigCall::decode(&tx.data) {
                *state.nonces.entry((tx.to, call.claimer)).or_insert(0) += 1;
            }
        }

        state.block += 1;
        let hash = H256::from_low_u64_be(n as u64);
        let receipt = ReceiptSummary {
            tx_hash: hash,
            success,
            block_number: state.block,
            block_hash: Some(H256::from_low_u64_be(state.block)),
            gas_used: Some(U256::from(90_000u64)),
        };
        state.receipts.insert(hash, receipt);
        state.sent.push(tx.clone());

        // 已上链，但调用方拿不到哈希
        if state.timed_out_sends > 0 {
            state.timed_out_sends -= 1;
            return Err(ChainError::Timeout {
                operation: "send_transaction".into(),
            });
        }
        if state.dropped_send_responses > 0 {
            state.dropped_send_responses -= 1;
            return Err(ChainError::Transport {
                operation: "send_transaction".into(),
                detail: "connection reset".into(),
            });
        }
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.withhold_receipts {
            return Ok(None);
        }
        if state.refuse_first_receipt_lookup && state.looked_up.insert(tx_hash) {
            return Err(ChainError::Rejected("receipt lookup refused".into()));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().block)
    }
}

/// 测试配置：短超时、固定域名
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chain.chain_id = CHAIN_ID;
    config.chain.wallet_factory_address = Some(factory());
    config.chain.reward_token_address = Some(reward_token());
    config.signing.domain_name = DOMAIN_NAME.into();
    config.signing.domain_version = "1".into();
    config.settlement.platform_fee_bps = 600;
    config.settlement.allowed_poll_factories = vec![poll_factory()];
    config.settlement.plan_ttl_secs = 900;

    config.relay.max_attempts = 3;
    config.relay.initial_backoff_ms = 5;
    config.relay.backoff_multiplier = 2.0;
    config.relay.receipt_timeout_ms = 300;
    config.relay.receipt_poll_interval_ms = 10;
    config.relay.follow_up_timeout_ms = 2_000;
    config.relay.nonce_wait_ms = 1_000;
    config.relay.seed_nonces_from_chain = false;

    config.deployment.confirmations = 1;
    config.deployment.settle_delay_ms = 0;
    config.deployment.settle_budget_ms = 50;
    config.deployment.verify_attempts = 2;
    config.deployment.verify_interval_ms = 5;
    config.deployment.lock_timeout_ms = 5_000;
    config
}

pub fn create_test_service(chain: Arc<MockChain>) -> RelayService {
    RelayService::new(Arc::new(test_config()), chain)
}

pub fn create_test_app_state(chain: Arc<MockChain>) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(test_config()), chain))
}

pub fn domain(poll: Address) -> SigningDomain {
    SigningDomain::new(DOMAIN_NAME, "1", CHAIN_ID, poll)
}

fn sign(wallet: &LocalWallet, payload: ActionPayload, poll: Address, nonce: u64) -> Signature {
    let mut req = MetaTransactionRequest {
        signer: wallet.address(),
        payload,
        nonce,
        signature: Signature {
            r: U256::zero(),
            s: U256::zero(),
            v: 27,
        },
        domain: domain(poll),
    };
    req.signature = wallet.sign_hash(req.signing_digest()).unwrap();
    req.signature
}

pub fn signature_hex(sig: &Signature) -> String {
    format!("0x{}", hex::encode(sig.to_vec()))
}

fn wire_domain(poll: Address) -> serde_json::Value {
    json!({
        "name": DOMAIN_NAME,
        "version": "1",
        "chainId": CHAIN_ID,
        "verifyingContract": format!("{:?}", poll),
    })
}

fn domain_types() -> serde_json::Value {
    json!([
        { "name": "name", "type": "string" },
        { "name": "version", "type": "string" },
        { "name": "chainId", "type": "uint256" },
        { "name": "verifyingContract", "type": "address" }
    ])
}

/// 前端格式的签名投票信封
pub fn vote_envelope(wallet: &LocalWallet, poll: Address, option: u64, nonce: u64) -> SignedEnvelope {
    serde_json::from_value(vote_json(wallet, poll, option, nonce)).unwrap()
}

/// 同上，JSON 形式（HTTP 测试直接作为请求体）
pub fn vote_json(wallet: &LocalWallet, poll: Address, option: u64, nonce: u64) -> serde_json::Value {
    let sig = sign(
        wallet,
        ActionPayload::Vote {
            option: U256::from(option),
        },
        poll,
        nonce,
    );
    vote_envelope_json(wallet.address(), poll, option, nonce, &sig)
}

pub fn vote_envelope_json(
    signer: Address,
    poll: Address,
    option: u64,
    nonce: u64,
    sig: &Signature,
) -> serde_json::Value {
    json!({
        "typedData": {
            "domain": wire_domain(poll),
            "types": {
                "EIP712Domain": domain_types(),
                "Vote": [
                    { "name": "voter", "type": "address" },
                    { "name": "option", "type": "uint256" },
                    { "name": "nonce", "type": "uint256" }
                ]
            },
            "primaryType": "Vote",
            "message": {
                "voter": format!("{:?}", signer),
                "option": option.to_string(),
                "nonce": nonce,
            }
        },
        "signature": signature_hex(sig),
    })
}

/// 前端格式的签名领奖信封
pub fn claim_envelope(wallet: &LocalWallet, poll: Address, nonce: u64) -> SignedEnvelope {
    let sig = sign(wallet, ActionPayload::ClaimReward, poll, nonce);
    serde_json::from_value(json!({
        "typedData": {
            "domain": wire_domain(poll),
            "types": {
                "EIP712Domain": domain_types(),
                "ClaimReward": [
                    { "name": "claimer", "type": "address" },
                    { "name": "nonce", "type": "uint256" }
                ]
            },
            "primaryType": "ClaimReward",
            "message": {
                "claimer": format!("{:?}", wallet.address()),
                "nonce": nonce,
            }
        },
        "signature": signature_hex(&sig),
    }))
    .unwrap()
}

/// 签名投票的原始签名（按字段提交时使用）
pub fn vote_signature(wallet: &LocalWallet, poll: Address, option: u64, nonce: u64) -> String {
    signature_hex(&sign(
        wallet,
        ActionPayload::Vote {
            option: U256::from(option),
        },
        poll,
        nonce,
    ))
}

/// 所有者对注资计划中 `authorization` 类型化数据的签名
pub fn sign_authorization(owner: &LocalWallet, authorization: &serde_json::Value) -> String {
    let typed: TypedData = serde_json::from_value(authorization.clone()).unwrap();
    let digest = typed.encode_eip712().unwrap();
    signature_hex(&owner.sign_hash(H256::from(digest)).unwrap())
}

pub fn sign_plan(owner: &LocalWallet, plan: &FundingPlan) -> String {
    sign_authorization(owner, &serde_json::to_value(&plan.authorization).unwrap())
}

//! 投票注资集成测试
//!
//! 规划只读不发交易；执行顺序：部署钱包 → 授权 → 注资
//! 执行需要所有者签名，计划只能用一次，工厂必须在白名单内

mod common;

use std::{sync::Arc, time::Duration};

use ballot_relay::{
    contracts::{ApproveCall, CreateFundedPollCall, ExecuteCall},
    domain::{RelayStatus, TokenAmount},
    error::{ErrorClass, RelayError, SignatureError, StateError},
    service::RelayService,
};
use common::{
    create_test_service, poll_factory, reward_token, sign_plan, test_config, tokens, voter,
    wallet_of, MockChain,
};
use ethers::{
    abi::AbiDecode,
    signers::Signer,
    types::{Address, U256},
};
use uuid::Uuid;

fn amount(s: &str) -> TokenAmount {
    TokenAmount::parse_decimal(s).unwrap()
}

#[tokio::test]
async fn test_plan_reports_costs_without_sending() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0).address();
    chain.set_balance(wallet_of(owner), tokens(500));

    let plan = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();

    assert_eq!(plan.wallet, wallet_of(owner));
    assert_eq!(plan.costs.total_reward.to_string(), "200.00");
    assert_eq!(plan.costs.platform_fee.to_string(), "12.00");
    assert_eq!(plan.costs.total_required.to_string(), "212.00");
    assert_eq!(plan.balance.to_string(), "500.00");
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.authorization_nonce, 0);
    assert_eq!(plan.authorization.primary_type.as_deref(), Some("FundPoll"));
    assert!(plan.expires_at > plan.created_at);
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_insufficient_balance_rejects_plan() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0).address();
    chain.set_balance(wallet_of(owner), tokens(100));

    let err = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RelayError::State(StateError::InsufficientBalance {
            required: "212.00".into(),
            available: "100.00".into(),
            shortfall: "112.00".into(),
        })
    );
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_invalid_amounts_rejected() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0).address();
    chain.set_balance(wallet_of(owner), tokens(1_000));

    let err = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 0, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidAmount);

    let err = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, Some(amount("150")))
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidAmount);
}

#[tokio::test]
async fn test_execute_deploys_then_approves_then_funds() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let signer = voter(1);
    let owner = signer.address();
    let wallet = wallet_of(owner);
    chain.set_balance(wallet, tokens(212));

    let plan = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();
    let execution = service
        .execute_poll_funding(plan.plan_id, &sign_plan(&signer, &plan))
        .await
        .unwrap();

    assert_eq!(execution.plan_id, plan.plan_id);
    assert_eq!(execution.approval.status, RelayStatus::Confirmed);
    assert_eq!(
        execution.funding.as_ref().map(|r| r.status),
        Some(RelayStatus::Confirmed)
    );

    let sent = chain.sent();
    assert_eq!(sent.len(), 3);
    assert!(chain.is_deployed(owner));

    // 授权与注资都由钱包 execute 发起
    assert_eq!(sent[1].to, wallet);
    let approval = ExecuteCall::decode(&sent[1].data).unwrap();
    assert_eq!(approval.target, reward_token());
    let approve = ApproveCall::decode(approval.data.as_ref()).unwrap();
    assert_eq!(approve.spender, poll_factory());
    assert_eq!(approve.amount, tokens(212));

    assert_eq!(sent[2].to, wallet);
    let funding = ExecuteCall::decode(&sent[2].data).unwrap();
    assert_eq!(funding.target, poll_factory());
    let create = CreateFundedPollCall::decode(funding.data.as_ref()).unwrap();
    assert_eq!(create.reward_token, reward_token());
    assert_eq!(create.vote_limit, U256::from(100));
    assert_eq!(create.fund_amount, tokens(200));
}

#[tokio::test]
async fn test_execute_rechecks_balance() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let signer = voter(2);
    let owner = signer.address();
    let wallet = wallet_of(owner);
    chain.mark_deployed(owner);
    chain.set_balance(wallet, tokens(300));

    let plan = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();

    // 规划之后余额被转走
    chain.set_balance(wallet, tokens(50));
    let err = service
        .execute_poll_funding(plan.plan_id, &sign_plan(&signer, &plan))
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InsufficientBalance);
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_unknown_plan_rejected() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());

    let err = service
        .execute_poll_funding(Uuid::new_v4(), "0x00")
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidRequest);
    assert_eq!(chain.send_count(), 0);
}

// ============ 所有者授权 ============

#[tokio::test]
async fn test_execute_requires_owner_signature() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(1);
    chain.set_balance(wallet_of(owner.address()), tokens(212));

    let plan = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();

    // 任何人都能拿到 planId，但只有所有者的签名有效
    let err = service
        .execute_poll_funding(plan.plan_id, &sign_plan(&voter(2), &plan))
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::Signature(SignatureError::InvalidSignature));
    assert_eq!(chain.send_count(), 0);

    // 签名失败不会作废计划
    let execution = service
        .execute_poll_funding(plan.plan_id, &sign_plan(&owner, &plan))
        .await
        .unwrap();
    assert!(execution.approval.is_confirmed());
}

#[tokio::test]
async fn test_signature_for_one_plan_does_not_execute_another() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0);
    chain.set_balance(wallet_of(owner.address()), tokens(1_000));

    let small = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("1.00"), 10, None)
        .await
        .unwrap();
    let large = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("2.00"), 400, None)
        .await
        .unwrap();

    let err = service
        .execute_poll_funding(large.plan_id, &sign_plan(&owner, &small))
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidSignature);
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_authorization_nonce_advances_per_execution() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0);
    chain.mark_deployed(owner.address());
    chain.set_balance(wallet_of(owner.address()), tokens(1_000));

    let first = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("1.00"), 10, None)
        .await
        .unwrap();
    // 同一 nonce 下签出的第二份计划
    let stale = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("1.00"), 20, None)
        .await
        .unwrap();
    assert_eq!(stale.authorization_nonce, 0);

    service
        .execute_poll_funding(first.plan_id, &sign_plan(&owner, &first))
        .await
        .unwrap();

    let err = service
        .execute_poll_funding(stale.plan_id, &sign_plan(&owner, &stale))
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::NonceMismatch);

    let next = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("1.00"), 20, None)
        .await
        .unwrap();
    assert_eq!(next.authorization_nonce, 1);
    let execution = service
        .execute_poll_funding(next.plan_id, &sign_plan(&owner, &next))
        .await
        .unwrap();
    assert!(execution.funding.unwrap().is_confirmed());
}

// ============ 工厂白名单 ============

#[tokio::test]
async fn test_factory_outside_allowlist_rejected() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(0).address();
    chain.set_balance(wallet_of(owner), tokens(1_000));

    let err = service
        .plan_poll_funding(owner, Address::repeat_byte(0xad), amount("2.00"), 100, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidRequest);
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_empty_allowlist_disables_funding() {
    let chain = Arc::new(MockChain::new());
    let mut config = test_config();
    config.settlement.allowed_poll_factories.clear();
    let service = RelayService::new(Arc::new(config), chain.clone());
    let owner = voter(0).address();
    chain.set_balance(wallet_of(owner), tokens(1_000));

    let err = service
        .plan_poll_funding(owner, poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::ConfigurationError);
    assert_eq!(chain.send_count(), 0);
}

// ============ 计划只能执行一次 ============

#[tokio::test]
async fn test_plan_cannot_be_executed_twice() {
    let chain = Arc::new(MockChain::new());
    let service = create_test_service(chain.clone());
    let owner = voter(1);
    chain.set_balance(wallet_of(owner.address()), tokens(1_000));

    let plan = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();
    let signature = sign_plan(&owner, &plan);

    service
        .execute_poll_funding(plan.plan_id, &signature)
        .await
        .unwrap();
    assert_eq!(chain.send_count(), 3);

    let err = service
        .execute_poll_funding(plan.plan_id, &signature)
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidRequest);
    assert_eq!(chain.send_count(), 3);
    assert!(service.funding_plan(&plan.plan_id).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_run_plan_once() {
    let chain = Arc::new(MockChain::with_send_delay(Duration::from_millis(10)));
    let service = Arc::new(create_test_service(chain.clone()));
    let owner = voter(2);
    chain.mark_deployed(owner.address());
    chain.set_balance(wallet_of(owner.address()), tokens(1_000));

    let plan = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();
    let signature = sign_plan(&owner, &plan);

    let runs: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            let signature = signature.clone();
            let plan_id = plan.plan_id;
            tokio::spawn(async move { service.execute_poll_funding(plan_id, &signature).await })
        })
        .collect();

    let mut executed = 0;
    for joined in futures::future::join_all(runs).await {
        match joined.unwrap() {
            Ok(execution) => {
                assert!(execution.approval.is_confirmed());
                executed += 1;
            }
            Err(e) => assert_eq!(e.error_class(), ErrorClass::InvalidRequest),
        }
    }
    assert_eq!(executed, 1);
    // 授权 + 注资
    assert_eq!(chain.send_count(), 2);
}

#[tokio::test]
async fn test_expired_plan_rejected() {
    let chain = Arc::new(MockChain::new());
    let mut config = test_config();
    config.settlement.plan_ttl_secs = 1;
    let service = RelayService::new(Arc::new(config), chain.clone());
    let owner = voter(0);
    chain.set_balance(wallet_of(owner.address()), tokens(1_000));

    let plan = service
        .plan_poll_funding(owner.address(), poll_factory(), amount("2.00"), 100, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let err = service
        .execute_poll_funding(plan.plan_id, &sign_plan(&owner, &plan))
        .await
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::InvalidRequest);
    assert_eq!(chain.send_count(), 0);
}

//! HTTP 层集成测试（不监听端口，直接 oneshot 路由）

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use ballot_relay::api;
use common::{
    create_test_app_state, poll, poll_factory, sign_authorization, vote_json, voter, wallet_of,
    MockChain,
};
use ethers::{signers::Signer, types::U256};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(chain: Arc<MockChain>) -> Router {
    api::routes(create_test_app_state(chain))
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let trace = resp
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, trace)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn signed_vote_json(option: u64, nonce: u64) -> Value {
    vote_json(&voter(0), poll(1), option, nonce)
}

// ============ 基础端点 ============

#[tokio::test]
async fn test_healthz() {
    let (status, body, trace) = send(app(Arc::new(MockChain::new())), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["chainId"], 31337);
    assert!(body["factoryConfigured"].as_bool().unwrap());
    assert!(trace.is_some());
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let req = Request::builder()
        .uri("/healthz")
        .header("x-trace-id", "trace-abc")
        .body(Body::empty())
        .unwrap();
    let (_, _, trace) = send(app(Arc::new(MockChain::new())), req).await;
    assert_eq!(trace.as_deref(), Some("trace-abc"));
}

#[tokio::test]
async fn test_openapi_document_lists_relay_paths() {
    let (status, body, _) = send(app(Arc::new(MockChain::new())), get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/polls/{poll}/votes"].is_object());
    assert!(body["paths"]["/api/v1/funding/plan"].is_object());
}

// ============ 钱包 ============

#[tokio::test]
async fn test_wallet_address_endpoint() {
    let owner = voter(0).address();
    let uri = format!("/api/v1/wallets/{:?}/address", owner);
    let (status, body, _) = send(app(Arc::new(MockChain::new())), get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(
        body["data"]["walletAddress"],
        format!("{:?}", wallet_of(owner))
    );
    assert_eq!(body["data"]["deployed"], false);
}

#[tokio::test]
async fn test_invalid_address_is_bad_request_with_trace_id() {
    let (status, body, trace) = send(
        app(Arc::new(MockChain::new())),
        get("/api/v1/wallets/0x1234/address"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(body["trace_id"].as_str(), trace.as_deref());
}

#[tokio::test]
async fn test_deploy_endpoint_is_idempotent() {
    let chain = Arc::new(MockChain::new());
    let router = app(chain.clone());
    let uri = format!("/api/v1/wallets/{:?}/deploy", voter(1).address());

    let (status, body, _) = send(router.clone(), post_json(&uri, &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["newlyDeployed"], true);

    let (status, body, _) = send(router, post_json(&uri, &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["newlyDeployed"], false);
    assert_eq!(chain.send_count(), 1);
}

// ============ 中继 ============

#[tokio::test]
async fn test_vote_endpoint_relays_and_journals() {
    let chain = Arc::new(MockChain::new());
    let router = app(chain.clone());
    let uri = format!("/api/v1/polls/{:?}/votes", poll(1));

    let (status, body, _) = send(router.clone(), post_json(&uri, &signed_vote_json(1, 0))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Confirmed");
    let tx_hash = body["data"]["txHash"].as_str().unwrap().to_string();

    let (status, body, _) = send(router.clone(), get(&format!("/api/v1/relays/{}", tx_hash))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["label"], "Vote");

    let nonce_uri = format!("/api/v1/nonces/{:?}/{:?}", poll(1), voter(0).address());
    let (_, body, _) = send(router, get(&nonce_uri)).await;
    assert_eq!(body["data"]["nextNonce"], 1);
}

#[tokio::test]
async fn test_replayed_vote_is_conflict() {
    let chain = Arc::new(MockChain::new());
    let router = app(chain.clone());
    let uri = format!("/api/v1/polls/{:?}/votes", poll(1));
    let payload = signed_vote_json(1, 0);

    let (status, _, _) = send(router.clone(), post_json(&uri, &payload)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(router, post_json(&uri, &payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "nonce_mismatch");
}

#[tokio::test]
async fn test_tampered_vote_is_unauthorized() {
    let chain = Arc::new(MockChain::new());
    let uri = format!("/api/v1/polls/{:?}/votes", poll(1));
    let mut payload = signed_vote_json(1, 0);
    payload["typedData"]["message"]["option"] = json!(U256::from(2).to_string());

    let (status, body, _) = send(app(chain.clone()), post_json(&uri, &payload)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_signature");
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_inactive_poll_returns_reverted_result() {
    let chain = Arc::new(MockChain::new());
    chain.deactivate(poll(1));
    let uri = format!("/api/v1/polls/{:?}/votes", poll(1));

    let (status, body, _) = send(app(chain), post_json(&uri, &signed_vote_json(1, 0))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Reverted");
    assert_eq!(body["data"]["errorClass"], "PollInactive");
}

#[tokio::test]
async fn test_unknown_relay_is_not_found() {
    let uri = format!("/api/v1/relays/0x{}", "ab".repeat(32));
    let (status, body, _) = send(app(Arc::new(MockChain::new())), get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

// ============ 注资 ============

#[tokio::test]
async fn test_funding_plan_and_execute() {
    let chain = Arc::new(MockChain::new());
    let signer = voter(2);
    let owner = signer.address();
    chain.set_balance(wallet_of(owner), common::tokens(212));
    let router = app(chain.clone());

    let (status, body, _) = send(
        router.clone(),
        post_json(
            "/api/v1/funding/plan",
            &json!({
                "owner": format!("{:?}", owner),
                "pollFactory": format!("{:?}", poll_factory()),
                "rewardPerVoter": "2.00",
                "voteLimit": 100
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["costs"]["totalRequired"], "212.00");
    assert_eq!(body["data"]["authorization"]["primaryType"], "FundPoll");
    let plan_id = body["data"]["planId"].clone();
    let authorization = body["data"]["authorization"].clone();

    // 非所有者签名
    let (status, body, _) = send(
        router.clone(),
        post_json(
            "/api/v1/funding/execute",
            &json!({
                "planId": plan_id,
                "signature": sign_authorization(&voter(0), &authorization),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_signature");
    assert_eq!(chain.send_count(), 0);

    let (status, body, _) = send(
        router,
        post_json(
            "/api/v1/funding/execute",
            &json!({
                "planId": plan_id,
                "signature": sign_authorization(&signer, &authorization),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["approval"]["status"], "Confirmed");
    assert_eq!(body["data"]["funding"]["status"], "Confirmed");
    assert_eq!(chain.send_count(), 3);
}

#[tokio::test]
async fn test_funding_shortfall_is_unprocessable() {
    let chain = Arc::new(MockChain::new());
    let owner = voter(2).address();
    chain.set_balance(wallet_of(owner), common::tokens(100));

    let (status, body, _) = send(
        app(chain.clone()),
        post_json(
            "/api/v1/funding/plan",
            &json!({
                "owner": format!("{:?}", owner),
                "pollFactory": format!("{:?}", poll_factory()),
                "rewardPerVoter": "2.00",
                "voteLimit": 100
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_balance");
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_funding_execute_without_signature_is_bad_request() {
    let chain = Arc::new(MockChain::new());
    let (status, _, _) = send(
        app(chain.clone()),
        post_json(
            "/api/v1/funding/execute",
            &json!({ "planId": "00000000-0000-0000-0000-000000000001" }),
        ),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(chain.send_count(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let router = app(Arc::new(MockChain::new()));
    let _ = send(router.clone(), get("/healthz")).await;
    let resp = router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(!text.is_empty());
}

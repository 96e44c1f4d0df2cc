//! 元交易热点路径基准测试
//! 使用criterion测量签名摘要、签名恢复与信封解析

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ballot_relay::{
    domain::{ActionPayload, MetaTransactionRequest, SigningDomain},
    metrics,
};
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Signature, U256},
};

fn signed_request() -> MetaTransactionRequest {
    let wallet: LocalWallet = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
        .parse()
        .unwrap();
    let mut req = MetaTransactionRequest {
        signer: wallet.address(),
        payload: ActionPayload::Vote {
            option: U256::from(3),
        },
        nonce: 7,
        signature: Signature {
            r: U256::zero(),
            s: U256::zero(),
            v: 27,
        },
        domain: SigningDomain::new("BallotPoll", "1", 31337, Address::repeat_byte(0x42)),
    };
    req.signature = wallet.sign_hash(req.signing_digest()).unwrap();
    req
}

fn bench_signing_digest(c: &mut Criterion) {
    let req = signed_request();
    c.bench_function("eip712_signing_digest", |b| {
        b.iter(|| black_box(req.signing_digest()))
    });
}

fn bench_recover_signer(c: &mut Criterion) {
    let req = signed_request();
    c.bench_function("recover_signer", |b| {
        b.iter(|| black_box(req.recover_signer().unwrap()))
    });
}

fn bench_metrics_rendering(c: &mut Criterion) {
    c.bench_function("render_prometheus_metrics", |b| {
        b.iter(|| {
            metrics::count_ok("/api/v1/polls/:poll/votes");
            black_box(metrics::render_prometheus())
        })
    });
}

criterion_group!(
    benches,
    bench_signing_digest,
    bench_recover_signer,
    bench_metrics_rendering
);
criterion_main!(benches);

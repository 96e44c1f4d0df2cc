use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use crate::domain::RelayStatus;

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Default)]
struct MetricsState {
    total: u64,
    errors: u64,
    per_endpoint: HashMap<String, u64>,
    per_endpoint_err: HashMap<String, u64>,
    // 中继结果分布
    relay_outcomes: HashMap<&'static str, u64>,
    relay_submit_attempts: u64,
    // 钱包部署
    deployments_submitted: u64,
    deployments_skipped: u64,
    deployment_failures: u64,
    // nonce 拒绝次数
    nonce_rejections: u64,
    // 费用查询降级
    fee_refresh_total: u64,
    fee_fallback_total: u64,
    // 确认等待时延（毫秒）：<1000, <5000, <15000, <60000, >=60000
    confirm_latency_sum_ms: u128,
    confirm_hist_buckets: [u64; 5],
}

fn state() -> std::sync::MutexGuard<'static, MetricsState> {
    let m = METRICS.get_or_init(|| Mutex::new(MetricsState::default()));
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_ok(endpoint: &str) {
    let mut s = state();
    s.total += 1;
    *s.per_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
}

pub fn count_err(endpoint: &str) {
    let mut s = state();
    s.total += 1;
    s.errors += 1;
    *s.per_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
    *s.per_endpoint_err.entry(endpoint.to_string()).or_insert(0) += 1;
}

pub fn record_relay_outcome(status: RelayStatus, attempts: u32) {
    let label = match status {
        RelayStatus::Confirmed => "confirmed",
        RelayStatus::Reverted => "reverted",
        RelayStatus::SubmissionFailed => "submission_failed",
        RelayStatus::Pending => "pending",
    };
    let mut s = state();
    *s.relay_outcomes.entry(label).or_insert(0) += 1;
    s.relay_submit_attempts += attempts as u64;
}

pub fn observe_confirmation_latency_ms(latency_ms: u128) {
    let mut s = state();
    s.confirm_latency_sum_ms += latency_ms;
    let b = if latency_ms < 1_000 {
        0
    } else if latency_ms < 5_000 {
        1
    } else if latency_ms < 15_000 {
        2
    } else if latency_ms < 60_000 {
        3
    } else {
        4
    };
    s.confirm_hist_buckets[b] += 1;
}

pub fn inc_deployment_submitted() {
    state().deployments_submitted += 1;
}

pub fn inc_deployment_skipped() {
    state().deployments_skipped += 1;
}

pub fn inc_deployment_failure() {
    state().deployment_failures += 1;
}

pub fn inc_nonce_rejection() {
    state().nonce_rejections += 1;
}

pub fn inc_fee_refresh() {
    state().fee_refresh_total += 1;
}

pub fn inc_fee_fallback() {
    state().fee_fallback_total += 1;
}

fn counter(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    out.push_str(&format!("{} {}\n", name, value));
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    counter(
        &mut out,
        "ballot_relay_requests_total",
        "Total requests",
        s.total,
    );
    counter(
        &mut out,
        "ballot_relay_errors_total",
        "Total error responses",
        s.errors,
    );

    out.push_str("# HELP ballot_relay_endpoint_requests_total Requests per endpoint\n");
    out.push_str("# TYPE ballot_relay_endpoint_requests_total counter\n");
    for (k, v) in s.per_endpoint.iter() {
        out.push_str(&format!(
            "ballot_relay_endpoint_requests_total{{endpoint=\"{}\"}} {}\n",
            k, v
        ));
    }

    out.push_str("# HELP ballot_relay_endpoint_errors_total Errors per endpoint\n");
    out.push_str("# TYPE ballot_relay_endpoint_errors_total counter\n");
    for (k, v) in s.per_endpoint_err.iter() {
        out.push_str(&format!(
            "ballot_relay_endpoint_errors_total{{endpoint=\"{}\"}} {}\n",
            k, v
        ));
    }

    // 中继结果
    out.push_str("# HELP ballot_relay_outcomes_total Relay outcomes by status\n");
    out.push_str("# TYPE ballot_relay_outcomes_total counter\n");
    for (k, v) in s.relay_outcomes.iter() {
        out.push_str(&format!(
            "ballot_relay_outcomes_total{{status=\"{}\"}} {}\n",
            k, v
        ));
    }
    counter(
        &mut out,
        "ballot_relay_submit_attempts_total",
        "Submission attempts across all relays",
        s.relay_submit_attempts,
    );

    // 部署
    out.push_str("# HELP ballot_relay_deployments_total Smart wallet deployment decisions\n");
    out.push_str("# TYPE ballot_relay_deployments_total counter\n");
    out.push_str(&format!(
        "ballot_relay_deployments_total{{result=\"submitted\"}} {}\n",
        s.deployments_submitted
    ));
    out.push_str(&format!(
        "ballot_relay_deployments_total{{result=\"already_deployed\"}} {}\n",
        s.deployments_skipped
    ));
    out.push_str(&format!(
        "ballot_relay_deployments_total{{result=\"failed\"}} {}\n",
        s.deployment_failures
    ));

    counter(
        &mut out,
        "ballot_relay_nonce_rejections_total",
        "Meta-transactions rejected for nonce mismatch",
        s.nonce_rejections,
    );
    counter(
        &mut out,
        "ballot_relay_fee_refresh_total",
        "Fee policy refreshes",
        s.fee_refresh_total,
    );
    counter(
        &mut out,
        "ballot_relay_fee_fallback_total",
        "Fee policy refreshes that fell back to last-known or floor values",
        s.fee_fallback_total,
    );

    counter(
        &mut out,
        "ballot_relay_confirmation_latency_ms_sum",
        "Sum of confirmation wait latency in ms",
        s.confirm_latency_sum_ms,
    );
    out.push_str(
        "# HELP ballot_relay_confirmation_latency_ms_bucket Confirmation latency histogram buckets\n",
    );
    out.push_str("# TYPE ballot_relay_confirmation_latency_ms_bucket histogram\n");
    let bounds = [1_000, 5_000, 15_000, 60_000];
    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += s.confirm_hist_buckets[i];
        out.push_str(&format!(
            "ballot_relay_confirmation_latency_ms_bucket{{le=\"{}\"}} {}\n",
            bound, cumulative
        ));
    }
    // +Inf 桶
    out.push_str(&format!(
        "ballot_relay_confirmation_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
        s.confirm_hist_buckets.iter().sum::<u64>()
    ));

    out
}

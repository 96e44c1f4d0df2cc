//! Trace ID 中间件
//! 每个请求携带一个 trace_id：优先沿用 `X-Trace-Id` 请求头，否则生成新的

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// 存放在请求扩展中的 trace_id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            // 过长的外部值不采纳
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(|v| TraceId(v.to_string()))
            .unwrap_or_else(|| TraceId(Uuid::new_v4().to_string()))
    }
}

/// 写入请求扩展、回显到响应头，并把请求处理包在带 trace_id 的 span 里
pub async fn trace_id_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId::from_headers(req.headers());
    req.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id.0,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id.0) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

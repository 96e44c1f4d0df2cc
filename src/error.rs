//! 错误模型
//!
//! - `RelayError`：领域错误（配置 / 签名 / 网络 / 合约 / 状态），携带机器可读的 `ErrorClass`
//! - `AppError`：HTTP 层错误，统一输出 `{ code, message, trace_id }`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// 机器可读的错误分类（对外 payload 中的 `errorClass`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ErrorClass {
    ConfigurationError,
    InvalidSignature,
    NonceMismatch,
    UnknownAction,
    RpcTimeout,
    SubmissionFailed,
    AlreadyVoted,
    PollInactive,
    CreatorCannotVote,
    InsufficientAllowance,
    TransactionReverted,
    DeploymentVerificationFailed,
    InsufficientBalance,
    InvalidRequest,
    InvalidAmount,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::ConfigurationError => "configuration_error",
            ErrorClass::InvalidSignature => "invalid_signature",
            ErrorClass::NonceMismatch => "nonce_mismatch",
            ErrorClass::UnknownAction => "unknown_action",
            ErrorClass::RpcTimeout => "rpc_timeout",
            ErrorClass::SubmissionFailed => "submission_failed",
            ErrorClass::AlreadyVoted => "already_voted",
            ErrorClass::PollInactive => "poll_inactive",
            ErrorClass::CreatorCannotVote => "creator_cannot_vote",
            ErrorClass::InsufficientAllowance => "insufficient_allowance",
            ErrorClass::TransactionReverted => "transaction_reverted",
            ErrorClass::DeploymentVerificationFailed => "deployment_verification_failed",
            ErrorClass::InsufficientBalance => "insufficient_balance",
            ErrorClass::InvalidRequest => "invalid_request",
            ErrorClass::InvalidAmount => "invalid_amount",
        }
    }
}

/// 签名校验失败（网络调用之前，永不重试）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature does not match signer")]
    InvalidSignature,
    #[error("nonce mismatch: expected {expected}, provided {provided}")]
    NonceMismatch { expected: u64, provided: u64 },
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// 网络错误（可重试）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("rpc timeout during {operation}")]
    RpcTimeout { operation: String },
    #[error("submission failed: {reason}")]
    SubmissionFailed { reason: String },
}

/// 合约 revert 解码后的错误（永不重试）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("voter has already voted")]
    AlreadyVoted,
    #[error("poll is not active")]
    PollInactive,
    #[error("poll creator cannot vote")]
    CreatorCannotVote,
    #[error("token allowance is insufficient")]
    InsufficientAllowance,
    #[error("transaction reverted: {reason}")]
    TransactionReverted { reason: String },
}

impl ContractError {
    pub fn error_class(&self) -> ErrorClass {
        match self {
            ContractError::AlreadyVoted => ErrorClass::AlreadyVoted,
            ContractError::PollInactive => ErrorClass::PollInactive,
            ContractError::CreatorCannotVote => ErrorClass::CreatorCannotVote,
            ContractError::InsufficientAllowance => ErrorClass::InsufficientAllowance,
            ContractError::TransactionReverted { .. } => ErrorClass::TransactionReverted,
        }
    }
}

/// 链上状态不满足前置条件
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("wallet {wallet} has no bytecode after deployment")]
    DeploymentVerificationFailed { wallet: String },
    #[error("insufficient balance: required {required}, available {available}, shortfall {shortfall}")]
    InsufficientBalance {
        required: String,
        available: String,
        shortfall: String,
    },
}

/// 领域错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Configuration(msg.into())
    }

    pub fn rpc_timeout(operation: impl Into<String>) -> Self {
        RelayError::Network(NetworkError::RpcTimeout {
            operation: operation.into(),
        })
    }

    pub fn error_class(&self) -> ErrorClass {
        match self {
            RelayError::Configuration(_) => ErrorClass::ConfigurationError,
            RelayError::Signature(SignatureError::InvalidSignature) => ErrorClass::InvalidSignature,
            RelayError::Signature(SignatureError::NonceMismatch { .. }) => ErrorClass::NonceMismatch,
            RelayError::Signature(SignatureError::UnknownAction(_)) => ErrorClass::UnknownAction,
            RelayError::Network(NetworkError::RpcTimeout { .. }) => ErrorClass::RpcTimeout,
            RelayError::Network(NetworkError::SubmissionFailed { .. }) => {
                ErrorClass::SubmissionFailed
            }
            RelayError::Contract(e) => e.error_class(),
            RelayError::State(StateError::DeploymentVerificationFailed { .. }) => {
                ErrorClass::DeploymentVerificationFailed
            }
            RelayError::State(StateError::InsufficientBalance { .. }) => {
                ErrorClass::InsufficientBalance
            }
            RelayError::InvalidRequest(_) => ErrorClass::InvalidRequest,
            RelayError::InvalidAmount(_) => ErrorClass::InvalidAmount,
        }
    }

    /// 只有网络类错误允许重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Network(_))
    }
}

#[derive(Debug, Clone)]
pub enum AppErrorCode {
    // HTTP 基础错误码
    BadRequest,
    NotFound,
    Timeout,
    Internal,

    // 业务错误码
    Relay(ErrorClass),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
    pub trace_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    trace_id: Option<&'a str>,
}

/// OpenAPI 文档用的错误体
#[derive(Serialize, ToSchema)]
pub struct ErrorBodyDoc {
    pub code: String,
    pub message: String,
    pub trace_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code_str = match &self.code {
            AppErrorCode::BadRequest => "bad_request",
            AppErrorCode::NotFound => "not_found",
            AppErrorCode::Timeout => "timeout",
            AppErrorCode::Internal => "internal",
            AppErrorCode::Relay(class) => class.as_str(),
        };
        let body = ErrorBody {
            code: code_str,
            message: &self.message,
            trace_id: self.trace_id.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::BadRequest,
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
            trace_id: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::NotFound,
            message: msg.into(),
            status: StatusCode::NOT_FOUND,
            trace_id: None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::Internal,
            message: msg.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            trace_id: None,
        }
    }

    /// 设置追踪ID
    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

// 领域错误 -> HTTP 状态码
impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        let class = err.error_class();
        let status = match class {
            ErrorClass::ConfigurationError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorClass::InvalidSignature => StatusCode::UNAUTHORIZED,
            ErrorClass::NonceMismatch => StatusCode::CONFLICT,
            ErrorClass::UnknownAction | ErrorClass::InvalidRequest | ErrorClass::InvalidAmount => {
                StatusCode::BAD_REQUEST
            }
            ErrorClass::RpcTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorClass::SubmissionFailed => StatusCode::BAD_GATEWAY,
            ErrorClass::AlreadyVoted
            | ErrorClass::PollInactive
            | ErrorClass::CreatorCannotVote
            | ErrorClass::InsufficientAllowance
            | ErrorClass::TransactionReverted
            | ErrorClass::DeploymentVerificationFailed
            | ErrorClass::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        };
        // 配置错误只给出笼统提示，避免泄露内部细节
        let message = match class {
            ErrorClass::ConfigurationError => "relay is not configured for this operation".into(),
            _ => err.to_string(),
        };
        Self {
            code: AppErrorCode::Relay(class),
            message,
            status,
            trace_id: None,
        }
    }
}

// 从 serde_json 错误转换
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON serialization error: {}", err))
    }
}

// 从 anyhow 错误转换
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{}", err))
    }
}

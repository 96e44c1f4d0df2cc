//! Ballot Relay - 投票与奖励领取的免 gas 元交易中继
//!
//! 用户只签 EIP-712 消息，中继账户代为上链并支付 gas

pub mod api;
pub mod app_state;
pub mod config;
pub mod contracts;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode, RelayError};
pub use service::RelayService;

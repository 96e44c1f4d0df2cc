//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{fmt, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 平台签名私钥：只从环境变量 RELAYER_PRIVATE_KEY 读取，永不序列化、永不打印
#[derive(Clone)]
pub struct RelayerKey(Option<String>);

impl RelayerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl Default for RelayerKey {
    fn default() -> Self {
        Self(
            std::env::var("RELAYER_PRIVATE_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        )
    }
}

impl fmt::Debug for RelayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("RelayerKey(***)"),
            None => f.write_str("RelayerKey(unset)"),
        }
    }
}

/// 链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// 智能钱包工厂；未配置时地址派生直接报 ConfigurationError
    pub wallet_factory_address: Option<Address>,
    /// 奖励代币（用于余额检查与授权）
    pub reward_token_address: Option<Address>,
    #[serde(skip)]
    pub relayer_private_key: RelayerKey,
}

/// Gas 费用配置（单位 gwei）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    pub min_priority_fee_gwei: f64,
    pub min_max_fee_gwei: f64,
    pub max_fee_cap_gwei: f64,
    /// 覆盖 gasLimit；不配置时取最昂贵操作的上限
    pub gas_limit_override: Option<u64>,
    /// 每次重试的费用上浮百分比
    pub retry_bump_percent: u32,
}

/// 中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub rpc_timeout_ms: u64,
    pub rpc_read_retries: u32,
    pub rpc_retry_delay_ms: u64,
    pub receipt_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    /// Pending 之后后台继续跟踪回执的时长
    pub follow_up_timeout_ms: u64,
    /// 超前 nonce 等待前序 nonce 被消费的最长时间
    pub nonce_wait_ms: u64,
    pub seed_nonces_from_chain: bool,
}

/// 钱包部署配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub confirmations: u64,
    pub settle_delay_ms: u64,
    pub settle_budget_ms: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub lock_timeout_ms: u64,
}

/// 结算配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// 平台费（基点，600 = 6%）
    pub platform_fee_bps: u32,
    /// 允许作为授权对象的投票工厂；为空时注资功能不可用
    pub allowed_poll_factories: Vec<Address>,
    /// 注资计划的有效期
    pub plan_ttl_secs: u64,
}

/// EIP-712 域配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub domain_name: String,
    pub domain_version: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_address(key: &str) -> Option<Address> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// 逗号分隔的地址列表，无法解析的项被忽略
fn env_address_list(key: &str) -> Vec<Address> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".into()),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: env_flag("LOG_FILE_ENABLED", false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".into()),
            chain_id: env_or("CHAIN_ID", 31337),
            wallet_factory_address: env_address("WALLET_FACTORY_ADDRESS"),
            reward_token_address: env_address("REWARD_TOKEN_ADDRESS"),
            relayer_private_key: RelayerKey::default(),
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            min_priority_fee_gwei: env_or("MIN_PRIORITY_FEE_GWEI", 1.0),
            min_max_fee_gwei: env_or("MIN_MAX_FEE_GWEI", 2.0),
            max_fee_cap_gwei: env_or("MAX_FEE_CAP_GWEI", 500.0),
            gas_limit_override: std::env::var("GAS_LIMIT_OVERRIDE")
                .ok()
                .and_then(|s| s.parse().ok()),
            retry_bump_percent: env_or("RETRY_GAS_BUMP_PERCENT", 10),
        }
    }
}

impl FeesConfig {
    pub fn gwei_to_wei(gwei: f64) -> U256 {
        U256::from((gwei * 1_000_000_000.0).round() as u128)
    }

    pub fn min_priority_fee(&self) -> U256 {
        Self::gwei_to_wei(self.min_priority_fee_gwei)
    }

    pub fn min_max_fee(&self) -> U256 {
        Self::gwei_to_wei(self.min_max_fee_gwei)
    }

    pub fn max_fee_cap(&self) -> U256 {
        Self::gwei_to_wei(self.max_fee_cap_gwei)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: env_or("RELAY_MAX_ATTEMPTS", 3),
            initial_backoff_ms: env_or("RELAY_INITIAL_BACKOFF_MS", 500),
            backoff_multiplier: env_or("RELAY_BACKOFF_MULTIPLIER", 2.0),
            rpc_timeout_ms: env_or("RPC_TIMEOUT_MS", 5_000),
            rpc_read_retries: env_or("RPC_READ_RETRIES", 2),
            rpc_retry_delay_ms: env_or("RPC_RETRY_DELAY_MS", 250),
            receipt_timeout_ms: env_or("RECEIPT_TIMEOUT_MS", 60_000),
            receipt_poll_interval_ms: env_or("RECEIPT_POLL_INTERVAL_MS", 1_000),
            follow_up_timeout_ms: env_or("FOLLOW_UP_TIMEOUT_MS", 600_000),
            nonce_wait_ms: env_or("NONCE_WAIT_MS", 5_000),
            seed_nonces_from_chain: env_flag("SEED_NONCES_FROM_CHAIN", false),
        }
    }
}

impl SettlementConfig {
    pub fn plan_ttl(&self) -> Duration {
        Duration::from_secs(self.plan_ttl_secs)
    }

    pub fn is_factory_allowed(&self, factory: Address) -> bool {
        self.allowed_poll_factories.contains(&factory)
    }
}

impl RelayConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn follow_up_timeout(&self) -> Duration {
        Duration::from_millis(self.follow_up_timeout_ms)
    }

    pub fn nonce_wait(&self) -> Duration {
        Duration::from_millis(self.nonce_wait_ms)
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            confirmations: env_or("DEPLOY_CONFIRMATIONS", 1),
            settle_delay_ms: env_or("DEPLOY_SETTLE_DELAY_MS", 2_000),
            settle_budget_ms: env_or("DEPLOY_SETTLE_BUDGET_MS", 15_000),
            verify_attempts: env_or("DEPLOY_VERIFY_ATTEMPTS", 3),
            verify_interval_ms: env_or("DEPLOY_VERIFY_INTERVAL_MS", 500),
            lock_timeout_ms: env_or("DEPLOY_LOCK_TIMEOUT_MS", 120_000),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: env_or("PLATFORM_FEE_BPS", 600),
            allowed_poll_factories: env_address_list("POLL_FACTORY_ALLOWLIST"),
            plan_ttl_secs: env_or("FUNDING_PLAN_TTL_SECS", 900),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            domain_name: std::env::var("EIP712_DOMAIN_NAME").unwrap_or_else(|_| "Poll".into()),
            domain_version: std::env::var("EIP712_DOMAIN_VERSION").unwrap_or_else(|_| "1".into()),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::default())
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    ///
    /// 文件中缺失的段落回落到环境变量默认值；私钥始终来自环境变量
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            anyhow::bail!("CHAIN_ID must be greater than 0");
        }
        if !self.chain.rpc_url.starts_with("http://") && !self.chain.rpc_url.starts_with("https://")
        {
            anyhow::bail!("RPC_URL must start with http:// or https://");
        }

        // 费用下限与上限
        let fees = &self.fees;
        if !(fees.min_priority_fee_gwei.is_finite() && fees.min_priority_fee_gwei >= 0.0) {
            anyhow::bail!("MIN_PRIORITY_FEE_GWEI must be a non-negative number");
        }
        if !(fees.min_max_fee_gwei.is_finite() && fees.min_max_fee_gwei > 0.0) {
            anyhow::bail!("MIN_MAX_FEE_GWEI must be positive");
        }
        if fees.min_max_fee_gwei < fees.min_priority_fee_gwei {
            anyhow::bail!("MIN_MAX_FEE_GWEI must be >= MIN_PRIORITY_FEE_GWEI");
        }
        if !fees.max_fee_cap_gwei.is_finite() || fees.max_fee_cap_gwei < fees.min_max_fee_gwei {
            anyhow::bail!("MAX_FEE_CAP_GWEI must be >= MIN_MAX_FEE_GWEI");
        }

        if self.settlement.platform_fee_bps > 10_000 {
            anyhow::bail!("PLATFORM_FEE_BPS must be <= 10000");
        }
        if self.settlement.plan_ttl_secs == 0 {
            anyhow::bail!("FUNDING_PLAN_TTL_SECS must be greater than 0");
        }

        let relay = &self.relay;
        if relay.max_attempts == 0 {
            anyhow::bail!("RELAY_MAX_ATTEMPTS must be at least 1");
        }
        if relay.rpc_timeout_ms == 0
            || relay.receipt_timeout_ms == 0
            || relay.receipt_poll_interval_ms == 0
            || relay.nonce_wait_ms == 0
        {
            anyhow::bail!("relay timeouts must be greater than 0");
        }
        if !(relay.backoff_multiplier.is_finite() && relay.backoff_multiplier >= 1.0) {
            anyhow::bail!("RELAY_BACKOFF_MULTIPLIER must be >= 1.0");
        }
        if self.deployment.verify_attempts == 0 || self.deployment.lock_timeout_ms == 0 {
            anyhow::bail!("deployment verify attempts and lock timeout must be greater than 0");
        }

        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}

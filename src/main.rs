//! Ballot Relay 主入口

use std::sync::Arc;

use anyhow::{Context, Result};
use ballot_relay::{
    api,
    app_state::AppState,
    config::Config,
    infrastructure::{logging::init_logging, EthersChainClient, RpcPolicy},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 环境变量 + 可选配置文件
    dotenvy::dotenv().ok();
    let config = Config::from_env_and_file(std::env::var("CONFIG_PATH").ok())
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    // 2. 日志（守卫需持有到进程退出）
    let _log_guard = init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    tracing::info!(
        chain_id = config.chain.chain_id,
        factory = ?config.chain.wallet_factory_address,
        reward_token = ?config.chain.reward_token_address,
        "starting ballot relay"
    );

    // 3. 链客户端（中继私钥必填）
    let key = config
        .chain
        .relayer_private_key
        .expose()
        .context("RELAYER_PRIVATE_KEY must be set")?;
    let policy = RpcPolicy {
        timeout: config.relay.rpc_timeout(),
        read_retries: config.relay.rpc_read_retries,
        retry_delay: std::time::Duration::from_millis(config.relay.rpc_retry_delay_ms),
    };
    let client = EthersChainClient::new(&config.chain.rpc_url, config.chain.chain_id, key, policy)
        .context("failed to build chain client")?;

    if config.chain.wallet_factory_address.is_none() {
        tracing::warn!("WALLET_FACTORY_ADDRESS is not set, wallet operations will be rejected");
    }

    // 4. 路由与服务
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone(), Arc::new(client)));
    let app = api::routes(state);

    let bind_addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

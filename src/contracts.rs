//! 链上合约 ABI 绑定
//!
//! 只使用生成的调用结构体做 calldata 编解码，发送统一走 `ChainClient`

use ethers::prelude::abigen;

// 智能钱包工厂：counterfactual 地址 + 部署
abigen!(
    WalletFactory,
    r#"[
        function getAddress(address owner, uint256 salt) external view returns (address)
        function createAccount(address owner, uint256 salt) external returns (address)
    ]"#
);

// 投票合约：签名代投 / 代领奖励
abigen!(
    Poll,
    r#"[
        function voteBySig(address voter, uint256 option, uint256 nonce, bytes signature) external
        function claimRewardBySig(address claimer, uint256 nonce, bytes signature) external
        function nonces(address owner) external view returns (uint256)
        function rewardPerVoter() external view returns (uint256)
    ]"#
);

// 奖励代币
abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#
);

// 智能钱包：由钱包自身发起外部调用
abigen!(
    SmartWalletAccount,
    r#"[
        function execute(address target, uint256 value, bytes data) external
    ]"#
);

// 投票工厂：创建并注资
abigen!(
    PollFactory,
    r#"[
        function createFundedPoll(address rewardToken, uint256 rewardPerVoter, uint256 voteLimit, uint256 fundAmount) external returns (address)
    ]"#
);

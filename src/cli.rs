use std::path::PathBuf;

use alloy_primitives::{Address, B256};

use crate::{create2::parse_salt, mine::RankingKind, verify::ETHERSCAN_API_URL};

/// Command-line interface for the detdeploy tool.
///
/// detdeploy predicts, mines and deploys contracts through a deterministic
/// CREATE2 deployer, so the same contract lands on the same address on every
/// chain.
#[derive(Clone, Debug, clap::Parser)]
#[command(
    name = "detdeploy",
    about = "Mine salts for and deploy contracts through a deterministic CREATE2 deployer."
)]
pub(super) enum Detdeploy {
    /// Mines a salt that gives the contract a favourable address.
    ///
    /// Draws random salts until the time limit passes or Ctrl-C is pressed,
    /// then prints the best address found and the salt that produces it.
    Mine {
        /// Name of the contract artifact.
        #[arg(required_unless_present = "init_code_hash")]
        contract: Option<String>,

        /// Hash of the initialization code. Skips the artifact lookup.
        #[arg(long)]
        init_code_hash: Option<B256>,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Constructor arguments, in ABI order.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// Address of the deterministic deployer. Defaults to Arachnid's.
        #[arg(short, long)]
        deployer: Option<Address>,

        /// Stop mining after this many seconds.
        #[arg(long, default_value_t = 6.0, allow_negative_numbers = true)]
        limit: f64,

        /// Seconds between progress reports.
        #[arg(long, default_value_t = 2.0, allow_negative_numbers = true)]
        log_interval: f64,

        /// Stop each session after this many attempts.
        #[arg(long)]
        max_attempts: Option<u64>,

        /// Number of independent sessions run in parallel.
        #[arg(long, default_value_t = 1)]
        sessions: usize,

        /// Which addresses count as better: lowest-hex, numeric or leading-zeros.
        #[arg(long, default_value_t = RankingKind::LowestHex)]
        rank: RankingKind,
    },

    /// Prints the address a contract would be deployed to.
    Predict {
        /// Name of the contract artifact.
        #[arg(required_unless_present = "init_code_hash")]
        contract: Option<String>,

        /// Hex keccak256 of the initialization code. Skips the artifact lookup.
        #[arg(long)]
        init_code_hash: Option<String>,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Constructor arguments, in ABI order.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// 32-byte hex salt.
        #[arg(long)]
        salt: String,

        /// Hex address of the deterministic deployer. Defaults to Arachnid's.
        #[arg(short, long)]
        deployer: Option<String>,
    },

    /// Prints a raw deployment transaction to send from any wallet.
    Prepare {
        /// Name of the contract artifact.
        contract: String,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Constructor arguments, in ABI order.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// 32-byte hex salt.
        #[arg(long, value_parser = parse_salt)]
        salt: B256,

        /// Address of the deterministic deployer. Defaults to Arachnid's.
        #[arg(short, long)]
        deployer: Option<Address>,
    },

    /// Deploys a contract through the deterministic deployer.
    Deploy {
        /// Name of the contract artifact.
        contract: String,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Constructor arguments, in ABI order.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// 32-byte hex salt. A random salt is drawn when omitted.
        #[arg(long, value_parser = parse_salt)]
        salt: Option<B256>,

        /// Address of the deterministic deployer. Defaults to Arachnid's.
        #[arg(short, long)]
        deployer: Option<Address>,

        #[command(flatten)]
        deploy: DeployArgs,
    },

    /// Deploys an upgradeable proxy pointing at an existing logic contract.
    DeployProxy {
        /// Address of the logic contract.
        #[arg(long)]
        logic: Address,

        /// Address of the proxy admin.
        #[arg(long)]
        admin: Address,

        /// Calldata for the initializer call made through the proxy.
        #[arg(long, default_value = "0x")]
        data: String,

        /// Artifact of the proxy contract, constructed as `(logic, admin, data)`.
        #[arg(long, default_value = "TransparentUpgradeableProxy")]
        proxy_contract: String,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// 32-byte hex salt. A random salt is drawn when omitted.
        #[arg(long, value_parser = parse_salt)]
        salt: Option<B256>,

        /// Address of the deterministic deployer. Defaults to Arachnid's.
        #[arg(short, long)]
        deployer: Option<Address>,

        #[command(flatten)]
        deploy: DeployArgs,
    },
}

/// Where compiled artifacts are read from.
#[derive(Clone, Debug, clap::Args)]
pub(super) struct ArtifactArgs {
    /// Directory holding Hardhat `artifacts/` or Foundry `out/` JSON files.
    #[arg(long = "artifacts", default_value = "artifacts")]
    pub(super) root: PathBuf,
}

/// Connection, signing and confirmation settings for deployments.
#[derive(Clone, Debug, clap::Args)]
pub(super) struct DeployArgs {
    /// JSON-RPC endpoint of the target chain.
    #[arg(long, env = "RPC_URL")]
    pub(super) rpc_url: String,

    /// Mnemonic of the signing account; the first derived account is used.
    #[arg(long, env = "MNEMONIC", hide_env_values = true)]
    pub(super) mnemonic: Option<String>,

    /// Private key of the signing account, used when no mnemonic is set.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub(super) private_key: Option<String>,

    /// Gas price in wei. Overrides the network quote and its escalation.
    #[arg(long, env = "GAS_PRICE")]
    pub(super) gas_price: Option<u128>,

    /// Gas limit to use instead of the node's estimate.
    #[arg(long)]
    pub(super) gas_limit: Option<u64>,

    /// Percentage applied to the network gas price.
    #[arg(long, default_value_t = crate::tx::DEFAULT_ESCALATION_PERCENT)]
    pub(super) gas_escalation_percent: u64,

    /// Confirmations to wait for before checking the deployed code.
    #[arg(long, default_value_t = 6)]
    pub(super) confirmations: u64,

    /// Seconds between receipt and block polls.
    #[arg(long, default_value_t = 2)]
    pub(super) poll_interval: u64,

    /// Seconds to wait for the confirmation target.
    #[arg(long, default_value_t = 600)]
    pub(super) confirmation_timeout: u64,

    /// Build and price the transaction, print the address, send nothing.
    #[arg(long)]
    pub(super) dry_run: bool,

    /// Skip source verification on the block explorer.
    #[arg(long)]
    pub(super) no_verify: bool,

    /// Block explorer API key. Verification is skipped without one.
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    pub(super) etherscan_api_key: Option<String>,

    /// Etherscan-compatible verification endpoint.
    #[arg(long, env = "ETHERSCAN_API_URL", default_value = ETHERSCAN_API_URL)]
    pub(super) etherscan_api_url: String,
}

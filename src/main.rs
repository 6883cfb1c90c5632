mod artifact;
mod cli;
mod create2;
mod deploy;
mod mine;
mod network;
#[cfg(test)]
mod testing;
mod tx;
mod verify;

use std::{process::ExitCode, time::Duration};

use alloy_primitives::{Address, B256, address, utils::format_ether};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use {
    artifact::{ArtifactError, ArtifactStore, InitCode},
    cli::{ArtifactArgs, DeployArgs, Detdeploy},
    create2::FormatError,
    deploy::{DeployConfig, DeployFailure, DeploymentRecord, DeploymentState, Orchestrator},
    mine::{
        CancelToken, Create2Miner, LeadingZeros, LogObserver, LowestHex, MineError, MiningBudget,
        MiningResult, Numeric, RankingKind,
    },
    network::{ConnectError, DeployNetwork},
    verify::{EtherscanConfig, EtherscanVerifier, SourceInfo, VerificationOutcome},
};

/// The deterministic deployment proxy, deployed at the same address on
/// every EVM chain.
/// See: https://github.com/Arachnid/deterministic-deployment-proxy
const DETERMINISTIC_DEPLOYER: Address = address!("0x4e59b44847b379578588920cA78FbF26c0B4956C");

/// Everything that can stop a command.
#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Mine(#[from] MineError),

    #[error("either a contract name or --init-code-hash is required")]
    NoTarget,

    #[error("{source} (predicted address {predicted}, salt {salt})")]
    Connect {
        #[source]
        source: ConnectError,
        predicted: Address,
        salt: B256,
    },

    #[error("mining task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Deploy(#[from] DeployFailure),
}

impl Error {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Deploy(failure) => failure.exit_code(),
            _ => 1,
        }
    }
}

/// Entry point for the detdeploy tool.
///
/// Exit status: 0 on success (including failed source verification), 1 for
/// invalid input or setup, 2 when the transaction could not be built or
/// estimated, 3 when it could not be broadcast, 4 when no code appeared at
/// the predicted address and 5 when that code could not be read.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Detdeploy::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(command: Detdeploy) -> Result<(), Error> {
    match command {
        Detdeploy::Mine {
            contract,
            init_code_hash,
            artifacts,
            args,
            deployer,
            limit,
            log_interval,
            max_attempts,
            sessions,
            rank,
        } => {
            let deployer = deployer.unwrap_or(DETERMINISTIC_DEPLOYER);
            let budget = MiningBudget::from_secs(limit, log_interval, max_attempts)?;
            let init_code_hash = match (init_code_hash, &contract) {
                (Some(hash), _) => hash,
                (None, Some(name)) => load_init_code(&artifacts, name, &args)?.hash(),
                (None, None) => return Err(Error::NoTarget),
            };
            println!("Mining {}...", contract.as_deref().unwrap_or("contract"));
            println!("InitCode hash: {init_code_hash}");

            let cancel = CancelToken::default();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, stopping");
                    on_interrupt.cancel();
                }
            });

            let result = tokio::task::spawn_blocking(move || {
                mine_with(rank, deployer, init_code_hash, sessions, &budget, &cancel)
            })
            .await??;
            print_mining_result(&result, contract.as_deref());
            Ok(())
        }

        Detdeploy::Predict {
            contract,
            init_code_hash,
            artifacts,
            args,
            salt,
            deployer,
        } => {
            let hash = match (init_code_hash, &contract) {
                (Some(hash), _) => create2::decode_hex("init code hash", &hash)?,
                (None, Some(name)) => load_init_code(&artifacts, name, &args)?.hash().to_vec(),
                (None, None) => return Err(Error::NoTarget),
            };
            let deployer = match deployer {
                Some(deployer) => create2::decode_hex("deployer address", &deployer)?,
                None => DETERMINISTIC_DEPLOYER.to_vec(),
            };
            let salt = create2::decode_hex("salt", &salt)?;
            let address = create2::derive_from_slices(&deployer, &salt, &hash)?;
            println!("{address}");
            Ok(())
        }

        Detdeploy::Prepare {
            contract,
            artifacts,
            args,
            salt,
            deployer,
        } => {
            let deployer = deployer.unwrap_or(DETERMINISTIC_DEPLOYER);
            let init_code = load_init_code(&artifacts, &contract, &args)?;
            let expected = create2::derive(deployer, &salt, &init_code.hash());
            let calldata = tx::deployer_calldata(&salt, &init_code);

            println!("Manual deployment instructions for {contract}");
            println!("{}", "=".repeat(50));
            println!("To:       {deployer}");
            println!("Value:    0 ETH");
            println!("Data:     {calldata}");
            println!("Expected: {expected}");
            println!("{}", "=".repeat(50));
            println!("Copy the data above into your wallet's custom transaction field");
            Ok(())
        }

        Detdeploy::Deploy {
            contract,
            artifacts,
            args,
            salt,
            deployer,
            deploy,
        } => {
            let store = ArtifactStore::new(&artifacts.root);
            let artifact = store.load(&contract)?;
            let init_code = InitCode::new(&artifact, &args)?;
            let source = SourceInfo::from_artifact(&artifact).map_err(|err| err.to_string());
            let record = deploy_contract(&contract, &init_code, salt, deployer, deploy, source).await?;
            print_record(&record);
            Ok(())
        }

        Detdeploy::DeployProxy {
            logic,
            admin,
            data,
            proxy_contract,
            artifacts,
            salt,
            deployer,
            deploy,
        } => {
            let data = create2::decode_hex("proxy init data", &data)?;
            let args = [
                logic.to_string(),
                admin.to_string(),
                format!("0x{}", hex::encode(data)),
            ];
            let artifact = ArtifactStore::new(&artifacts.root).load(&proxy_contract)?;
            let init_code = InitCode::new(&artifact, &args)?;
            let source = SourceInfo::from_artifact(&artifact).map_err(|err| err.to_string());
            tracing::info!(%logic, %admin, "deploying proxy");
            let record =
                deploy_contract(&proxy_contract, &init_code, salt, deployer, deploy, source).await?;
            print_record(&record);
            Ok(())
        }
    }
}

fn load_init_code(artifacts: &ArtifactArgs, name: &str, args: &[String]) -> Result<InitCode, Error> {
    let artifact = ArtifactStore::new(&artifacts.root).load(name)?;
    Ok(InitCode::new(&artifact, args)?)
}

fn mine_with(
    rank: RankingKind,
    deployer: Address,
    init_code_hash: B256,
    sessions: usize,
    budget: &MiningBudget,
    cancel: &CancelToken,
) -> Result<MiningResult, MineError> {
    match rank {
        RankingKind::LowestHex => Create2Miner::new(deployer, init_code_hash, LowestHex)
            .mine_parallel(sessions, budget, cancel, &LogObserver),
        RankingKind::Numeric => Create2Miner::new(deployer, init_code_hash, Numeric)
            .mine_parallel(sessions, budget, cancel, &LogObserver),
        RankingKind::LeadingZeros => Create2Miner::new(deployer, init_code_hash, LeadingZeros)
            .mine_parallel(sessions, budget, cancel, &LogObserver),
    }
}

async fn deploy_contract(
    contract: &str,
    init_code: &InitCode,
    salt: Option<B256>,
    deployer: Option<Address>,
    args: DeployArgs,
    source: Result<SourceInfo, String>,
) -> Result<DeploymentRecord, Error> {
    let salt = salt.unwrap_or_else(|| mine::random_salt(&mut rand::rng()));
    let deployer = deployer.unwrap_or(DETERMINISTIC_DEPLOYER);
    let predicted = create2::derive(deployer, &salt, &init_code.hash());
    tracing::info!(%salt, %predicted, "using salt");

    let network = network::signer_from(args.mnemonic.as_deref(), args.private_key.as_deref())
        .and_then(|signer| network::connect(&args.rpc_url, signer))
        .map_err(|source| Error::Connect {
            source,
            predicted,
            salt,
        })?;
    tracing::info!(rpc = %args.rpc_url, sender = %network.sender(), %deployer, "connected");

    let verifier = if args.no_verify || args.dry_run {
        None
    } else {
        attach_verifier(&network, &args, source).await
    };

    let config = DeployConfig {
        confirmations: args.confirmations,
        poll_interval: Duration::from_secs(args.poll_interval),
        confirmation_timeout: Duration::from_secs(args.confirmation_timeout),
        dry_run: args.dry_run,
        gas_price: args.gas_price,
        escalation_percent: args.gas_escalation_percent,
        gas_limit: args.gas_limit,
    };
    let record = Orchestrator::new(&network, verifier, deployer, config)
        .deploy(contract, init_code, salt)
        .await?;
    Ok(record)
}

/// Builds the explorer client for this chain, or `None` when verification
/// cannot run. Never fails the deployment.
async fn attach_verifier<N: DeployNetwork>(
    network: &N,
    args: &DeployArgs,
    source: Result<SourceInfo, String>,
) -> Option<EtherscanVerifier> {
    let Some(api_key) = &args.etherscan_api_key else {
        tracing::info!("no explorer API key configured, skipping verification");
        return None;
    };
    let chain_id = match network.chain_id().await {
        Ok(chain_id) => chain_id,
        Err(err) => {
            tracing::warn!(%err, "failed to query chain id, skipping verification");
            return None;
        }
    };
    let mut config = EtherscanConfig::new(api_key.clone(), chain_id);
    config.api_url = args.etherscan_api_url.clone();
    Some(EtherscanVerifier::new(config, source))
}

fn print_mining_result(result: &MiningResult, contract: Option<&str>) {
    println!(
        "Mining stopped after {} attempts ({:.1}s, {:.0}/s){}",
        result.attempts,
        result.elapsed.as_secs_f64(),
        result.rate(),
        if result.cancelled { ", interrupted" } else { "" }
    );
    let Some((address, salt)) = result.best else {
        println!("No salt tried");
        return;
    };
    println!("Best: {address}");
    println!("Salt: {salt}");
    if let Some(contract) = contract {
        println!("Preview with:");
        println!("  detdeploy deploy {contract} --salt {salt} --dry-run");
        println!("  detdeploy prepare {contract} --salt {salt}");
    }
}

fn print_record(record: &DeploymentRecord) {
    println!("Contract: {}", record.contract_name);
    println!("Salt:     {}", record.salt);
    println!("Address:  {}", record.predicted_address);
    if let Some(tx) = &record.transaction {
        println!("Gas:      {} @ {} wei", tx.gas_limit, tx.gas_price);
        println!("Max cost: {} ETH", format_ether(tx.max_cost()));
    }
    if let Some(hash) = record.transaction_hash {
        println!("Tx:       {hash}");
    }
    match record.state {
        DeploymentState::Previewed => println!("Status:   dry run, nothing sent"),
        DeploymentState::Confirming => println!(
            "Status:   waiting for confirmations ({} so far), re-run to resume",
            record.confirmations
        ),
        _ if record.already_deployed => println!("Status:   already deployed"),
        _ => println!("Status:   deployed ({} confirmations)", record.confirmations),
    }
    match &record.verification {
        Some(VerificationOutcome::Verified) => println!("Verified: yes"),
        Some(VerificationOutcome::Pending { guid }) => println!("Verified: pending ({guid})"),
        Some(VerificationOutcome::Failed(reason)) => println!("Verified: no ({reason})"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;
    use alloy_primitives::Bytes;

    fn deploy_args() -> DeployArgs {
        DeployArgs {
            rpc_url: "http://localhost:8545".into(),
            mnemonic: None,
            private_key: Some(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".into(),
            ),
            gas_price: None,
            gas_limit: None,
            gas_escalation_percent: tx::DEFAULT_ESCALATION_PERCENT,
            confirmations: 6,
            poll_interval: 2,
            confirmation_timeout: 600,
            dry_run: false,
            no_verify: false,
            etherscan_api_key: Some("key".into()),
            etherscan_api_url: verify::ETHERSCAN_API_URL.into(),
        }
    }

    fn init_code() -> InitCode {
        InitCode::from_parts(Bytes::from_static(&[0x60, 0x80]), Bytes::new())
    }

    #[tokio::test]
    async fn commands_without_a_target_fail_cleanly() {
        let mine = Detdeploy::Mine {
            contract: None,
            init_code_hash: None,
            artifacts: ArtifactArgs {
                root: "artifacts".into(),
            },
            args: Vec::new(),
            deployer: None,
            limit: 6.0,
            log_interval: 2.0,
            max_attempts: None,
            sessions: 1,
            rank: RankingKind::LowestHex,
        };
        assert!(matches!(run(mine).await, Err(Error::NoTarget)));

        let predict = Detdeploy::Predict {
            contract: None,
            init_code_hash: None,
            artifacts: ArtifactArgs {
                root: "artifacts".into(),
            },
            args: Vec::new(),
            salt: format!("0x{}", "00".repeat(32)),
            deployer: None,
        };
        let err = run(predict).await.unwrap_err();
        assert!(matches!(err, Error::NoTarget));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn chain_id_failure_skips_verification() {
        let chain = MockChain::new();
        assert!(attach_verifier(&chain, &deploy_args(), Err("n/a".into())).await.is_some());

        chain.state().chain_id = Err("connection refused".into());
        assert!(attach_verifier(&chain, &deploy_args(), Err("n/a".into())).await.is_none());
    }

    #[tokio::test]
    async fn missing_api_key_skips_verification() {
        let args = DeployArgs {
            etherscan_api_key: None,
            ..deploy_args()
        };
        let chain = MockChain::new();
        assert!(attach_verifier(&chain, &args, Err("n/a".into())).await.is_none());
    }

    #[tokio::test]
    async fn setup_failures_carry_salt_and_address() {
        let args = DeployArgs {
            rpc_url: "not a url".into(),
            ..deploy_args()
        };
        let salt = B256::with_last_byte(9);
        let err = deploy_contract("Token", &init_code(), Some(salt), None, args, Err("n/a".into()))
            .await
            .unwrap_err();

        let expected = create2::derive(DETERMINISTIC_DEPLOYER, &salt, &init_code().hash());
        let Error::Connect {
            source,
            predicted,
            salt: reported,
        } = &err
        else {
            panic!("expected a connection error, got {err:?}");
        };
        assert!(matches!(source, ConnectError::BadUrl(_)));
        assert_eq!(*predicted, expected);
        assert_eq!(*reported, salt);
        assert_eq!(err.exit_code(), 1);

        let message = err.to_string();
        assert!(message.contains(&expected.to_string()), "{message}");
        assert!(message.contains(&salt.to_string()), "{message}");
    }

    #[tokio::test]
    async fn missing_signer_is_reported_with_the_drawn_salt() {
        let args = DeployArgs {
            private_key: None,
            ..deploy_args()
        };
        let err = deploy_contract("Token", &init_code(), None, None, args, Err("n/a".into()))
            .await
            .unwrap_err();
        let Error::Connect {
            source: ConnectError::NoSigner,
            predicted,
            salt,
        } = &err
        else {
            panic!("expected a missing signer error, got {err:?}");
        };
        assert_eq!(
            *predicted,
            create2::derive(DETERMINISTIC_DEPLOYER, salt, &init_code().hash())
        );
    }
}

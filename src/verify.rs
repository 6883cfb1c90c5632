use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use serde::Deserialize;

use crate::artifact::{Artifact, ArtifactError};

/// Default Etherscan v2 endpoint; the chain is selected with `chainid`.
pub(super) const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Result of a source verification attempt. Never an error: verification
/// cannot fail a deployment whose code is already on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum VerificationOutcome {
    Verified,
    /// Accepted by the explorer but not finished within the polling budget.
    Pending { guid: String },
    Failed(VerificationFailure),
}

/// Why the explorer did not verify the contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(super) enum VerificationFailure {
    #[error("explorer unreachable: {0}")]
    Network(String),

    #[error("contract is already verified")]
    AlreadyVerified,

    #[error("explorer rate limit reached")]
    RateLimited,

    #[error("explorer rejected the submission: {0}")]
    Rejected(String),

    #[error("compiler input unavailable: {0}")]
    MissingSource(String),
}

/// Best-effort source verification against a block explorer.
pub(super) trait Verifier {
    async fn verify(&self, address: Address, constructor_args: &Bytes) -> VerificationOutcome;
}

/// Compiler input identifying one contract.
#[derive(Debug, Clone)]
pub(super) struct SourceInfo {
    /// Fully qualified name, `path/To.sol:Name`.
    pub(super) contract: String,
    pub(super) compiler_version: String,
    pub(super) standard_json: serde_json::Value,
}

impl SourceInfo {
    pub(super) fn from_artifact(artifact: &Artifact) -> Result<Self, ArtifactError> {
        let build_info = artifact.build_info()?;
        let source = artifact
            .source_name
            .clone()
            .unwrap_or_else(|| format!("{}.sol", artifact.contract_name));
        Ok(Self {
            contract: format!("{source}:{}", artifact.contract_name),
            compiler_version: format!("v{}", build_info.solc_long_version),
            standard_json: build_info.input,
        })
    }
}

#[derive(Debug, Clone)]
pub(super) struct EtherscanConfig {
    pub(super) api_url: String,
    pub(super) api_key: String,
    pub(super) chain_id: u64,
    /// Times a submission is retried while the explorer has not indexed the
    /// bytecode yet or rate-limits us.
    pub(super) submit_retries: u32,
    /// Status checks after a successful submission.
    pub(super) status_polls: u32,
    pub(super) delay: Duration,
}

impl EtherscanConfig {
    pub(super) fn new(api_key: String, chain_id: u64) -> Self {
        Self {
            api_url: ETHERSCAN_API_URL.to_owned(),
            api_key,
            chain_id,
            submit_retries: 3,
            status_polls: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Etherscan-compatible `verifysourcecode` client.
#[derive(Debug, Clone)]
pub(super) struct EtherscanVerifier {
    client: reqwest::Client,
    config: EtherscanConfig,
    source: Result<SourceInfo, String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    result: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Submission {
    Accepted(String),
    Retry(VerificationFailure),
    Rejected(VerificationFailure),
}

#[derive(Debug, PartialEq, Eq)]
enum Status {
    Done(VerificationOutcome),
    Waiting,
}

impl EtherscanVerifier {
    /// `source` is the compiler input, or the reason it could not be loaded.
    pub(super) fn new(config: EtherscanConfig, source: Result<SourceInfo, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config,
            source,
        }
    }

    async fn submit(
        &self,
        source: &SourceInfo,
        address: Address,
        constructor_args: &Bytes,
    ) -> Result<ApiResponse, reqwest::Error> {
        let address = address.to_string();
        let source_code = source.standard_json.to_string();
        let args = hex::encode(constructor_args);
        let form = [
            ("apikey", self.config.api_key.as_str()),
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source_code.as_str()),
            ("codeformat", "solidity-standard-json-input"),
            ("contractname", source.contract.as_str()),
            ("compilerversion", source.compiler_version.as_str()),
            // Etherscan's own spelling.
            ("constructorArguements", args.as_str()),
        ];
        self.client
            .post(&self.config.api_url)
            .query(&[("chainid", self.config.chain_id)])
            .form(&form)
            .send()
            .await?
            .json()
            .await
    }

    async fn check_status(&self, guid: &str) -> Result<ApiResponse, reqwest::Error> {
        let chain_id = self.config.chain_id.to_string();
        self.client
            .get(&self.config.api_url)
            .query(&[
                ("chainid", chain_id.as_str()),
                ("apikey", self.config.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await?
            .json()
            .await
    }

    async fn await_status(&self, guid: String) -> VerificationOutcome {
        for poll in 0..self.config.status_polls {
            tokio::time::sleep(self.config.delay).await;
            match self.check_status(&guid).await {
                Ok(response) => match interpret_status(&response) {
                    Status::Done(outcome) => return outcome,
                    Status::Waiting => tracing::debug!(%guid, poll, "verification pending"),
                },
                Err(err) => tracing::warn!(%guid, poll, %err, "verification status check failed"),
            }
        }
        VerificationOutcome::Pending { guid }
    }
}

impl Verifier for EtherscanVerifier {
    async fn verify(&self, address: Address, constructor_args: &Bytes) -> VerificationOutcome {
        let source = match &self.source {
            Ok(source) => source,
            Err(reason) => {
                return VerificationOutcome::Failed(VerificationFailure::MissingSource(
                    reason.clone(),
                ));
            }
        };

        let mut attempt = 0;
        loop {
            let response = match self.submit(source, address, constructor_args).await {
                Ok(response) => response,
                Err(err) => {
                    return VerificationOutcome::Failed(VerificationFailure::Network(
                        err.to_string(),
                    ));
                }
            };
            match interpret_submission(&response) {
                Submission::Accepted(guid) => {
                    tracing::info!(%address, %guid, "verification submitted");
                    return self.await_status(guid).await;
                }
                Submission::Retry(reason) if attempt < self.config.submit_retries => {
                    attempt += 1;
                    tracing::warn!(%address, attempt, %reason, "verification not accepted yet, retrying");
                    tokio::time::sleep(self.config.delay).await;
                }
                Submission::Retry(reason) | Submission::Rejected(reason) => {
                    return VerificationOutcome::Failed(reason);
                }
            }
        }
    }
}

fn interpret_submission(response: &ApiResponse) -> Submission {
    let result = response.result.to_ascii_lowercase();
    if response.status == "1" {
        Submission::Accepted(response.result.clone())
    } else if result.contains("already verified") {
        Submission::Rejected(VerificationFailure::AlreadyVerified)
    } else if result.contains("rate limit") {
        Submission::Retry(VerificationFailure::RateLimited)
    } else if result.contains("unable to locate contractcode")
        || result.contains("does not have bytecode")
    {
        Submission::Retry(VerificationFailure::Rejected(response.result.clone()))
    } else {
        Submission::Rejected(VerificationFailure::Rejected(response.result.clone()))
    }
}

fn interpret_status(response: &ApiResponse) -> Status {
    let result = response.result.to_ascii_lowercase();
    if result.starts_with("pass") {
        Status::Done(VerificationOutcome::Verified)
    } else if result.contains("already verified") {
        Status::Done(VerificationOutcome::Failed(
            VerificationFailure::AlreadyVerified,
        ))
    } else if result.contains("pending") || result.contains("rate limit") {
        Status::Waiting
    } else {
        Status::Done(VerificationOutcome::Failed(VerificationFailure::Rejected(
            response.result.clone(),
        )))
    }
}

use std::{fmt, time::Duration};

use alloy_primitives::{Address, B256, TxHash, utils::format_ether};
use tokio::time::{Instant, sleep};

use crate::{
    artifact::InitCode,
    create2,
    network::{DeployNetwork, NetworkError},
    tx::{BuildError, DEFAULT_ESCALATION_PERCENT, RawTransaction, TransactionBuilder},
    verify::{VerificationOutcome, Verifier},
};

/// Knobs of a single deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DeployConfig {
    /// Blocks, counting the inclusion block, to wait before checking the code.
    pub(super) confirmations: u64,
    pub(super) poll_interval: Duration,
    /// How long to wait for the confirmation target before handing back a
    /// still-confirming record.
    pub(super) confirmation_timeout: Duration,
    /// Build and price the transaction, then stop without broadcasting.
    pub(super) dry_run: bool,
    /// Gas price in wei that overrides the network quote and its escalation.
    pub(super) gas_price: Option<u128>,
    pub(super) escalation_percent: u64,
    /// Gas limit to use when the node's estimate is wrong or fails.
    pub(super) gas_limit: Option<u64>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            confirmations: 6,
            poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(600),
            dry_run: false,
            gas_price: None,
            escalation_percent: DEFAULT_ESCALATION_PERCENT,
            gas_limit: None,
        }
    }
}

/// Where a deployment currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DeploymentState {
    Building,
    /// Dry run: built and priced, never broadcast.
    Previewed,
    Submitted,
    Confirming,
    CodeVerified,
    VerificationAttempted,
    Done,
    Failed,
}

/// Everything known about one deployment attempt.
///
/// `contract_name` and `salt` identify the attempt and never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DeploymentRecord {
    pub(super) contract_name: String,
    pub(super) salt: B256,
    pub(super) predicted_address: Address,
    pub(super) transaction: Option<RawTransaction>,
    pub(super) transaction_hash: Option<TxHash>,
    pub(super) confirmations: u64,
    /// `None` until verification has been attempted.
    pub(super) verification: Option<VerificationOutcome>,
    /// Code was already present, nothing was sent.
    pub(super) already_deployed: bool,
    pub(super) state: DeploymentState,
}

impl DeploymentRecord {
    fn new(contract_name: &str, salt: B256, predicted_address: Address) -> Self {
        Self {
            contract_name: contract_name.to_owned(),
            salt,
            predicted_address,
            transaction: None,
            transaction_hash: None,
            confirmations: 0,
            verification: None,
            already_deployed: false,
            state: DeploymentState::Building,
        }
    }

    fn advance(&mut self, state: DeploymentState) {
        tracing::debug!(contract = %self.contract_name, from = ?self.state, to = ?state, "deployment state");
        self.state = state;
    }

    fn fail(mut self, error: DeployError) -> DeployFailure {
        self.advance(DeploymentState::Failed);
        DeployFailure {
            record: Box::new(self),
            error,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub(super) enum DeployError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The node refused the signed transaction, e.g. underpriced.
    #[error("failed to broadcast transaction: {0}")]
    Submission(#[source] NetworkError),

    /// Mined, but nothing lives at the predicted address: the bytecode, the
    /// constructor arguments or the salt differ from what was predicted.
    #[error("no code deployed at {0}")]
    NoCode(Address),

    #[error("failed to read code at the predicted address: {0}")]
    CodeQuery(#[source] NetworkError),
}

/// A failed deployment, with the record it left behind so the attempt can
/// be retried with the same salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DeployFailure {
    pub(super) record: Box<DeploymentRecord>,
    pub(super) error: DeployError,
}

impl DeployFailure {
    /// Process exit status for this failure class.
    pub(super) fn exit_code(&self) -> u8 {
        match self.error {
            DeployError::Build(_) => 2,
            DeployError::Submission(_) => 3,
            DeployError::NoCode(_) => 4,
            DeployError::CodeQuery(_) => 5,
        }
    }
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (contract {}, predicted address {}, salt {}",
            self.error, self.record.contract_name, self.record.predicted_address, self.record.salt
        )?;
        if let Some(hash) = self.record.transaction_hash {
            write!(f, ", transaction {hash}")?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for DeployFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Drives one contract through the deterministic deployer.
///
/// Deployments take `&mut self`: the signing account's nonce is a
/// serialization point, so one orchestrator per account runs one deployment
/// at a time.
#[derive(Debug)]
pub(super) struct Orchestrator<'a, N, V> {
    network: &'a N,
    verifier: Option<V>,
    deployer: Address,
    config: DeployConfig,
}

impl<'a, N: DeployNetwork, V: Verifier> Orchestrator<'a, N, V> {
    pub(super) fn new(
        network: &'a N,
        verifier: Option<V>,
        deployer: Address,
        config: DeployConfig,
    ) -> Self {
        Self {
            network,
            verifier,
            deployer,
            config,
        }
    }

    /// Deploys `init_code` under `salt`.
    ///
    /// Existing code at the predicted address counts as success and nothing
    /// is sent. Verification problems are recorded on the returned record,
    /// never returned as errors.
    pub(super) async fn deploy(
        &mut self,
        contract_name: &str,
        init_code: &InitCode,
        salt: B256,
    ) -> Result<DeploymentRecord, DeployFailure> {
        let predicted = create2::derive(self.deployer, &salt, &init_code.hash());
        let mut record = DeploymentRecord::new(contract_name, salt, predicted);
        tracing::info!(contract = contract_name, %salt, %predicted, "predicted deployment address");

        let existing = match self.network.code_at(predicted).await {
            Ok(code) => code,
            Err(err) => return Err(record.fail(DeployError::CodeQuery(err))),
        };
        if !existing.is_empty() {
            tracing::info!(contract = contract_name, %predicted, "already deployed, nothing to send");
            record.already_deployed = true;
            record.advance(DeploymentState::Done);
            return Ok(record);
        }

        let builder = TransactionBuilder::new(self.network, self.deployer, self.config.escalation_percent)
            .with_gas_limit(self.config.gas_limit);
        let tx = match builder.build(init_code, &salt, self.config.gas_price).await {
            Ok(tx) => tx,
            Err(err) => return Err(record.fail(err.into())),
        };
        tracing::info!(
            gas_price = tx.gas_price,
            gas_limit = tx.gas_limit,
            cost_wei = %tx.max_cost(),
            cost_eth = %format_ether(tx.max_cost()),
            "estimated deployment cost"
        );

        if self.config.dry_run {
            tracing::info!(contract = contract_name, %predicted, "dry run, not broadcasting");
            record.transaction = Some(tx);
            record.advance(DeploymentState::Previewed);
            return Ok(record);
        }

        let hash = match self.network.send(&tx).await {
            Ok(hash) => hash,
            Err(err) => return Err(record.fail(DeployError::Submission(err))),
        };
        tracing::info!(contract = contract_name, %hash, %predicted, "transaction sent");
        record.transaction = Some(tx);
        record.transaction_hash = Some(hash);
        record.advance(DeploymentState::Submitted);

        record.advance(DeploymentState::Confirming);
        if !self.await_confirmations(hash, &mut record).await {
            tracing::warn!(
                contract = contract_name,
                %hash,
                confirmations = record.confirmations,
                target = self.config.confirmations,
                "confirmation target not reached in time, transaction may still be pending"
            );
            return Ok(record);
        }

        match self.network.code_at(predicted).await {
            Ok(code) if code.is_empty() => {
                return Err(record.fail(DeployError::NoCode(predicted)));
            }
            Ok(code) => {
                tracing::info!(%predicted, code_len = code.len(), "code deployed");
            }
            Err(err) => return Err(record.fail(DeployError::CodeQuery(err))),
        }
        record.advance(DeploymentState::CodeVerified);

        if let Some(verifier) = &self.verifier {
            record.advance(DeploymentState::VerificationAttempted);
            let outcome = verifier.verify(predicted, init_code.constructor_args()).await;
            match &outcome {
                VerificationOutcome::Verified => tracing::info!(%predicted, "source verified"),
                VerificationOutcome::Pending { guid } => {
                    tracing::info!(%predicted, %guid, "verification still pending")
                }
                VerificationOutcome::Failed(reason) => {
                    tracing::warn!(%predicted, %reason, "verification failed")
                }
            }
            record.verification = Some(outcome);
        }

        record.advance(DeploymentState::Done);
        Ok(record)
    }

    /// Polls until the transaction has the configured number of
    /// confirmations. Returns `false` if the timeout elapsed first.
    async fn await_confirmations(&self, hash: TxHash, record: &mut DeploymentRecord) -> bool {
        let target = self.config.confirmations.max(1);
        let started = Instant::now();
        let mut included_at = None;

        loop {
            if included_at.is_none() {
                match self.network.inclusion(hash).await {
                    Ok(Some(inclusion)) => {
                        if !inclusion.success {
                            tracing::warn!(%hash, block = inclusion.block_number, "transaction reverted");
                        }
                        tracing::info!(%hash, block = inclusion.block_number, "transaction included");
                        included_at = Some(inclusion.block_number);
                    }
                    Ok(None) => tracing::debug!(%hash, "transaction pending"),
                    Err(err) => tracing::warn!(%hash, %err, "receipt query failed"),
                }
            }

            if let Some(block) = included_at {
                match self.network.block_number().await {
                    Ok(head) => {
                        record.confirmations = head.saturating_sub(block) + 1;
                        tracing::info!(%hash, confirmations = record.confirmations, target, "waiting for confirmations");
                        if record.confirmations >= target {
                            return true;
                        }
                    }
                    Err(err) => tracing::warn!(%hash, %err, "block number query failed"),
                }
            }

            if started.elapsed() >= self.config.confirmation_timeout {
                return false;
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

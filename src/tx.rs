use alloy_primitives::{Address, B256, Bytes, U256};

use crate::{
    artifact::InitCode,
    network::{DeployNetwork, NetworkError},
};

/// Gas price multiplier applied to the network's quote, in percent.
pub(super) const DEFAULT_ESCALATION_PERCENT: u64 = 120;

/// Why a deployment transaction could not be assembled.
///
/// Both variants come from read-only queries, so nothing has been sent yet.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub(super) enum BuildError {
    #[error("failed to query gas price: {0}")]
    GasPrice(#[source] NetworkError),

    /// The simulated deployment failed. Retry with an explicit gas limit if
    /// the node's estimator is at fault.
    #[error("gas estimation failed: {0}")]
    Estimation(#[source] NetworkError),
}

/// A fully priced, unsigned call to the deterministic deployer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RawTransaction {
    pub(super) to: Address,
    pub(super) value: U256,
    /// `salt ‖ init code`.
    pub(super) input: Bytes,
    pub(super) gas_price: u128,
    pub(super) gas_limit: u64,
}

impl RawTransaction {
    /// Upper bound of the fee in wei.
    pub(super) fn max_cost(&self) -> U256 {
        U256::from(self.gas_price).saturating_mul(U256::from(self.gas_limit))
    }
}

/// Calldata the deterministic deployer expects: the 32-byte salt followed by
/// the init code, with no selector.
pub(super) fn deployer_calldata(salt: &B256, init_code: &InitCode) -> Bytes {
    salt.iter()
        .chain(init_code.bytes().iter())
        .copied()
        .collect()
}

/// Prices and sizes transactions aimed at a deterministic deployer.
#[derive(Debug)]
pub(super) struct TransactionBuilder<'a, N> {
    network: &'a N,
    deployer: Address,
    escalation_percent: u64,
    gas_limit: Option<u64>,
}

impl<'a, N: DeployNetwork> TransactionBuilder<'a, N> {
    pub(super) fn new(network: &'a N, deployer: Address, escalation_percent: u64) -> Self {
        Self {
            network,
            deployer,
            escalation_percent,
            gas_limit: None,
        }
    }

    /// Uses `gas_limit` instead of asking the node to estimate.
    pub(super) fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Assembles the deployment transaction for `init_code` under `salt`.
    ///
    /// An explicit `gas_price_hint` is used verbatim. Otherwise the network's
    /// current gas price is scaled by the escalation factor. Unless a fixed
    /// gas limit was configured, it comes from simulating the call against
    /// the deployer.
    pub(super) async fn build(
        &self,
        init_code: &InitCode,
        salt: &B256,
        gas_price_hint: Option<u128>,
    ) -> Result<RawTransaction, BuildError> {
        let input = deployer_calldata(salt, init_code);

        let gas_price = match gas_price_hint {
            Some(price) => {
                tracing::info!(gas_price = price, "using configured gas price");
                price
            }
            None => {
                let quoted = self
                    .network
                    .gas_price()
                    .await
                    .map_err(BuildError::GasPrice)?;
                let escalated = escalate(quoted, self.escalation_percent);
                tracing::debug!(quoted, escalated, "escalated network gas price");
                escalated
            }
        };

        let gas_limit = match self.gas_limit {
            Some(limit) => limit,
            None => self
                .network
                .estimate_gas(self.deployer, &input)
                .await
                .map_err(BuildError::Estimation)?,
        };

        Ok(RawTransaction {
            to: self.deployer,
            value: U256::ZERO,
            input,
            gas_price,
            gas_limit,
        })
    }
}

fn escalate(price: u128, percent: u64) -> u128 {
    price.saturating_mul(u128::from(percent)) / 100
}

use alloy::{
    network::{EthereumWallet, ReceiptResponse, TransactionBuilder},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English},
    transports::http::reqwest::Url,
};
use alloy_primitives::{Address, Bytes, TxHash};

use crate::tx::RawTransaction;

/// Failure talking to the chain. Carries the transport's message only; the
/// caller decides which class of deployment error it becomes.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub(super) struct NetworkError(pub(super) String);

impl NetworkError {
    fn from_display(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Errors raised while setting up the RPC connection.
#[derive(Debug, thiserror::Error)]
pub(super) enum ConnectError {
    #[error("invalid RPC url `{0}`")]
    BadUrl(String),

    #[error("no signing account configured, set MNEMONIC or PRIVATE_KEY")]
    NoSigner,

    #[error("invalid signing key: {0}")]
    Signer(#[from] alloy::signers::local::LocalSignerError),
}

/// Inclusion data for a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Inclusion {
    pub(super) block_number: u64,
    /// `false` when the transaction reverted.
    pub(super) success: bool,
}

/// The slice of an EVM JSON-RPC endpoint the deployment flow needs.
///
/// The signing account is part of the connection: [`DeployNetwork::send`]
/// signs and broadcasts from [`DeployNetwork::sender`].
pub(super) trait DeployNetwork {
    fn sender(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, NetworkError>;

    async fn gas_price(&self) -> Result<u128, NetworkError>;

    /// Simulates `input` sent to `to` from the sender and returns the gas used.
    async fn estimate_gas(&self, to: Address, input: &Bytes) -> Result<u64, NetworkError>;

    async fn send(&self, tx: &RawTransaction) -> Result<TxHash, NetworkError>;

    /// Returns `None` while the transaction is still pending.
    async fn inclusion(&self, hash: TxHash) -> Result<Option<Inclusion>, NetworkError>;

    async fn block_number(&self) -> Result<u64, NetworkError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, NetworkError>;
}

/// [`DeployNetwork`] backed by an alloy provider with a local wallet.
#[derive(Debug, Clone)]
pub(super) struct RpcNetwork<P> {
    provider: P,
    sender: Address,
}

/// Builds a signer from a mnemonic (first account) or a raw private key.
pub(super) fn signer_from(
    mnemonic: Option<&str>,
    private_key: Option<&str>,
) -> Result<PrivateKeySigner, ConnectError> {
    match (mnemonic, private_key) {
        (Some(phrase), _) => Ok(MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(0)?
            .build()?),
        (None, Some(key)) => Ok(key.trim().parse::<PrivateKeySigner>()?),
        (None, None) => Err(ConnectError::NoSigner),
    }
}

/// Connects to `rpc_url` over HTTP, signing with `signer`.
pub(super) fn connect(
    rpc_url: &str,
    signer: PrivateKeySigner,
) -> Result<RpcNetwork<impl Provider + Clone>, ConnectError> {
    let url: Url = rpc_url
        .parse()
        .map_err(|_| ConnectError::BadUrl(rpc_url.to_owned()))?;
    let sender = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(url);
    Ok(RpcNetwork { provider, sender })
}

impl<P> RpcNetwork<P> {
    /// Legacy-priced request: the gas price is fixed up front, so no
    /// EIP-1559 fee fields are set.
    fn deployment_request(&self, tx: &RawTransaction) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.sender)
            .with_to(tx.to)
            .with_value(tx.value)
            .with_input(tx.input.clone())
            .with_gas_price(tx.gas_price)
            .with_gas_limit(tx.gas_limit)
    }
}

impl<P: Provider> DeployNetwork for RpcNetwork<P> {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64, NetworkError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(NetworkError::from_display)
    }

    async fn gas_price(&self) -> Result<u128, NetworkError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(NetworkError::from_display)
    }

    async fn estimate_gas(&self, to: Address, input: &Bytes) -> Result<u64, NetworkError> {
        let request = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(to)
            .with_input(input.clone());
        self.provider
            .estimate_gas(request)
            .await
            .map_err(NetworkError::from_display)
    }

    async fn send(&self, tx: &RawTransaction) -> Result<TxHash, NetworkError> {
        let pending = self
            .provider
            .send_transaction(self.deployment_request(tx))
            .await
            .map_err(NetworkError::from_display)?;
        Ok(*pending.tx_hash())
    }

    async fn inclusion(&self, hash: TxHash) -> Result<Option<Inclusion>, NetworkError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(NetworkError::from_display)?;
        Ok(receipt.and_then(|receipt| {
            receipt.block_number().map(|block_number| Inclusion {
                block_number,
                success: receipt.status(),
            })
        }))
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        self.provider
            .get_block_number()
            .await
            .map_err(NetworkError::from_display)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, NetworkError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(NetworkError::from_display)
    }
}

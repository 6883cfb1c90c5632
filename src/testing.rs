//! In-memory chain that behaves like the deterministic deployer.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use alloy_primitives::{Address, B256, Bytes, TxHash, address, keccak256};

use crate::{
    create2,
    network::{DeployNetwork, Inclusion, NetworkError},
    tx::RawTransaction,
};

pub(crate) const SENDER: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub(crate) struct ChainState {
    pub(crate) chain_id: Result<u64, String>,
    pub(crate) gas_price: Result<u128, String>,
    pub(crate) estimate: Result<u64, String>,
    pub(crate) send_error: Option<String>,
    /// Runtime code the deployer installs; empty simulates a failed CREATE2.
    pub(crate) runtime_code: Bytes,
    pub(crate) code: HashMap<Address, Bytes>,
    pub(crate) sent: Vec<RawTransaction>,
    pub(crate) included_at: HashMap<TxHash, u64>,
    pub(crate) head: u64,
    /// Receipt lookups that report "pending" before the inclusion shows up.
    pub(crate) pending_polls: u32,
    /// Block number queries that fail before succeeding.
    pub(crate) flaky_head_polls: u32,
}

pub(crate) struct MockChain(Mutex<ChainState>);

impl MockChain {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ChainState {
            chain_id: Ok(1),
            gas_price: Ok(10_000_000_000),
            estimate: Ok(250_000),
            send_error: None,
            runtime_code: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
            code: HashMap::new(),
            sent: Vec::new(),
            included_at: HashMap::new(),
            head: 100,
            pending_polls: 1,
            flaky_head_polls: 0,
        }))
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ChainState> {
        self.0.lock().unwrap()
    }
}

impl DeployNetwork for MockChain {
    fn sender(&self) -> Address {
        SENDER
    }

    async fn chain_id(&self) -> Result<u64, NetworkError> {
        self.state().chain_id.clone().map_err(NetworkError)
    }

    async fn gas_price(&self) -> Result<u128, NetworkError> {
        self.state().gas_price.clone().map_err(NetworkError)
    }

    async fn estimate_gas(&self, _to: Address, _input: &Bytes) -> Result<u64, NetworkError> {
        self.state().estimate.clone().map_err(NetworkError)
    }

    async fn send(&self, tx: &RawTransaction) -> Result<TxHash, NetworkError> {
        let mut state = self.state();
        if let Some(err) = &state.send_error {
            return Err(NetworkError(err.clone()));
        }

        // The deployer reads the salt from the first word and creates the rest.
        let salt = B256::from_slice(&tx.input[..32]);
        let init_code_hash = keccak256(&tx.input[32..]);
        let address = create2::derive(tx.to, &salt, &init_code_hash);
        let runtime = state.runtime_code.clone();
        if !runtime.is_empty() {
            state.code.insert(address, runtime);
        }

        let nonce = (state.sent.len() as u64).to_be_bytes();
        let hash = keccak256([&tx.input[..], &nonce[..]].concat());
        state.head += 1;
        let block = state.head;
        state.included_at.insert(hash, block);
        state.sent.push(tx.clone());
        Ok(hash)
    }

    async fn inclusion(&self, hash: TxHash) -> Result<Option<Inclusion>, NetworkError> {
        let mut state = self.state();
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(None);
        }
        Ok(state.included_at.get(&hash).map(|block| Inclusion {
            block_number: *block,
            success: true,
        }))
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        let mut state = self.state();
        if state.flaky_head_polls > 0 {
            state.flaky_head_polls -= 1;
            return Err(NetworkError("connection reset".into()));
        }
        // Every poll sees one more block.
        state.head += 1;
        Ok(state.head)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, NetworkError> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }
}

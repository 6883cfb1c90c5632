use alloy_primitives::{Address, B256};

/// Errors raised when operator input does not have the shape the protocol requires.
#[derive(Debug, thiserror::Error, PartialEq)]
pub(super) enum FormatError {
    #[error("{what} must be {expected} bytes, got {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} is not valid hex: {source}")]
    Hex {
        what: &'static str,
        #[source]
        source: hex::FromHexError,
    },
}

/// Computes the address a CREATE2 deployment lands on.
///
/// The address is the low-order 20 bytes of
/// `keccak256(0xff ‖ deployer ‖ salt ‖ init_code_hash)`. It depends on nothing
/// else, so the same inputs give the same address on every chain that runs
/// the same deployer contract.
pub(super) fn derive(deployer: Address, salt: &B256, init_code_hash: &B256) -> Address {
    deployer.create2(*salt, *init_code_hash)
}

/// Same as [`derive`] but takes raw byte slices, checking each length first.
pub(super) fn derive_from_slices(
    deployer: &[u8],
    salt: &[u8],
    init_code_hash: &[u8],
) -> Result<Address, FormatError> {
    let deployer = Address::from_slice(expect_len("deployer address", deployer, 20)?);
    let salt = B256::from_slice(expect_len("salt", salt, 32)?);
    let init_code_hash = B256::from_slice(expect_len("init code hash", init_code_hash, 32)?);
    Ok(derive(deployer, &salt, &init_code_hash))
}

/// Parses a 32-byte salt from hex, with or without the `0x` prefix.
///
/// Short salts are rejected rather than padded: the salt is spliced verbatim
/// into the deployer calldata, so a wrong length would shift the init code.
pub(super) fn parse_salt(input: &str) -> Result<B256, FormatError> {
    let bytes = decode_hex("salt", input)?;
    Ok(B256::from_slice(expect_len("salt", &bytes, 32)?))
}

/// Decodes a hex string, tolerating a leading `0x`.
pub(super) fn decode_hex(what: &'static str, input: &str) -> Result<Vec<u8>, FormatError> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).map_err(|source| FormatError::Hex { what, source })
}

fn expect_len<'a>(
    what: &'static str,
    bytes: &'a [u8],
    expected: usize,
) -> Result<&'a [u8], FormatError> {
    if bytes.len() == expected {
        Ok(bytes)
    } else {
        Err(FormatError::Length {
            what,
            expected,
            actual: bytes.len(),
        })
    }
}

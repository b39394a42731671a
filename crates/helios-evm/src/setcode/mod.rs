//! EIP-7702 delegations.
//!
//! An authority delegates its code by carrying the designator `0xef0100 ‖ address` as code.
//! Authorization tuples are checked against the state and applied one by one; a tuple that
//! fails any check is skipped without affecting the transaction.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use helios_system_contracts::EIP7702_DELEGATION_KEY_PREFIX;

use crate::{
    constants::{DELEGATION_CODE_LEN, DELEGATION_PREFIX},
    AuthorizationError, AuthorizationTuple, EvmState,
};

mod applier;
pub use applier::*;

/// Returns the delegation target if `code` is a delegation designator.
pub fn parse_delegation(code: &[u8]) -> Option<Address> {
    if code.len() != DELEGATION_CODE_LEN || code[..3] != DELEGATION_PREFIX {
        return None;
    }
    Some(Address::from_slice(&code[3..]))
}

/// Designator code delegating to `address`.
pub fn delegation_code(address: Address) -> Bytes {
    let mut code = Vec::with_capacity(DELEGATION_CODE_LEN);
    code.extend_from_slice(&DELEGATION_PREFIX);
    code.extend_from_slice(address.as_slice());
    code.into()
}

/// Registry slot of `authority`: `keccak256("EIP7702_DELEGATION_" ‖ authority)`.
pub fn delegation_slot(authority: Address) -> B256 {
    let mut seed = Vec::with_capacity(EIP7702_DELEGATION_KEY_PREFIX.len() + Address::len_bytes());
    seed.extend_from_slice(EIP7702_DELEGATION_KEY_PREFIX);
    seed.extend_from_slice(authority.as_slice());
    keccak256(seed)
}

/// An installed or cleared delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delegation {
    /// The delegating account.
    pub authority: Address,
    /// Code address. Zero when the delegation was cleared.
    pub code_address: Address,
    /// Whether the authority existed before the authorization was applied.
    pub existed: bool,
}

/// Checks `auth` against the state and returns its authority.
///
/// The authority is warmed even if a later check fails.
pub fn validate_authorization<S: EvmState + ?Sized>(
    state: &mut S,
    chain_id: u64,
    auth: &AuthorizationTuple,
) -> Result<Address, AuthorizationError> {
    if !auth.matches_chain(chain_id) {
        return Err(AuthorizationError::WrongChainId { have: auth.chain_id, want: chain_id });
    }
    if auth.nonce == u64::MAX {
        return Err(AuthorizationError::NonceOverflow);
    }
    let authority = auth.recover_authority()?;
    state.add_address_to_access_list(authority);

    let code = state.code(authority);
    if !code.is_empty() && parse_delegation(&code).is_none() {
        return Err(AuthorizationError::DestinationHasCode(authority));
    }
    let nonce = state.nonce(authority);
    if nonce != auth.nonce {
        return Err(AuthorizationError::NonceMismatch { have: auth.nonce, want: nonce });
    }
    Ok(authority)
}

/// Validates and applies `auth`: bumps the authority nonce and installs or clears the
/// delegation.
pub fn apply_authorization<S: EvmState + ?Sized>(
    state: &mut S,
    chain_id: u64,
    auth: &AuthorizationTuple,
) -> Result<Delegation, AuthorizationError> {
    let authority = validate_authorization(state, chain_id, auth)?;
    let existed = state.exist(authority);
    state.set_nonce(authority, auth.nonce + 1);
    if auth.address.is_zero() {
        state.set_code(authority, Bytes::new());
    } else {
        state.set_code(authority, delegation_code(auth.address));
    }
    Ok(Delegation { authority, code_address: auth.address, existed })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, hex};

    use super::*;

    #[test]
    fn test_delegation_code_round_trip() {
        let target = address!("0x00000000000000000000000000000000000c0de0");
        let code = delegation_code(target);
        assert_eq!(code.len(), DELEGATION_CODE_LEN);
        assert_eq!(&code[..3], &hex!("ef0100"));
        assert_eq!(parse_delegation(&code), Some(target));
    }

    #[test]
    fn test_parse_rejects_other_code() {
        assert_eq!(parse_delegation(&[]), None);
        assert_eq!(parse_delegation(&hex!("6080604052")), None);
        let mut long = delegation_code(Address::ZERO).to_vec();
        long.push(0);
        assert_eq!(parse_delegation(&long), None);
    }

    #[test]
    fn test_delegation_slot_is_keyed_by_authority() {
        let a = delegation_slot(Address::with_last_byte(1));
        let b = delegation_slot(Address::with_last_byte(2));
        assert_ne!(a, b);
        assert_eq!(a, delegation_slot(Address::with_last_byte(1)));
    }
}

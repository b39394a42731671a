//! System contracts of the Helios chain.
//!
//! This crate provides the well-known addresses of the staking/fee-controller (SFC) contracts,
//! the node driver through which the node and the SFC talk to each other, and the EIP-7702
//! delegation registry, together with Solidity ABI bindings of the calls the node issues and
//! the events it listens to.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![deny(unused_must_use)]

pub use alloy_primitives;
use alloy_primitives::{address, Address};

/// The SFC contract.
pub const SFC_ADDRESS: Address = address!("0xfc00face00000000000000000000000000000000");

/// Authorization proxy in front of the node driver.
pub const NODE_DRIVER_AUTH_ADDRESS: Address = address!("0xd100ae0000000000000000000000000000000000");

/// The node driver: target of internal transactions and emitter of consensus-relevant events.
pub const NODE_DRIVER_ADDRESS: Address = address!("0xd100a01e00000000000000000000000000000000");

/// The SFC constants manager.
pub const CONSTANTS_MANAGER_ADDRESS: Address =
    address!("0x6ca548f6df5b540e72262e935b6fe3e72cdd68c9");

/// The SFC library contract.
pub const SFC_LIB_ADDRESS: Address = address!("0xfc01face00000000000000000000000000000000");

/// Addresses whose accounts are mirrored between the world state and the SFC state.
///
/// After every transaction, storage root, balance and nonce of each of these accounts must be
/// identical in both tries.
pub const SFC_PRECOMPILES: [Address; 5] = [
    SFC_ADDRESS,
    NODE_DRIVER_AUTH_ADDRESS,
    NODE_DRIVER_ADDRESS,
    CONSTANTS_MANAGER_ADDRESS,
    SFC_LIB_ADDRESS,
];

/// Returns `true` if `address` is one of [`SFC_PRECOMPILES`].
pub fn is_sfc_precompile(address: &Address) -> bool {
    SFC_PRECOMPILES.contains(address)
}

/// System account holding the EIP-7702 delegation registry.
pub const EIP7702_DELEGATION_ADDRESS: Address =
    address!("0x0000000000000000000000000000000000007702");

/// Seed prefix of the registry slot of an authority.
pub const EIP7702_DELEGATION_KEY_PREFIX: &[u8] = b"EIP7702_DELEGATION_";

/// Solidity bindings of the node driver.
pub mod driver {
    alloy_sol_types::sol! {
        /// Calls issued by the node through internal transactions, and events the node reacts
        /// to.
        #[derive(Debug, PartialEq, Eq)]
        interface INodeDriver {
            /// Deactivates a validator with the given status bits.
            function deactivateValidator(uint256 validatorID, uint256 status) external;

            /// Pushes the per-validator metrics of the epoch being sealed.
            function sealEpoch(
                uint256[] offlineTimes,
                uint256[] offlineBlocks,
                uint256[] uptimes,
                uint256[] originatedTxsFee,
                uint256 usedGas
            ) external;

            /// Announces the validator set of the new epoch.
            function sealEpochValidators(uint256[] nextValidatorIDs) external;

            /// A validator's stake-derived weight changed. Zero weight removes the validator.
            event UpdateValidatorWeight(uint256 indexed validatorID, uint256 weight);

            /// A validator rotated its consensus key.
            event UpdateValidatorPubkey(uint256 indexed validatorID, bytes pubkey);

            /// JSON diff to merge into the network rules.
            event UpdateNetworkRules(bytes diff);

            /// Minimum node version required by the network.
            event UpdateNetworkVersion(uint256 version);

            /// Forces the given number of epoch seals.
            event AdvanceEpochs(uint256 num);
        }
    }

    /// Status bit marking a validator as a proven double-signer.
    pub const DOUBLESIGN_BIT: u64 = 1 << 7;
}

/// Solidity bindings of the EIP-7702 delegation registry.
pub mod delegation {
    alloy_sol_types::sol! {
        /// Emitted when an authority's delegation is installed or cleared.
        #[derive(Debug, PartialEq, Eq)]
        event DelegationSet(address indexed authority, address codeAddress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfc_precompiles_are_distinct() {
        for (i, a) in SFC_PRECOMPILES.iter().enumerate() {
            for b in &SFC_PRECOMPILES[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(is_sfc_precompile(&NODE_DRIVER_ADDRESS));
        assert!(!is_sfc_precompile(&EIP7702_DELEGATION_ADDRESS));
    }
}

//! Intrinsic gas.
//!
//! The intrinsic gas is what a transaction pays before any code runs: a base cost, the calldata
//! cost, the init-code cost of creations, and the cost of pre-declared access-list entries and
//! EIP-7702 authorizations. Every addition is overflow checked.

use crate::{
    constants::{gas::*, MAX_INIT_CODE_SIZE},
    AccessList, AuthorizationTuple, InvalidTransaction, SpecId, Transaction,
};

/// Fork switches of the intrinsic-gas schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntrinsicGasRules {
    /// Creations pay [`TX_GAS_CONTRACT_CREATION`].
    pub is_homestead: bool,
    /// Non-zero calldata bytes cost 16 instead of 68.
    pub is_eip2028: bool,
    /// Init code is size-limited and metered per word.
    pub is_eip3860: bool,
}

impl IntrinsicGasRules {
    /// Switches in force under `spec`.
    pub const fn for_spec(spec: SpecId) -> Self {
        Self {
            is_homestead: spec.is_enabled(SpecId::HOMESTEAD),
            is_eip2028: spec.is_enabled(SpecId::ISTANBUL),
            is_eip3860: spec.is_enabled(SpecId::SHANGHAI),
        }
    }
}

/// Computes the intrinsic gas of a transaction.
///
/// Fails with [`InvalidTransaction::GasUintOverflow`] when the total does not fit in 64 bits and
/// with [`InvalidTransaction::MaxInitCodeSizeExceeded`] for oversized EIP-3860 init code.
pub fn intrinsic_gas(
    data: &[u8],
    access_list: Option<&AccessList>,
    auth_list: Option<&[AuthorizationTuple]>,
    is_creation: bool,
    rules: IntrinsicGasRules,
) -> Result<u64, InvalidTransaction> {
    let mut gas = if is_creation && rules.is_homestead { TX_GAS_CONTRACT_CREATION } else { TX_GAS };

    if !data.is_empty() {
        let non_zero = data.iter().filter(|b| **b != 0).count() as u64;
        let zero = data.len() as u64 - non_zero;

        let non_zero_gas = if rules.is_eip2028 {
            TX_DATA_NON_ZERO_GAS_EIP2028
        } else {
            TX_DATA_NON_ZERO_GAS_FRONTIER
        };
        gas = non_zero
            .checked_mul(non_zero_gas)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(InvalidTransaction::GasUintOverflow)?;
        gas = zero
            .checked_mul(TX_DATA_ZERO_GAS)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(InvalidTransaction::GasUintOverflow)?;

        if is_creation && rules.is_eip3860 {
            if data.len() > MAX_INIT_CODE_SIZE {
                return Err(InvalidTransaction::MaxInitCodeSizeExceeded {
                    size: data.len(),
                    limit: MAX_INIT_CODE_SIZE,
                });
            }
            let words = (data.len() as u64).div_ceil(32);
            gas = words
                .checked_mul(INIT_CODE_WORD_GAS)
                .and_then(|cost| gas.checked_add(cost))
                .ok_or(InvalidTransaction::GasUintOverflow)?;
        }
    }

    if let Some(list) = access_list {
        let addresses = list.0.len() as u64;
        let keys = list.0.iter().map(|item| item.storage_keys.len() as u64).sum::<u64>();
        gas = addresses
            .checked_mul(TX_ACCESS_LIST_ADDRESS_GAS)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(InvalidTransaction::GasUintOverflow)?;
        gas = keys
            .checked_mul(TX_ACCESS_LIST_STORAGE_KEY_GAS)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(InvalidTransaction::GasUintOverflow)?;
    }

    if let Some(auths) = auth_list {
        gas = (auths.len() as u64)
            .checked_mul(PER_EMPTY_ACCOUNT_COST)
            .and_then(|cost| gas.checked_add(cost))
            .ok_or(InvalidTransaction::GasUintOverflow)?;
    }

    Ok(gas)
}

/// Intrinsic gas of a decoded transaction under `spec`.
pub fn tx_intrinsic_gas<T: Transaction>(tx: &T, spec: SpecId) -> Result<u64, InvalidTransaction> {
    intrinsic_gas(
        tx.input(),
        tx.access_list(),
        tx.authorization_list(),
        tx.is_create(),
        IntrinsicGasRules::for_spec(spec),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessListItem;
    use alloy_primitives::{Address, B256, U256};
    use proptest::prelude::*;
    use rstest::rstest;

    const ALL_ON: IntrinsicGasRules =
        IntrinsicGasRules { is_homestead: true, is_eip2028: true, is_eip3860: true };

    fn auth() -> AuthorizationTuple {
        AuthorizationTuple {
            chain_id: U256::ZERO,
            address: Address::ZERO,
            nonce: 0,
            y_parity: 0,
            r: U256::ZERO,
            s: U256::ZERO,
        }
    }

    #[rstest]
    #[case::plain_call(&[], false, true, 21_000)]
    #[case::homestead_create(&[], true, true, 53_000)]
    #[case::frontier_create(&[], true, false, 21_000)]
    fn test_base_cost(
        #[case] data: &[u8],
        #[case] create: bool,
        #[case] homestead: bool,
        #[case] expected: u64,
    ) {
        let rules = IntrinsicGasRules { is_homestead: homestead, ..Default::default() };
        assert_eq!(intrinsic_gas(data, None, None, create, rules), Ok(expected));
    }

    #[test]
    fn test_calldata_pricing() {
        let data = [0u8, 1, 0, 2];
        let istanbul = IntrinsicGasRules { is_eip2028: true, ..Default::default() };
        assert_eq!(intrinsic_gas(&data, None, None, false, istanbul), Ok(21_000 + 2 * 16 + 2 * 4));
        let frontier = IntrinsicGasRules::default();
        assert_eq!(intrinsic_gas(&data, None, None, false, frontier), Ok(21_000 + 2 * 68 + 2 * 4));
    }

    #[test]
    fn test_init_code_word_cost_and_limit() {
        let code = vec![1u8; 33];
        assert_eq!(intrinsic_gas(&code, None, None, true, ALL_ON), Ok(53_000 + 33 * 16 + 2 * 2));

        let oversized = vec![0u8; MAX_INIT_CODE_SIZE + 1];
        assert_eq!(
            intrinsic_gas(&oversized, None, None, true, ALL_ON),
            Err(InvalidTransaction::MaxInitCodeSizeExceeded {
                size: MAX_INIT_CODE_SIZE + 1,
                limit: MAX_INIT_CODE_SIZE
            })
        );
        // the limit only applies to creations
        assert!(intrinsic_gas(&oversized, None, None, false, ALL_ON).is_ok());
    }

    #[test]
    fn test_access_and_auth_lists() {
        let list = AccessList(vec![
            AccessListItem { address: Address::ZERO, storage_keys: vec![B256::ZERO; 3] },
            AccessListItem { address: Address::ZERO, storage_keys: vec![] },
        ]);
        let auths = vec![auth(), auth()];
        assert_eq!(
            intrinsic_gas(&[], Some(&list), Some(&auths), false, ALL_ON),
            Ok(21_000 + 2 * 2_400 + 3 * 1_900 + 2 * 25_000)
        );
    }

    proptest! {
        #[test]
        fn proptest_non_zero_byte_is_monotonic(data in proptest::collection::vec(any::<u8>(), 0..256), byte in 1u8..=255) {
            for (rules, step) in [(ALL_ON, 16), (IntrinsicGasRules::default(), 68)] {
                let before = intrinsic_gas(&data, None, None, false, rules).unwrap();
                let mut longer = data.clone();
                longer.push(byte);
                let after = intrinsic_gas(&longer, None, None, false, rules).unwrap();
                prop_assert_eq!(after, before + step);
            }
        }

        #[test]
        fn proptest_zero_byte_costs_four(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let before = intrinsic_gas(&data, None, None, false, ALL_ON).unwrap();
            let mut longer = data.clone();
            longer.push(0);
            prop_assert_eq!(intrinsic_gas(&longer, None, None, false, ALL_ON).unwrap(), before + 4);
        }

        #[test]
        fn proptest_eip2028_is_cheaper(mut data in proptest::collection::vec(any::<u8>(), 0..256), byte in 1u8..=255) {
            data.push(byte);
            let with = intrinsic_gas(&data, None, None, false, IntrinsicGasRules { is_eip2028: true, ..Default::default() }).unwrap();
            let without = intrinsic_gas(&data, None, None, false, IntrinsicGasRules::default()).unwrap();
            prop_assert!(with < without);
        }

        #[test]
        fn proptest_list_entries_add_fixed_costs(addresses in 0usize..16, keys in 0usize..16, auths in 0usize..8) {
            let base = intrinsic_gas(&[], Some(&AccessList::default()), Some(&[]), false, ALL_ON).unwrap();
            let list = AccessList(
                (0..addresses)
                    .map(|i| AccessListItem {
                        address: Address::ZERO,
                        storage_keys: if i == 0 { vec![B256::ZERO; keys] } else { vec![] },
                    })
                    .collect(),
            );
            let keys = if addresses == 0 { 0 } else { keys };
            let auth_list = vec![auth(); auths];
            let gas = intrinsic_gas(&[], Some(&list), Some(&auth_list), false, ALL_ON).unwrap();
            prop_assert_eq!(gas, base + addresses as u64 * 2_400 + keys as u64 * 1_900 + auths as u64 * 25_000);
        }
    }
}

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use auto_impl::auto_impl;

use crate::AccessList;

/// Mutable view of the state used by the state transition and the interpreter.
///
/// Reads never fail: a database failure is memoized by the implementation and surfaced when
/// the state is committed, which is fatal for block processing anyway.
#[auto_impl(&mut, Box)]
pub trait EvmState {
    /// Returns `true` if the account exists.
    fn exist(&mut self, address: Address) -> bool;

    /// Returns `true` if the account is missing or EIP-161 empty.
    fn is_empty(&mut self, address: Address) -> bool;

    /// Balance of the account.
    fn balance(&mut self, address: Address) -> U256;

    /// Nonce of the account.
    fn nonce(&mut self, address: Address) -> u64;

    /// Code of the account.
    fn code(&mut self, address: Address) -> Bytes;

    /// Code hash of the account, zero for a missing account.
    fn code_hash(&mut self, address: Address) -> B256;

    /// Current value of a storage slot.
    fn storage(&mut self, address: Address, slot: B256) -> U256;

    /// Value of a storage slot at the start of the current transaction.
    fn committed_storage(&mut self, address: Address, slot: B256) -> U256;

    /// Storage root of the account including uncommitted writes.
    fn storage_root(&mut self, address: Address) -> B256;

    /// Creates a fresh account at `address`, keeping only its balance.
    fn create_account(&mut self, address: Address);

    /// Sets the balance.
    fn set_balance(&mut self, address: Address, balance: U256);

    /// Adds to the balance. Adding zero touches the account.
    fn add_balance(&mut self, address: Address, amount: U256);

    /// Subtracts from the balance.
    fn sub_balance(&mut self, address: Address, amount: U256);

    /// Sets the nonce.
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Installs code.
    fn set_code(&mut self, address: Address, code: Bytes);

    /// Writes a storage slot.
    fn set_storage(&mut self, address: Address, slot: B256, value: U256);

    /// Destroys the account at the end of the transaction and zeroes its balance.
    fn self_destruct(&mut self, address: Address);

    /// Returns `true` if the account was destroyed in the current transaction.
    fn has_self_destructed(&mut self, address: Address) -> bool;

    /// Adds to the refund counter.
    fn add_refund(&mut self, gas: u64);

    /// Subtracts from the refund counter.
    fn sub_refund(&mut self, gas: u64);

    /// Current refund counter.
    fn refund(&mut self) -> u64;

    /// Records a log of the current transaction.
    fn add_log(&mut self, log: Log);

    /// Resets the access list and warms the sender, the destination, the precompiles and the
    /// transaction's access list (EIP-2929, EIP-2930).
    fn prepare_access_list(
        &mut self,
        sender: Address,
        dst: Option<Address>,
        precompiles: &[Address],
        list: &AccessList,
    );

    /// Warms an address.
    fn add_address_to_access_list(&mut self, address: Address);

    /// Warms a storage slot and its address.
    fn add_slot_to_access_list(&mut self, address: Address, slot: B256);

    /// Returns `true` if the address is warm.
    fn address_in_access_list(&mut self, address: Address) -> bool;

    /// Returns `true` if the slot is warm.
    fn slot_in_access_list(&mut self, address: Address, slot: B256) -> bool;

    /// Takes a revision that [`EvmState::revert_to_snapshot`] can return to.
    fn snapshot(&mut self) -> usize;

    /// Undoes every change made after the revision was taken.
    fn revert_to_snapshot(&mut self, revision: usize);
}

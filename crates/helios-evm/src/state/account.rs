use core::fmt;

use alloy_primitives::{hex, Bytes, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use serde::{Deserialize, Serialize};

/// Account as exposed to consumers comparing states.
///
/// Unlike [`AccountRecord`], the balance may be absent: an absent balance only equals another
/// absent balance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Nonce.
    pub nonce: u64,
    /// Balance, `None` when unknown.
    pub balance: Option<U256>,
    /// Storage root.
    pub root: B256,
    /// Code hash bytes.
    pub code_hash: Bytes,
}

impl Account {
    /// Compares two optional accounts: both absent are equal, exactly one absent is not.
    pub fn equal(a: Option<&Self>, b: Option<&Self>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Display adapter that also renders an absent account.
    pub const fn display(account: Option<&Self>) -> DisplayAccount<'_> {
        DisplayAccount(account)
    }
}

impl From<&AccountRecord> for Account {
    fn from(record: &AccountRecord) -> Self {
        Self {
            nonce: record.nonce,
            balance: Some(record.balance),
            root: record.storage_root,
            code_hash: Bytes::copy_from_slice(record.code_hash.as_slice()),
        }
    }
}

/// Renders `Account(nil)` or `Account{Nonce: .., Balance: .., Root: 0x.., CodeHash: ..}`.
#[derive(Debug, Clone, Copy)]
pub struct DisplayAccount<'a>(pub Option<&'a Account>);

impl fmt::Display for DisplayAccount<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(account) = self.0 else { return f.write_str("Account(nil)") };
        let balance = account.balance.map_or_else(|| "<nil>".to_string(), |b| b.to_string());
        write!(
            f,
            "Account{{Nonce: {}, Balance: {}, Root: {}, CodeHash: {}}}",
            account.nonce,
            balance,
            hex::encode_prefixed(account.root),
            hex::encode(&account.code_hash),
        )
    }
}

/// Consensus form of an account: the value stored in the state trie.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Nonce.
    pub nonce: u64,
    /// Balance.
    pub balance: U256,
    /// Root of the account's storage trie.
    pub storage_root: B256,
    /// Hash of the account's code.
    pub code_hash: B256,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self { nonce: 0, balance: U256::ZERO, storage_root: EMPTY_ROOT_HASH, code_hash: KECCAK_EMPTY }
    }
}

impl AccountRecord {
    /// EIP-161 emptiness: zero nonce, zero balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == KECCAK_EMPTY
    }
}

use alloy_primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, SigningKey};

use crate::{AuthorizationTuple, TxEnvelope};

/// A secp256k1 key derived deterministically from a seed.
#[derive(Debug, Clone)]
pub struct TestSigner {
    key: SigningKey,
    address: Address,
}

impl TestSigner {
    /// Creates the key whose secret is `keccak256(seed)`.
    pub fn from_seed(seed: u8) -> Self {
        Self::new(keccak256([seed]))
    }

    /// Creates the key with the given secret.
    pub fn new(secret: B256) -> Self {
        let key = SigningKey::from_slice(secret.as_slice()).expect("valid secret");
        let address = Address::from_private_key(&key);
        Self { key, address }
    }

    /// Address of the key.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Signs `hash`, returning the low-s signature as `(y_odd, r, s)`.
    pub fn sign_hash(&self, hash: &B256) -> (bool, U256, U256) {
        let (mut sig, mut recid) =
            self.key.sign_prehash_recoverable(hash.as_slice()).expect("signing succeeds");
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
        }
        let r = U256::from_be_slice(&sig.r().to_bytes());
        let s = U256::from_be_slice(&sig.s().to_bytes());
        (recid.is_y_odd(), r, s)
    }

    /// Signs `tx`. Legacy transactions are signed with EIP-155 replay protection.
    pub fn sign_tx(&self, chain_id: u64, tx: impl Into<TxEnvelope>) -> TxEnvelope {
        let mut tx = tx.into();
        if let TxEnvelope::Legacy(inner) = &mut tx {
            inner.v = chain_id * 2 + 35;
            inner.r = U256::ZERO;
            inner.s = U256::ZERO;
        }
        let (y_odd, r, s) = self.sign_hash(&tx.signature_hash());
        match &mut tx {
            TxEnvelope::Legacy(inner) => {
                inner.v += y_odd as u64;
                inner.r = r;
                inner.s = s;
            }
            TxEnvelope::AccessList(inner) => {
                (inner.v, inner.r, inner.s) = (y_odd as u64, r, s);
            }
            TxEnvelope::DynamicFee(inner) => {
                (inner.v, inner.r, inner.s) = (y_odd as u64, r, s);
            }
            TxEnvelope::SetCode(inner) => {
                (inner.v, inner.r, inner.s) = (y_odd as u64, r, s);
            }
        }
        tx
    }

    /// Signs an EIP-7702 authorization.
    pub fn sign_authorization(
        &self,
        chain_id: u64,
        address: Address,
        nonce: u64,
    ) -> AuthorizationTuple {
        let chain_id = U256::from(chain_id);
        let (y_odd, r, s) =
            self.sign_hash(&AuthorizationTuple::signing_hash(chain_id, address, nonce));
        AuthorizationTuple { chain_id, address, nonce, y_parity: y_odd as u8, r, s }
    }
}

//! Transaction model.
//!
//! A transaction is a tagged sum over the four supported envelope types. The common fields are
//! reachable through the [`Transaction`] accessor trait; type-specific fields are unlocked by
//! matching on [`TxEnvelope`].
//!
//! Encoding follows EIP-2718: a legacy transaction is a bare RLP list, a typed transaction is
//! its type byte followed by the RLP list of its fields.

use alloy_primitives::{keccak256, uint, Address, Bytes, Signature, TxKind, B256, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

pub use alloy_eips::eip2930::{AccessList, AccessListItem};

use crate::{constants::AUTHORIZATION_MAGIC, AuthorizationError, InvalidTransaction};

/// Order of the secp256k1 curve.
pub const SECP256K1N: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// Half the order of the secp256k1 curve, the Homestead upper bound of `s`.
pub const SECP256K1N_HALF: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Envelope type byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    /// Pre-EIP-2718 transaction.
    Legacy = 0,
    /// EIP-2930 access-list transaction.
    AccessList = 1,
    /// EIP-1559 dynamic-fee transaction.
    DynamicFee = 2,
    /// EIP-7702 SetCode transaction.
    SetCode = 4,
}

impl From<TxType> for u8 {
    fn from(ty: TxType) -> Self {
        ty as Self
    }
}

/// Recovers the signer of `hash`, enforcing the secp256k1 bounds of `r` and `s`.
///
/// With `homestead` set, `s` must lie in the lower half of the curve order.
pub fn recover_signer(
    hash: &B256,
    y_odd: bool,
    r: U256,
    s: U256,
    homestead: bool,
) -> Option<Address> {
    if r.is_zero() || s.is_zero() || r >= SECP256K1N || s >= SECP256K1N {
        return None;
    }
    if homestead && s > SECP256K1N_HALF {
        return None;
    }
    Signature::new(r, s, y_odd).recover_address_from_prehash(hash).ok()
}

fn rlp_list(payload: &[u8], out: &mut dyn BufMut) {
    Header { list: true, payload_length: payload.len() }.encode(out);
    out.put_slice(payload);
}

/// An EIP-7702 authorization: permission for `address`'s code to run in the authority's context.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationTuple {
    /// Chain the authorization is valid on. Zero means any chain.
    pub chain_id: U256,
    /// Code address to delegate to. The zero address clears the delegation.
    pub address: Address,
    /// Authority nonce the authorization is valid at.
    pub nonce: u64,
    /// Signature parity.
    pub y_parity: u8,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl AuthorizationTuple {
    /// Hash signed by the authority: `keccak256(0x05 ++ rlp([chain_id, address, nonce]))`.
    pub fn signature_hash(&self) -> B256 {
        Self::signing_hash(self.chain_id, self.address, self.nonce)
    }

    /// Signing hash of an unsigned authorization.
    pub fn signing_hash(chain_id: U256, address: Address, nonce: u64) -> B256 {
        let mut payload = Vec::new();
        chain_id.encode(&mut payload);
        address.encode(&mut payload);
        nonce.encode(&mut payload);
        let mut buf = vec![AUTHORIZATION_MAGIC];
        rlp_list(&payload, &mut buf);
        keccak256(buf)
    }

    /// Returns `true` if the tuple is usable on `chain_id`.
    pub fn matches_chain(&self, chain_id: u64) -> bool {
        self.chain_id.is_zero() || self.chain_id == U256::from(chain_id)
    }

    /// Checks the fields that can be validated without state: chain id, nonce and signature
    /// bounds.
    pub fn validate_stateless(&self, chain_id: u64) -> Result<(), AuthorizationError> {
        if !self.matches_chain(chain_id) {
            return Err(AuthorizationError::WrongChainId { have: self.chain_id, want: chain_id });
        }
        if self.nonce == u64::MAX {
            return Err(AuthorizationError::NonceOverflow);
        }
        if self.y_parity > 1 || self.r >= SECP256K1N || self.s > SECP256K1N_HALF {
            return Err(AuthorizationError::InvalidSignature);
        }
        Ok(())
    }

    /// Recovers the authority.
    pub fn recover_authority(&self) -> Result<Address, AuthorizationError> {
        if self.y_parity > 1 {
            return Err(AuthorizationError::InvalidSignature);
        }
        recover_signer(&self.signature_hash(), self.y_parity == 1, self.r, self.s, true)
            .ok_or(AuthorizationError::InvalidSignature)
    }
}

/// Legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct LegacyTx {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price.
    pub gas_price: u128,
    /// Gas limit.
    pub gas: u64,
    /// Recipient, or creation.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// `27 + parity`, or `chain_id * 2 + 35 + parity` under EIP-155.
    pub v: u64,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl LegacyTx {
    /// EIP-155 chain id encoded in `v`, if any.
    pub const fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    /// Signature parity encoded in `v`.
    pub const fn y_odd(&self) -> bool {
        if self.v >= 35 {
            (self.v - 35) % 2 == 1
        } else {
            self.v == 28
        }
    }

    fn encode_unsigned_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
    }

    fn signature_hash(&self) -> B256 {
        let mut payload = Vec::new();
        self.encode_unsigned_fields(&mut payload);
        if let Some(chain_id) = self.chain_id() {
            chain_id.encode(&mut payload);
            0u8.encode(&mut payload);
            0u8.encode(&mut payload);
        }
        let mut buf = Vec::with_capacity(payload.len() + 4);
        rlp_list(&payload, &mut buf);
        keccak256(buf)
    }
}

/// EIP-2930 access-list transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct AccessListTx {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price.
    pub gas_price: u128,
    /// Gas limit.
    pub gas: u64,
    /// Recipient, or creation.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// Pre-warmed addresses and slots.
    pub access_list: AccessList,
    /// Signature parity.
    pub v: u64,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl AccessListTx {
    fn encode_unsigned_fields(&self, out: &mut Vec<u8>) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
    }
}

/// EIP-1559 dynamic-fee transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct DynamicFeeTx {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Priority fee per gas.
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas.
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas: u64,
    /// Recipient, or creation.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata or init code.
    pub input: Bytes,
    /// Pre-warmed addresses and slots.
    pub access_list: AccessList,
    /// Signature parity.
    pub v: u64,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl DynamicFeeTx {
    fn encode_unsigned_fields(&self, out: &mut Vec<u8>) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
    }
}

/// EIP-7702 SetCode transaction.
///
/// `to` is typed as [`TxKind`] so that a creation can be represented and rejected by
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct SetCodeTx {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Priority fee per gas.
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas.
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas: u64,
    /// Recipient. Must be a call.
    pub to: TxKind,
    /// Transferred value.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Pre-warmed addresses and slots.
    pub access_list: AccessList,
    /// Delegations to install.
    pub authorization_list: Vec<AuthorizationTuple>,
    /// Signature parity.
    pub v: u64,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
}

impl SetCodeTx {
    fn encode_unsigned_fields(&self, out: &mut Vec<u8>) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
        self.authorization_list.encode(out);
    }
}

/// Capability set shared by every transaction type.
pub trait Transaction {
    /// Envelope type.
    fn tx_type(&self) -> TxType;
    /// Chain id, `None` for pre-EIP-155 legacy transactions.
    fn chain_id(&self) -> Option<u64>;
    /// Sender nonce.
    fn nonce(&self) -> u64;
    /// Gas limit.
    fn gas_limit(&self) -> u64;
    /// Fee cap per gas. Equals the gas price for legacy and access-list transactions.
    fn max_fee_per_gas(&self) -> u128;
    /// Priority fee per gas. Equals the gas price for legacy and access-list transactions.
    fn max_priority_fee_per_gas(&self) -> u128;
    /// Recipient, or creation.
    fn kind(&self) -> TxKind;
    /// Transferred value.
    fn value(&self) -> U256;
    /// Calldata or init code.
    fn input(&self) -> &Bytes;
    /// Access list, if the type carries one.
    fn access_list(&self) -> Option<&AccessList>;
    /// Authorization list, if the type carries one.
    fn authorization_list(&self) -> Option<&[AuthorizationTuple]>;

    /// Recipient address, `None` for creations.
    fn to(&self) -> Option<Address> {
        self.kind().to().copied()
    }

    /// Returns `true` for contract creations.
    fn is_create(&self) -> bool {
        self.kind().is_create()
    }

    /// Legacy gas price view: the fee cap.
    fn gas_price(&self) -> u128 {
        self.max_fee_per_gas()
    }

    /// Price actually paid per gas under `base_fee`.
    fn effective_gas_price(&self, base_fee: Option<u128>) -> u128 {
        match base_fee {
            Some(base_fee) => self
                .max_fee_per_gas()
                .min(base_fee.saturating_add(self.max_priority_fee_per_gas())),
            None => self.max_fee_per_gas(),
        }
    }

    /// Priority fee actually paid under `base_fee`. `None` if the fee cap is below the base fee.
    fn effective_tip(&self, base_fee: u128) -> Option<u128> {
        let fee_cap = self.max_fee_per_gas();
        if fee_cap < base_fee {
            return None;
        }
        Some((fee_cap - base_fee).min(self.max_priority_fee_per_gas()))
    }

    /// Worst-case cost: `gas * fee_cap + value`.
    fn cost(&self) -> U256 {
        U256::from(self.gas_limit())
            .saturating_mul(U256::from(self.max_fee_per_gas()))
            .saturating_add(self.value())
    }
}

/// A signed transaction of any supported type.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum TxEnvelope {
    /// Legacy.
    Legacy(LegacyTx),
    /// EIP-2930.
    AccessList(AccessListTx),
    /// EIP-1559.
    DynamicFee(DynamicFeeTx),
    /// EIP-7702.
    SetCode(SetCodeTx),
}

macro_rules! each_variant {
    ($self:ident, $tx:ident => $body:expr) => {
        match $self {
            TxEnvelope::Legacy($tx) => $body,
            TxEnvelope::AccessList($tx) => $body,
            TxEnvelope::DynamicFee($tx) => $body,
            TxEnvelope::SetCode($tx) => $body,
        }
    };
}

impl Transaction for TxEnvelope {
    fn tx_type(&self) -> TxType {
        match self {
            Self::Legacy(_) => TxType::Legacy,
            Self::AccessList(_) => TxType::AccessList,
            Self::DynamicFee(_) => TxType::DynamicFee,
            Self::SetCode(_) => TxType::SetCode,
        }
    }

    fn chain_id(&self) -> Option<u64> {
        match self {
            Self::Legacy(tx) => tx.chain_id(),
            Self::AccessList(tx) => Some(tx.chain_id),
            Self::DynamicFee(tx) => Some(tx.chain_id),
            Self::SetCode(tx) => Some(tx.chain_id),
        }
    }

    fn nonce(&self) -> u64 {
        each_variant!(self, tx => tx.nonce)
    }

    fn gas_limit(&self) -> u64 {
        each_variant!(self, tx => tx.gas)
    }

    fn max_fee_per_gas(&self) -> u128 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::AccessList(tx) => tx.gas_price,
            Self::DynamicFee(tx) => tx.max_fee_per_gas,
            Self::SetCode(tx) => tx.max_fee_per_gas,
        }
    }

    fn max_priority_fee_per_gas(&self) -> u128 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::AccessList(tx) => tx.gas_price,
            Self::DynamicFee(tx) => tx.max_priority_fee_per_gas,
            Self::SetCode(tx) => tx.max_priority_fee_per_gas,
        }
    }

    fn kind(&self) -> TxKind {
        each_variant!(self, tx => tx.to)
    }

    fn value(&self) -> U256 {
        each_variant!(self, tx => tx.value)
    }

    fn input(&self) -> &Bytes {
        each_variant!(self, tx => &tx.input)
    }

    fn access_list(&self) -> Option<&AccessList> {
        match self {
            Self::Legacy(_) => None,
            Self::AccessList(tx) => Some(&tx.access_list),
            Self::DynamicFee(tx) => Some(&tx.access_list),
            Self::SetCode(tx) => Some(&tx.access_list),
        }
    }

    fn authorization_list(&self) -> Option<&[AuthorizationTuple]> {
        match self {
            Self::SetCode(tx) => Some(&tx.authorization_list),
            _ => None,
        }
    }
}

impl TxEnvelope {
    /// Signature components `(v, r, s)`.
    pub fn signature(&self) -> (u64, U256, U256) {
        each_variant!(self, tx => (tx.v, tx.r, tx.s))
    }

    /// Signature parity.
    pub fn y_odd(&self) -> bool {
        match self {
            Self::Legacy(tx) => tx.y_odd(),
            _ => self.signature().0 == 1,
        }
    }

    /// Node-issued transactions carry an all-zero signature.
    pub fn is_internal(&self) -> bool {
        let (v, r, s) = self.signature();
        v == 0 && r.is_zero() && s.is_zero()
    }

    /// Encodes the transaction in its EIP-2718 form.
    pub fn encoded_2718(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Legacy(tx) => tx.encode(&mut out),
            Self::AccessList(tx) => {
                out.push(TxType::AccessList as u8);
                tx.encode(&mut out);
            }
            Self::DynamicFee(tx) => {
                out.push(TxType::DynamicFee as u8);
                tx.encode(&mut out);
            }
            Self::SetCode(tx) => {
                out.push(TxType::SetCode as u8);
                tx.encode(&mut out);
            }
        }
        out
    }

    /// Decodes an EIP-2718 encoded transaction.
    pub fn decode_2718(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first >= 0xc0 {
            return Ok(Self::Legacy(LegacyTx::decode(buf)?));
        }
        *buf = &buf[1..];
        match first {
            1 => Ok(Self::AccessList(AccessListTx::decode(buf)?)),
            2 => Ok(Self::DynamicFee(DynamicFeeTx::decode(buf)?)),
            4 => Ok(Self::SetCode(SetCodeTx::decode(buf)?)),
            _ => Err(alloy_rlp::Error::Custom("unsupported transaction type")),
        }
    }

    /// Transaction hash: keccak of the EIP-2718 encoding.
    pub fn hash(&self) -> B256 {
        keccak256(self.encoded_2718())
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.encoded_2718().len()
    }

    /// Hash signed by the sender.
    pub fn signature_hash(&self) -> B256 {
        let typed = |ty: TxType, payload: Vec<u8>| {
            let mut buf = vec![ty as u8];
            rlp_list(&payload, &mut buf);
            keccak256(buf)
        };
        let mut payload = Vec::new();
        match self {
            Self::Legacy(tx) => return tx.signature_hash(),
            Self::AccessList(tx) => tx.encode_unsigned_fields(&mut payload),
            Self::DynamicFee(tx) => tx.encode_unsigned_fields(&mut payload),
            Self::SetCode(tx) => tx.encode_unsigned_fields(&mut payload),
        }
        typed(self.tx_type(), payload)
    }

    /// Recovers the sender. Internal transactions resolve to the zero address.
    pub fn recover_signer(&self, homestead: bool) -> Result<Address, InvalidTransaction> {
        if self.is_internal() {
            return Ok(Address::ZERO);
        }
        let (v, r, s) = self.signature();
        if !matches!(self, Self::Legacy(_)) && v > 1 {
            return Err(InvalidTransaction::InvalidSender);
        }
        recover_signer(&self.signature_hash(), self.y_odd(), r, s, homestead)
            .ok_or(InvalidTransaction::InvalidSender)
    }

    /// Returns the SetCode payload, if this is a SetCode transaction.
    pub const fn as_set_code(&self) -> Option<&SetCodeTx> {
        match self {
            Self::SetCode(tx) => Some(tx),
            _ => None,
        }
    }
}

/// Network form: legacy transactions are inlined lists, typed ones are byte strings.
impl Encodable for TxEnvelope {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Legacy(tx) => tx.encode(out),
            _ => self.encoded_2718().as_slice().encode(out),
        }
    }
}

impl Decodable for TxEnvelope {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let first = *buf.first().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first >= 0xc0 {
            return Ok(Self::Legacy(LegacyTx::decode(buf)?));
        }
        let header = Header::decode(buf)?;
        if header.list {
            return Err(alloy_rlp::Error::UnexpectedList);
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let (mut body, rest) = buf.split_at(header.payload_length);
        *buf = rest;
        let tx = Self::decode_2718(&mut body)?;
        if !body.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, bytes};

    fn sample_set_code() -> SetCodeTx {
        SetCodeTx {
            chain_id: 250,
            nonce: 7,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 2_000_000_000,
            gas: 100_000,
            to: TxKind::Call(address!("0x00000000000000000000000000000000000c0de0")),
            value: U256::from(5),
            input: bytes!("c0ffee"),
            access_list: AccessList(vec![AccessListItem {
                address: address!("0x0000000000000000000000000000000000000001"),
                storage_keys: vec![B256::with_last_byte(1)],
            }]),
            authorization_list: vec![AuthorizationTuple {
                chain_id: U256::ZERO,
                address: address!("0x00000000000000000000000000000000000c0de0"),
                nonce: 3,
                y_parity: 1,
                r: U256::from(11),
                s: U256::from(12),
            }],
            v: 1,
            r: U256::from(1),
            s: U256::from(2),
        }
    }

    #[test]
    fn test_typed_round_trip() {
        let tx = TxEnvelope::SetCode(sample_set_code());
        let encoded = tx.encoded_2718();
        assert_eq!(encoded[0], 4);
        assert_eq!(TxEnvelope::decode_2718(&mut encoded.as_slice()).unwrap(), tx);

        let network = alloy_rlp::encode(&tx);
        assert_eq!(TxEnvelope::decode(&mut network.as_slice()).unwrap(), tx);
    }

    #[test]
    fn test_legacy_chain_id_from_v() {
        let tx = LegacyTx { v: 250 * 2 + 36, ..Default::default() };
        assert_eq!(tx.chain_id(), Some(250));
        assert!(tx.y_odd());
        let tx = LegacyTx { v: 27, ..Default::default() };
        assert_eq!(tx.chain_id(), None);
        assert!(!tx.y_odd());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(TxEnvelope::decode_2718(&mut [3u8, 0xc0].as_slice()).is_err());
    }

    #[test]
    fn test_effective_gas_price() {
        let tx = TxEnvelope::DynamicFee(DynamicFeeTx {
            max_priority_fee_per_gas: 500,
            max_fee_per_gas: 1_500,
            ..Default::default()
        });
        assert_eq!(tx.effective_gas_price(Some(1_000)), 1_500);
        assert_eq!(tx.effective_gas_price(Some(800)), 1_300);
        assert_eq!(tx.effective_tip(1_200), Some(300));
        assert_eq!(tx.effective_tip(1_600), None);
    }

    #[test]
    fn test_internal_detection() {
        let tx = TxEnvelope::Legacy(LegacyTx::default());
        assert!(tx.is_internal());
        assert_eq!(tx.recover_signer(true), Ok(Address::ZERO));
    }

    #[test]
    fn test_authorization_stateless_checks() {
        let mut auth = sample_set_code().authorization_list.remove(0);
        assert!(auth.validate_stateless(250).is_ok());
        auth.chain_id = U256::from(1);
        assert_eq!(
            auth.validate_stateless(250),
            Err(AuthorizationError::WrongChainId { have: U256::from(1), want: 250 })
        );
        auth.chain_id = U256::ZERO;
        auth.nonce = u64::MAX;
        assert_eq!(auth.validate_stateless(250), Err(AuthorizationError::NonceOverflow));
        auth.nonce = 0;
        auth.s = SECP256K1N_HALF + U256::from(1);
        assert_eq!(auth.validate_stateless(250), Err(AuthorizationError::InvalidSignature));
    }
}

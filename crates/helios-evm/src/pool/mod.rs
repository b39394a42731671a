//! Transaction-pool admission.
//!
//! A transaction enters the pool after passing [`validate_transaction`], which needs nothing
//! but the chain head, and [`validate_with_state`], which checks it against the head state and
//! the pool's own bookkeeping. SetCode transactions additionally go through the
//! [`SetCodeValidator`].

use alloy_primitives::Address;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    constants::MAX_AUTHORIZATION_LIST_SIZE, tx_intrinsic_gas, InvalidTransaction, Signer, SpecId,
    Transaction, TxEnvelope, TxType,
};

mod state;
pub use state::*;

mod setcode;
pub use setcode::*;

bitflags! {
    /// Transaction types accepted by a pool, one bit per EIP-2718 type byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TxTypeSet: u8 {
        /// Legacy transactions.
        const LEGACY = 1 << 0;
        /// EIP-2930 transactions.
        const ACCESS_LIST = 1 << 1;
        /// EIP-1559 transactions.
        const DYNAMIC_FEE = 1 << 2;
        /// EIP-7702 transactions.
        const SET_CODE = 1 << 4;
    }
}

impl TxTypeSet {
    /// Returns `true` if `ty` is accepted.
    pub const fn accepts(self, ty: TxType) -> bool {
        self.bits() & (1 << ty as u8) != 0
    }
}

impl Default for TxTypeSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Chain head the pool validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolHead {
    /// Head block number.
    pub number: u64,
    /// Gas limit of the next block.
    pub gas_limit: u64,
    /// Base fee of the next block.
    pub base_fee: u128,
    /// Protocol version of the next block.
    pub spec: SpecId,
}

/// Static admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
    /// Chain id.
    pub chain_id: u64,
    /// Accepted transaction types.
    pub accept: TxTypeSet,
    /// Maximum encoded size in bytes.
    pub max_size: usize,
    /// Minimum priority fee of non-local transactions.
    pub pool_min_tip: u128,
    /// Network minimum priority fee.
    pub min_tip: u128,
    /// Network minimum gas price.
    pub min_gas_price: u128,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            chain_id: 1,
            accept: TxTypeSet::default(),
            max_size: 128 * 1024,
            pool_min_tip: 0,
            min_tip: 0,
            min_gas_price: 0,
        }
    }
}

impl ValidationOptions {
    /// Sets the chain id.
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Sets the accepted types.
    pub const fn with_accept(mut self, accept: TxTypeSet) -> Self {
        self.accept = accept;
        self
    }

    /// Sets the network fee floor.
    pub const fn with_network_minimums(mut self, min_tip: u128, min_gas_price: u128) -> Self {
        self.min_tip = min_tip;
        self.min_gas_price = min_gas_price;
        self
    }

    /// Sets the pool's own tip floor for remote transactions.
    pub const fn with_pool_min_tip(mut self, tip: u128) -> Self {
        self.pool_min_tip = tip;
        self
    }
}

/// Returns the version that introduced `ty`.
pub const fn activation_spec(ty: TxType) -> SpecId {
    match ty {
        TxType::Legacy => SpecId::FRONTIER,
        TxType::AccessList => SpecId::BERLIN,
        TxType::DynamicFee => SpecId::LONDON,
        TxType::SetCode => SpecId::PHAETHON,
    }
}

/// Checks `tx` against the chain head, returning its sender.
///
/// Checks run in a fixed order and the first violation is returned. Local transactions are
/// exempt from the pool's tip floor but not from the network minimums.
pub fn validate_transaction(
    tx: &TxEnvelope,
    head: &PoolHead,
    signer: &Signer,
    opts: &ValidationOptions,
    local: bool,
) -> Result<Address, InvalidTransaction> {
    let ty = tx.tx_type();
    if !opts.accept.accepts(ty) {
        return Err(InvalidTransaction::TxTypeNotSupported(ty.into()));
    }
    let size = tx.size();
    if size > opts.max_size {
        return Err(InvalidTransaction::OversizedData { size, limit: opts.max_size });
    }
    if !head.spec.is_enabled(activation_spec(ty)) {
        return Err(InvalidTransaction::TxTypeNotSupported(ty.into()));
    }
    if let Some(auths) = tx.authorization_list() {
        if tx.is_create() {
            return Err(InvalidTransaction::SetCodeTxCreate);
        }
        if auths.is_empty() {
            return Err(InvalidTransaction::EmptyAuthList);
        }
        if auths.len() > MAX_AUTHORIZATION_LIST_SIZE {
            return Err(InvalidTransaction::AuthorizationListTooLarge(auths.len()));
        }
    }
    if tx.gas_limit() > head.gas_limit {
        return Err(InvalidTransaction::GasLimit { have: head.gas_limit, want: tx.gas_limit() });
    }

    let fee_cap = tx.max_fee_per_gas();
    let tip = tx.max_priority_fee_per_gas();
    if fee_cap < tip {
        return Err(InvalidTransaction::TipAboveFeeCap { tip, fee_cap });
    }
    if !local && tip < opts.pool_min_tip {
        return Err(InvalidTransaction::Underpriced(format!(
            "tip {tip} below pool minimum {}",
            opts.pool_min_tip
        )));
    }
    let floor = opts.min_tip.saturating_add(opts.min_gas_price);
    if fee_cap < floor {
        return Err(InvalidTransaction::Underpriced(format!(
            "fee cap {fee_cap} below network minimum {floor}"
        )));
    }

    let from = signer.sender(tx)?;
    let intrinsic = tx_intrinsic_gas(tx, head.spec)?;
    if tx.gas_limit() < intrinsic {
        return Err(InvalidTransaction::IntrinsicGas { have: tx.gas_limit(), want: intrinsic });
    }
    Ok(from)
}

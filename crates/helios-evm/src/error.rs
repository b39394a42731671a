//! Error kinds of the state transition and its stores.

use alloy_primitives::{Address, B256, U256};

/// Reasons a transaction can never be executed in the current state.
///
/// These are consensus errors: they abort the state transition, leave the state untouched and
/// cause the block processor to skip the transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransaction {
    /// The transaction nonce is below the sender's account nonce.
    #[error("nonce too low: address {address}, tx: {tx} state: {state}")]
    NonceTooLow {
        /// The sender.
        address: Address,
        /// Nonce of the transaction.
        tx: u64,
        /// Nonce of the sender's account.
        state: u64,
    },
    /// The transaction nonce is above the sender's account nonce.
    #[error("nonce too high: address {address}, tx: {tx} state: {state}")]
    NonceTooHigh {
        /// The sender.
        address: Address,
        /// Nonce of the transaction.
        tx: u64,
        /// Nonce of the sender's account.
        state: u64,
    },
    /// The sender's nonce cannot be incremented.
    #[error("nonce has max value: address {0}")]
    NonceMax(Address),
    /// The sender cannot pay for the transaction.
    #[error("insufficient funds for gas * price + value: address {address} have {have} want {want}")]
    InsufficientFunds {
        /// The sender.
        address: Address,
        /// Sender balance.
        have: U256,
        /// Amount required.
        want: U256,
    },
    /// The gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGas {
        /// Gas limit of the transaction.
        have: u64,
        /// Intrinsic gas.
        want: u64,
    },
    /// Intrinsic-gas computation overflowed 64 bits.
    #[error("gas uint64 overflow")]
    GasUintOverflow,
    /// The transaction gas exceeds what is left in the block, or the block gas limit.
    #[error("gas limit reached: have {have}, want {want}")]
    GasLimit {
        /// Gas available.
        have: u64,
        /// Gas requested.
        want: u64,
    },
    /// The sender has code that is not an EIP-7702 delegation.
    #[error("sender not an eoa: address {0}")]
    SenderNoEOA(Address),
    /// The signature does not recover to a valid sender.
    #[error("invalid sender")]
    InvalidSender,
    /// The transaction type is not accepted.
    #[error("transaction type not supported: {0}")]
    TxTypeNotSupported(u8),
    /// The encoded transaction is larger than allowed.
    #[error("oversized data: {size} > {limit}")]
    OversizedData {
        /// Encoded size.
        size: usize,
        /// Limit.
        limit: usize,
    },
    /// Init code exceeds the EIP-3860 limit.
    #[error("max initcode size exceeded: code size {size} limit {limit}")]
    MaxInitCodeSizeExceeded {
        /// Size of the init code.
        size: usize,
        /// Limit.
        limit: usize,
    },
    /// The priority fee is above the fee cap.
    #[error("max priority fee per gas higher than max fee per gas: tip {tip}, fee cap {fee_cap}")]
    TipAboveFeeCap {
        /// Priority fee.
        tip: u128,
        /// Fee cap.
        fee_cap: u128,
    },
    /// The fee cap is below the block base fee.
    #[error("max fee per gas less than block base fee: fee cap {fee_cap}, base fee {base_fee}")]
    FeeCapTooLow {
        /// Fee cap.
        fee_cap: u128,
        /// Base fee of the block.
        base_fee: u128,
    },
    /// The transaction pays less than the pool or network minimum.
    #[error("transaction underpriced: {0}")]
    Underpriced(String),
    /// A SetCode transaction carries more than the allowed number of authorizations.
    #[error("authorization list too large: {0}")]
    AuthorizationListTooLarge(usize),
    /// A SetCode transaction carries no authorization.
    #[error("empty authorization list")]
    EmptyAuthList,
    /// A SetCode transaction has no recipient.
    #[error("set code transaction must not be a create transaction")]
    SetCodeTxCreate,
    /// The sender has reached its pool slot limit.
    #[error("account limit exceeded: address {0}")]
    AccountLimitExceeded(Address),
    /// A malformed authorization tuple, rejected at pool admission.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

impl InvalidTransaction {
    /// Returns `true` for [`InvalidTransaction::NonceTooHigh`].
    pub const fn is_nonce_too_high(&self) -> bool {
        matches!(self, Self::NonceTooHigh { .. })
    }

    /// Returns `true` for [`InvalidTransaction::NonceTooLow`].
    pub const fn is_nonce_too_low(&self) -> bool {
        matches!(self, Self::NonceTooLow { .. })
    }
}

/// Reasons an EIP-7702 authorization tuple is not applied.
///
/// During execution these are never surfaced: the tuple is skipped. The pool validator reports
/// them for tuples that can never become valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    /// The chain id is neither zero nor the chain's id.
    #[error("authorization chain id mismatch: have {have}, want {want}")]
    WrongChainId {
        /// Chain id of the tuple.
        have: U256,
        /// Chain id of the chain.
        want: u64,
    },
    /// The tuple nonce is `u64::MAX`.
    #[error("authorization nonce overflow")]
    NonceOverflow,
    /// The signature is malformed or does not recover.
    #[error("invalid authorization signature")]
    InvalidSignature,
    /// The authority has code that is not a delegation.
    #[error("authority {0} has non-delegation code")]
    DestinationHasCode(Address),
    /// The tuple nonce differs from the authority's nonce.
    #[error("authorization nonce mismatch: have {have}, want {want}")]
    NonceMismatch {
        /// Nonce of the tuple.
        have: u64,
        /// Nonce of the authority.
        want: u64,
    },
    /// The delegation target carries no code. Checked at pool admission only.
    #[error("delegation target {0} has no code")]
    EmptyDelegationTarget(Address),
}

/// Errors raised inside the EVM.
///
/// They never abort the state transition: the transaction is included with a failed receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The frame reverted.
    #[error("execution reverted")]
    ExecutionReverted,
    /// The frame ran out of gas.
    #[error("out of gas")]
    OutOfGas,
    /// Value transfer exceeds the caller's balance.
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    /// Maximum call depth exceeded.
    #[error("max call depth exceeded")]
    Depth,
    /// A contract already exists at the creation address.
    #[error("contract address collision")]
    ContractAddressCollision,
    /// Runtime code exceeds the EIP-170 limit.
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
    /// Runtime code starts with `0xEF` (EIP-3541).
    #[error("invalid code: must not begin with 0xef")]
    InvalidCode,
    /// Not enough gas left to pay for the code deposit.
    #[error("contract creation code storage out of gas")]
    CodeStoreOutOfGas,
    /// The creator's nonce cannot be incremented.
    #[error("nonce uint64 overflow")]
    NonceUintOverflow,
    /// Init code exceeds the EIP-3860 limit.
    #[error("max initcode size exceeded")]
    MaxInitCodeSizeExceeded,
    /// Undefined or designated-invalid opcode.
    #[error("invalid opcode")]
    InvalidOpcode,
    /// Jump to a location that is not a `JUMPDEST`.
    #[error("invalid jump destination")]
    InvalidJump,
    /// Pop from an empty stack.
    #[error("stack underflow")]
    StackUnderflow,
    /// Push beyond 1024 items.
    #[error("stack limit reached 1024")]
    StackOverflow,
    /// State modification inside a static call.
    #[error("write protection")]
    WriteProtection,
    /// `RETURNDATACOPY` reads past the return data.
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,
    /// Any other exceptional halt reported by the interpreter.
    #[error("{0}")]
    Halt(String),
}

/// Failures of the trie node database or the state built on top of it.
///
/// These are fatal for block processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Key-value store failure.
    #[error(transparent)]
    Kv(#[from] helios_kvdb::KvError),
    /// A trie node referenced by a root is missing.
    #[error("missing trie node {0}")]
    MissingTrieNode(B256),
    /// Contract code referenced by an account is missing.
    #[error("missing code {0}")]
    MissingCode(B256),
    /// A stored node does not decode.
    #[error("corrupted trie node {hash}: {reason}")]
    CorruptedNode {
        /// Node hash.
        hash: B256,
        /// Decoder message.
        reason: String,
    },
}

/// Errors of block-level transaction processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// An SFC-mirrored account differs between the world and the SFC state.
    #[error("dual state mismatch at {address}: {field} world={world} sfc={sfc}")]
    DualStateMismatch {
        /// The mirrored account.
        address: Address,
        /// Which field differs.
        field: &'static str,
        /// Value in the world state.
        world: String,
        /// Value in the SFC state.
        sfc: String,
    },
    /// The state store failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors of a deadline-bounded message call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The message failed the state-transition pre-checks.
    #[error(transparent)]
    Invalid(#[from] InvalidTransaction),
    /// Execution was cancelled at the deadline.
    #[error("execution aborted (timeout = {0:?})")]
    Timeout(core::time::Duration),
}

/// Failures of a tracer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TracerError {
    /// The tracer has nothing to report.
    #[error("tracer produced no result")]
    NoResult,
    /// The tracer failed while building its result.
    #[error("{0}")]
    Failed(String),
}

/// Failures of a traced re-execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// The transaction does not apply on the given state.
    #[error(transparent)]
    Invalid(#[from] InvalidTransaction),
    /// The tracer failed.
    #[error(transparent)]
    Tracer(#[from] TracerError),
}

//! Bytecode interpreter seam.
//!
//! An [`Interpreter`] runs one frame against a [`Host`], which gives it the environment and the
//! state and lets it open nested frames. The frame plumbing around it (value transfer,
//! snapshots, creation rules, code deposit) lives in [`crate::Evm`]. The node runs bytecode with
//! [`crate::RevmInterpreter`].

use alloy_primitives::{Address, Bytes, B256, U256};
use auto_impl::auto_impl;

use crate::{EvmEnv, EvmState, SpecId, TxEnv, VmError};

/// Kind of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Message call.
    Call,
    /// `CALLCODE`: foreign code in the caller's context, with value.
    CallCode,
    /// `DELEGATECALL`: foreign code in the caller's context, inheriting caller and value.
    DelegateCall,
    /// `STATICCALL`: message call that may not modify state.
    StaticCall,
    /// Contract creation running init code.
    Create,
    /// `CREATE2` creation at a salted address.
    Create2,
}

impl FrameKind {
    /// Returns `true` for the creation kinds.
    pub const fn is_create(self) -> bool {
        matches!(self, Self::Create | Self::Create2)
    }
}

/// Scheme of a nested message call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `CALL`.
    Call,
    /// `CALLCODE`.
    CallCode,
    /// `DELEGATECALL`.
    DelegateCall,
    /// `STATICCALL`.
    StaticCall,
}

impl From<CallKind> for FrameKind {
    fn from(kind: CallKind) -> Self {
        match kind {
            CallKind::Call => Self::Call,
            CallKind::CallCode => Self::CallCode,
            CallKind::DelegateCall => Self::DelegateCall,
            CallKind::StaticCall => Self::StaticCall,
        }
    }
}

/// A message call to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Call scheme.
    pub kind: CallKind,
    /// Caller seen by the callee.
    pub caller: Address,
    /// Account the code runs in the context of.
    pub address: Address,
    /// Account the code is loaded from.
    pub code_address: Address,
    /// Calldata.
    pub input: Bytes,
    /// Gas given to the callee, stipend included.
    pub gas: u64,
    /// Call value. Only `CALL` and `CALLCODE` move it.
    pub value: U256,
    /// State modifications are forbidden in the callee.
    pub is_static: bool,
}

impl CallRequest {
    /// A plain `CALL` from `caller` to `to`.
    pub const fn call(caller: Address, to: Address, input: Bytes, gas: u64, value: U256) -> Self {
        Self {
            kind: CallKind::Call,
            caller,
            address: to,
            code_address: to,
            input,
            gas,
            value,
            is_static: false,
        }
    }

    /// Returns `true` if the call moves `value` from the caller.
    pub const fn transfers_value(&self) -> bool {
        matches!(self.kind, CallKind::Call | CallKind::CallCode)
    }
}

/// A contract creation to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Creator.
    pub caller: Address,
    /// Init code.
    pub init_code: Bytes,
    /// Gas given to the init code.
    pub gas: u64,
    /// Endowment.
    pub value: U256,
    /// `CREATE2` salt. `None` derives the address from the creator's nonce.
    pub salt: Option<B256>,
}

impl CreateRequest {
    /// A `CREATE` from `caller`.
    pub const fn create(caller: Address, init_code: Bytes, gas: u64, value: U256) -> Self {
        Self { caller, init_code, gas, value, salt: None }
    }

    /// Uses the `CREATE2` address derivation with `salt`.
    pub const fn with_salt(mut self, salt: B256) -> Self {
        self.salt = Some(salt);
        self
    }
}

/// Input of one interpreter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Call or creation.
    pub kind: FrameKind,
    /// Caller of the frame.
    pub caller: Address,
    /// Account the code runs in the context of.
    pub address: Address,
    /// Account the code was loaded from. Differs from `address` for EIP-7702 delegations.
    pub code_address: Address,
    /// Code to run.
    pub code: Bytes,
    /// Hash of `code`.
    pub code_hash: B256,
    /// Calldata. Empty for creations.
    pub input: Bytes,
    /// Transferred value.
    pub value: U256,
    /// Gas available to the frame.
    pub gas: u64,
    /// Call depth, zero for the outermost frame.
    pub depth: usize,
    /// State modifications are forbidden.
    pub is_static: bool,
}

/// How a frame ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// Normal termination.
    Success,
    /// `REVERT`: state changes are undone, remaining gas is returned.
    Revert,
    /// Exceptional halt: state changes are undone and all gas is consumed.
    Halt(VmError),
}

/// Output of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResult {
    /// Termination kind.
    pub status: FrameStatus,
    /// Gas left to return to the caller.
    pub gas_left: u64,
    /// Return data, or runtime code for a successful creation.
    pub output: Bytes,
}

impl FrameResult {
    /// A successful result.
    pub const fn success(gas_left: u64, output: Bytes) -> Self {
        Self { status: FrameStatus::Success, gas_left, output }
    }

    /// A reverted result.
    pub const fn revert(gas_left: u64, output: Bytes) -> Self {
        Self { status: FrameStatus::Revert, gas_left, output }
    }

    /// A halted result consuming all gas.
    pub const fn halt(error: VmError) -> Self {
        Self { status: FrameStatus::Halt(error), gas_left: 0, output: Bytes::new() }
    }

    /// A failure that returns the gas, used for checks that fail before the frame starts.
    pub const fn fail_early(error: VmError, gas_left: u64) -> Self {
        Self { status: FrameStatus::Halt(error), gas_left, output: Bytes::new() }
    }

    /// Returns `true` on success.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, FrameStatus::Success)
    }

    /// Error of a failed frame.
    pub fn error(&self) -> Option<VmError> {
        match &self.status {
            FrameStatus::Success => None,
            FrameStatus::Revert => Some(VmError::ExecutionReverted),
            FrameStatus::Halt(err) => Some(err.clone()),
        }
    }
}

/// Services the EVM offers to a running frame.
pub trait Host {
    /// Block and chain environment.
    fn env(&self) -> &EvmEnv;

    /// Transaction-level environment.
    fn tx_env(&self) -> &TxEnv;

    /// The state.
    fn state(&mut self) -> &mut dyn EvmState;

    /// Opens a nested message call.
    fn call(&mut self, call: CallRequest) -> FrameResult;

    /// Opens a nested creation. Returns the new address on success.
    fn create(&mut self, create: CreateRequest) -> (FrameResult, Option<Address>);

    /// Hash of block `number`, zero outside the last 256 blocks.
    fn block_hash(&mut self, number: u64) -> B256;

    /// Reports an executed instruction to the attached tracer.
    fn capture_state(&mut self, pc: u64, op: u8, gas: u64, cost: u64, depth: usize);

    /// Returns `true` once execution was cancelled. Interpreters stop at the next instruction.
    fn is_cancelled(&self) -> bool;
}

/// Runs bytecode.
#[auto_impl(&, Box, Arc)]
pub trait Interpreter: Send + Sync + core::fmt::Debug {
    /// Executes `frame` against `host`.
    fn run(&self, frame: &Frame, host: &mut dyn Host) -> FrameResult;

    /// Runs the precompiled contract at `address`, `None` if there is none.
    fn precompile(
        &self,
        _spec: SpecId,
        _address: Address,
        _input: &Bytes,
        _gas: u64,
    ) -> Option<FrameResult> {
        None
    }
}

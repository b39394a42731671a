use std::collections::HashMap;

use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};

use crate::{CallRequest, Frame, FrameResult, Host, Interpreter, VmError};

/// How a scripted frame ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Return the given data.
    Return(Bytes),
    /// Revert with the given data.
    Revert(Bytes),
    /// Halt with the given error.
    Halt(VmError),
}

impl Default for ScriptOutcome {
    fn default() -> Self {
        Self::Return(Bytes::new())
    }
}

/// Programmed behaviour of one piece of code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    /// Gas charged on top of nested calls.
    pub gas_used: u64,
    /// Refund credited to the transaction.
    pub refund: u64,
    /// Storage writes in the executing account.
    pub storage: Vec<(B256, U256)>,
    /// Logs emitted by the executing account.
    pub logs: Vec<(Vec<B256>, Bytes)>,
    /// Nested calls: target, input, gas.
    pub calls: Vec<(Address, Bytes, u64)>,
    /// Termination.
    pub outcome: ScriptOutcome,
}

impl Script {
    /// A script that returns without doing anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Charges `gas`.
    pub const fn with_gas_used(mut self, gas: u64) -> Self {
        self.gas_used = gas;
        self
    }

    /// Credits `refund`.
    pub const fn with_refund(mut self, refund: u64) -> Self {
        self.refund = refund;
        self
    }

    /// Writes `value` to `slot`.
    pub fn with_storage(mut self, slot: B256, value: U256) -> Self {
        self.storage.push((slot, value));
        self
    }

    /// Emits a log.
    pub fn with_log(mut self, topics: Vec<B256>, data: Bytes) -> Self {
        self.logs.push((topics, data));
        self
    }

    /// Calls `to` with `gas`.
    pub fn with_call(mut self, to: Address, input: Bytes, gas: u64) -> Self {
        self.calls.push((to, input, gas));
        self
    }

    /// Returns `output`.
    pub fn returning(mut self, output: Bytes) -> Self {
        self.outcome = ScriptOutcome::Return(output);
        self
    }

    /// Reverts with `output`.
    pub fn reverting(mut self, output: Bytes) -> Self {
        self.outcome = ScriptOutcome::Revert(output);
        self
    }

    /// Halts with `error`.
    pub fn halting(mut self, error: VmError) -> Self {
        self.outcome = ScriptOutcome::Halt(error);
        self
    }
}

/// Interpreter that plays back [`Script`]s keyed by code hash.
///
/// Code without a script behaves like an immediate `STOP`. A frame carrying value runs the
/// code's value script when one is programmed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInterpreter {
    scripts: HashMap<B256, Script>,
    value_scripts: HashMap<B256, Script>,
}

impl ScriptedInterpreter {
    /// An interpreter without scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs `code`.
    pub fn with_script(mut self, code: &[u8], script: Script) -> Self {
        self.scripts.insert(keccak256(code), script);
        self
    }

    /// Programs `code` for frames that transfer value.
    pub fn with_value_script(mut self, code: &[u8], script: Script) -> Self {
        self.value_scripts.insert(keccak256(code), script);
        self
    }
}

impl Interpreter for ScriptedInterpreter {
    fn run(&self, frame: &Frame, host: &mut dyn Host) -> FrameResult {
        let script = if frame.value.is_zero() {
            self.scripts.get(&frame.code_hash)
        } else {
            self.value_scripts.get(&frame.code_hash).or_else(|| self.scripts.get(&frame.code_hash))
        };
        let Some(script) = script else {
            return FrameResult::success(frame.gas, Bytes::new());
        };
        if host.is_cancelled() {
            return FrameResult::halt(VmError::Cancelled);
        }
        let Some(mut gas) = frame.gas.checked_sub(script.gas_used) else {
            return FrameResult::halt(VmError::OutOfGas);
        };
        host.capture_state(0, 0x00, frame.gas, script.gas_used, frame.depth);

        for (to, input, call_gas) in &script.calls {
            let call_gas = (*call_gas).min(gas);
            let child =
                host.call(CallRequest::call(frame.address, *to, input.clone(), call_gas, U256::ZERO));
            gas -= call_gas - child.gas_left;
        }

        let state = host.state();
        for (slot, value) in &script.storage {
            state.set_storage(frame.address, *slot, *value);
        }
        if script.refund > 0 {
            state.add_refund(script.refund);
        }
        for (topics, data) in &script.logs {
            state.add_log(Log::new_unchecked(frame.address, topics.clone(), data.clone()));
        }

        match &script.outcome {
            ScriptOutcome::Return(output) => FrameResult::success(gas, output.clone()),
            ScriptOutcome::Revert(output) => FrameResult::revert(gas, output.clone()),
            ScriptOutcome::Halt(err) => FrameResult::halt(err.clone()),
        }
    }
}

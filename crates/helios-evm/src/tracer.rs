//! Execution tracers.
//!
//! A [`Tracer`] is attached to an [`Evm`] and observes the transaction boundary, every nested
//! frame and every instruction the interpreter reports. [`CallTracer`] builds the call tree,
//! [`StructLogger`] records the instruction stream.

use alloy_primitives::{Address, Bytes, U256};
use serde::Serialize;
use tracing::warn;

use crate::{
    apply_message, Evm, EvmState, Frame, FrameKind, FrameResult, GasPool, Message, TraceError,
    TracerError, VmError,
};

/// Message of a known failure of legacy script tracers on reverted calls.
pub const TO_STRING_BUG: &str = "cannot read property 'toString' of undefined";

/// Observer of an execution.
pub trait Tracer: Send + core::fmt::Debug {
    /// The transaction starts executing.
    fn capture_start(&mut self, from: Address, to: Option<Address>, input: &Bytes, gas: u64, value: U256);

    /// A nested frame is entered.
    fn capture_enter(&mut self, _frame: &Frame) {}

    /// The innermost nested frame exits.
    fn capture_exit(&mut self, _result: &FrameResult) {}

    /// An instruction is executed.
    fn capture_state(&mut self, _pc: u64, _op: u8, _gas: u64, _cost: u64, _depth: usize) {}

    /// The transaction finished.
    fn capture_end(&mut self, output: &Bytes, gas_used: u64, err: Option<&VmError>);

    /// The trace as JSON.
    fn result(&self) -> Result<serde_json::Value, TracerError>;
}

/// One frame of a call trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// `CALL` or `CREATE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Caller.
    pub from: Address,
    /// Callee or created contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Gas given to the frame.
    pub gas: u64,
    /// Gas used by the frame.
    pub gas_used: u64,
    /// Calldata or init code.
    pub input: Bytes,
    /// Return data.
    #[serde(skip_serializing_if = "<[u8]>::is_empty")]
    pub output: Bytes,
    /// Failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nested frames.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallFrame>,
}

const fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Call => "CALL",
        FrameKind::CallCode => "CALLCODE",
        FrameKind::DelegateCall => "DELEGATECALL",
        FrameKind::StaticCall => "STATICCALL",
        FrameKind::Create => "CREATE",
        FrameKind::Create2 => "CREATE2",
    }
}

/// Tracer producing the call tree of a transaction.
#[derive(Debug, Default)]
pub struct CallTracer {
    stack: Vec<CallFrame>,
    root: Option<CallFrame>,
}

impl CallTracer {
    /// A fresh tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The finished call tree.
    pub const fn root(&self) -> Option<&CallFrame> {
        self.root.as_ref()
    }
}

impl Tracer for CallTracer {
    fn capture_start(&mut self, from: Address, to: Option<Address>, input: &Bytes, gas: u64, value: U256) {
        let kind = if to.is_some() { FrameKind::Call } else { FrameKind::Create };
        self.stack.push(CallFrame {
            kind: kind_name(kind).to_string(),
            from,
            to,
            value,
            gas,
            input: input.clone(),
            ..Default::default()
        });
    }

    fn capture_enter(&mut self, frame: &Frame) {
        let input = if frame.kind.is_create() { frame.code.clone() } else { frame.input.clone() };
        self.stack.push(CallFrame {
            kind: kind_name(frame.kind).to_string(),
            from: frame.caller,
            to: Some(frame.address),
            value: frame.value,
            gas: frame.gas,
            input,
            ..Default::default()
        });
    }

    fn capture_exit(&mut self, result: &FrameResult) {
        if self.stack.len() < 2 {
            return;
        }
        let Some(mut call) = self.stack.pop() else { return };
        call.gas_used = call.gas.saturating_sub(result.gas_left);
        call.output = result.output.clone();
        call.error = result.error().map(|err| err.to_string());
        if let Some(parent) = self.stack.last_mut() {
            parent.calls.push(call);
        }
    }

    fn capture_end(&mut self, output: &Bytes, gas_used: u64, err: Option<&VmError>) {
        let Some(mut root) = self.stack.pop() else { return };
        self.stack.clear();
        root.gas_used = gas_used;
        root.output = output.clone();
        root.error = err.map(ToString::to_string);
        self.root = Some(root);
    }

    fn result(&self) -> Result<serde_json::Value, TracerError> {
        let root = self.root.as_ref().ok_or(TracerError::NoResult)?;
        serde_json::to_value(root).map_err(|err| TracerError::Failed(err.to_string()))
    }
}

/// One executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    /// Program counter.
    pub pc: u64,
    /// Opcode.
    pub op: u8,
    /// Gas left before the instruction.
    pub gas: u64,
    /// Cost of the instruction.
    pub gas_cost: u64,
    /// Frame depth.
    pub depth: usize,
}

/// Tracer recording every instruction.
#[derive(Debug, Default)]
pub struct StructLogger {
    logs: Vec<StructLog>,
    limit: Option<usize>,
    output: Bytes,
    gas_used: u64,
    failed: bool,
    finished: bool,
}

impl StructLogger {
    /// A fresh logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after `limit` instructions.
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Recorded instructions.
    pub fn logs(&self) -> &[StructLog] {
        &self.logs
    }
}

impl Tracer for StructLogger {
    fn capture_start(&mut self, _from: Address, _to: Option<Address>, _input: &Bytes, _gas: u64, _value: U256) {
        self.logs.clear();
        self.finished = false;
    }

    fn capture_state(&mut self, pc: u64, op: u8, gas: u64, cost: u64, depth: usize) {
        if self.limit.is_some_and(|limit| self.logs.len() >= limit) {
            return;
        }
        self.logs.push(StructLog { pc, op, gas, gas_cost: cost, depth });
    }

    fn capture_end(&mut self, output: &Bytes, gas_used: u64, err: Option<&VmError>) {
        self.output = output.clone();
        self.gas_used = gas_used;
        self.failed = err.is_some();
        self.finished = true;
    }

    fn result(&self) -> Result<serde_json::Value, TracerError> {
        if !self.finished {
            return Err(TracerError::NoResult);
        }
        Ok(serde_json::json!({
            "gas": self.gas_used,
            "failed": self.failed,
            "returnValue": self.output,
            "structLogs": self.logs,
        }))
    }
}

/// Re-executes `msg` on top of `evm`'s state with `tracer` attached and returns the trace.
///
/// A tracer failing with [`TO_STRING_BUG`] is replaced by a fresh [`CallTracer`] reporting the
/// transaction as reverted.
pub fn trace_transaction<S: EvmState>(
    evm: Evm<S>,
    msg: &Message,
    tracer: Box<dyn Tracer>,
) -> Result<serde_json::Value, TraceError> {
    let mut evm = evm.with_tracer(tracer);
    let mut gas_pool = GasPool::new(msg.gas_limit);
    let result = apply_message(&mut evm, msg, &mut gas_pool)?;
    let tracer = evm.take_tracer().ok_or(TracerError::NoResult)?;
    match tracer.result() {
        Ok(trace) => Ok(trace),
        Err(TracerError::Failed(reason)) if reason.contains(TO_STRING_BUG) => {
            warn!(target: "evm::tracer", from = %msg.from, %reason, "tracer failed, falling back to call tracer");
            let mut fallback = CallTracer::new();
            fallback.capture_start(msg.from, msg.to, &msg.data, msg.gas_limit, msg.value);
            fallback.capture_end(
                &result.return_data,
                result.used_gas,
                Some(&VmError::ExecutionReverted),
            );
            Ok(fallback.result()?)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{bytes, Address};

    use super::*;
    use crate::{
        test_utils::{Script, ScriptedInterpreter, StateBuilder},
        BlockEnv, EvmEnv, SpecId, VmConfig,
    };

    const CALLER: Address = Address::with_last_byte(0xca);
    const OUTER: Address = Address::with_last_byte(0x01);
    const INNER: Address = Address::with_last_byte(0x02);

    fn evm() -> Evm<crate::StateDb> {
        let outer_code = bytes!("01");
        let inner_code = bytes!("02");
        let (store, root, _) = StateBuilder::new()
            .account_balance(CALLER, U256::from(1_000_000u64))
            .account_code(OUTER, outer_code.clone())
            .account_code(INNER, inner_code.clone())
            .build();
        let interpreter = ScriptedInterpreter::new()
            .with_script(&outer_code, Script::new().with_gas_used(100).with_call(INNER, Bytes::new(), 5_000))
            .with_script(&inner_code, Script::new().with_gas_used(40).reverting(bytes!("dead")));
        let env = EvmEnv::new(BlockEnv::default(), SpecId::BERLIN, 1)
            .with_config(VmConfig::default().with_idle_gas_charge(false));
        Evm::new(env, store.world_state(root).unwrap(), Arc::new(interpreter))
    }

    fn msg() -> Message {
        Message { from: CALLER, to: Some(OUTER), gas_limit: 50_000, ..Default::default() }
    }

    #[test]
    fn test_call_tracer_builds_tree() {
        let trace = trace_transaction(evm(), &msg(), Box::new(CallTracer::new())).unwrap();
        assert_eq!(trace["type"], "CALL");
        assert_eq!(trace["gasUsed"], 21_140);
        let inner = &trace["calls"][0];
        assert_eq!(inner["gasUsed"], 40);
        assert_eq!(inner["error"], "execution reverted");
        assert_eq!(inner["output"], "0xdead");
    }

    #[test]
    fn test_struct_logger_records_steps() {
        let trace = trace_transaction(evm(), &msg(), Box::new(StructLogger::new())).unwrap();
        assert_eq!(trace["failed"], false);
        assert_eq!(trace["structLogs"].as_array().unwrap().len(), 2);
        assert_eq!(trace["structLogs"][1]["depth"], 1);
    }

    #[derive(Debug, Default)]
    struct BrokenScriptTracer;

    impl Tracer for BrokenScriptTracer {
        fn capture_start(&mut self, _: Address, _: Option<Address>, _: &Bytes, _: u64, _: U256) {}

        fn capture_end(&mut self, _: &Bytes, _: u64, _: Option<&VmError>) {}

        fn result(&self) -> Result<serde_json::Value, TracerError> {
            Err(TracerError::Failed(format!("TypeError: {TO_STRING_BUG}    at result")))
        }
    }

    #[test]
    fn test_to_string_failure_falls_back_to_call_tracer() {
        let trace = trace_transaction(evm(), &msg(), Box::new(BrokenScriptTracer)).unwrap();
        assert_eq!(trace["type"], "CALL");
        assert_eq!(trace["error"], "execution reverted");
        assert!(trace.get("calls").is_none());
    }
}

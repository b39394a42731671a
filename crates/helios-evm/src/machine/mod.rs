//! Bytecode execution on the revm instruction set.
//!
//! [`RevmInterpreter`] runs one frame on a revm [`Interpreter`](revm::interpreter::Interpreter)
//! and hands every `CALL*` and `CREATE*` back to the [`Host`], so value transfers, snapshots,
//! nonces and code deposit stay with [`crate::Evm`]. Refunds earned by a frame are moved into
//! the journaled state, so a reverted frame loses them together with its writes.

mod host;

use core::ops::Range;

use alloy_primitives::{Address, Bytes, B256, U256};
use revm::{
    bytecode::Bytecode,
    context_interface::CreateScheme,
    interpreter::{
        instruction_table,
        interpreter::{EthInterpreter, ExtBytecode},
        interpreter_types::{Jumps, LoopControl, MemoryTr, ReturnData, StackTr},
        CallInput, CallInputs, CallScheme, CreateInputs, FrameInput, InputsImpl, InstructionResult,
        InterpreterAction, InterpreterResult, SharedMemory,
    },
    precompile::{PrecompileSpecId, Precompiles},
    primitives::hardfork::SpecId as RevmSpecId,
};
use tracing::trace;

use self::host::FrameHost;
use crate::{
    CallKind, CallRequest, CreateRequest, EvmState, Frame, FrameResult, FrameStatus, Host,
    Interpreter, SpecId, VmError,
};

type Machine = revm::interpreter::Interpreter<EthInterpreter>;

/// Instruction set of the revm release matching `spec`.
///
/// Phaethon adds no opcode or precompile, so it runs the Shanghai instruction set.
pub const fn revm_spec(spec: SpecId) -> RevmSpecId {
    match spec {
        SpecId::FRONTIER => RevmSpecId::FRONTIER,
        SpecId::HOMESTEAD => RevmSpecId::HOMESTEAD,
        SpecId::TANGERINE => RevmSpecId::TANGERINE,
        SpecId::SPURIOUS_DRAGON => RevmSpecId::SPURIOUS_DRAGON,
        SpecId::BYZANTIUM => RevmSpecId::BYZANTIUM,
        SpecId::CONSTANTINOPLE => RevmSpecId::CONSTANTINOPLE,
        SpecId::PETERSBURG => RevmSpecId::PETERSBURG,
        SpecId::ISTANBUL => RevmSpecId::ISTANBUL,
        SpecId::BERLIN => RevmSpecId::BERLIN,
        SpecId::LONDON => RevmSpecId::LONDON,
        SpecId::SHANGHAI | SpecId::PHAETHON => RevmSpecId::SHANGHAI,
    }
}

/// Interpreter executing EVM bytecode with the revm instruction set and precompiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevmInterpreter;

impl RevmInterpreter {
    /// Creates the interpreter.
    pub const fn new() -> Self {
        Self
    }
}

impl Interpreter for RevmInterpreter {
    fn run(&self, frame: &Frame, host: &mut dyn Host) -> FrameResult {
        let spec = host.env().spec;
        let mut machine = Machine::new(
            SharedMemory::new(),
            ExtBytecode::new(Bytecode::new_legacy(frame.code.clone())),
            InputsImpl {
                target_address: frame.address,
                bytecode_address: Some(frame.code_address),
                caller_address: frame.caller,
                input: CallInput::Bytes(frame.input.clone()),
                call_value: frame.value,
            },
            frame.is_static,
            revm_spec(spec),
            frame.gas,
        );
        let table = instruction_table::<EthInterpreter, FrameHost<'_>>();
        let mut host = FrameHost::new(host);

        loop {
            while machine.bytecode.is_not_end() {
                if host.inner.is_cancelled() {
                    return FrameResult::halt(VmError::Cancelled);
                }
                let pc = machine.bytecode.pc() as u64;
                let op = machine.bytecode.opcode();
                let gas = machine.gas.remaining();
                machine.step(&table, &mut host);
                let cost = gas.saturating_sub(machine.gas.remaining());
                host.inner.capture_state(pc, op, gas, cost, frame.depth);
            }

            match machine.take_next_action() {
                InterpreterAction::NewFrame(FrameInput::Call(inputs)) => {
                    flush_refund(&mut machine, host.inner.state());
                    let result = host.inner.call(call_request(&machine, &inputs));
                    resume_call(&mut machine, inputs.return_memory_offset.clone(), result);
                }
                InterpreterAction::NewFrame(FrameInput::Create(inputs)) => {
                    flush_refund(&mut machine, host.inner.state());
                    let (result, address) = host.inner.create(create_request(&inputs));
                    resume_create(&mut machine, result, address);
                }
                InterpreterAction::NewFrame(input) => {
                    trace!(target: "evm::machine", ?input, "unsupported frame request");
                    return FrameResult::halt(VmError::Halt("unsupported frame".to_string()));
                }
                InterpreterAction::Return(result) => return finish(host.inner.state(), result),
            }
        }
    }

    fn precompile(
        &self,
        spec: SpecId,
        address: Address,
        input: &Bytes,
        gas: u64,
    ) -> Option<FrameResult> {
        let precompiles = Precompiles::new(PrecompileSpecId::from_spec_id(revm_spec(spec)));
        let run = precompiles.get(&address)?;
        let result = match run.execute(input, gas) {
            Ok(output) if output.reverted => {
                FrameResult::revert(gas.saturating_sub(output.gas_used), output.bytes)
            }
            Ok(output) => FrameResult::success(gas.saturating_sub(output.gas_used), output.bytes),
            Err(err) if err.is_oog() => FrameResult::halt(VmError::OutOfGas),
            Err(err) => FrameResult::halt(VmError::Halt(err.to_string())),
        };
        Some(result)
    }
}

/// Credits a signed refund delta to the journaled refund counter.
fn credit_refund(state: &mut dyn EvmState, refund: i64) {
    if refund > 0 {
        state.add_refund(refund.unsigned_abs());
    } else if refund < 0 {
        state.sub_refund(refund.unsigned_abs());
    }
}

/// Moves the refund counter of `machine` into the journaled state.
fn flush_refund(machine: &mut Machine, state: &mut dyn EvmState) {
    credit_refund(state, machine.gas.refunded());
    machine.gas.set_refund(0);
}

fn call_request(machine: &Machine, inputs: &CallInputs) -> CallRequest {
    let input = match &inputs.input {
        CallInput::Bytes(bytes) => bytes.clone(),
        // each frame owns its memory, so the shared range is local to this machine
        CallInput::SharedBuffer(range) => {
            Bytes::copy_from_slice(&machine.memory.slice(range.clone()))
        }
    };
    let kind = match inputs.scheme {
        CallScheme::Call => CallKind::Call,
        CallScheme::CallCode => CallKind::CallCode,
        CallScheme::DelegateCall => CallKind::DelegateCall,
        CallScheme::StaticCall => CallKind::StaticCall,
    };
    CallRequest {
        kind,
        caller: inputs.caller,
        address: inputs.target_address,
        code_address: inputs.bytecode_address,
        input,
        gas: inputs.gas_limit,
        value: inputs.value.get(),
        is_static: inputs.is_static,
    }
}

fn create_request(inputs: &CreateInputs) -> CreateRequest {
    let request = CreateRequest::create(
        inputs.caller,
        inputs.init_code.clone(),
        inputs.gas_limit,
        inputs.value,
    );
    match inputs.scheme {
        CreateScheme::Create2 { salt } => request.with_salt(B256::from(salt)),
        _ => request,
    }
}

/// Pushes the call status, returns unused gas and copies the output into the return range.
fn resume_call(machine: &mut Machine, return_range: Range<usize>, result: FrameResult) {
    let len = result.output.len().min(return_range.len());
    if len > 0 {
        machine.memory.set(return_range.start, &result.output[..len]);
    }
    let _ = machine.stack.push(U256::from(u8::from(result.is_success())));
    machine.gas.erase_cost(result.gas_left);
    machine.return_data.set_buffer(result.output);
}

/// Pushes the created address, or zero on failure, and returns unused gas.
fn resume_create(machine: &mut Machine, result: FrameResult, address: Option<Address>) {
    let word = address.map_or(U256::ZERO, |address| U256::from_be_slice(address.as_slice()));
    let _ = machine.stack.push(word);
    machine.gas.erase_cost(result.gas_left);
    let return_data =
        if matches!(result.status, FrameStatus::Revert) { result.output } else { Bytes::new() };
    machine.return_data.set_buffer(return_data);
}

fn finish(state: &mut dyn EvmState, result: InterpreterResult) -> FrameResult {
    let InterpreterResult { result, output, gas } = result;
    if result.is_ok() {
        credit_refund(state, gas.refunded());
        return FrameResult::success(gas.remaining(), output);
    }
    if result.is_revert() {
        return FrameResult::revert(gas.remaining(), output);
    }
    FrameResult::halt(halt_reason(result))
}

fn halt_reason(result: InstructionResult) -> VmError {
    match result {
        InstructionResult::OutOfGas |
        InstructionResult::MemoryOOG |
        InstructionResult::MemoryLimitOOG |
        InstructionResult::PrecompileOOG |
        InstructionResult::InvalidOperandOOG => VmError::OutOfGas,
        InstructionResult::OpcodeNotFound |
        InstructionResult::InvalidFEOpcode |
        InstructionResult::NotActivated => VmError::InvalidOpcode,
        InstructionResult::InvalidJump => VmError::InvalidJump,
        InstructionResult::StackUnderflow => VmError::StackUnderflow,
        InstructionResult::StackOverflow => VmError::StackOverflow,
        InstructionResult::CallNotAllowedInsideStatic |
        InstructionResult::StateChangeDuringStaticCall => VmError::WriteProtection,
        InstructionResult::OutOfOffset => VmError::ReturnDataOutOfBounds,
        InstructionResult::CreateInitCodeSizeLimit => VmError::MaxInitCodeSizeExceeded,
        InstructionResult::CreateContractSizeLimit => VmError::MaxCodeSizeExceeded,
        InstructionResult::CreateContractStartingWithEF => VmError::InvalidCode,
        InstructionResult::CallTooDeep => VmError::Depth,
        InstructionResult::OutOfFunds => VmError::InsufficientBalance,
        InstructionResult::CreateCollision => VmError::ContractAddressCollision,
        InstructionResult::NonceOverflow => VmError::NonceUintOverflow,
        other => VmError::Halt(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{address, bytes, hex, keccak256};
    use alloy_trie::EMPTY_ROOT_HASH;

    use super::*;
    use crate::{BlockEnv, BlockHashes, Evm, EvmEnv, StateDatabase, StateDb};

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");
    const CONTRACT: Address = address!("0x000000000000000000000000000000000000c0de");
    const CALLEE: Address = address!("0x00000000000000000000000000000000000ca11e");

    /// Returns the word 42.
    const RUNTIME: &str = "602a60005260206000f3";

    #[derive(Debug)]
    struct NumberedHashes;

    impl BlockHashes for NumberedHashes {
        fn block_hash(&self, number: u64) -> Option<B256> {
            Some(B256::with_last_byte(number as u8))
        }
    }

    fn evm_at(number: u64) -> Evm<StateDb> {
        let state = StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        let block = BlockEnv { number, ..Default::default() };
        Evm::new(EvmEnv::new(block, SpecId::PHAETHON, 1), state, Arc::new(RevmInterpreter::new()))
    }

    fn evm() -> Evm<StateDb> {
        evm_at(1)
    }

    fn deploy(evm: &mut Evm<StateDb>, address: Address, code: &str) {
        evm.state_mut().set_code(address, Bytes::from(hex::decode(code).unwrap()));
    }

    /// `PUSH20 address`.
    fn push_address(address: Address) -> String {
        format!("73{}", hex::encode(address))
    }

    fn slot(evm: &mut Evm<StateDb>, address: Address, slot: u8) -> U256 {
        evm.state_mut().storage(address, B256::with_last_byte(slot))
    }

    #[test]
    fn test_reverting_init_code_creates_nothing() {
        let mut evm = evm();
        let (result, address) = evm.create(ALICE, bytes!("60006000fd"), 100_000, U256::ZERO);
        assert_eq!(result.status, FrameStatus::Revert);
        assert_eq!(result.gas_left, 100_000 - 6);
        assert_eq!(address, None);
        assert_eq!(evm.state_mut().nonce(ALICE), 1);
        assert!(!evm.state_mut().exist(ALICE.create(0)));
        assert!(evm.state_mut().code(ALICE.create(0)).is_empty());
    }

    #[test]
    fn test_init_code_deploys_returned_runtime() {
        let mut evm = evm();
        let init_code = hex::decode(format!("600a600c600039600a6000f3{RUNTIME}")).unwrap();
        let (result, address) = evm.create(ALICE, init_code.into(), 100_000, U256::ZERO);
        assert!(result.is_success());
        let address = address.unwrap();
        let code = evm.state_mut().code(address);
        assert_eq!(code.len(), 10);
        assert_eq!(code.as_ref(), hex::decode(RUNTIME).unwrap().as_slice());

        let result = evm.call(ALICE, address, Bytes::new(), 100_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(result.output.as_ref(), B256::with_last_byte(42).as_slice());
    }

    #[test]
    fn test_invalid_opcode_consumes_all_gas() {
        let mut evm = evm();
        deploy(&mut evm, CONTRACT, "fe");
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 50_000, U256::ZERO);
        assert_eq!(result.error(), Some(VmError::InvalidOpcode));
        assert_eq!(result.gas_left, 0);
    }

    #[test]
    fn test_storage_reset_earns_refund() {
        let mut evm = evm();
        // slot 0 = 1, then back to 0
        deploy(&mut evm, CONTRACT, "600160005560006000550000");
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::ZERO);
        assert_eq!(evm.state_mut().refund(), 19_900);
    }

    #[test]
    fn test_reverted_frame_loses_refund() {
        let mut evm = evm();
        deploy(&mut evm, CONTRACT, "6001600055600060005560006000fd");
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO);
        assert_eq!(result.status, FrameStatus::Revert);
        assert_eq!(evm.state_mut().refund(), 0);
    }

    #[test]
    fn test_nested_call_transfers_value() {
        let mut evm = evm();
        // CALL(gas, BOB, 5, 0, 0, 0, 0) and store the status in slot 0
        deploy(
            &mut evm,
            CONTRACT,
            &format!("60006000600060006005{}5af160005500", push_address(BOB)),
        );
        evm.state_mut().set_balance(CONTRACT, U256::from(10));
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(evm.state_mut().balance(BOB), U256::from(5));
        assert_eq!(evm.state_mut().balance(CONTRACT), U256::from(5));
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::from(1));
    }

    #[test]
    fn test_nested_revert_is_isolated() {
        let mut evm = evm();
        deploy(&mut evm, CALLEE, "600160005560006000fd");
        // CALL(gas, CALLEE, 0, 0, 0, 0, 0) and store ISZERO(status) in slot 0
        deploy(
            &mut evm,
            CONTRACT,
            &format!("60006000600060006000{}5af11560005500", push_address(CALLEE)),
        );
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::from(1));
        assert_eq!(slot(&mut evm, CALLEE, 0), U256::ZERO);
    }

    #[test]
    fn test_create2_opcode_address() {
        let mut evm = evm();
        // CREATE2(0, 0, 0, salt = 1) and store the address in slot 0
        deploy(&mut evm, CONTRACT, "6001600060006000f560005500");
        let result = evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO);
        assert!(result.is_success());
        let expected = CONTRACT.create2(B256::with_last_byte(1), keccak256([]));
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::from_be_slice(expected.as_slice()));
        assert_eq!(evm.state_mut().nonce(expected), 1);
        assert_eq!(evm.state_mut().nonce(CONTRACT), 1);
    }

    #[test]
    fn test_create2_address() {
        let mut evm = evm();
        let salt = B256::with_last_byte(7);
        let init_code = bytes!("60006000fd");
        let (_, address) = evm.create2(ALICE, init_code.clone(), salt, 100_000, U256::ZERO);
        assert_eq!(address, None);

        let init_code = Bytes::from(hex::decode(format!("600a600c600039600a6000f3{RUNTIME}")).unwrap());
        let (result, address) = evm.create2(ALICE, init_code.clone(), salt, 100_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(address, Some(ALICE.create2(salt, keccak256(&init_code))));
    }

    #[test]
    fn test_identity_precompile() {
        let mut evm = evm();
        let input = Bytes::from_static(b"hello");
        let result = evm.call(ALICE, Address::with_last_byte(4), input.clone(), 1_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(result.output, input);
        assert_eq!(result.gas_left, 1_000 - 18);
    }

    #[test]
    fn test_precompile_out_of_gas_halts() {
        let mut evm = evm();
        let result = evm.call(ALICE, Address::with_last_byte(4), Bytes::new(), 10, U256::ZERO);
        assert_eq!(result.error(), Some(VmError::OutOfGas));
        assert_eq!(result.gas_left, 0);
    }

    #[test]
    fn test_block_hash_window() {
        // BLOCKHASH(5) into slot 0, BLOCKHASH(16) into slot 1
        let code = "6005406000556010406001550000";
        let mut evm = evm_at(16).with_block_hashes(Arc::new(NumberedHashes));
        deploy(&mut evm, CONTRACT, code);
        assert!(evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO).is_success());
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::from(5));
        // the current block has no hash yet
        assert_eq!(slot(&mut evm, CONTRACT, 1), U256::ZERO);

        let mut evm = evm_at(16);
        deploy(&mut evm, CONTRACT, code);
        assert!(evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO).is_success());
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::ZERO);
    }

    #[test]
    fn test_self_destruct_moves_balance() {
        let mut evm = evm();
        deploy(&mut evm, CONTRACT, &format!("{}ff", push_address(BOB)));
        evm.state_mut().set_balance(CONTRACT, U256::from(7));
        assert!(evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO).is_success());
        assert_eq!(evm.state_mut().balance(BOB), U256::from(7));
        assert_eq!(evm.state_mut().balance(CONTRACT), U256::ZERO);
        assert!(evm.state_mut().has_self_destructed(CONTRACT));

        evm.state_mut().finalise(true);
        assert!(!evm.state_mut().exist(CONTRACT));
    }

    #[test]
    fn test_static_call_rejects_writes() {
        let mut evm = evm();
        deploy(&mut evm, CALLEE, "600160005500");
        // STATICCALL(gas, CALLEE, 0, 0, 0, 0) and store ISZERO(status) in slot 0
        deploy(
            &mut evm,
            CONTRACT,
            &format!("6000600060006000{}5afa1560005500", push_address(CALLEE)),
        );
        assert!(evm.call(ALICE, CONTRACT, Bytes::new(), 100_000, U256::ZERO).is_success());
        assert_eq!(slot(&mut evm, CONTRACT, 0), U256::from(1));
        assert_eq!(slot(&mut evm, CALLEE, 0), U256::ZERO);
    }

    #[test]
    fn test_spec_mapping() {
        assert_eq!(revm_spec(SpecId::PHAETHON), RevmSpecId::SHANGHAI);
        assert_eq!(revm_spec(SpecId::LONDON), RevmSpecId::LONDON);
    }
}

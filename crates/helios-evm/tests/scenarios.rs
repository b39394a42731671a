//! Receipts of the reference transaction scenarios, executed through the block processor.

use std::sync::Arc;

use alloy_primitives::{address, bytes, hex, Address, Bytes, TxKind, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use helios_evm::{
    test_utils::{Script, ScriptedInterpreter, StateBuilder, TestSigner},
    AccessList, AccessListItem, AccessListTx, ChainConfig, DualState, DynamicFeeTx, EvmHeader,
    EvmProcessor, EvmState, LegacyTx, Receipt, RevmInterpreter, SetCodeApplier, SetCodeTx, SpecId,
    StateProcessor, TxEnvelope, TxType, VmConfig,
};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

const CHAIN_ID: u64 = 1;
const BASE_FEE: u128 = 1_000_000_000;
const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

const RECIPIENT: Address = address!("0x0d3ab14bbad3d99f4203bd7a11acb94882050e7e");
const TOKEN: Address = address!("0x00000000000000000000000000000000deb31ec7");

fn token_code() -> Bytes {
    bytes!("6080604052348015600f57600080fd5b50")
}

fn init_code() -> Bytes {
    bytes!("60806040")
}

fn transfer_calldata(to: Address, amount: u8) -> Bytes {
    let mut data = vec![0xa9, 0x05, 0x9c, 0xbb];
    data.extend_from_slice(to.into_word().as_slice());
    data.extend_from_slice(B256::with_last_byte(amount).as_slice());
    data.into()
}

fn header() -> EvmHeader {
    EvmHeader {
        number: 1,
        hash: B256::with_last_byte(0x01),
        gas_limit: 30_000_000,
        base_fee: BASE_FEE,
        time: 1_700_000_000_000_000_000,
        ..Default::default()
    }
}

fn interpreter(from: Address) -> ScriptedInterpreter {
    ScriptedInterpreter::new()
        .with_script(&init_code(), Script::new().with_gas_used(4))
        .with_script(
            &token_code(),
            Script::new().with_gas_used(25_000).with_log(
                vec![Transfer::SIGNATURE_HASH, from.into_word(), RECIPIENT.into_word()],
                Bytes::copy_from_slice(B256::with_last_byte(0x0d).as_slice()),
            ),
        )
        .with_value_script(&token_code(), Script::new().with_gas_used(389).reverting(Bytes::new()))
}

fn processor(interpreter: ScriptedInterpreter) -> StateProcessor {
    StateProcessor::new(Arc::new(ChainConfig::new(CHAIN_ID, SpecId::PHAETHON)), Arc::new(interpreter))
        .with_vm_config(VmConfig::default().with_idle_gas_charge(false))
}

/// Token runtime that rejects value and otherwise logs `Transfer(caller, to, amount)`.
fn bytecode_token() -> Bytes {
    let code = format!(
        "3415600957600080fd5b602435600052600435337f{}60206000a300",
        hex::encode(Transfer::SIGNATURE_HASH)
    );
    hex::decode(code).unwrap().into()
}

/// The reference scenarios on real bytecode. The literal gas figures are London figures.
fn bytecode_processor() -> StateProcessor {
    StateProcessor::new(
        Arc::new(ChainConfig::new(CHAIN_ID, SpecId::LONDON)),
        Arc::new(RevmInterpreter::new()),
    )
    .with_vm_config(VmConfig::default().with_idle_gas_charge(false))
}

fn scenario_txs(key: &TestSigner) -> Vec<TxEnvelope> {
    vec![
        // A: legacy transfer
        key.sign_tx(
            CHAIN_ID,
            LegacyTx {
                nonce: 0,
                gas_price: BASE_FEE,
                gas: 21_000,
                to: TxKind::Call(RECIPIENT),
                value: U256::from(1_000),
                ..Default::default()
            },
        ),
        // B: legacy creation
        key.sign_tx(
            CHAIN_ID,
            LegacyTx {
                nonce: 1,
                gas_price: BASE_FEE,
                gas: 53_100,
                to: TxKind::Create,
                input: init_code(),
                ..Default::default()
            },
        ),
        // C: token transfer emitting a log
        key.sign_tx(
            CHAIN_ID,
            LegacyTx {
                nonce: 2,
                gas_price: BASE_FEE,
                gas: 100_000,
                to: TxKind::Call(TOKEN),
                input: transfer_calldata(RECIPIENT, 0x0d),
                ..Default::default()
            },
        ),
        // D: dynamic-fee call reverting on value
        key.sign_tx(
            CHAIN_ID,
            DynamicFeeTx {
                chain_id: CHAIN_ID,
                nonce: 3,
                max_priority_fee_per_gas: 500,
                max_fee_per_gas: BASE_FEE + 500,
                gas: 50_000,
                to: TxKind::Call(TOKEN),
                value: U256::from(1),
                ..Default::default()
            },
        ),
        // E: access-list creation
        key.sign_tx(
            CHAIN_ID,
            AccessListTx {
                chain_id: CHAIN_ID,
                nonce: 4,
                gas_price: BASE_FEE,
                gas: 100_000,
                to: TxKind::Create,
                input: init_code(),
                access_list: AccessList(vec![AccessListItem {
                    address: TOKEN,
                    storage_keys: vec![B256::ZERO],
                }]),
                ..Default::default()
            },
        ),
    ]
}

fn run_block(key: &TestSigner) -> Vec<Receipt> {
    let (store, root, sfc_root) = StateBuilder::new()
        .account_balance(key.address(), U256::from(ONE_ETHER))
        .account_code(TOKEN, token_code())
        .build();
    let mut evm = EvmProcessor::new(
        header(),
        store.open(root, sfc_root).unwrap(),
        processor(interpreter(key.address())),
    );
    evm.execute(scenario_txs(key)).unwrap();
    let (finalized, _) = evm.finalize().unwrap();
    assert!(finalized.skipped.is_empty());
    finalized.receipts
}

fn run_bytecode_block(key: &TestSigner) -> (Vec<Receipt>, DualState) {
    let (store, root, sfc_root) = StateBuilder::new()
        .account_balance(key.address(), U256::from(ONE_ETHER))
        .account_code(TOKEN, bytecode_token())
        .build();
    let mut evm =
        EvmProcessor::new(header(), store.open(root, sfc_root).unwrap(), bytecode_processor());
    evm.execute(scenario_txs(key)).unwrap();
    let (finalized, state) = evm.finalize().unwrap();
    assert!(finalized.skipped.is_empty());
    (finalized.receipts, state)
}

#[test]
fn test_legacy_transfer() {
    let key = TestSigner::from_seed(0xa);
    let receipt = &run_block(&key)[0];
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 0x5208);
    assert_eq!(receipt.contract_address, None);
    assert!(receipt.logs.is_empty());
    assert_eq!(receipt.tx_type, TxType::Legacy);
    assert_eq!(receipt.effective_gas_price, BASE_FEE);
}

#[test]
fn test_legacy_creation() {
    let key = TestSigner::from_seed(0xa);
    let receipt = &run_block(&key)[1];
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 0xcf4e);
    assert_eq!(receipt.contract_address, Some(key.address().create(1)));
    assert_eq!(receipt.tx_type, TxType::Legacy);
}

#[test]
fn test_token_transfer_log() {
    let key = TestSigner::from_seed(0xa);
    let receipts = run_block(&key);
    let receipt = &receipts[2];
    assert!(receipt.status);
    assert_eq!(receipt.logs.len(), 1);
    let log = &receipt.logs[0];
    assert_eq!(log.address, TOKEN);
    assert_eq!(
        log.topics(),
        &[Transfer::SIGNATURE_HASH, key.address().into_word(), RECIPIENT.into_word()]
    );
    assert_eq!(log.data.data.as_ref(), B256::with_last_byte(0x0d).as_slice());
    assert_eq!(log.tx_index, 2);
    assert_eq!(log.block_hash, header().hash);
    assert_eq!(receipt.bloom, Receipt::logs_bloom(&receipt.logs));
}

#[test]
fn test_dynamic_fee_revert() {
    let key = TestSigner::from_seed(0xa);
    let receipts = run_block(&key);
    let receipt = &receipts[3];
    assert!(!receipt.status);
    assert_eq!(receipt.gas_used, 0x538d);
    assert_eq!(receipt.tx_type, TxType::DynamicFee);
    assert!(receipt.logs.is_empty());
    assert_eq!(receipt.effective_gas_price, BASE_FEE + 500);
    assert_eq!(
        receipt.cumulative_gas_used,
        receipts.iter().take(4).map(|r| r.gas_used).sum::<u64>()
    );
}

#[test]
fn test_access_list_creation() {
    let key = TestSigner::from_seed(0xa);
    let receipt = &run_block(&key)[4];
    assert!(receipt.status);
    assert_eq!(receipt.contract_address, Some(key.address().create(4)));
    assert_eq!(receipt.tx_type, TxType::AccessList);
}

#[test]
fn test_set_code_self_sponsored() {
    let key = TestSigner::from_seed(0xb);
    let code_address = address!("0x000000000000000000000000000000000000c0de");
    let (store, root, sfc_root) = StateBuilder::new()
        .account_balance(key.address(), U256::from(ONE_ETHER))
        .account_nonce(key.address(), 42)
        .build();
    let tx = key.sign_tx(
        CHAIN_ID,
        SetCodeTx {
            chain_id: CHAIN_ID,
            nonce: 42,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 2_000_000_000,
            gas: 100_000,
            to: TxKind::Call(code_address),
            authorization_list: vec![key.sign_authorization(CHAIN_ID, code_address, 42)],
            ..Default::default()
        },
    );

    let mut evm =
        EvmProcessor::new(header(), store.open(root, sfc_root).unwrap(), processor(ScriptedInterpreter::new()));
    let receipts = evm.execute(vec![tx]).unwrap().to_vec();
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].status);
    assert_eq!(receipts[0].tx_type, TxType::SetCode);

    let (_, mut state) = evm.finalize().unwrap();
    assert_eq!(state.nonce(key.address()), 43);
    assert_eq!(SetCodeApplier::delegation(&mut state, key.address()), Some(code_address));
}

#[test]
fn test_bytecode_creation_gas() {
    let key = TestSigner::from_seed(0xa);
    let (receipts, mut state) = run_bytecode_block(&key);
    let receipt = &receipts[1];
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 0xcf4e);
    assert_eq!(receipt.contract_address, Some(key.address().create(1)));
    assert!(state.code(key.address().create(1)).is_empty());
    assert_eq!(state.nonce(key.address().create(1)), 1);
}

#[test]
fn test_bytecode_token_transfer_log() {
    let key = TestSigner::from_seed(0xa);
    let (receipts, _) = run_bytecode_block(&key);
    let receipt = &receipts[2];
    assert!(receipt.status);
    assert_eq!(receipt.logs.len(), 1);
    let log = &receipt.logs[0];
    assert_eq!(log.address, TOKEN);
    assert_eq!(
        log.topics(),
        &[Transfer::SIGNATURE_HASH, key.address().into_word(), RECIPIENT.into_word()]
    );
    assert_eq!(log.data.data.as_ref(), B256::with_last_byte(0x0d).as_slice());
}

#[test]
fn test_bytecode_value_revert() {
    let key = TestSigner::from_seed(0xa);
    let (receipts, mut state) = run_bytecode_block(&key);
    let receipt = &receipts[3];
    assert!(!receipt.status);
    // CALLVALUE ISZERO PUSH1 JUMPI PUSH1 DUP1 REVERT
    assert_eq!(receipt.gas_used, 21_000 + 24);
    assert!(receipt.logs.is_empty());
    assert_eq!(state.balance(TOKEN), U256::ZERO);
    assert_eq!(state.nonce(key.address()), 5);
}

#[test]
fn test_bytecode_access_list_creation() {
    let key = TestSigner::from_seed(0xa);
    let (receipts, _) = run_bytecode_block(&key);
    let receipt = &receipts[4];
    assert!(receipt.status);
    assert_eq!(receipt.contract_address, Some(key.address().create(4)));
    // 53000 + 4 * 16 data + 2400 address + 1900 slot + 6 execution
    assert_eq!(receipt.gas_used, 57_370);
    assert_eq!(receipt.tx_type, TxType::AccessList);
}

#[test]
fn test_bytecode_reverting_creation() {
    let key = TestSigner::from_seed(0xc);
    let (store, root, sfc_root) =
        StateBuilder::new().account_balance(key.address(), U256::from(ONE_ETHER)).build();
    let tx = key.sign_tx(
        CHAIN_ID,
        LegacyTx {
            nonce: 0,
            gas_price: BASE_FEE,
            gas: 60_000,
            to: TxKind::Create,
            input: bytes!("60006000fd"),
            ..Default::default()
        },
    );
    let mut evm =
        EvmProcessor::new(header(), store.open(root, sfc_root).unwrap(), bytecode_processor());
    let receipts = evm.execute(vec![tx]).unwrap().to_vec();
    assert!(!receipts[0].status);
    // 53000 + 3 * 16 + 2 * 4 data + 6 execution, the revert returns the rest
    assert_eq!(receipts[0].gas_used, 53_062);
    let (_, mut state) = evm.finalize().unwrap();
    assert!(!state.exist(key.address().create(0)));
    assert_eq!(state.nonce(key.address()), 1);
}

use alloy_primitives::{Address, Bytes, Log, TxKind, U256};
use alloy_sol_types::{SolCall, SolEvent};
use helios_evm::{constants::INTERNAL_TX_GAS_LIMIT, EvmState, LegacyTx, Receipt, Transaction, TxEnvelope};
use helios_system_contracts::{
    driver::{INodeDriver, DOUBLESIGN_BIT},
    NODE_DRIVER_ADDRESS,
};
use tracing::{debug, warn};

use crate::{BlockCtx, BlockState, EpochState, ValidatorId, ValidatorProfile};

/// Upper bound of the forced epoch seals pending at once.
pub const MAX_ADVANCE_EPOCHS: u32 = 1 << 16;

/// Builds node-issued transactions with consecutive nonces of the zero address.
#[derive(Debug, Clone, Copy)]
pub struct InternalTxBuilder {
    nonce: u64,
}

impl InternalTxBuilder {
    /// Starts at the zero address's nonce in `state`.
    pub fn new(state: &mut dyn EvmState) -> Self {
        Self { nonce: state.nonce(Address::ZERO) }
    }

    /// Builds a call of `to` with `calldata`.
    pub fn build(&mut self, calldata: Vec<u8>, to: Address) -> TxEnvelope {
        let tx = LegacyTx {
            nonce: self.nonce,
            gas_price: 0,
            gas: INTERNAL_TX_GAS_LIMIT,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: Bytes::from(calldata),
            v: 0,
            r: U256::ZERO,
            s: U256::ZERO,
        };
        self.nonce += 1;
        tx.into()
    }
}

/// Source of node-issued transactions around the user transactions of a block.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait InternalTxTransactor: Send + Sync + core::fmt::Debug {
    /// Internal transactions of `block`, built on top of `state`.
    fn pop_internal_txs(
        &self,
        block: &BlockCtx,
        bs: &BlockState,
        es: &EpochState,
        sealing: bool,
        state: &mut dyn EvmState,
    ) -> Vec<TxEnvelope>;
}

/// Deactivates new cheaters and, when sealing, pushes the epoch's validator metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverTxPreTransactor;

impl InternalTxTransactor for DriverTxPreTransactor {
    fn pop_internal_txs(
        &self,
        block: &BlockCtx,
        bs: &BlockState,
        es: &EpochState,
        sealing: bool,
        state: &mut dyn EvmState,
    ) -> Vec<TxEnvelope> {
        let mut builder = InternalTxBuilder::new(state);
        let mut txs = Vec::new();

        for cheater in bs.unwritten_cheaters() {
            let call = INodeDriver::deactivateValidatorCall {
                validatorID: U256::from(*cheater),
                status: U256::from(DOUBLESIGN_BIT),
            };
            debug!(target: "gossip::driver", validator = cheater, "deactivating cheater");
            txs.push(builder.build(call.abi_encode(), NODE_DRIVER_ADDRESS));
        }

        if sealing {
            let slack = es.rules.economy.block_missed_slack;
            let mut call = INodeDriver::sealEpochCall {
                offlineTimes: Vec::with_capacity(es.validators.len()),
                offlineBlocks: Vec::with_capacity(es.validators.len()),
                uptimes: Vec::with_capacity(es.validators.len()),
                originatedTxsFee: Vec::with_capacity(es.validators.len()),
                usedGas: U256::from(bs.epoch_gas),
            };
            for index in 0..es.validators.len() {
                let info = bs.validator_state(index).cloned().unwrap_or_default();
                let mut missed_blocks = block.idx.saturating_sub(info.last_block);
                let mut missed_time = block.time.saturating_sub(info.last_online_time);
                let mut uptime = info.uptime;
                // downtime within the slack is forgiven
                if missed_blocks <= slack {
                    missed_blocks = 0;
                    missed_time = 0;
                    let prev_online = info.last_online_time.max(es.epoch_start);
                    uptime = uptime.saturating_add(block.time.saturating_sub(prev_online));
                }
                call.offlineTimes.push(U256::from(missed_time));
                call.offlineBlocks.push(U256::from(missed_blocks));
                call.uptimes.push(U256::from(uptime));
                call.originatedTxsFee.push(info.originated);
            }
            txs.push(builder.build(call.abi_encode(), NODE_DRIVER_ADDRESS));
        }
        txs
    }
}

/// Announces the validators of the new epoch after sealing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverTxPostTransactor;

impl InternalTxTransactor for DriverTxPostTransactor {
    fn pop_internal_txs(
        &self,
        _block: &BlockCtx,
        _bs: &BlockState,
        es: &EpochState,
        sealing: bool,
        state: &mut dyn EvmState,
    ) -> Vec<TxEnvelope> {
        if !sealing {
            return Vec::new();
        }
        let call = INodeDriver::sealEpochValidatorsCall {
            nextValidatorIDs: es.validators.sorted_ids().into_iter().map(U256::from).collect(),
        };
        vec![InternalTxBuilder::new(state).build(call.abi_encode(), NODE_DRIVER_ADDRESS)]
    }
}

/// Folds node-driver events and receipts into the block state.
#[derive(Debug, Clone)]
pub struct DriverTxListener {
    bs: BlockState,
    es: EpochState,
    network_version: Option<u64>,
}

impl DriverTxListener {
    /// Starts listening on top of the given states.
    pub const fn new(bs: BlockState, es: EpochState) -> Self {
        Self { bs, es, network_version: None }
    }

    /// Replaces the states, e.g. after sealing.
    pub fn update(&mut self, bs: BlockState, es: EpochState) {
        self.bs = bs;
        self.es = es;
    }

    /// Block state with every observation so far.
    pub fn finalize(&self) -> BlockState {
        self.bs.clone()
    }

    /// Network version announced during the block, if any.
    pub fn take_network_version(&mut self) -> Option<u64> {
        self.network_version.take()
    }

    /// Handles a log. Logs not emitted by the node driver are ignored.
    pub fn on_new_log(&mut self, log: &Log) {
        if log.address != NODE_DRIVER_ADDRESS {
            return;
        }
        let data = &log.data;
        if let Ok(event) = INodeDriver::UpdateValidatorWeight::decode_log_data(data) {
            let id: ValidatorId = event.validatorID.saturating_to();
            if event.weight.is_zero() {
                self.bs.next_validator_profiles.remove(&id);
            } else {
                self.bs.next_validator_profiles.entry(id).or_insert_with(ValidatorProfile::default).weight =
                    event.weight;
            }
            debug!(target: "gossip::driver", validator = id, weight = %event.weight, "validator weight updated");
        } else if let Ok(event) = INodeDriver::UpdateValidatorPubkey::decode_log_data(data) {
            let id: ValidatorId = event.validatorID.saturating_to();
            if let Some(profile) = self.bs.next_validator_profiles.get_mut(&id) {
                profile.pubkey = event.pubkey;
            }
        } else if let Ok(event) = INodeDriver::UpdateNetworkRules::decode_log_data(data) {
            let last = self.bs.dirty_rules.as_ref().unwrap_or(&self.es.rules);
            match last.update(&event.diff) {
                Ok(updated) => self.bs.dirty_rules = Some(updated),
                Err(err) => warn!(target: "gossip::driver", %err, "network rules update error"),
            }
        } else if let Ok(event) = INodeDriver::UpdateNetworkVersion::decode_log_data(data) {
            self.network_version = Some(event.version.saturating_to());
        } else if let Ok(event) = INodeDriver::AdvanceEpochs::decode_log_data(data) {
            let num: u32 = event.num.saturating_to();
            self.bs.advance_epochs = self.bs.advance_epochs.saturating_add(num).min(MAX_ADVANCE_EPOCHS);
        }
    }

    /// Credits the originator of a transaction with its fee and its unused gas.
    ///
    /// An originator of zero stands for no validator.
    pub fn on_new_receipt(&mut self, tx: &TxEnvelope, receipt: &Receipt, originator: ValidatorId) {
        if originator == 0 {
            return;
        }
        let Some(index) = self.es.validators.index_of(originator) else {
            return;
        };
        let Some(state) = self.bs.validator_states.get_mut(index) else {
            return;
        };
        let fee = U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price);
        state.originated = state.originated.saturating_add(fee);
        let unused = tx.gas_limit().saturating_sub(receipt.gas_used);
        state.dirty_gas_refund = state.dirty_gas_refund.saturating_add(unused);
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use helios_evm::{test_utils::StateBuilder, TxType};

    use super::*;
    use crate::{EventId, Rules, ValidatorBlockState, Validators};

    fn states() -> (BlockState, EpochState) {
        let bs = BlockState {
            epoch_cheaters: vec![4, 5],
            cheaters_written: 1,
            epoch_gas: 777,
            validator_states: vec![
                ValidatorBlockState {
                    last_block: 8,
                    last_online_time: 800,
                    uptime: 50,
                    originated: U256::from(9),
                    ..Default::default()
                },
                ValidatorBlockState { last_block: 1, last_online_time: 100, ..Default::default() },
            ],
            ..Default::default()
        };
        let mut rules = Rules::main_net();
        rules.economy.block_missed_slack = 5;
        let es = EpochState {
            epoch: 1,
            epoch_start: 500,
            prev_epoch_start: 0,
            epoch_state_root: B256::ZERO,
            validators: Validators::from_weights([(1, 10), (2, 5)]),
            validator_states: Default::default(),
            validator_profiles: Default::default(),
            rules,
        };
        (bs, es)
    }

    fn driver_log(event: &impl SolEvent) -> Log {
        Log { address: NODE_DRIVER_ADDRESS, data: event.encode_log_data() }
    }

    #[test]
    fn test_pre_transactor_writes_cheaters_and_metrics() {
        let (bs, es) = states();
        let (store, root, sfc_root) = StateBuilder::new().build();
        let mut state = store.open(root, sfc_root).unwrap();
        state.set_nonce(Address::ZERO, 3);
        let block = BlockCtx { idx: 10, time: 1_000, atropos: EventId::default() };

        let txs = DriverTxPreTransactor.pop_internal_txs(&block, &bs, &es, true, &mut state);
        assert_eq!(txs.len(), 2);
        assert!(txs.iter().all(TxEnvelope::is_internal));
        assert_eq!(txs[0].nonce(), 3);
        assert_eq!(txs[1].nonce(), 4);
        assert_eq!(txs[0].tx_type(), TxType::Legacy);
        assert_eq!(txs[0].gas_limit(), INTERNAL_TX_GAS_LIMIT);
        assert_eq!(txs[0].to(), Some(NODE_DRIVER_ADDRESS));

        let deactivate = INodeDriver::deactivateValidatorCall::abi_decode(txs[0].input()).unwrap();
        assert_eq!(deactivate.validatorID, U256::from(5));
        assert_eq!(deactivate.status, U256::from(DOUBLESIGN_BIT));

        let seal = INodeDriver::sealEpochCall::abi_decode(txs[1].input()).unwrap();
        assert_eq!(seal.usedGas, U256::from(777));
        // within slack: forgiven, uptime extended up to the block time
        assert_eq!(seal.offlineBlocks[0], U256::ZERO);
        assert_eq!(seal.offlineTimes[0], U256::ZERO);
        assert_eq!(seal.uptimes[0], U256::from(250));
        assert_eq!(seal.originatedTxsFee[0], U256::from(9));
        // beyond slack
        assert_eq!(seal.offlineBlocks[1], U256::from(9));
        assert_eq!(seal.offlineTimes[1], U256::from(900));
        assert_eq!(seal.uptimes[1], U256::ZERO);

        assert!(DriverTxPreTransactor
            .pop_internal_txs(&block, &BlockState::default(), &es, false, &mut state)
            .is_empty());
    }

    #[test]
    fn test_post_transactor_announces_sorted_ids() {
        let (bs, es) = states();
        let (store, root, sfc_root) = StateBuilder::new().build();
        let mut state = store.open(root, sfc_root).unwrap();
        let block = BlockCtx::default();
        assert!(DriverTxPostTransactor.pop_internal_txs(&block, &bs, &es, false, &mut state).is_empty());
        let txs = DriverTxPostTransactor.pop_internal_txs(&block, &bs, &es, true, &mut state);
        let call = INodeDriver::sealEpochValidatorsCall::abi_decode(txs[0].input()).unwrap();
        assert_eq!(call.nextValidatorIDs, vec![U256::from(1), U256::from(2)]);
    }

    #[test]
    fn test_listener_tracks_driver_events() {
        let (bs, es) = states();
        let mut listener = DriverTxListener::new(bs, es);

        listener.on_new_log(&driver_log(&INodeDriver::UpdateValidatorWeight {
            validatorID: U256::from(7),
            weight: U256::from(100),
        }));
        listener.on_new_log(&driver_log(&INodeDriver::UpdateValidatorPubkey {
            validatorID: U256::from(7),
            pubkey: Bytes::from_static(b"key"),
        }));
        listener.on_new_log(&driver_log(&INodeDriver::UpdateNetworkRules {
            diff: Bytes::from_static(br#"{"Epochs": {"MaxEpochGas": 5}}"#),
        }));
        listener.on_new_log(&driver_log(&INodeDriver::UpdateNetworkRules {
            diff: Bytes::from_static(b"garbage"),
        }));
        listener.on_new_log(&driver_log(&INodeDriver::UpdateNetworkVersion { version: U256::from(3) }));
        listener.on_new_log(&driver_log(&INodeDriver::AdvanceEpochs { num: U256::MAX }));
        // same event from another contract
        listener.on_new_log(&Log {
            address: Address::with_last_byte(1),
            data: INodeDriver::AdvanceEpochs { num: U256::from(1) }.encode_log_data(),
        });

        let bs = listener.finalize();
        let profile = &bs.next_validator_profiles[&7];
        assert_eq!(profile.weight, U256::from(100));
        assert_eq!(profile.pubkey, Bytes::from_static(b"key"));
        assert_eq!(bs.dirty_rules.as_ref().unwrap().epochs.max_epoch_gas, 5);
        assert_eq!(bs.advance_epochs, MAX_ADVANCE_EPOCHS);
        assert_eq!(listener.take_network_version(), Some(3));
        assert_eq!(listener.take_network_version(), None);

        listener.on_new_log(&driver_log(&INodeDriver::UpdateValidatorWeight {
            validatorID: U256::from(7),
            weight: U256::ZERO,
        }));
        assert!(listener.finalize().next_validator_profiles.is_empty());
    }

    #[test]
    fn test_listener_credits_originator() {
        let (bs, es) = states();
        let mut listener = DriverTxListener::new(bs, es);
        let tx: TxEnvelope = LegacyTx { gas: 50_000, gas_price: 3, ..Default::default() }.into();
        let receipt = Receipt {
            tx_type: TxType::Legacy,
            status: true,
            post_state: None,
            cumulative_gas_used: 21_000,
            gas_used: 21_000,
            logs: Vec::new(),
            bloom: Default::default(),
            tx_hash: tx.hash(),
            contract_address: None,
            effective_gas_price: 3,
            block_hash: B256::ZERO,
            block_number: 1,
            transaction_index: 0,
        };
        listener.on_new_receipt(&tx, &receipt, 2);
        listener.on_new_receipt(&tx, &receipt, 0);
        listener.on_new_receipt(&tx, &receipt, 42);
        let bs = listener.finalize();
        assert_eq!(bs.validator_states[1].originated, U256::from(63_000));
        assert_eq!(bs.validator_states[1].dirty_gas_refund, 29_000);
        assert_eq!(bs.validator_states[0].originated, U256::from(9));
    }
}

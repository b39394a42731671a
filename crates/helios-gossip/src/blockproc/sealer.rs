use tracing::info;

use crate::{BlockCtx, BlockState, EpochState, ValidatorBlockState, ValidatorEpochState, Validators};

/// Decides epoch boundaries and rotates the epoch state.
#[derive(Debug)]
pub struct EpochSealer {
    block: BlockCtx,
    bs: BlockState,
    es: EpochState,
}

impl EpochSealer {
    /// Starts sealing at `block` from the given states.
    pub const fn new(block: BlockCtx, bs: BlockState, es: EpochState) -> Self {
        Self { block, bs, es }
    }

    /// Replaces the states, keeping the block.
    pub fn update(&mut self, bs: BlockState, es: EpochState) {
        self.bs = bs;
        self.es = es;
    }

    /// Returns `true` if the epoch ends with this block.
    ///
    /// An epoch ends once its gas or duration budget is spent, when the node driver forces it,
    /// or when a validator was caught cheating.
    pub fn epoch_sealing(&self) -> bool {
        let rules = &self.es.rules.epochs;
        self.bs.epoch_gas >= rules.max_epoch_gas ||
            self.block.time.saturating_sub(self.es.epoch_start) >= rules.max_epoch_duration ||
            self.bs.advance_epochs > 0 ||
            !self.bs.epoch_cheaters.is_empty()
    }

    /// Seals the epoch and returns the states of the next one.
    pub fn seal_epoch(mut self) -> (BlockState, EpochState) {
        let old_validators = std::mem::take(&mut self.es.validators);
        let new_validators = Validators::from_stakes(
            self.bs.next_validator_profiles.iter().map(|(id, profile)| (*id, profile.weight)),
        );
        self.es.validator_profiles = self.bs.next_validator_profiles.clone();

        let mut block_states = Vec::with_capacity(new_validators.len());
        let mut epoch_states = Vec::with_capacity(new_validators.len());
        for id in new_validators.ids() {
            let Some(old) = old_validators
                .index_of(*id)
                .and_then(|index| self.bs.validator_states.get(index))
            else {
                block_states.push(ValidatorBlockState {
                    last_block: self.block.idx,
                    last_online_time: self.block.time,
                    ..Default::default()
                });
                epoch_states.push(ValidatorEpochState::default());
                continue;
            };
            epoch_states.push(ValidatorEpochState {
                gas_refund: old.dirty_gas_refund,
                prev_epoch_event: old.last_event,
            });
            block_states.push(ValidatorBlockState { dirty_gas_refund: 0, uptime: 0, ..old.clone() });
        }
        self.bs.validator_states = block_states;
        self.es.validator_states = epoch_states;
        self.es.validators = new_validators;

        self.es.prev_epoch_start = self.es.epoch_start;
        self.es.epoch_start = self.block.time;
        if let Some(rules) = self.bs.dirty_rules.take() {
            self.es.rules = rules;
        }
        self.es.epoch_state_root = self.bs.finalized_state_root;

        self.bs.epoch_gas = 0;
        self.bs.epoch_cheaters.clear();
        self.bs.cheaters_written = 0;
        self.es.epoch += 1;
        self.bs.advance_epochs = self.bs.advance_epochs.saturating_sub(1);

        info!(
            target: "gossip::sealer",
            epoch = self.es.epoch,
            block = self.block.idx,
            validators = self.es.validators.len(),
            "sealed epoch"
        );
        (self.bs, self.es)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{B256, U256};

    use super::*;
    use crate::{EventId, EventInfo, Rules, ValidatorProfile};

    fn profile(weight: u64) -> ValidatorProfile {
        ValidatorProfile { weight: U256::from(weight), ..Default::default() }
    }

    fn states() -> (BlockState, EpochState) {
        let validators = Validators::from_weights([(1, 20), (2, 10)]);
        let mut bs = BlockState {
            finalized_state_root: B256::with_last_byte(0xaa),
            epoch_gas: 100,
            epoch_cheaters: vec![2],
            cheaters_written: 1,
            ..Default::default()
        };
        for id in [1u32, 2] {
            bs.validator_states.push(ValidatorBlockState {
                last_event: EventInfo { id: EventId::new(1, id, B256::ZERO), gas_power_left: 5, time: 7 },
                uptime: 40,
                last_block: 9,
                dirty_gas_refund: id as u64 * 1_000,
                ..Default::default()
            });
        }
        bs.next_validator_profiles.insert(1, profile(20));
        bs.next_validator_profiles.insert(3, profile(30));
        let es = EpochState {
            epoch: 1,
            epoch_start: 1_000,
            prev_epoch_start: 0,
            epoch_state_root: B256::ZERO,
            validator_states: vec![ValidatorEpochState::default(); 2],
            validator_profiles: Default::default(),
            validators,
            rules: Rules::main_net(),
        };
        (bs, es)
    }

    #[test]
    fn test_sealing_conditions() {
        let block = BlockCtx { idx: 10, time: 2_000, atropos: EventId::default() };
        let (mut bs, es) = states();
        assert!(EpochSealer::new(block, bs.clone(), es.clone()).epoch_sealing());

        bs.epoch_cheaters.clear();
        assert!(!EpochSealer::new(block, bs.clone(), es.clone()).epoch_sealing());

        bs.advance_epochs = 1;
        assert!(EpochSealer::new(block, bs.clone(), es.clone()).epoch_sealing());

        bs.advance_epochs = 0;
        bs.epoch_gas = es.rules.epochs.max_epoch_gas;
        assert!(EpochSealer::new(block, bs.clone(), es.clone()).epoch_sealing());

        bs.epoch_gas = 0;
        let late = BlockCtx { time: es.epoch_start + es.rules.epochs.max_epoch_duration, ..block };
        assert!(EpochSealer::new(late, bs, es).epoch_sealing());
    }

    #[test]
    fn test_seal_rotates_validators() {
        let block = BlockCtx { idx: 10, time: 2_000, atropos: EventId::default() };
        let (mut bs, es) = states();
        let mut dirty = Rules::main_net();
        dirty.blocks.max_block_gas = 1;
        bs.dirty_rules = Some(dirty.clone());
        bs.advance_epochs = 2;

        let (bs, es) = EpochSealer::new(block, bs, es).seal_epoch();
        assert_eq!(es.epoch, 2);
        assert_eq!(es.validators.ids(), &[3, 1]);
        assert_eq!(es.prev_epoch_start, 1_000);
        assert_eq!(es.epoch_start, 2_000);
        assert_eq!(es.rules, dirty);
        assert_eq!(es.epoch_state_root, B256::with_last_byte(0xaa));
        assert_eq!(es.validator_profiles.len(), 2);

        // newcomer
        assert_eq!(bs.validator_states[0].last_block, 10);
        assert_eq!(bs.validator_states[0].last_online_time, 2_000);
        assert_eq!(es.validator_states[0], ValidatorEpochState::default());

        // inherited from the old index 0
        let inherited = &bs.validator_states[1];
        assert_eq!(inherited.uptime, 0);
        assert_eq!(inherited.dirty_gas_refund, 0);
        assert_eq!(inherited.last_block, 9);
        assert_eq!(es.validator_states[1].gas_refund, 1_000);
        assert_eq!(es.validator_states[1].prev_epoch_event.gas_power_left, 5);

        assert_eq!(bs.epoch_gas, 0);
        assert!(bs.epoch_cheaters.is_empty());
        assert_eq!(bs.cheaters_written, 0);
        assert_eq!(bs.advance_epochs, 1);
        assert!(bs.dirty_rules.is_none());
    }
}

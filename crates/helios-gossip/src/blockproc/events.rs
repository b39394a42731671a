use tracing::trace;

use crate::{BlockCtx, BlockState, EpochState, Event, EventInfo};

#[derive(Debug, Clone, Copy)]
struct HighestEvent {
    info: EventInfo,
    seq: u32,
}

/// Tracks which validators were online in a block and the gas power their events used.
#[derive(Debug)]
pub struct ValidatorEventsProcessor {
    bs: BlockState,
    es: EpochState,
    highest: Vec<Option<HighestEvent>>,
    gas_used: u64,
}

impl ValidatorEventsProcessor {
    /// Starts a block on top of the given states.
    pub fn new(bs: BlockState, es: EpochState) -> Self {
        let highest = vec![None; es.validators.len()];
        Self { bs, es, highest, gas_used: 0 }
    }

    /// Accounts a confirmed event. Events of non-validators are ignored.
    pub fn process_confirmed_event(&mut self, event: &Event) {
        let Some(index) = self.es.validators.index_of(event.creator) else {
            trace!(target: "gossip::events", creator = event.creator, "event of a non-validator");
            return;
        };
        let slot = &mut self.highest[index];
        if slot.is_none_or(|prev| event.seq > prev.seq) {
            *slot = Some(HighestEvent {
                info: EventInfo {
                    id: event.id(),
                    gas_power_left: event.gas_power_left,
                    time: event.median_time,
                },
                seq: event.seq,
            });
        }
        self.gas_used = self.gas_used.saturating_add(event.gas_power_used);
    }

    /// Applies the block's observations and returns the updated block state.
    ///
    /// Cheaters never count as online. A validator earns uptime only if it did not miss more
    /// than the allowed number of blocks since it was last online.
    pub fn finalize(mut self, block: &BlockCtx) -> BlockState {
        for cheater in &self.bs.epoch_cheaters {
            if let Some(index) = self.es.validators.index_of(*cheater) {
                self.highest[index] = None;
            }
        }
        let slack = self.es.rules.economy.block_missed_slack;
        for (index, highest) in self.highest.iter().enumerate() {
            let (Some(highest), Some(state)) = (highest, self.bs.validator_states.get_mut(index))
            else {
                continue;
            };
            let event = highest.info;
            if block.idx <= state.last_block.saturating_add(slack) {
                let prev_online = state.last_online_time.max(self.es.epoch_start);
                state.uptime = state.uptime.saturating_add(event.time.saturating_sub(prev_online));
            }
            state.last_gas_power_left = event.gas_power_left;
            state.last_online_time = event.time;
            state.last_block = block.idx;
            state.last_event = event;
        }
        self.bs.epoch_gas = self.bs.epoch_gas.saturating_add(self.gas_used);
        self.bs
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;

    use super::*;
    use crate::{EventId, Rules, ValidatorBlockState, Validators};

    fn states() -> (BlockState, EpochState) {
        let validators = Validators::from_weights([(1, 10), (2, 10), (3, 10)]);
        let bs = BlockState {
            validator_states: vec![
                ValidatorBlockState { last_block: 5, last_online_time: 500, ..Default::default() },
                ValidatorBlockState { last_block: 1, last_online_time: 100, ..Default::default() },
                ValidatorBlockState { last_block: 5, last_online_time: 500, ..Default::default() },
            ],
            epoch_cheaters: vec![3],
            ..Default::default()
        };
        let mut rules = Rules::main_net();
        rules.economy.block_missed_slack = 3;
        let es = EpochState {
            epoch: 1,
            epoch_start: 200,
            prev_epoch_start: 0,
            epoch_state_root: B256::ZERO,
            validators,
            validator_states: Default::default(),
            validator_profiles: Default::default(),
            rules,
        };
        (bs, es)
    }

    fn event(creator: u32, seq: u32, time: u64, gas: u64) -> Event {
        Event {
            epoch: 1,
            seq,
            creator,
            lamport: seq,
            median_time: time,
            gas_power_used: gas,
            gas_power_left: 1_000 - seq as u64,
            ..Default::default()
        }
    }

    #[test]
    fn test_uptime_and_online_tracking() {
        let (bs, es) = states();
        let mut processor = ValidatorEventsProcessor::new(bs, es);
        processor.process_confirmed_event(&event(1, 2, 900, 10));
        processor.process_confirmed_event(&event(1, 1, 800, 10));
        processor.process_confirmed_event(&event(2, 1, 700, 5));
        processor.process_confirmed_event(&event(3, 1, 700, 5));
        processor.process_confirmed_event(&event(9, 1, 700, 100));

        let block = BlockCtx { idx: 7, time: 1_000, atropos: EventId::default() };
        let bs = processor.finalize(&block);
        assert_eq!(bs.epoch_gas, 30);

        let v1 = &bs.validator_states[0];
        assert_eq!(v1.uptime, 400);
        assert_eq!(v1.last_online_time, 900);
        assert_eq!(v1.last_block, 7);
        assert_eq!(v1.last_gas_power_left, 998);
        assert_eq!(v1.last_event.id, event(1, 2, 900, 10).id());

        // missed more than the slack: online again but no uptime credit
        let v2 = &bs.validator_states[1];
        assert_eq!(v2.uptime, 0);
        assert_eq!(v2.last_online_time, 700);
        assert_eq!(v2.last_block, 7);

        // cheater stays offline
        let v3 = &bs.validator_states[2];
        assert_eq!(v3.last_block, 5);
        assert_eq!(v3.uptime, 0);
    }
}

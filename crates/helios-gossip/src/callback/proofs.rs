use tracing::debug;

use crate::{LlrVote, MisbehaviourProof, Store, StoreError, ValidatorId, Validators};

fn is_vote_doublesign(pair: &[LlrVote; 2]) -> bool {
    let [a, b] = pair;
    a.validator == b.validator && a.epoch == b.epoch && a.hash != b.hash
}

/// Validators convicted by `proof`, in proof order.
///
/// Double signs are self-evident; wrong votes are convicted only against a decided record.
/// Accomplices outside `validators` are ignored.
pub fn proof_cheaters(
    store: &Store,
    validators: &Validators,
    proof: &MisbehaviourProof,
) -> Result<Vec<ValidatorId>, StoreError> {
    let mut cheaters = Vec::new();
    match proof {
        MisbehaviourProof::EventsDoublesign { pair: [a, b] } => {
            if a.creator == b.creator && a.epoch == b.epoch && a.seq == b.seq && a.id != b.id {
                cheaters.push(a.creator);
            }
        }
        MisbehaviourProof::BlockVoteDoublesign { pair, .. }
        | MisbehaviourProof::EpochVoteDoublesign { pair, .. } => {
            if is_vote_doublesign(pair) {
                cheaters.push(pair[0].validator);
            }
        }
        MisbehaviourProof::WrongBlockVote { block, pals } => {
            if let Some(actual) = store.get_llr_block_result(*block)? {
                cheaters.extend(pals.iter().filter(|pal| pal.hash != actual).map(|pal| pal.validator));
            }
        }
        MisbehaviourProof::WrongEpochVote { epoch, pals } => {
            if let Some(actual) = store.get_llr_epoch_result(*epoch)? {
                cheaters.extend(pals.iter().filter(|pal| pal.hash != actual).map(|pal| pal.validator));
            }
        }
    }
    cheaters.retain(|id| validators.exists(*id));
    if !cheaters.is_empty() {
        debug!(target: "gossip::blockproc", ?cheaters, "misbehaviour proven");
    }
    Ok(cheaters)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use helios_evm::StoreConfig;

    use super::*;
    use crate::{EventId, EventLocator, GossipConfig};

    fn store() -> Store {
        Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap()
    }

    fn locator(creator: ValidatorId, seq: u32, hash: u8) -> EventLocator {
        EventLocator {
            id: EventId::new(1, seq, B256::with_last_byte(hash)),
            creator,
            epoch: 1,
            seq,
            lamport: seq,
        }
    }

    #[test]
    fn test_events_doublesign() {
        let store = store();
        let validators = Validators::from_weights([(1, 1), (2, 1)]);
        let proof = |pair| MisbehaviourProof::EventsDoublesign { pair };
        let check = |p| proof_cheaters(&store, &validators, &p).unwrap();

        assert_eq!(check(proof([locator(1, 3, 1), locator(1, 3, 2)])), vec![1]);
        assert!(check(proof([locator(1, 3, 1), locator(1, 3, 1)])).is_empty());
        assert!(check(proof([locator(1, 3, 1), locator(1, 4, 2)])).is_empty());
        assert!(check(proof([locator(1, 3, 1), locator(2, 3, 2)])).is_empty());
        assert!(check(proof([locator(7, 3, 1), locator(7, 3, 2)])).is_empty());
    }

    #[test]
    fn test_wrong_votes_need_a_decided_record() {
        let store = store();
        let validators = Validators::from_weights([(1, 10), (2, 10), (3, 10)]);
        let vote = |validator, hash| LlrVote { validator, epoch: 1, hash: B256::with_last_byte(hash) };
        let proof = MisbehaviourProof::WrongBlockVote { block: 4, pals: vec![vote(2, 9), vote(3, 9)] };
        assert!(proof_cheaters(&store, &validators, &proof).unwrap().is_empty());

        for validator in 1..=3 {
            store.add_llr_block_vote(4, &vote(validator, 5), &validators).unwrap();
        }
        assert_eq!(proof_cheaters(&store, &validators, &proof).unwrap(), vec![2, 3]);

        let doublesign = MisbehaviourProof::EpochVoteDoublesign { epoch: 1, pair: [vote(1, 1), vote(1, 2)] };
        assert_eq!(proof_cheaters(&store, &validators, &doublesign).unwrap(), vec![1]);
    }
}

use alloy_primitives::{keccak256, B256};
use alloy_rlp::{RlpDecodable, RlpDecodableWrapper, RlpEncodable, RlpEncodableWrapper};
use helios_evm::TxEnvelope;
use serde::{Deserialize, Serialize};

use crate::{Epoch, MisbehaviourProof, ValidatorId};

/// Event identifier.
///
/// Bytes `0..4` hold the epoch and bytes `4..8` the Lamport time, both big-endian, so ids
/// order by epoch first and the epoch of an id is read without fetching the event. The rest
/// is the tail of the event hash.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    RlpEncodableWrapper,
    RlpDecodableWrapper,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("{_0}")]
pub struct EventId(pub B256);

impl EventId {
    /// Builds the id of an event of `epoch` at `lamport` with content hash `hash`.
    pub fn new(epoch: Epoch, lamport: u32, hash: B256) -> Self {
        let mut id = hash;
        id[0..4].copy_from_slice(&epoch.to_be_bytes());
        id[4..8].copy_from_slice(&lamport.to_be_bytes());
        Self(id)
    }

    /// Epoch encoded in the id.
    pub fn epoch(&self) -> Epoch {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Lamport time encoded in the id.
    pub fn lamport(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// Raw bytes.
    pub const fn as_b256(&self) -> &B256 {
        &self.0
    }
}

impl From<EventId> for B256 {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// A DAG vertex as delivered by consensus.
///
/// Signature and payload checks happen before an event reaches the node core, which only
/// reads the fields below.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct Event {
    /// Epoch the event belongs to.
    pub epoch: Epoch,
    /// Sequence number within the creator's events of the epoch, starting at 1.
    pub seq: u32,
    /// Frame assigned by consensus.
    pub frame: u32,
    /// Creator.
    pub creator: ValidatorId,
    /// Lamport time.
    pub lamport: u32,
    /// Creation time claimed by the creator, in nanoseconds.
    pub creation_time: u64,
    /// Median of the observed creation times, in nanoseconds.
    pub median_time: u64,
    /// Parent events.
    pub parents: Vec<EventId>,
    /// Gas power the creator has left after this event.
    pub gas_power_left: u64,
    /// Gas power spent on this event.
    pub gas_power_used: u64,
    /// Carried transactions.
    pub txs: Vec<TxEnvelope>,
    /// Carried misbehaviour proofs.
    pub misbehaviour_proofs: Vec<MisbehaviourProof>,
}

impl Event {
    /// Identifier of the event.
    pub fn id(&self) -> EventId {
        EventId::new(self.epoch, self.lamport, keccak256(alloy_rlp::encode(self)))
    }

    /// Returns `true` if the event carries transactions.
    pub fn has_txs(&self) -> bool {
        !self.txs.is_empty()
    }

    /// Compact description of the event for cross-references.
    pub fn locator(&self) -> EventLocator {
        EventLocator {
            id: self.id(),
            creator: self.creator,
            epoch: self.epoch,
            seq: self.seq,
            lamport: self.lamport,
        }
    }
}

/// Identity of an event together with the fields a double-sign proof compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct EventLocator {
    /// Event id.
    pub id: EventId,
    /// Creator.
    pub creator: ValidatorId,
    /// Epoch.
    pub epoch: Epoch,
    /// Sequence number.
    pub seq: u32,
    /// Lamport time.
    pub lamport: u32,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{TxKind, U256};
    use helios_evm::LegacyTx;

    use super::*;

    #[test]
    fn test_id_embeds_epoch_and_lamport() {
        let id = EventId::new(7, 300, B256::repeat_byte(0xab));
        assert_eq!(id.epoch(), 7);
        assert_eq!(id.lamport(), 300);
        assert_eq!(id.0[8..], [0xab; 24]);
        assert!(EventId::new(7, 301, B256::ZERO) > id);
        assert!(EventId::new(8, 0, B256::ZERO) > id);
    }

    #[test]
    fn test_event_rlp_round_trip() {
        let event = Event {
            epoch: 3,
            seq: 2,
            frame: 5,
            creator: 1,
            lamport: 9,
            median_time: 1_000,
            parents: vec![EventId::new(3, 8, B256::with_last_byte(1))],
            gas_power_used: 21_000,
            txs: vec![TxEnvelope::Legacy(LegacyTx {
                gas: 21_000,
                to: TxKind::Call(Default::default()),
                value: U256::from(1),
                v: 27,
                r: U256::from(1),
                s: U256::from(1),
                ..Default::default()
            })],
            ..Default::default()
        };
        let encoded = alloy_rlp::encode(&event);
        let decoded: Event = alloy_rlp::Decodable::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.id(), event.id());
        assert_eq!(event.id().epoch(), 3);
        assert_eq!(event.id().lamport(), 9);
    }
}

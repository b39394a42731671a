use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use helios_evm::{Receipt, TxEnvelope};
use helios_kvdb::{KeyValueReader, KeyValueWriter};

use super::{get_json, get_rlp, put_json, put_rlp, Store};
use crate::{BlockIdx, EventId, StoreError};

/// Where a transaction was included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct TxPosition {
    /// Block index.
    pub block: BlockIdx,
    /// Event carrying the transaction. The zero id for internal transactions.
    pub event: EventId,
    /// Position of the transaction in the event.
    pub event_offset: u32,
    /// Position of the transaction in the block's assembled list.
    pub block_offset: u32,
}

impl TxPosition {
    /// Event carrying the transaction, if any.
    pub fn event(&self) -> Option<EventId> {
        (self.event != EventId::default()).then_some(self.event)
    }
}

impl Store {
    /// Stores the payload of `tx`.
    pub fn set_tx(&self, tx: &TxEnvelope) -> Result<(), StoreError> {
        Ok(self.table.txs.put(tx.hash().as_slice(), &tx.encoded_2718())?)
    }

    /// Transaction `hash`, if stored.
    pub fn get_tx(&self, hash: &B256) -> Result<Option<TxEnvelope>, StoreError> {
        self.table
            .txs
            .get(hash.as_slice())?
            .map(|blob| TxEnvelope::decode_2718(&mut blob.as_slice()).map_err(|err| StoreError::decode("X", err)))
            .transpose()
    }

    /// Records the position of transaction `hash`.
    pub fn set_tx_position(&self, hash: B256, position: TxPosition) -> Result<(), StoreError> {
        put_rlp(&self.table.tx_positions, hash.as_slice(), &position)?;
        self.cache.tx_positions.lock().insert(hash, position);
        Ok(())
    }

    /// Position of transaction `hash`, if included.
    pub fn get_tx_position(&self, hash: &B256) -> Result<Option<TxPosition>, StoreError> {
        if let Some(position) = self.cache.tx_positions.lock().get(hash) {
            return Ok(Some(*position));
        }
        let position = get_rlp::<TxPosition>(&self.table.tx_positions, "x", hash.as_slice())?;
        if let Some(position) = position {
            self.cache.tx_positions.lock().insert(*hash, position);
        }
        Ok(position)
    }

    /// Stores the receipts of block `idx`.
    pub fn set_receipts(&self, idx: BlockIdx, receipts: &[Receipt]) -> Result<(), StoreError> {
        put_json(&self.table.receipts, &idx.to_be_bytes(), &receipts)
    }

    /// Receipts of block `idx`, if indexed.
    pub fn get_receipts(&self, idx: BlockIdx) -> Result<Option<Vec<Receipt>>, StoreError> {
        get_json(&self.table.receipts, "r", &idx.to_be_bytes())
    }

    /// Stores the trace of transaction `hash`.
    pub fn set_tx_trace(&self, hash: B256, trace: &[u8]) -> Result<(), StoreError> {
        Ok(self.table.traces.put(hash.as_slice(), trace)?)
    }

    /// Stored trace of transaction `hash`.
    pub fn get_tx_trace(&self, hash: &B256) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.table.traces.get(hash.as_slice())?)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, TxKind, U256};
    use helios_evm::{LegacyTx, StoreConfig};

    use super::*;
    use crate::GossipConfig;

    #[test]
    fn test_txs_and_positions() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let tx: TxEnvelope = LegacyTx {
            nonce: 7,
            gas: 21_000,
            to: TxKind::Call(Address::with_last_byte(1)),
            value: U256::from(5),
            ..Default::default()
        }
        .into();
        let hash = tx.hash();
        assert_eq!(store.get_tx(&hash).unwrap(), None);
        store.set_tx(&tx).unwrap();
        assert_eq!(store.get_tx(&hash).unwrap(), Some(tx));

        let position = TxPosition { block: 3, block_offset: 1, ..Default::default() };
        assert_eq!(position.event(), None);
        store.set_tx_position(hash, position).unwrap();
        assert_eq!(store.get_tx_position(&hash).unwrap(), Some(position));
    }
}

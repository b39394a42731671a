use std::sync::Arc;

use helios_kvdb::{KeyValueReader, KeyValueStore, KeyValueWriter, Table};
use tracing::{debug, info};

use super::{get_json, put_json, Store};
use crate::{
    BlockEpochState, BlockState, Epoch, EpochState, EventId, Rules, StoreError, ValidatorId,
    Validators,
};

const CURRENT_KEY: &[u8] = b"c";

/// Tables of the database scoped to one epoch.
#[derive(Clone)]
pub(super) struct EpochDb {
    epoch: Epoch,
    pub(super) db: Arc<dyn KeyValueStore>,
    highest_lamport: Table,
    last_events: Table,
}

impl core::fmt::Debug for EpochDb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EpochDb")
            .field("epoch", &self.epoch)
            .field("highest_lamport", &self.highest_lamport)
            .field("last_events", &self.last_events)
            .finish_non_exhaustive()
    }
}

impl EpochDb {
    fn new(epoch: Epoch, db: Arc<dyn KeyValueStore>) -> Self {
        Self {
            epoch,
            highest_lamport: Table::new(db.clone(), "l"),
            last_events: Table::new(db.clone(), "v"),
            db,
        }
    }
}

/// Name of the database of `epoch`.
pub fn epoch_db_name(epoch: Epoch) -> String {
    format!("gossip-{epoch}")
}

impl Store {
    pub(super) fn load_block_epoch_state(&self) -> Result<Option<BlockEpochState>, StoreError> {
        get_json(&self.table.block_epoch_states, "D", CURRENT_KEY)
    }

    pub(super) fn open_epoch_db(&self, epoch: Epoch) -> Result<(), StoreError> {
        let db = self.producer.open_db(&epoch_db_name(epoch))?;
        *self.epoch_db.write() = Some(EpochDb::new(epoch, db));
        Ok(())
    }

    fn rotate_epoch_db(&self, epoch: Epoch) -> Result<(), StoreError> {
        let previous = self.epoch_db.read().as_ref().map(|db| db.epoch);
        if previous == Some(epoch) {
            return Ok(());
        }
        self.open_epoch_db(epoch)?;
        if let Some(previous) = previous {
            self.producer.drop_db(&epoch_db_name(previous))?;
            debug!(target: "gossip::store", previous, epoch, "rotated epoch database");
        }
        Ok(())
    }

    /// Replaces the current block and epoch states.
    ///
    /// Entering a new epoch also records the states in the epoch history and rotates the
    /// epoch database.
    pub fn set_block_epoch_state(&self, bs: BlockState, es: EpochState) -> Result<(), StoreError> {
        let epoch = es.epoch;
        let state = Arc::new(BlockEpochState { block_state: bs, epoch_state: es });
        put_json(&self.table.block_epoch_states, CURRENT_KEY, state.as_ref())?;

        let previous = self.block_epoch_state.read().as_ref().map(|s| s.epoch_state.epoch);
        if previous != Some(epoch) {
            self.set_history_block_epoch_state(epoch, state.clone())?;
            self.rotate_epoch_db(epoch)?;
            info!(target: "gossip::store", epoch, "entered epoch");
        }
        *self.block_epoch_state.write() = Some(state);
        Ok(())
    }

    fn set_history_block_epoch_state(
        &self,
        epoch: Epoch,
        state: Arc<BlockEpochState>,
    ) -> Result<(), StoreError> {
        put_json(&self.table.block_epoch_history, &epoch.to_be_bytes(), state.as_ref())?;
        self.cache.block_epoch_history.lock().insert(epoch, state);
        Ok(())
    }

    /// Block and epoch states as of the start of `epoch`.
    pub fn get_history_block_epoch_state(
        &self,
        epoch: Epoch,
    ) -> Result<Option<Arc<BlockEpochState>>, StoreError> {
        if let Some(state) = self.cache.block_epoch_history.lock().get(&epoch) {
            return Ok(Some(state.clone()));
        }
        let Some(state) =
            get_json::<BlockEpochState>(&self.table.block_epoch_history, "D", &epoch.to_be_bytes())?
        else {
            return Ok(None);
        };
        let state = Arc::new(state);
        self.cache.block_epoch_history.lock().insert(epoch, state.clone());
        Ok(Some(state))
    }

    /// Current block and epoch states.
    pub fn get_block_epoch_state(&self) -> Option<Arc<BlockEpochState>> {
        self.block_epoch_state.read().clone()
    }

    /// Current block state.
    pub fn get_block_state(&self) -> Option<BlockState> {
        self.get_block_epoch_state().map(|state| state.block_state.clone())
    }

    /// Current epoch state.
    pub fn get_epoch_state(&self) -> Option<EpochState> {
        self.get_block_epoch_state().map(|state| state.epoch_state.clone())
    }

    /// Current epoch, zero before genesis.
    pub fn get_epoch(&self) -> Epoch {
        self.block_epoch_state.read().as_ref().map_or(0, |state| state.epoch_state.epoch)
    }

    /// Validators of the current epoch.
    pub fn get_validators(&self) -> Option<Validators> {
        self.block_epoch_state.read().as_ref().map(|state| state.epoch_state.validators.clone())
    }

    /// Rules of the current epoch.
    pub fn get_rules(&self) -> Option<Rules> {
        self.block_epoch_state.read().as_ref().map(|state| state.epoch_state.rules.clone())
    }

    /// Records the highest Lamport time seen in the current epoch.
    pub fn set_highest_lamport(&self, lamport: u32) -> Result<(), StoreError> {
        let guard = self.epoch_db.read();
        let db = guard.as_ref().ok_or(StoreError::MissingBlockEpochState)?;
        Ok(db.highest_lamport.put(b"l", &lamport.to_be_bytes())?)
    }

    /// Highest Lamport time seen in the current epoch.
    pub fn get_highest_lamport(&self) -> Result<u32, StoreError> {
        let guard = self.epoch_db.read();
        let Some(db) = guard.as_ref() else {
            return Ok(0);
        };
        let Some(blob) = db.highest_lamport.get(b"l")? else {
            return Ok(0);
        };
        let bytes: [u8; 4] =
            blob.as_slice().try_into().map_err(|_| StoreError::decode("l", "expected 4 bytes"))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Records the last event of `validator` in the current epoch.
    pub fn set_last_event(&self, validator: ValidatorId, id: EventId) -> Result<(), StoreError> {
        let guard = self.epoch_db.read();
        let db = guard.as_ref().ok_or(StoreError::MissingBlockEpochState)?;
        Ok(db.last_events.put(&validator.to_be_bytes(), id.as_b256().as_slice())?)
    }

    /// Last event of `validator` in the current epoch.
    pub fn get_last_event(&self, validator: ValidatorId) -> Result<Option<EventId>, StoreError> {
        let guard = self.epoch_db.read();
        let Some(db) = guard.as_ref() else {
            return Ok(None);
        };
        let Some(blob) = db.last_events.get(&validator.to_be_bytes())? else {
            return Ok(None);
        };
        if blob.len() != 32 {
            return Err(StoreError::decode("v", "expected 32 bytes"));
        }
        Ok(Some(EventId(alloy_primitives::B256::from_slice(&blob))))
    }
}

use helios_kvdb::{KeyValueReader, KeyValueWriter};

use super::{get_rlp, put_rlp, Store};
use crate::{Event, EventId, StoreError};

impl Store {
    /// Stores `event` under its id.
    pub fn set_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let id = event.id();
        put_rlp(&self.table.events, id.as_b256().as_slice(), event)?;
        Ok(id)
    }

    /// Event `id`, if stored.
    pub fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        get_rlp(&self.table.events, "e", id.as_b256().as_slice())
    }

    /// Returns `true` if event `id` is stored.
    pub fn has_event(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.table.events.has(id.as_b256().as_slice())?)
    }

    /// Removes event `id`.
    pub fn delete_event(&self, id: &EventId) -> Result<(), StoreError> {
        Ok(self.table.events.delete(id.as_b256().as_slice())?)
    }
}

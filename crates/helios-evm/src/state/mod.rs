//! Dual-state store.
//!
//! Two state domains, the world state and the SFC state, each backed by a
//! [`StateDatabase`]: a Merkle-Patricia trie over a reference-counted node database, with flat
//! snapshot layers for account reads. Execution works on a [`DualState`], which mirrors writes to
//! the SFC precompile accounts into the SFC domain. The [`StateStore`] owns both domains and
//! garbage-collects roots that fell out of the in-memory window.

mod account;
pub use account::*;

mod root;
pub use root::*;

mod trie_db;
pub use trie_db::*;

mod trie;
pub use trie::*;

mod snapshot;
pub use snapshot::*;

mod database;
pub use database::*;

mod interface;
pub use interface::*;

mod journal;

mod statedb;
pub use statedb::StateDb;

mod dual;
pub use dual::*;

mod gc;
pub use gc::*;

mod store;
pub use store::*;

//! Key-value storage layer of the Helios node.
//!
//! The node never talks to a concrete database driver. Everything above this crate consumes
//! [`KeyValueStore`], [`Batch`] and [`KvSnapshot`]: point reads and writes, ordered prefix
//! iteration, write batches and frozen snapshots. Tables are carved out of a single store by key prefix (see [`Table`]),
//! and per-epoch databases are opened and dropped through a [`DbProducer`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::*;

mod store;
pub use store::*;

mod memory;
pub use memory::*;

mod table;
pub use table::*;

mod skip;
pub use skip::*;

mod producer;
pub use producer::*;

mod swap;
pub use swap::*;

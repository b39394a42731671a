//! Block finalization core of the Helios node.
//!
//! Consensus (Lachesis) decides an ordered sequence of Atropos events. This crate turns every
//! decision into an executed, persisted block:
//!
//! - [`BlockProcessor`] runs the per-block pipeline: validator bookkeeping, epoch sealing,
//!   internal driver transactions, event spilling and user-transaction execution;
//! - [`Store`] persists events, blocks, receipts, the block-epoch state and the LLR votes
//!   over the key-value layer;
//! - [`TxPool`] admits user transactions against the last finalized state;
//! - [`Node`] wires these together and serves the [`Backend`] interface the RPC layer uses.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::*;

mod inter;
pub use inter::*;

mod rules;
pub use rules::*;

mod config;
pub use config::*;

mod crit;
pub use crit::*;

mod feed;
pub use feed::*;

mod blockproc;
pub use blockproc::*;

mod store;
pub use store::*;

mod callback;
pub use callback::*;

mod txpool;
pub use txpool::*;

mod backend;
pub use backend::*;

mod genesis;
pub use genesis::*;

mod service;
pub use service::*;

//! Local devnet runner of the Helios node core.
//!
//! The binary drives the whole block pipeline in one process: it writes a genesis, admits
//! signed transactions to the pool, emits one event per block as a single validator and
//! reports what was finalized.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod cmd;
pub use cmd::*;

mod error;
pub use error::*;

mod logging;
pub use logging::*;

pub mod devnet;
pub use devnet::dev_genesis;

pub mod genesis;

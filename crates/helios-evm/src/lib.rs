//! State transition engine of the Helios node.
//!
//! The crate covers everything between a decoded transaction and a committed state root:
//!
//! - the dual-state store: a world-state trie and an SFC-state trie sharing one node database,
//!   trie garbage collection and a flat snapshot layer ([`StateStore`], [`StateDb`],
//!   [`DualState`]);
//! - stateless and stateful transaction validation for the pool ([`validate_transaction`],
//!   [`validate_with_state`], [`SetCodeValidator`]);
//! - the per-transaction state transition with EIP-2930, EIP-1559 and EIP-7702 support
//!   ([`apply_message`], [`SetCodeApplier`]);
//! - the per-block processor that runs ordered transactions, checks the dual-state invariant
//!   and assembles receipts ([`StateProcessor`], [`EvmProcessor`]).
//!
//! Bytecode interpretation is pluggable through the [`Interpreter`] trait. The node runs the
//! revm instruction set through [`RevmInterpreter`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod spec;
pub use spec::*;

mod error;
pub use error::*;

mod types;
pub use types::*;

mod tx;
pub use tx::*;

mod gas;
pub use gas::*;

mod state;
pub use state::*;

mod interpreter;
pub use interpreter::*;

mod machine;
pub use machine::*;

mod evm;
pub use evm::*;

mod transition;
pub use transition::*;

mod pool;
pub use pool::*;

mod setcode;
pub use setcode::*;

mod processor;
pub use processor::*;

mod block;
pub use block::*;

mod tracer;
pub use tracer::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

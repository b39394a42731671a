//! Consensus-facing data types: events, validator sets and blocks.

mod event;
pub use event::*;

mod proof;
pub use proof::*;

mod validators;
pub use validators::*;

mod block;
pub use block::*;

/// Validator identifier assigned by the SFC. Zero is never a validator.
pub type ValidatorId = u32;

/// Epoch number.
pub type Epoch = u32;

/// Block index.
pub type BlockIdx = u64;

//! Block-state bookkeeping driven by finalized blocks.
//!
//! Each decided block advances a [`BlockState`]; every few blocks an [`EpochSealer`] rotates
//! the [`EpochState`]. Validator activity is folded in by the [`ValidatorEventsProcessor`],
//! while the node-driver contract is told about it through internal transactions built by the
//! [`InternalTxTransactor`]s and listened to through the [`DriverTxListener`].

mod state;
pub use state::*;

mod sealer;
pub use sealer::*;

mod events;
pub use events::*;

mod driver;
pub use driver::*;

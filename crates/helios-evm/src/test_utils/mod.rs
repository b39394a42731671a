//! Test utilities: deterministic signing keys, a scripted interpreter and state builders.

mod interpreter;
mod signer;
mod state;

pub use interpreter::*;
pub use signer::*;
pub use state::*;

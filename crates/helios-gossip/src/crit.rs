use std::{fmt, sync::Arc};

use tracing::error;

/// Handler of unrecoverable failures: broken trie or database, diverging state domains.
///
/// The default handler panics with the message. Embedders may interrupt the process their
/// own way; tests install a recording handler.
#[derive(Clone)]
pub struct Crit(Arc<dyn Fn(&str) + Send + Sync>);

impl Crit {
    /// Handler calling `handler` with the failure message.
    pub fn new(handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    /// Handler panicking with the failure message.
    pub fn panicking() -> Self {
        Self::new(|msg| panic!("critical failure: {msg}"))
    }

    /// Logs `err` and hands it to the handler.
    pub fn fail(&self, context: &str, err: &dyn fmt::Display) {
        let msg = format!("{context}: {err}");
        error!(target: "gossip::crit", %msg, "critical failure");
        (self.0)(&msg);
    }
}

impl Default for Crit {
    fn default() -> Self {
        Self::panicking()
    }
}

impl fmt::Debug for Crit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crit").finish_non_exhaustive()
    }
}

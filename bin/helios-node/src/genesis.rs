//! `genesis` command: prints the built-in development genesis as a starting point for custom
//! devnets.

use std::io::Write;

use clap::Parser;
use helios_gossip::Rules;

use crate::{dev_genesis, Error};

/// Prints the development genesis.
#[derive(Debug, Clone, Parser)]
pub struct Cmd {
    /// Chain id to put into the rules.
    #[arg(long)]
    pub chain_id: Option<u64>,
}

impl Cmd {
    /// Writes the genesis JSON to stdout.
    pub fn run(&self) -> Result<(), Error> {
        let mut genesis = dev_genesis();
        if let Some(chain_id) = self.chain_id {
            genesis.rules = Rules::dev_net(chain_id);
        }
        let json = serde_json::to_string_pretty(&genesis).map_err(|err| Error::Write(err.into()))?;
        writeln!(std::io::stdout(), "{json}").map_err(Error::Write)
    }
}

//! `helios-node` command line.

use clap::Parser;
use helios_node::{Cli, Error};

fn main() -> Result<(), Error> {
    Cli::parse().run().inspect_err(|err| eprintln!("error: {err}"))
}

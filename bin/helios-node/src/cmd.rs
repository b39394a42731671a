use clap::{Parser, Subcommand};

use crate::{Error, LogArgs};

/// Command line of the node binary.
#[derive(Debug, Parser)]
#[command(name = "helios-node", version, about = "Local devnet runner of the Helios node core")]
pub struct Cli {
    /// Logging.
    #[command(flatten)]
    pub log: LogArgs,

    /// Command to run.
    #[command(subcommand)]
    pub cmd: MainCmd,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum MainCmd {
    /// Run a local devnet and report the produced blocks
    Devnet(crate::devnet::Cmd),
    /// Print the development genesis
    Genesis(crate::genesis::Cmd),
}

impl Cli {
    /// Installs logging and runs the command.
    pub fn run(&self) -> Result<(), Error> {
        self.log.init().map_err(Error::Log)?;
        match &self.cmd {
            MainCmd::Devnet(cmd) => cmd.run(),
            MainCmd::Genesis(cmd) => cmd.run(),
        }
    }
}

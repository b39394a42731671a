//! `devnet` command: runs a single-process chain from JSON inputs through the whole block
//! pipeline and reports the produced blocks.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::{hex, B256, U256};
use clap::Parser;
use helios_evm::{RevmInterpreter, TxEnvelope};
use helios_gossip::{Backend, BlockRef, Epoch, Genesis, Node, NodeConfig, Rules, ValidatorId};
use helios_kvdb::MemoryDbProducer;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::Error;

/// Chain id of the built-in development genesis.
pub const DEV_CHAIN_ID: u64 = 4003;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// The built-in development genesis: dev-net rules and a single validator.
pub fn dev_genesis() -> Genesis {
    Genesis::new(Rules::dev_net(DEV_CHAIN_ID), 0).with_validator(1, U256::from(10u64).pow(U256::from(24)))
}

/// Runs a local devnet.
#[derive(Debug, Clone, Parser)]
pub struct Cmd {
    /// Genesis JSON. Defaults to the built-in development genesis.
    #[arg(long, value_name = "FILE")]
    pub genesis: Option<PathBuf>,

    /// Node configuration JSON. Missing fields take their defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Signed transactions to submit before the first block: hex-encoded EIP-2718 envelopes,
    /// one per line.
    #[arg(long, value_name = "FILE")]
    pub txs: Option<PathBuf>,

    /// Number of events to emit, one decided block each.
    #[arg(long, default_value_t = 1)]
    pub blocks: u64,

    /// Chain time between blocks, in milliseconds.
    #[arg(long = "block-time", default_value_t = 1_000)]
    pub block_time_ms: u64,

    /// Validator emitting the events. Defaults to the lowest genesis validator id.
    #[arg(long)]
    pub validator: Option<ValidatorId>,

    /// Write the report to this file instead of stdout.
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// A transaction the pool refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejected {
    /// Transaction hash.
    pub hash: B256,
    /// Pool error.
    pub reason: String,
}

/// A finalized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReport {
    /// Block index.
    pub number: u64,
    /// Block hash, the Atropos event id.
    pub hash: B256,
    /// Block time in nanoseconds.
    pub time: u64,
    /// Included transactions, internal ones first.
    pub transactions: Vec<B256>,
    /// Gas used.
    pub gas_used: u64,
    /// World-state root.
    pub state_root: B256,
}

/// Outcome of a devnet run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Chain id.
    pub chain_id: u64,
    /// Transactions admitted to the pool.
    pub accepted: Vec<B256>,
    /// Transactions refused by the pool.
    pub rejected: Vec<Rejected>,
    /// Epochs sealed during the run.
    pub sealed_epochs: Vec<Epoch>,
    /// Blocks finalized during the run. Skipped empty blocks are absent.
    pub blocks: Vec<BlockReport>,
    /// Transactions still pooled at the end, as `(pending, queued)`.
    pub pooled: (usize, usize),
}

impl Cmd {
    /// Runs the devnet and writes the report.
    pub fn run(&self) -> Result<(), Error> {
        let report = self.execute()?;
        let json = serde_json::to_string_pretty(&report).map_err(|err| Error::Write(err.into()))?;
        match &self.output {
            Some(path) => fs::write(path, json).map_err(Error::Write)?,
            None => writeln!(std::io::stdout(), "{json}").map_err(Error::Write)?,
        }
        Ok(())
    }

    /// Runs the devnet and returns the report.
    pub fn execute(&self) -> Result<Report, Error> {
        let genesis = match &self.genesis {
            Some(path) => read_json(path)?,
            None => dev_genesis(),
        };
        let cfg: NodeConfig = match &self.config {
            Some(path) => read_json(path)?,
            None => NodeConfig::default(),
        };
        let txs = match &self.txs {
            Some(path) => read_txs(path)?,
            None => Vec::new(),
        };
        let creator = match self.validator {
            Some(id) => id,
            None => genesis.validators.iter().map(|v| v.id).filter(|id| *id != 0).min().unwrap_or(1),
        };

        let node = Node::new(
            Arc::new(MemoryDbProducer::new()),
            cfg,
            &genesis,
            Arc::new(RevmInterpreter),
        )?;
        let mut report = Report {
            chain_id: genesis.rules.network_id,
            accepted: Vec::new(),
            rejected: Vec::new(),
            sealed_epochs: Vec::new(),
            blocks: Vec::new(),
            pooled: (0, 0),
        };

        for tx in txs {
            let hash = tx.hash();
            match node.send_tx(tx) {
                Ok(_) => report.accepted.push(hash),
                Err(err) => {
                    warn!(target: "helios_node", %hash, %err, "transaction rejected");
                    report.rejected.push(Rejected { hash, reason: err.to_string() });
                }
            }
        }

        let block_time = self.block_time_ms.saturating_mul(NANOS_PER_MILLI).max(1);
        for i in 1..=self.blocks {
            let before = node.progress();
            let time = genesis.time.saturating_add(block_time.saturating_mul(i));
            if node.produce_block(creator, time)?.is_some() {
                report.sealed_epochs.push(before.epoch);
            }
            let after = node.progress();
            if after.block == before.block {
                continue;
            }
            let block = node
                .block_by_number(BlockRef::Number(after.block))?
                .ok_or(helios_gossip::BackendError::BlockNotFound)?;
            report.blocks.push(BlockReport {
                number: after.block,
                hash: block.header.hash,
                time: block.header.time,
                transactions: block.transactions.iter().map(TxEnvelope::hash).collect(),
                gas_used: block.header.gas_used,
                state_root: block.header.root,
            });
        }

        report.pooled = node.pool().stats();
        let progress = node.progress();
        info!(
            target: "helios_node",
            epoch = progress.epoch,
            block = progress.block,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "devnet finished"
        );
        node.stop()?;
        Ok(report)
    }
}

fn read(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|source| Error::Read { path: path.to_path_buf(), source })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    serde_json::from_str(&read(path)?).map_err(|source| Error::Json { path: path.to_path_buf(), source })
}

fn read_txs(path: &Path) -> Result<Vec<TxEnvelope>, Error> {
    let mut txs = Vec::new();
    for (index, line) in read(path)?.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tx_err = |reason: String| Error::Tx { line: index + 1, reason };
        let raw = hex::decode(line).map_err(|err| tx_err(err.to_string()))?;
        let mut buf = raw.as_slice();
        let tx = TxEnvelope::decode_2718(&mut buf).map_err(|err| tx_err(err.to_string()))?;
        if !buf.is_empty() {
            return Err(tx_err(format!("{} trailing bytes", buf.len())));
        }
        txs.push(tx);
    }
    Ok(txs)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, TxKind};
    use helios_evm::{test_utils::TestSigner, GenesisAccount, LegacyTx};

    use super::*;

    fn transfer(key: &TestSigner, nonce: u64) -> TxEnvelope {
        key.sign_tx(
            DEV_CHAIN_ID,
            LegacyTx {
                nonce,
                gas_price: 1,
                gas: 21_000,
                to: TxKind::Call(Address::with_last_byte(0xbb)),
                value: U256::from(1),
                ..Default::default()
            },
        )
    }

    fn cmd(dir: &Path, blocks: u64) -> Cmd {
        Cmd {
            genesis: Some(dir.join("genesis.json")),
            config: None,
            txs: Some(dir.join("txs")),
            blocks,
            block_time_ms: 1_000,
            validator: None,
            output: None,
        }
    }

    #[test]
    fn test_devnet_finalizes_submitted_txs() {
        let dir = tempfile::tempdir().unwrap();
        let key = TestSigner::from_seed(1);
        let genesis = dev_genesis()
            .with_account(key.address(), GenesisAccount::with_balance(U256::from(10u64.pow(18))));
        fs::write(dir.path().join("genesis.json"), serde_json::to_vec(&genesis).unwrap()).unwrap();

        let good = transfer(&key, 0);
        let stranger = transfer(&TestSigner::from_seed(2), 0);
        let lines = [good.encoded_2718(), stranger.encoded_2718()].map(hex::encode).join("\n");
        fs::write(dir.path().join("txs"), format!("# transfers\n{lines}\n")).unwrap();

        let report = cmd(dir.path(), 2).execute().unwrap();
        assert_eq!(report.chain_id, DEV_CHAIN_ID);
        assert_eq!(report.accepted, vec![good.hash()]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].hash, stranger.hash());
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[0].transactions, vec![good.hash()]);
        assert!(report.blocks[1].transactions.is_empty());
        assert!(report.sealed_epochs.is_empty());
    }

    #[test]
    fn test_bad_inputs_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("genesis.json"), "{}").unwrap();
        fs::write(dir.path().join("txs"), "zz\n").unwrap();
        assert!(matches!(cmd(dir.path(), 1).execute(), Err(Error::Json { .. })));

        fs::write(dir.path().join("genesis.json"), serde_json::to_vec(&dev_genesis()).unwrap()).unwrap();
        assert!(matches!(cmd(dir.path(), 1).execute(), Err(Error::Tx { line: 1, .. })));

        let missing = Cmd { genesis: Some(dir.path().join("absent.json")), ..cmd(dir.path(), 1) };
        assert!(matches!(missing.execute(), Err(Error::Read { .. })));
    }
}

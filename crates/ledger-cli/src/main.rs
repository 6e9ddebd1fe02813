use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{
    constants::TIP_KEY, pow::MineOptions, stored_difficulty, Chain, ChainConfig, Hash,
    MiningObserver, Transaction,
};
use ledger_storage::{KvStore, SledStore};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "Minimal proof-of-work ledger backed by sled")]
struct Cli {
    /// Data directory for sled
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Leading zero bits required of every block hash
    #[arg(long, env = "LEDGER_DIFFICULTY", global = true)]
    difficulty: Option<u32>,

    /// JSON file with chain settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the chain with its genesis block, or open the existing one
    Init {
        /// Recipient of the genesis reward
        #[arg(long)]
        address: Option<String>,
    },
    /// Mine and append a block carrying free-form data
    Add {
        /// Data recorded in the block's coinbase
        #[arg(long)]
        data: String,
        /// Recipient of the block reward
        #[arg(long, default_value = "miner")]
        to: String,
        /// Search nonces on every core
        #[arg(long)]
        parallel: bool,
    },
    /// Print the chain from tip to genesis
    Print,
    /// Check every link and proof of work from tip to genesis
    Verify,
}

struct ProgressLog;

impl MiningObserver for ProgressLog {
    fn on_progress(&self, nonce: i64, digest: &Hash) {
        debug!(nonce, digest = %hex::encode(digest), "mining");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ChainConfig::from_json_file(path)?,
        None => ChainConfig::default(),
    };

    let store = Arc::new(
        SledStore::open(&cli.data_dir)
            .with_context(|| format!("opening {}", cli.data_dir.display()))?,
    );

    // An explicit difficulty must match the chain's; otherwise use the recorded one.
    match (cli.difficulty, stored_difficulty(store.as_ref())?) {
        (Some(difficulty), _) => config.difficulty = difficulty,
        (None, Some(recorded)) => {
            debug!(difficulty = recorded, "using difficulty recorded at genesis");
            config.difficulty = recorded;
        }
        (None, None) => {}
    }
    config.validate()?;

    match cli.cmd {
        Command::Init { address } => {
            if let Some(address) = address {
                config.genesis_address = address;
            }
            let chain = Chain::init(store, &config)?;
            println!("Chain ready, tip {}", hex::encode(chain.tip()));
        }
        Command::Add { data, to, parallel } => {
            let chain = Arc::new(open_existing(store, &config)?);
            let block = add(chain, data, to, parallel || config.parallel_mining).await?;
            println!("Added block {}", hex::encode(block.hash));
        }
        Command::Print => {
            let chain = open_existing(store, &config)?;
            print_chain(&chain)?;
        }
        Command::Verify => {
            let chain = open_existing(store, &config)?;
            let count = chain.verify()?;
            println!("Chain OK: {count} blocks");
        }
    }
    Ok(())
}

fn open_existing(store: Arc<SledStore>, config: &ChainConfig) -> Result<Chain<SledStore>> {
    if store.get(TIP_KEY)?.is_none() {
        bail!("no chain found, run `init` first");
    }
    Ok(Chain::init(store, config)?)
}

/// Mines off the async runtime; Ctrl-C abandons the search without writing anything.
async fn add(
    chain: Arc<Chain<SledStore>>,
    data: String,
    to: String,
    parallel: bool,
) -> Result<ledger_core::Block> {
    let observer: Arc<dyn MiningObserver> = Arc::new(ProgressLog);
    let opts = MineOptions {
        parallel,
        observer: Some(observer),
        ..MineOptions::default()
    };
    let cancel = opts.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling mining");
            cancel.cancel();
        }
    });

    let txs = vec![Transaction::new_coinbase(&to, &data)?];
    info!(%to, "mining block");
    let block = tokio::task::spawn_blocking(move || chain.add_block_with(txs, &opts)).await??;
    Ok(block)
}

fn print_chain(chain: &Chain<SledStore>) -> Result<()> {
    for block in chain.iter() {
        let block = block?;
        println!("Prev. hash: {}", hex::encode(block.prev_hash_bytes()));
        println!("Transactions:");
        for tx in &block.transactions {
            println!("  {}", tx.summary());
        }
        println!("Hash: {}", hex::encode(block.hash));
        println!("Nonce: {}", block.nonce);
        println!("PoW: {}", chain.proof_of_work().validate(&block));
        println!();
    }
    Ok(())
}

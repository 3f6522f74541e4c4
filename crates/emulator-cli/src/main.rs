//! EVM Emulator host
//!
//! Opens an emulator on a sled data directory and runs one command against
//! it: inspect blocks, accounts and receipts, or sign and commit a transfer.
//! The chain survives between invocations.

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evm_emulator::{BlockRef, CallRequest, Emulator, SledStore, Transaction, UnsignedTransaction};
use k256::ecdsa::SigningKey;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::HostConfig;

/// EVM emulator host
#[derive(Parser, Debug)]
#[command(name = "evm-emu")]
#[command(about = "Single-node EVM chain on a local sled database", long_about = None)]
struct Args {
    /// Data directory for the chain database
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// JSON file with chain parameters and genesis allocation
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the genesis block if the data directory is empty
    Init,
    /// Print the head block
    Head,
    /// Print a block by number
    Block { number: u64 },
    /// Print an account balance
    Balance {
        address: Address,
        /// Block number; latest when omitted
        #[arg(long)]
        block: Option<u64>,
    },
    /// Print an account's runtime bytecode
    Code {
        address: Address,
        #[arg(long)]
        block: Option<u64>,
    },
    /// Print a transaction receipt
    Receipt { hash: B256 },
    /// Sign a value transfer, submit it and commit a block
    Transfer {
        /// Hex-encoded secp256k1 private key of the sender
        #[arg(long)]
        key: String,
        #[arg(long)]
        to: Address,
        /// Amount in wei
        #[arg(long)]
        value: U256,
        /// Gas price; the chain's suggested price when omitted
        #[arg(long)]
        gas_price: Option<u128>,
        /// Gas limit; estimated against the latest block when omitted
        #[arg(long)]
        gas_limit: Option<u64>,
    },
}

fn block_ref(block: Option<u64>) -> BlockRef {
    block.map(BlockRef::Number).unwrap_or_default()
}

fn parse_key(key: &str) -> Result<SigningKey> {
    let bytes = hex::decode(key.trim()).context("private key is not valid hex")?;
    SigningKey::from_slice(&bytes).context("invalid secp256k1 private key")
}

/// Sign a transfer from `key` at its pending nonce
fn build_transfer(
    emu: &Emulator,
    key: &SigningKey,
    to: Address,
    value: U256,
    gas_price: Option<u128>,
    gas_limit: Option<u64>,
) -> Result<Transaction> {
    let from = evm_emulator::address_of(key.verifying_key());
    let nonce = emu.pending_nonce_at(&from)?;
    let gas_price = gas_price.unwrap_or_else(|| emu.suggest_gas_price());

    let gas_limit = match gas_limit {
        Some(gas_limit) => gas_limit,
        None => {
            let request = CallRequest {
                gas_price: Some(gas_price),
                ..CallRequest::new(to, Bytes::new()).from(from).value(value)
            };
            emu.estimate_gas(&request).context("estimating transfer gas")?
        }
    };
    tracing::debug!("Transfer from {} nonce {} gas limit {}", from, nonce, gas_limit);

    Ok(UnsignedTransaction::transfer(nonce, to, value, gas_limit, gas_price).sign(key, emu.config().chain_id)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let host = HostConfig::load(args.config.as_deref())?;

    std::fs::create_dir_all(&args.data_dir)?;
    let store = SledStore::open(&args.data_dir)?;
    let mut emu = Emulator::open(store, &host.genesis, host.chain.clone())?;

    match args.command {
        Command::Init => {
            tracing::info!("Chain id: {}", host.chain.chain_id);
            tracing::info!("Data directory: {:?}", args.data_dir);
            print_json(emu.head())?;
        }
        Command::Head => print_json(emu.head())?,
        Command::Block { number } => match emu.block_by_number(number)? {
            Some(block) => print_json(&block)?,
            None => bail!("block #{} not found", number),
        },
        Command::Balance { address, block } => {
            println!("{}", emu.balance_of(&address, block_ref(block))?);
        }
        Command::Code { address, block } => {
            println!("{}", emu.code_at(&address, block_ref(block))?);
        }
        Command::Receipt { hash } => match emu.receipt(&hash)? {
            Some(receipt) => print_json(&receipt)?,
            None => bail!("no receipt for {}", hash),
        },
        Command::Transfer {
            key,
            to,
            value,
            gas_price,
            gas_limit,
        } => {
            let key = parse_key(&key)?;
            let tx = build_transfer(&emu, &key, to, value, gas_price, gas_limit)?;
            let hash = tx.hash();
            emu.submit(tx)?;
            let block = emu.commit()?;

            tracing::info!("Transfer {} included in block #{}", hash, block.number);
            if let Some(receipt) = emu.receipt(&hash)? {
                print_json(&receipt)?;
            }
        }
    }

    emu.close()?;
    Ok(())
}

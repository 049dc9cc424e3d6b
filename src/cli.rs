// Command line surface
//
// Every command is scoped to a node id: each node keeps its own database
// directory and, when serving, listens on the id as its port.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use tokio::runtime::Runtime;

use crate::core::Transaction;
use crate::network::{CENTRAL_NODE, Server, submit_tx};
use crate::storage::{Blockchain, UtxoIndex};
use crate::wallet::{PlainLock, ProofSystem};

#[derive(Parser)]
#[command(name = "toychain", about = "A minimal proof-of-work blockchain node")]
pub struct Cli {
    /// Node identifier, doubles as the listen port
    #[arg(long, default_value = "3000")]
    pub node_id: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new blockchain and pay the genesis subsidy to ADDRESS
    CreateBlockchain { address: String },

    /// Sum the unspent outputs locked to ADDRESS
    GetBalance { address: String },

    /// Print every block from the tip back to genesis
    PrintChain,

    /// Send AMOUNT from one address to another
    Send {
        from: String,
        to: String,
        amount: u64,
        /// Mine the transaction into a block locally instead of
        /// submitting it to the central node
        #[arg(long)]
        mine: bool,
    },

    /// Rebuild the UTXO index from a full chain scan
    ReindexUtxo,

    /// Run the peer server
    StartNode {
        /// Mine pooled transactions, paying rewards to this address
        #[arg(long)]
        miner: Option<String>,
    },
}

pub struct CliHandler {
    node_id: String,
    system: PlainLock,
}

impl CliHandler {
    pub fn new(node_id: String) -> CliHandler {
        CliHandler {
            node_id,
            system: PlainLock,
        }
    }

    fn data_dir(&self) -> String {
        format!("./blockchain_{}", self.node_id)
    }

    pub fn run(&self, command: Commands) -> Result<(), String> {
        match command {
            Commands::CreateBlockchain { address } => self.create_blockchain(&address),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::PrintChain => self.print_chain(),
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine),
            Commands::ReindexUtxo => self.reindex_utxo(),
            Commands::StartNode { miner } => self.start_node(miner),
        }
    }

    fn create_blockchain(&self, address: &str) -> Result<(), String> {
        let coinbase = Transaction::new_coinbase(address, "", &self.system)?;
        let chain = Blockchain::create(self.data_dir(), coinbase)?;
        UtxoIndex::new(&chain)?.reindex()?;
        println!("Done! Tip: {}", chain.tip()?);
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<(), String> {
        let chain = Blockchain::open(self.data_dir())?;
        let utxo = UtxoIndex::new(&chain)?;

        let pub_key_hash = self.system.address_key_hash(address)?;
        let balance: u64 = utxo
            .find_utxo(&pub_key_hash)?
            .iter()
            .map(|out| out.value)
            .sum();

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn print_chain(&self) -> Result<(), String> {
        let chain = Blockchain::open(self.data_dir())?;

        for block in chain.iter()? {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            println!("Height:    {}", block.height);
            println!("Prev:      {}", block.prev_block_hash);
            println!("Timestamp: {}", block.timestamp);
            println!("Nonce:     {}", block.nonce);
            for tx in &block.transactions {
                println!("  Transaction {}", tx.id);
                for input in &tx.vin {
                    println!("    in:  txid {} vout {}", input.txid, input.vout);
                }
                for out in &tx.vout {
                    println!("    out: value {}", out.value);
                }
            }
            println!();
        }
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<(), String> {
        let chain = Blockchain::open(self.data_dir())?;
        let utxo = UtxoIndex::new(&chain)?;

        let tx = Transaction::new_utxo_transaction(from, to, amount, &utxo, &self.system)?;

        if mine {
            let coinbase = Transaction::new_coinbase(from, "", &self.system)?;
            let block = chain.mine_block(vec![coinbase, tx], &self.system)?;
            utxo.update(&block)?;
            info!("Mined block {}", block.hash);
        } else {
            let node_address = format!("localhost:{}", self.node_id);
            let runtime =
                Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
            runtime.block_on(submit_tx(CENTRAL_NODE, &node_address, &tx))?;
        }

        println!("Success!");
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<(), String> {
        let chain = Blockchain::open(self.data_dir())?;
        let utxo = UtxoIndex::new(&chain)?;
        utxo.reindex()?;
        println!(
            "Done! There are {} transactions in the UTXO set.",
            utxo.count_transactions()
        );
        Ok(())
    }

    fn start_node(&self, miner: Option<String>) -> Result<(), String> {
        let chain = Blockchain::open(self.data_dir())?;
        let node_address = format!("localhost:{}", self.node_id);

        if let Some(addr) = &miner {
            info!("Mining is on. Address to receive rewards: {}", addr);
        }

        let server = Server::new(
            node_address,
            CENTRAL_NODE.to_string(),
            miner,
            chain,
            Arc::new(PlainLock),
        );

        let runtime = Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
        runtime.block_on(server.run())
    }
}

// Peer server
//
// One message per connection: the sender connects, writes a single serialized
// message, shuts down its write side, and the receiver answers over fresh
// connections of its own. The central node is the bootstrap point every new
// node announces itself to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use crate::consensus::ProofOfWork;
use crate::core::{Block, Hash256, Transaction};
use crate::storage::{Blockchain, UtxoIndex};
use crate::wallet::ProofSystem;

use super::message::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    NODE_VERSION, TxPayload, VersionPayload,
};

/// Default bootstrap address new nodes announce themselves to.
pub const CENTRAL_NODE: &str = "localhost:3000";

/// A miner waits for this many pooled transactions before starting.
const MIN_POOL_FOR_MINING: usize = 2;

pub struct Server {
    node_address: String,
    central_node: String,
    mining_address: Option<String>,
    chain: Blockchain,
    system: Arc<dyn ProofSystem + Send + Sync>,
    known_nodes: RwLock<Vec<String>>,
    blocks_in_transit: RwLock<Vec<Hash256>>,
    mempool: RwLock<HashMap<Hash256, Transaction>>,
    mining_interrupt: AtomicBool,
}

impl Server {
    pub fn new(
        node_address: String,
        central_node: String,
        mining_address: Option<String>,
        chain: Blockchain,
        system: Arc<dyn ProofSystem + Send + Sync>,
    ) -> Arc<Server> {
        Arc::new(Server {
            node_address,
            known_nodes: RwLock::new(vec![central_node.clone()]),
            central_node,
            mining_address,
            chain,
            system,
            blocks_in_transit: RwLock::new(Vec::new()),
            mempool: RwLock::new(HashMap::new()),
            mining_interrupt: AtomicBool::new(false),
        })
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Bind, announce to the central node, and serve until shut down.
    pub async fn run(self: Arc<Self>) -> Result<(), String> {
        let listener = TcpListener::bind(&self.node_address)
            .await
            .map_err(|e| format!("Failed to bind {}: {}", self.node_address, e))?;
        info!("Node listening on {}", self.node_address);

        if self.node_address != self.central_node {
            self.send_version(&self.central_node).await?;
        }

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("Accept failed: {}", e))?;

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    error!("Connection error: {}", e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) -> Result<(), String> {
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .await
            .map_err(|e| format!("Failed to read message: {}", e))?;

        let message = Message::deserialize(&data)?;
        info!("Received {} command", message.command());

        match message {
            Message::Version(p) => self.handle_version(p).await,
            Message::Addr(p) => self.handle_addr(p).await,
            Message::Block(p) => self.handle_block(p).await,
            Message::GetBlocks(p) => self.handle_get_blocks(p).await,
            Message::GetData(p) => self.handle_get_data(p).await,
            Message::Inv(p) => self.handle_inv(p).await,
            Message::Tx(p) => self.handle_tx(p).await,
        }
    }

    async fn handle_version(&self, payload: VersionPayload) -> Result<(), String> {
        let my_height = self.chain.get_best_height()?;

        if my_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await?;
        } else if my_height > payload.best_height {
            self.send_version(&payload.addr_from).await?;
        }

        let mut nodes = self.known_nodes.write().await;
        if !nodes.contains(&payload.addr_from) {
            nodes.push(payload.addr_from);
        }
        Ok(())
    }

    async fn handle_addr(&self, payload: AddrPayload) -> Result<(), String> {
        {
            let mut nodes = self.known_nodes.write().await;
            for addr in payload.addr_list {
                if !nodes.contains(&addr) {
                    nodes.push(addr);
                }
            }
            info!("There are {} known nodes now", nodes.len());
        }
        self.request_blocks().await
    }

    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<(), String> {
        let hashes = self.chain.get_block_hashes()?;
        self.send_inv(&payload.addr_from, InvKind::Block, hashes)
            .await
    }

    async fn handle_inv(&self, payload: InvPayload) -> Result<(), String> {
        info!(
            "Received inventory with {} {:?} item(s)",
            payload.items.len(),
            payload.kind
        );

        match payload.kind {
            InvKind::Block => {
                let Some(first) = payload.items.first().copied() else {
                    return Ok(());
                };
                {
                    let mut transit = self.blocks_in_transit.write().await;
                    *transit = payload.items;
                    transit.retain(|h| *h != first);
                }
                self.send_get_data(&payload.addr_from, InvKind::Block, first)
                    .await
            }
            InvKind::Tx => {
                let Some(txid) = payload.items.first().copied() else {
                    return Ok(());
                };
                let pooled = self.mempool.read().await.contains_key(&txid);
                if !pooled {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, txid)
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<(), String> {
        match payload.kind {
            InvKind::Block => {
                // an unknown digest is not an error, the peer may be ahead
                if let Some(block) = self.chain.get_block(&payload.id)? {
                    self.send_block(&payload.addr_from, &block).await?;
                }
            }
            InvKind::Tx => {
                let tx = self.mempool.read().await.get(&payload.id).cloned();
                if let Some(tx) = tx {
                    self.send_tx(&payload.addr_from, &tx).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_block(self: Arc<Self>, payload: BlockPayload) -> Result<(), String> {
        let block = Block::deserialize(&payload.block)?;

        if !ProofOfWork::new(&block).validate() {
            return Err(format!("Rejected block {} with invalid proof", block.hash));
        }

        let stored = self.chain.add_block(&block)?;
        if stored {
            info!("Added block {} at height {}", block.hash, block.height);
            // abort any in-progress mining round, its prev digest is stale
            self.mining_interrupt.store(true, Ordering::Relaxed);
        }

        let next = {
            let mut transit = self.blocks_in_transit.write().await;
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(hash) => {
                self.send_get_data(&payload.addr_from, InvKind::Block, hash)
                    .await
            }
            None => UtxoIndex::new(&self.chain)?.reindex(),
        }
    }

    async fn handle_tx(self: Arc<Self>, payload: TxPayload) -> Result<(), String> {
        let tx = Transaction::deserialize(&payload.transaction)?;
        let txid = tx.id;
        self.mempool.write().await.insert(txid, tx);

        if self.node_address == self.central_node {
            // relay to everyone except the origin
            let nodes = self.known_nodes.read().await.clone();
            for node in nodes {
                if node != self.node_address && node != payload.addr_from {
                    self.send_inv(&node, InvKind::Tx, vec![txid]).await?;
                }
            }
            return Ok(());
        }

        if self.mining_address.is_some() {
            self.mine_from_pool().await?;
        }
        Ok(())
    }

    /// Drain the mempool into blocks while enough valid transactions remain.
    async fn mine_from_pool(self: Arc<Self>) -> Result<(), String> {
        let miner = self
            .mining_address
            .clone()
            .ok_or_else(|| "Not a mining node".to_string())?;

        // the threshold gates entry only; once mining has started, pending
        // transactions keep the loop going until the pool drains
        if self.mempool.read().await.len() < MIN_POOL_FOR_MINING {
            return Ok(());
        }

        loop {
            let pooled: Vec<Transaction> = self.mempool.read().await.values().cloned().collect();

            let mut txs = Vec::new();
            for tx in pooled {
                if self.chain.verify_transaction(&tx, self.system.as_ref())? {
                    txs.push(tx);
                }
            }
            if txs.is_empty() {
                info!("All transactions are invalid! Waiting for new ones...");
                return Ok(());
            }

            let coinbase = Transaction::new_coinbase(&miner, "", self.system.as_ref())?;
            txs.push(coinbase);

            let tip = self.chain.tip()?;
            let height = self.chain.get_best_height()? + 1;

            self.mining_interrupt.store(false, Ordering::Relaxed);
            let server = Arc::clone(&self);
            let mined = tokio::task::spawn_blocking(move || {
                Block::try_new(txs, tip, height, &server.mining_interrupt)
            })
            .await
            .map_err(|e| format!("Mining task failed: {}", e))?;

            let Some(block) = mined else {
                // a peer's block landed mid-round, retry over the new tip
                continue;
            };

            self.chain.add_block(&block)?;
            UtxoIndex::new(&self.chain)?.update(&block)?;
            info!("Mined block {} at height {}", block.hash, block.height);

            {
                let mut pool = self.mempool.write().await;
                for tx in &block.transactions {
                    pool.remove(&tx.id);
                }
            }

            let nodes = self.known_nodes.read().await.clone();
            for node in nodes {
                if node != self.node_address {
                    self.send_inv(&node, InvKind::Block, vec![block.hash])
                        .await?;
                }
            }

            if self.mempool.read().await.is_empty() {
                return Ok(());
            }
        }
    }

    async fn request_blocks(&self) -> Result<(), String> {
        let nodes = self.known_nodes.read().await.clone();
        for node in nodes {
            if node != self.node_address {
                self.send_get_blocks(&node).await?;
            }
        }
        Ok(())
    }

    async fn send_version(&self, addr: &str) -> Result<(), String> {
        let message = Message::Version(VersionPayload {
            version: NODE_VERSION,
            best_height: self.chain.get_best_height()?,
            addr_from: self.node_address.clone(),
        });
        self.send_data(addr, &message.serialize()).await
    }

    async fn send_get_blocks(&self, addr: &str) -> Result<(), String> {
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.node_address.clone(),
        });
        self.send_data(addr, &message.serialize()).await
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Hash256>) -> Result<(), String> {
        let message = Message::Inv(InvPayload {
            addr_from: self.node_address.clone(),
            kind,
            items,
        });
        self.send_data(addr, &message.serialize()).await
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Hash256) -> Result<(), String> {
        let message = Message::GetData(GetDataPayload {
            addr_from: self.node_address.clone(),
            kind,
            id,
        });
        self.send_data(addr, &message.serialize()).await
    }

    async fn send_block(&self, addr: &str, block: &Block) -> Result<(), String> {
        let message = Message::Block(BlockPayload {
            addr_from: self.node_address.clone(),
            block: block.serialize(),
        });
        self.send_data(addr, &message.serialize()).await
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<(), String> {
        let message = Message::Tx(TxPayload {
            addr_from: self.node_address.clone(),
            transaction: tx.serialize(),
        });
        self.send_data(addr, &message.serialize()).await
    }

    /// Deliver raw bytes to a peer, dropping the peer from the node list when
    /// it is unreachable.
    async fn send_data(&self, addr: &str, data: &[u8]) -> Result<(), String> {
        if addr == self.node_address {
            return Ok(());
        }

        let mut stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Peer {} is unavailable: {}", addr, e);
                self.known_nodes.write().await.retain(|n| n != addr);
                return Ok(());
            }
        };

        stream
            .write_all(data)
            .await
            .map_err(|e| format!("Failed to send to {}: {}", addr, e))?;
        stream
            .shutdown()
            .await
            .map_err(|e| format!("Failed to close connection to {}: {}", addr, e))
    }
}

/// Hand a signed transaction to a node, typically the central one.
pub async fn submit_tx(addr: &str, from_addr: &str, tx: &Transaction) -> Result<(), String> {
    let message = Message::Tx(TxPayload {
        addr_from: from_addr.to_string(),
        transaction: tx.serialize(),
    });

    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| format!("Failed to connect to {}: {}", addr, e))?;
    stream
        .write_all(&message.serialize())
        .await
        .map_err(|e| format!("Failed to send to {}: {}", addr, e))?;
    stream
        .shutdown()
        .await
        .map_err(|e| format!("Failed to close connection to {}: {}", addr, e))
}

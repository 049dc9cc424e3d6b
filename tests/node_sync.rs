// A fresh node pointed at a central node with a longer chain should pull
// every block and end up at the same best height.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use toychain::core::{Block, Hash256, Transaction};
use toychain::network::message::BlockPayload;
use toychain::network::{Message, Server, submit_tx};
use toychain::storage::{Blockchain, UtxoIndex};
use toychain::wallet::PlainLock;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("toychain_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_node_downloads_chain_from_central() {
    let central_addr = "localhost:3456".to_string();
    let fresh_addr = "localhost:3457".to_string();

    let coinbase = Transaction::new_coinbase("alice", "", &PlainLock).unwrap();
    let central_chain = Blockchain::create(temp_dir("central"), coinbase).unwrap();
    for _ in 0..2 {
        let cb = Transaction::new_coinbase("alice", "", &PlainLock).unwrap();
        central_chain.mine_block(vec![cb], &PlainLock).unwrap();
    }
    assert_eq!(central_chain.get_best_height().unwrap(), 2);

    let coinbase = Transaction::new_coinbase("bob", "", &PlainLock).unwrap();
    let fresh_chain = Blockchain::create(temp_dir("fresh"), coinbase).unwrap();
    assert_eq!(fresh_chain.get_best_height().unwrap(), 0);

    let central = Server::new(
        central_addr.clone(),
        central_addr.clone(),
        None,
        central_chain,
        Arc::new(PlainLock),
    );
    let fresh = Server::new(
        fresh_addr,
        central_addr,
        None,
        fresh_chain,
        Arc::new(PlainLock),
    );

    let central_run = Arc::clone(&central);
    tokio::spawn(async move {
        let _ = central_run.run().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fresh_run = Arc::clone(&fresh);
    tokio::spawn(async move {
        let _ = fresh_run.run().await;
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if fresh.chain().get_best_height().unwrap() == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "node never caught up to height 2");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forged_block_without_proof_is_rejected() {
    let coinbase = Transaction::new_coinbase("alice", "", &PlainLock).unwrap();
    let chain = Blockchain::memory(coinbase).unwrap();
    let tip_before = chain.tip().unwrap();

    let node_addr = "localhost:3458".to_string();
    let server = Server::new(
        node_addr.clone(),
        node_addr.clone(),
        None,
        chain,
        Arc::new(PlainLock),
    );
    let run = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = run.run().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // zero back-link, arbitrary hash, tall claimed height, no nonce search
    let forged = Block {
        timestamp: 0,
        transactions: Vec::new(),
        prev_block_hash: Hash256::zero(),
        hash: Hash256::new([0xab; 32]),
        nonce: 0,
        height: 99,
    };
    let message = Message::Block(BlockPayload {
        addr_from: "localhost:9999".to_string(),
        block: forged.serialize(),
    });
    let mut stream = TcpStream::connect(&node_addr).await.unwrap();
    stream.write_all(&message.serialize()).await.unwrap();
    stream.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.chain().tip().unwrap(), tip_before);
    assert_eq!(server.chain().get_best_height().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn miner_mines_pooled_transactions_once_threshold_met() {
    let coinbase = Transaction::new_coinbase("alice", "", &PlainLock).unwrap();
    let chain = Blockchain::memory(coinbase).unwrap();
    let cb = Transaction::new_coinbase("dave", "", &PlainLock).unwrap();
    chain.mine_block(vec![cb], &PlainLock).unwrap();

    let (tx1, tx2) = {
        let utxo = UtxoIndex::new(&chain).unwrap();
        utxo.reindex().unwrap();
        let tx1 = Transaction::new_utxo_transaction("alice", "bob", 2, &utxo, &PlainLock).unwrap();
        let tx2 = Transaction::new_utxo_transaction("dave", "carol", 3, &utxo, &PlainLock).unwrap();
        (tx1, tx2)
    };

    let node_addr = "localhost:3460".to_string();
    let server = Server::new(
        node_addr.clone(),
        "localhost:3461".to_string(),
        Some("miner".to_string()),
        chain,
        Arc::new(PlainLock),
    );
    let run = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = run.run().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    submit_tx(&node_addr, "localhost:9999", &tx1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // duplicate submission of the same transaction
    submit_tx(&node_addr, "localhost:9999", &tx1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    submit_tx(&node_addr, "localhost:9999", &tx2).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if server.chain().get_best_height().unwrap() >= 2 {
            break;
        }
        assert!(Instant::now() < deadline, "miner never produced a block");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // both transfers landed, the duplicate exactly once
    let mut tx1_count = 0;
    for block in server.chain().iter().unwrap() {
        for tx in block.unwrap().transactions {
            if tx.id == tx1.id {
                tx1_count += 1;
            }
        }
    }
    assert_eq!(tx1_count, 1);
    assert!(server.chain().find_transaction(&tx2.id).unwrap().is_some());
}

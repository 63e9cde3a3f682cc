/// Shared mock backends for integration tests
use async_trait::async_trait;
use ledger_atlas::genesis::GenesisTransactions;
use ledger_atlas::pool::connector::{LedgerConnector, LedgerRequest, LedgerTransport, NodeHandle};
use ledger_atlas::pool::LedgerPoolConfig;
use ledger_atlas::proof::ProofCrypto;
use ledger_atlas::{LedgerEntryConfig, VdrConfig, VdrError, VdrResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn sample_genesis() -> String {
    [
        r#"{"txn":{"data":{"data":{"alias":"Node1","client_ip":"127.0.0.1","client_port":9702},"dest":"Gw6pDLhcBcoQesN72qfotTgFa7cbuqZpkX3Xo6pLhPhv"},"type":"0"}}"#,
        r#"{"txn":{"data":{"data":{"alias":"Node2","client_ip":"127.0.0.1","client_port":9704},"dest":"8ECVSk179mjsjKRLWiQtssMLgp6EPhWXtaYyStWPSGAb"},"type":"0"}}"#,
    ]
    .join("\n")
}

/// Connector that hands out handles without touching the network
#[derive(Default)]
pub struct MockConnector {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

#[async_trait]
impl LedgerConnector for MockConnector {
    async fn open(
        &self,
        config: &LedgerPoolConfig,
        genesis: &GenesisTransactions,
    ) -> VdrResult<NodeHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(NodeHandle {
            pool_name: config.name.clone(),
            endpoints: genesis.node_endpoints(),
            client: reqwest::Client::new(),
        })
    }

    async fn close(&self, _handle: &NodeHandle) -> VdrResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport returning canned replies keyed by pool name, with optional
/// per-pool artificial latency
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, Value>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reply(&self, pool_name: &str, reply: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert(pool_name.to_string(), reply);
    }

    pub fn set_delay(&self, pool_name: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(pool_name.to_string(), delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerTransport for MockTransport {
    async fn submit(&self, handle: &NodeHandle, _request: &LedgerRequest) -> VdrResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&handle.pool_name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().get(&handle.pool_name).cloned();
        match reply {
            Some(reply) => Ok(reply),
            None => Err(VdrError::Transport(format!(
                "No canned reply for pool {}",
                handle.pool_name
            ))),
        }
    }
}

/// Accepts every structurally-valid proof
pub struct AcceptAllCrypto;

impl ProofCrypto for AcceptAllCrypto {
    fn verify_trie_proof(&self, _: &[u8], _: &[u8], _: Option<&[u8]>, _: &[u8]) -> bool {
        true
    }
}

/// Rejects every proof
pub struct RejectAllCrypto;

impl ProofCrypto for RejectAllCrypto {
    fn verify_trie_proof(&self, _: &[u8], _: &[u8], _: Option<&[u8]>, _: &[u8]) -> bool {
        false
    }
}

/// A DID whose identifier derives from its verkey's leading 16 bytes
pub fn self_certified_pair(seed: u8) -> (String, String) {
    let verkey_bytes: Vec<u8> = (0..32).map(|i| i ^ seed).collect();
    let did = bs58::encode(&verkey_bytes[..16]).into_string();
    let verkey = bs58::encode(&verkey_bytes).into_string();
    (did, verkey)
}

/// A DID with no derivation relationship to its verkey
pub fn endorsed_pair(seed: u8) -> (String, String) {
    let did = bs58::encode([seed; 16]).into_string();
    let verkey = bs58::encode([seed.wrapping_add(100); 32]).into_string();
    (did, verkey)
}

/// A verified-lookup REPLY carrying a nym record and state proof
pub fn nym_reply(did: &str, verkey: &str) -> Value {
    let data = json!({"dest": did, "verkey": verkey, "role": "0"}).to_string();
    json!({
        "op": "REPLY",
        "result": {
            "data": data,
            "dest": did,
            "seqNo": 18,
            "txnTime": 1585218937,
            "state_proof": {
                "root_hash": "7Wdj3rrMCZ1R1M78H4xK5jxikmdUUGW2kbfJQ1HoEpK",
                "proof_nodes": "K0JDWURMWStM",
                "multi_signature": {}
            },
            "reqSignature": {}
        }
    })
}

/// A REPLY with no record on the ledger
pub fn not_found_reply(did: &str) -> Value {
    json!({
        "op": "REPLY",
        "result": {"data": null, "dest": did, "seqNo": null, "reqSignature": {}}
    })
}

pub fn reqnack_reply() -> Value {
    json!({"op": "REQNACK", "reason": "client request invalid"})
}

pub fn ledger_entry(id: &str, pool_name: &str, production: bool, keepalive: u64) -> LedgerEntryConfig {
    LedgerEntryConfig {
        id: id.to_string(),
        pool_name: pool_name.to_string(),
        is_production: production,
        is_write: false,
        genesis_transactions: Some(sample_genesis()),
        keepalive,
        read_only: false,
        socks_proxy: None,
        endorser_did: None,
        endorser_alias: None,
    }
}

pub fn test_config(ledgers: Vec<LedgerEntryConfig>) -> VdrConfig {
    VdrConfig {
        ledgers,
        genesis_dir: PathBuf::from("/nonexistent"),
        cache_ttl_secs: 60,
        lookup_timeout_secs: 10,
        fanout_workers: 5,
    }
}

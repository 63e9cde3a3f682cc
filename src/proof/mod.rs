/// State-proof verification of ledger read replies
///
/// A single node's reply is only trusted if the value it claims can be
/// re-derived from the proof path it ships, against the state root the
/// reply itself asserts was current. The trie hashing and node decoding
/// live behind [`ProofCrypto`]; this module owns the protocol contract:
/// what gets extracted from the envelope, what gets handed to the crypto
/// backend, and the rule that malformed input is a quiet `false`, never an
/// error.
use crate::metrics;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

pub const OP_REPLY: &str = "REPLY";
pub const OP_REQNACK: &str = "REQNACK";
pub const OP_REJECT: &str = "REJECT";

/// Ledger read reply envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyEnvelope {
    pub op: String,
    #[serde(default)]
    pub result: Option<ReplyResult>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyResult {
    /// JSON-encoded record payload; absent when the ledger has no record
    #[serde(default)]
    pub data: Option<String>,
    /// Identifier the lookup was keyed by
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default, rename = "seqNo")]
    pub seq_no: Option<u64>,
    #[serde(default, rename = "txnTime")]
    pub txn_time: Option<u64>,
    #[serde(default)]
    pub state_proof: Option<StateProof>,
    #[serde(default, rename = "reqSignature")]
    pub req_signature: Option<Value>,
}

/// Proof block accompanying a read reply
#[derive(Debug, Clone, Deserialize)]
pub struct StateProof {
    /// Base58-encoded state root the reply asserts
    pub root_hash: String,
    /// Base64-encoded serialized trie proof path
    pub proof_nodes: String,
    #[serde(default)]
    pub multi_signature: Option<Value>,
}

impl ReplyEnvelope {
    /// Whether the reply carries a record at all. A REQNACK/REJECT op or
    /// absent `result.data` means "not found on this ledger", which is not
    /// an error for resolution purposes.
    pub fn has_record(&self) -> bool {
        self.op == OP_REPLY
            && self
                .result
                .as_ref()
                .map(|r| r.data.is_some())
                .unwrap_or(false)
    }
}

/// External trie-verification boundary.
///
/// Implementations recompute the expected root from the serialized proof
/// path and the claimed key/value binding. Hashing primitives and trie node
/// decoding are entirely the implementation's concern.
pub trait ProofCrypto: Send + Sync {
    fn verify_trie_proof(
        &self,
        expected_root: &[u8],
        key: &[u8],
        value: Option<&[u8]>,
        proof_nodes: &[u8],
    ) -> bool;
}

/// Verifies read replies against their own asserted state commitment
#[derive(Clone)]
pub struct StateProofVerifier {
    crypto: Arc<dyn ProofCrypto>,
}

impl StateProofVerifier {
    pub fn new(crypto: Arc<dyn ProofCrypto>) -> Self {
        Self { crypto }
    }

    /// Verify a raw reply. Returns `false` on any malformed or missing
    /// component; callers must treat that identically to "no answer".
    pub fn verify_reply(&self, raw: &Value) -> bool {
        let envelope: ReplyEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Unparseable reply envelope: {}", e);
                return false;
            }
        };
        self.verify_envelope(&envelope)
    }

    /// Verify an already-decoded reply envelope
    pub fn verify_envelope(&self, envelope: &ReplyEnvelope) -> bool {
        let verified = self.check_envelope(envelope);
        let label = if verified { "ok" } else { "failed" };
        metrics::PROOF_VERIFICATIONS_TOTAL
            .with_label_values(&[label])
            .inc();
        verified
    }

    fn check_envelope(&self, envelope: &ReplyEnvelope) -> bool {
        if envelope.op != OP_REPLY {
            debug!(op = %envelope.op, "Not a REPLY, nothing to verify");
            return false;
        }
        let result = match &envelope.result {
            Some(result) => result,
            None => {
                warn!("REPLY without result");
                return false;
            }
        };
        let dest = match &result.dest {
            Some(dest) => dest,
            None => {
                warn!("REPLY without dest, cannot derive state key");
                return false;
            }
        };
        let proof = match &result.state_proof {
            Some(proof) => proof,
            None => {
                warn!(dest = %dest, "REPLY without state proof");
                return false;
            }
        };

        let root = match bs58::decode(&proof.root_hash).into_vec() {
            Ok(root) => root,
            Err(e) => {
                warn!(dest = %dest, "Undecodable root hash: {}", e);
                return false;
            }
        };
        let nodes = match base64::engine::general_purpose::STANDARD.decode(&proof.proof_nodes) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(dest = %dest, "Undecodable proof nodes: {}", e);
                return false;
            }
        };

        let key = trie_key(dest);
        let value = result.data.as_deref().map(str::as_bytes);
        let verified = self
            .crypto
            .verify_trie_proof(&root, key.as_bytes(), value, &nodes);
        if !verified {
            warn!(dest = %dest, "State proof did not verify against asserted root");
        }
        verified
    }
}

/// Committed-state trie key for a nym record: hex-encoded SHA-256 of the
/// bare identifier.
pub fn trie_key(dest: &str) -> String {
    hex::encode(Sha256::digest(dest.as_bytes()))
}

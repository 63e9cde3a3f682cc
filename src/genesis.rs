/// Genesis transaction loading and parsing
///
/// Every pool bootstraps from its network's genesis transactions: one JSON
/// node record per line, carrying the validator alias and client endpoint.
/// The blob is either supplied inline by configuration or read lazily from
/// a well-known path keyed by the pool name.
use crate::error::{VdrError, VdrResult};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A single validator node record from the genesis file
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub alias: String,
    /// Node verification key (transaction `dest`)
    pub dest: String,
    pub client_ip: Option<String>,
    pub client_port: Option<u16>,
}

impl NodeRecord {
    /// Client endpoint for read requests, when the record carries one
    pub fn client_endpoint(&self) -> Option<String> {
        match (&self.client_ip, self.client_port) {
            (Some(ip), Some(port)) => Some(format!("http://{}:{}", ip, port)),
            _ => None,
        }
    }
}

/// Parsed genesis transactions for one ledger network
#[derive(Debug, Clone)]
pub struct GenesisTransactions {
    pub nodes: Vec<NodeRecord>,
}

impl GenesisTransactions {
    /// Parse an inline genesis blob (one JSON transaction per line)
    pub fn from_inline(blob: &str) -> VdrResult<Self> {
        let mut nodes = Vec::new();
        let mut aliases = std::collections::HashSet::new();

        for (lineno, line) in blob.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let txn: Value = serde_json::from_str(line).map_err(|e| {
                VdrError::PoolConfig(format!(
                    "Genesis line {} is not valid JSON: {}",
                    lineno + 1,
                    e
                ))
            })?;

            let data = &txn["txn"]["data"];
            let alias = data["data"]["alias"]
                .as_str()
                .ok_or_else(|| {
                    VdrError::PoolConfig(format!("Genesis line {} has no node alias", lineno + 1))
                })?
                .to_string();
            let dest = data["dest"]
                .as_str()
                .ok_or_else(|| {
                    VdrError::PoolConfig(format!("Genesis line {} has no node dest", lineno + 1))
                })?
                .to_string();

            if !aliases.insert(alias.clone()) {
                return Err(VdrError::PoolConfig(format!(
                    "Duplicate node alias in genesis: {}",
                    alias
                )));
            }

            let client_ip = data["data"]["client_ip"].as_str().map(str::to_string);
            let client_port = data["data"]["client_port"].as_u64().map(|p| p as u16);

            nodes.push(NodeRecord {
                alias,
                dest,
                client_ip,
                client_port,
            });
        }

        if nodes.is_empty() {
            return Err(VdrError::PoolConfig(
                "Genesis transactions contain no node records".to_string(),
            ));
        }

        Ok(Self { nodes })
    }

    /// Resolve genesis transactions for a pool: an inline blob wins,
    /// otherwise the well-known `<genesis_dir>/<pool_name>.genesis` file is
    /// read. Neither being available is a configuration error and is raised
    /// before any network activity.
    pub async fn resolve(
        pool_name: &str,
        inline: Option<&str>,
        genesis_dir: &Path,
    ) -> VdrResult<Self> {
        if let Some(blob) = inline {
            return Self::from_inline(blob);
        }

        let path = genesis_dir.join(format!("{}.genesis", pool_name));
        if !path.exists() {
            return Err(VdrError::PoolConfig(format!(
                "No genesis transactions for pool {}: not configured inline and {} does not exist",
                pool_name,
                path.display()
            )));
        }

        let blob = tokio::fs::read_to_string(&path).await?;
        debug!(pool = pool_name, path = %path.display(), "Loaded genesis transactions");
        Self::from_inline(&blob)
    }

    /// Client endpoints of all nodes that advertise one, in genesis order
    pub fn node_endpoints(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(NodeRecord::client_endpoint)
            .collect()
    }
}

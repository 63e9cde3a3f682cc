/// Ledger node connection and transport backends
///
/// The pool itself only manages lifetimes; actually opening a connection to
/// a ledger network and submitting read requests over it are backend
/// concerns behind these traits, so tests and alternative client stacks can
/// swap them out.
use crate::error::{VdrError, VdrResult};
use crate::genesis::GenesisTransactions;
use crate::pool::LedgerPoolConfig;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An open connection to one ledger network
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub pool_name: String,
    /// Client endpoints of the network's validator nodes, genesis order
    pub endpoints: Vec<String>,
    pub client: reqwest::Client,
}

/// Opens and closes network connections for a pool
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn open(
        &self,
        config: &LedgerPoolConfig,
        genesis: &GenesisTransactions,
    ) -> VdrResult<NodeHandle>;

    async fn close(&self, handle: &NodeHandle) -> VdrResult<()>;
}

/// Submits read requests over an open connection
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Submit a request and return the raw reply envelope
    async fn submit(&self, handle: &NodeHandle, request: &LedgerRequest) -> VdrResult<Value>;
}

/// A ledger read request in the network's wire form
#[derive(Debug, Clone, Serialize)]
pub struct LedgerRequest {
    #[serde(rename = "submitterDID")]
    pub submitter_did: Option<String>,
    pub operation: LedgerOperation,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerOperation {
    #[serde(rename = "type")]
    pub txn_type: String,
    /// Bare identifier, no `did:` prefix
    pub dest: String,
}

/// GET_NYM transaction type
pub const TXN_TYPE_GET_NYM: &str = "105";

impl LedgerRequest {
    /// Build a GET_NYM lookup for a bare nym identifier
    pub fn get_nym(submitter_did: Option<&str>, dest: &str) -> Self {
        Self {
            submitter_did: submitter_did.map(str::to_string),
            operation: LedgerOperation {
                txn_type: TXN_TYPE_GET_NYM.to_string(),
                dest: dest.to_string(),
            },
        }
    }
}

/// HTTP-based connector: one `reqwest::Client` per pool, honoring the
/// pool's SOCKS proxy configuration.
#[derive(Debug, Default)]
pub struct HttpLedgerConnector;

#[async_trait]
impl LedgerConnector for HttpLedgerConnector {
    async fn open(
        &self,
        config: &LedgerPoolConfig,
        genesis: &GenesisTransactions,
    ) -> VdrResult<NodeHandle> {
        let endpoints = genesis.node_endpoints();
        if endpoints.is_empty() {
            return Err(VdrError::PoolOpen(format!(
                "Pool {} genesis advertises no client endpoints",
                config.name
            )));
        }

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = &config.socks_proxy {
            let proxy_url = if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("socks5://{}", proxy)
            };
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| VdrError::PoolOpen(format!("Invalid SOCKS proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| VdrError::PoolOpen(format!("Failed to build HTTP client: {}", e)))?;

        debug!(
            pool = %config.name,
            nodes = endpoints.len(),
            "Opened ledger connection"
        );

        Ok(NodeHandle {
            pool_name: config.name.clone(),
            endpoints,
            client,
        })
    }

    async fn close(&self, handle: &NodeHandle) -> VdrResult<()> {
        debug!(pool = %handle.pool_name, "Closed ledger connection");
        Ok(())
    }
}

/// HTTP transport: tries the pool's nodes one by one from a random starting
/// offset, so read load spreads across validators.
#[derive(Debug, Default)]
pub struct HttpLedgerTransport;

#[async_trait]
impl LedgerTransport for HttpLedgerTransport {
    async fn submit(&self, handle: &NodeHandle, request: &LedgerRequest) -> VdrResult<Value> {
        if handle.endpoints.is_empty() {
            return Err(VdrError::Transport(format!(
                "Pool {} has no node endpoints",
                handle.pool_name
            )));
        }

        let start = rand::thread_rng().gen_range(0..handle.endpoints.len());
        let mut last_err = String::new();

        for i in 0..handle.endpoints.len() {
            let endpoint = &handle.endpoints[(start + i) % handle.endpoints.len()];
            match handle.client.post(endpoint).json(request).send().await {
                Ok(response) => match response.json::<Value>().await {
                    Ok(reply) => return Ok(reply),
                    Err(e) => {
                        warn!(pool = %handle.pool_name, node = %endpoint, "Unparseable reply: {}", e);
                        last_err = e.to_string();
                    }
                },
                Err(e) => {
                    warn!(pool = %handle.pool_name, node = %endpoint, "Node request failed: {}", e);
                    last_err = e.to_string();
                }
            }
        }

        Err(VdrError::Transport(format!(
            "All {} nodes of pool {} failed, last error: {}",
            handle.endpoints.len(),
            handle.pool_name,
            last_err
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_nym_wire_form() {
        let request = LedgerRequest::get_nym(None, "V4SGRU86Z58d6TV7PBUe6f");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["submitterDID"], Value::Null);
        assert_eq!(json["operation"]["type"], "105");
        assert_eq!(json["operation"]["dest"], "V4SGRU86Z58d6TV7PBUe6f");
    }

    #[test]
    fn test_get_nym_with_submitter() {
        let request = LedgerRequest::get_nym(Some("LnXR1rPnncTPZvRdmJKhJQ"), "V4SGRU86Z58d6TV7PBUe6f");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["submitterDID"], "LnXR1rPnncTPZvRdmJKhJQ");
    }
}

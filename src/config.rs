/// Configuration management for the ledger-atlas resolution layer
use crate::error::{VdrError, VdrResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// One configured ledger network, as handed over wholesale by the
/// surrounding agent's CLI/config layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryConfig {
    /// Registry id of the ledger (unique across the configuration)
    pub id: String,
    /// Pool name, also the key for well-known genesis file lookup
    pub pool_name: String,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default)]
    pub is_write: bool,
    /// Inline genesis transactions blob; when absent the pool loads
    /// `<genesis_dir>/<pool_name>.genesis` lazily on first open
    #[serde(default)]
    pub genesis_transactions: Option<String>,
    /// Seconds to keep an idle connection open (0 closes immediately)
    #[serde(default)]
    pub keepalive: u64,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub socks_proxy: Option<String>,
    #[serde(default)]
    pub endorser_did: Option<String>,
    #[serde(default)]
    pub endorser_alias: Option<String>,
}

/// Top-level resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdrConfig {
    pub ledgers: Vec<LedgerEntryConfig>,
    /// Root directory for well-known genesis files keyed by pool name
    pub genesis_dir: PathBuf,
    /// TTL applied to cached DID-to-ledger resolutions
    pub cache_ttl_secs: u64,
    /// Per-ledger lookup timeout during fan-out
    pub lookup_timeout_secs: u64,
    /// Bound on concurrently executing fan-out tasks
    pub fanout_workers: usize,
}

impl Default for VdrConfig {
    fn default() -> Self {
        Self {
            ledgers: Vec::new(),
            genesis_dir: PathBuf::from("./genesis"),
            cache_ttl_secs: 3600,
            lookup_timeout_secs: 10,
            fanout_workers: 5,
        }
    }
}

impl VdrConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> VdrResult<Self> {
        dotenv::dotenv().ok();

        let genesis_dir: PathBuf = env::var("ATLAS_GENESIS_DIR")
            .unwrap_or_else(|_| "./genesis".to_string())
            .into();
        let cache_ttl_secs = env::var("ATLAS_CACHE_TTL")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let lookup_timeout_secs = env::var("ATLAS_LOOKUP_TIMEOUT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let fanout_workers = env::var("ATLAS_FANOUT_WORKERS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        // Ledger entries come from a JSON file handed down by the agent's
        // config layer; an unset variable means "no ledgers yet" and a later
        // update_ledger_config call supplies them.
        let ledgers = match env::var("ATLAS_LEDGER_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    VdrError::Validation(format!("Cannot read ledger config {}: {}", path, e))
                })?;
                Self::ledgers_from_json(&raw)?
            }
            Err(_) => Vec::new(),
        };

        let config = Self {
            ledgers,
            genesis_dir,
            cache_ttl_secs,
            lookup_timeout_secs,
            fanout_workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON array of ledger entries
    pub fn ledgers_from_json(raw: &str) -> VdrResult<Vec<LedgerEntryConfig>> {
        serde_json::from_str(raw)
            .map_err(|e| VdrError::Validation(format!("Invalid ledger config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> VdrResult<()> {
        validate_ledger_entries(&self.ledgers)?;
        if self.fanout_workers == 0 {
            return Err(VdrError::Validation(
                "fanout_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a ledger entry list: ids must be non-empty and unique, and at
/// most one entry may be designated the write ledger.
pub fn validate_ledger_entries(entries: &[LedgerEntryConfig]) -> VdrResult<()> {
    let mut seen = std::collections::HashSet::new();
    let mut write_count = 0usize;
    for entry in entries {
        if entry.id.is_empty() {
            return Err(VdrError::Validation(
                "Ledger id cannot be empty".to_string(),
            ));
        }
        if entry.pool_name.is_empty() {
            return Err(VdrError::Validation(format!(
                "Ledger {} has an empty pool name",
                entry.id
            )));
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(VdrError::Validation(format!(
                "Duplicate ledger id: {}",
                entry.id
            )));
        }
        if entry.is_write {
            write_count += 1;
        }
    }
    if write_count > 1 {
        return Err(VdrError::Validation(
            "More than one ledger is designated as the write ledger".to_string(),
        ));
    }
    Ok(())
}

/// Ledger registry: the ordered, partitioned collection of configured pools
///
/// The registry is replaced wholesale on reconfiguration. Readers take an
/// `Arc` snapshot, so in-flight lookups keep working against the descriptors
/// that were live when they started, unaffected by a concurrent swap.
use crate::config::{validate_ledger_entries, LedgerEntryConfig};
use crate::error::{VdrError, VdrResult};
use crate::pool::connector::LedgerConnector;
use crate::pool::{LedgerPool, LedgerPoolConfig};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Immutable identity of one configured ledger, bound to its pool.
/// Superseded, never mutated, when the registry is rebuilt.
#[derive(Clone)]
pub struct LedgerDescriptor {
    pub id: String,
    pub pool: Arc<LedgerPool>,
    pub is_production: bool,
    pub is_write: bool,
    pub endorser_did: Option<String>,
    pub endorser_alias: Option<String>,
    /// Position in the configured entry list; the arbitration tie-break key
    pub index: usize,
}

/// One immutable generation of the registry
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    pub production: Vec<Arc<LedgerDescriptor>>,
    pub non_production: Vec<Arc<LedgerDescriptor>>,
    pub write_ledger_id: Option<String>,
}

impl RegistrySnapshot {
    /// Look up a descriptor by ledger id in either partition
    pub fn get(&self, id: &str) -> Option<Arc<LedgerDescriptor>> {
        self.production
            .iter()
            .chain(self.non_production.iter())
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All descriptors in original configured order
    pub fn all(&self) -> Vec<Arc<LedgerDescriptor>> {
        let mut all: Vec<Arc<LedgerDescriptor>> = self
            .production
            .iter()
            .chain(self.non_production.iter())
            .cloned()
            .collect();
        all.sort_by_key(|d| d.index);
        all
    }

    pub fn len(&self) -> usize {
        self.production.len() + self.non_production.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared registry handle with copy-on-write snapshots
pub struct LedgerRegistry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for LedgerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Current snapshot; a cheap Arc clone, never blocking writers for long
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    /// Designate the write ledger. The id must exist in either partition.
    pub fn set_write_ledger(&self, id: &str) -> VdrResult<()> {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        if !guard.contains(id) {
            return Err(VdrError::NotFound(format!("Unknown ledger id: {}", id)));
        }
        let mut next = (**guard).clone();
        next.write_ledger_id = Some(id.to_string());
        *guard = Arc::new(next);
        info!(ledger = id, "Write ledger set");
        Ok(())
    }

    /// Rebuild both partitions from scratch out of the given entries.
    ///
    /// Pools of persisting entries are matched by pool name and reused
    /// rather than reopened. Pools dropped from the new configuration are
    /// not closed here; their lifecycle stays governed by ref-counting
    /// alone, so an in-flight lookup holding one is never invalidated.
    pub fn rebuild(
        &self,
        entries: &[LedgerEntryConfig],
        connector: &Arc<dyn LedgerConnector>,
        genesis_dir: &Path,
    ) -> VdrResult<()> {
        validate_ledger_entries(entries)?;

        let previous = self.snapshot();
        let mut production = Vec::new();
        let mut non_production = Vec::new();
        let mut write_ledger_id = None;

        for (index, entry) in entries.iter().enumerate() {
            let pool = previous
                .all()
                .iter()
                .map(|d| &d.pool)
                .find(|p| p.name() == entry.pool_name)
                .cloned()
                .unwrap_or_else(|| {
                    debug!(pool = %entry.pool_name, "Creating pool");
                    Arc::new(LedgerPool::new(
                        LedgerPoolConfig {
                            name: entry.pool_name.clone(),
                            keepalive_secs: entry.keepalive,
                            read_only: entry.read_only,
                            genesis_transactions: entry.genesis_transactions.clone(),
                            genesis_dir: genesis_dir.to_path_buf(),
                            socks_proxy: entry.socks_proxy.clone(),
                        },
                        Arc::clone(connector),
                    ))
                });

            let descriptor = Arc::new(LedgerDescriptor {
                id: entry.id.clone(),
                pool,
                is_production: entry.is_production,
                is_write: entry.is_write,
                endorser_did: entry.endorser_did.clone(),
                endorser_alias: entry.endorser_alias.clone(),
                index,
            });

            if entry.is_write {
                write_ledger_id = Some(entry.id.clone());
            }
            if entry.is_production {
                production.push(descriptor);
            } else {
                non_production.push(descriptor);
            }
        }

        let next = Arc::new(RegistrySnapshot {
            production,
            non_production,
            write_ledger_id,
        });

        let mut guard = self.inner.write().expect("registry lock poisoned");
        info!(
            production = next.production.len(),
            non_production = next.non_production.len(),
            "Ledger registry rebuilt"
        );
        *guard = next;
        Ok(())
    }
}

/// Multi-ledger DID resolution
///
/// Orchestrates fan-out lookups across every configured ledger, verifies
/// each response against its own state commitment, arbitrates conflicting
/// answers by policy class, and writes winners through to the resolution
/// cache.
pub mod did;

use crate::cache::ResolutionCache;
use crate::config::{LedgerEntryConfig, VdrConfig};
use crate::error::{VdrError, VdrResult};
use crate::metrics;
use crate::pool::connector::{LedgerConnector, LedgerRequest, LedgerTransport};
use crate::pool::LedgerPool;
use crate::proof::{ProofCrypto, ReplyEnvelope, StateProofVerifier};
use crate::registry::{LedgerDescriptor, LedgerRegistry, RegistrySnapshot};
use did::{extract_did_from_identifier, is_self_certified, NymRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One verified answer from one ledger, consumed by arbitration
#[derive(Clone)]
pub struct DidLookupResult {
    pub ledger_id: String,
    pub pool: Arc<LedgerPool>,
    pub is_self_certified: bool,
}

struct RankedAnswer {
    result: DidLookupResult,
    is_production: bool,
    index: usize,
}

/// Orchestrates resolution across all configured ledger networks
pub struct MultiLedgerManager {
    registry: LedgerRegistry,
    connector: Arc<dyn LedgerConnector>,
    transport: Arc<dyn LedgerTransport>,
    verifier: StateProofVerifier,
    cache: Option<Arc<dyn ResolutionCache>>,
    cache_ttl: Duration,
    lookup_timeout: Duration,
    fanout_workers: usize,
    genesis_dir: PathBuf,
}

impl MultiLedgerManager {
    /// Build a manager from configuration and its injected collaborators
    pub fn new(
        config: &VdrConfig,
        connector: Arc<dyn LedgerConnector>,
        transport: Arc<dyn LedgerTransport>,
        crypto: Arc<dyn ProofCrypto>,
        cache: Option<Arc<dyn ResolutionCache>>,
    ) -> VdrResult<Self> {
        config.validate()?;

        let manager = Self {
            registry: LedgerRegistry::new(),
            connector,
            transport,
            verifier: StateProofVerifier::new(crypto),
            cache,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
            fanout_workers: config.fanout_workers,
            genesis_dir: config.genesis_dir.clone(),
        };
        if !config.ledgers.is_empty() {
            manager.update_ledger_config(&config.ledgers)?;
        }
        Ok(manager)
    }

    /// Replace the whole registry with the given entries. Pools that
    /// persist across the swap (matched by pool name) are reused, not
    /// reopened; pools dropped from the configuration are left to drain
    /// through their own ref-counting.
    pub fn update_ledger_config(&self, entries: &[LedgerEntryConfig]) -> VdrResult<()> {
        self.registry
            .rebuild(entries, &self.connector, &self.genesis_dir)
    }

    /// The ledger new transactions should be routed to: the designated
    /// write ledger if set, else the first production ledger in configured
    /// order, else the first non-production ledger.
    pub fn get_write_ledger(&self) -> VdrResult<(String, Arc<LedgerPool>)> {
        let snapshot = self.registry.snapshot();
        if let Some(id) = &snapshot.write_ledger_id {
            if let Some(descriptor) = snapshot.get(id) {
                return Ok((descriptor.id.clone(), descriptor.pool.clone()));
            }
        }
        snapshot
            .production
            .first()
            .or_else(|| snapshot.non_production.first())
            .map(|d| (d.id.clone(), d.pool.clone()))
            .ok_or_else(|| VdrError::NotFound("No ledger configured".to_string()))
    }

    /// Designate the write ledger
    pub fn set_write_ledger(&self, id: &str) -> VdrResult<()> {
        self.registry.set_write_ledger(id)
    }

    /// Direct registry lookup, no network I/O
    pub fn get_ledger_by_id(&self, id: &str) -> VdrResult<Arc<LedgerPool>> {
        self.registry
            .snapshot()
            .get(id)
            .map(|d| d.pool.clone())
            .ok_or_else(|| VdrError::NotFound(format!("Unknown ledger id: {}", id)))
    }

    /// Resolve a DID to the ledger holding its authoritative record.
    ///
    /// With `use_cache`, a cached binding is returned without network
    /// activity, after validating the cached ledger still exists in the
    /// registry; a stale binding is a `CacheInconsistency` error, never a
    /// silent re-resolution. Cancellation: dropping the returned future
    /// aborts all in-flight per-ledger tasks; acquired pools release
    /// through their guards.
    pub async fn lookup_did(
        &self,
        did: &str,
        use_cache: bool,
    ) -> VdrResult<(String, Arc<LedgerPool>)> {
        let snapshot = self.registry.snapshot();

        if use_cache {
            if let Some(cached) = self.cached_lookup(did, &snapshot).await? {
                return Ok(cached);
            }
        }

        let winner = self.resolve_across_ledgers(did, &snapshot, 0).await?;

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put_ledger_id(did, &winner.ledger_id, self.cache_ttl).await {
                    warn!(did, "Failed to cache resolution: {}", e);
                }
            }
        }

        Ok((winner.ledger_id, winner.pool))
    }

    /// Resolve a ledger-scoped object identifier (schema id, cred-def id,
    /// revocation-registry id or plain DID) to its ledger. Only descriptors
    /// at registry insertion index >= `min_supported_index` participate.
    pub async fn get_ledger_for_identifier(
        &self,
        identifier: &str,
        min_supported_index: usize,
    ) -> VdrResult<(String, Arc<LedgerPool>)> {
        let did = extract_did_from_identifier(identifier);
        let snapshot = self.registry.snapshot();
        let winner = self
            .resolve_across_ledgers(&did, &snapshot, min_supported_index)
            .await?;
        Ok((winner.ledger_id, winner.pool))
    }

    async fn cached_lookup(
        &self,
        did: &str,
        snapshot: &RegistrySnapshot,
    ) -> VdrResult<Option<(String, Arc<LedgerPool>)>> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return Ok(None),
        };

        match cache.get_ledger_id(did).await {
            Ok(Some(ledger_id)) => match snapshot.get(&ledger_id) {
                Some(descriptor) => {
                    metrics::CACHE_HITS_TOTAL.inc();
                    debug!(did, ledger = %ledger_id, "Resolved from cache");
                    Ok(Some((ledger_id, descriptor.pool.clone())))
                }
                None => {
                    metrics::CACHE_HITS_TOTAL.inc();
                    Err(VdrError::CacheInconsistency {
                        did: did.to_string(),
                        ledger_id,
                    })
                }
            },
            Ok(None) => {
                metrics::CACHE_MISSES_TOTAL.inc();
                Ok(None)
            }
            Err(e) => {
                // A broken cache backend degrades to a miss.
                warn!(did, "Cache read failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Fan out one verification task per descriptor and arbitrate the
    /// complete result set.
    async fn resolve_across_ledgers(
        &self,
        did: &str,
        snapshot: &RegistrySnapshot,
        min_index: usize,
    ) -> VdrResult<DidLookupResult> {
        let descriptors: Vec<Arc<LedgerDescriptor>> = snapshot
            .all()
            .into_iter()
            .filter(|d| d.index >= min_index)
            .collect();

        if descriptors.is_empty() {
            return Err(VdrError::NotFound("No ledger configured".to_string()));
        }

        let production_searched = descriptors.iter().filter(|d| d.is_production).count();
        let non_production_searched = descriptors.len() - production_searched;

        let timer = metrics::DID_LOOKUP_DURATION_SECONDS.start_timer();
        let semaphore = Arc::new(Semaphore::new(self.fanout_workers));
        let mut tasks: JoinSet<Option<RankedAnswer>> = JoinSet::new();

        for descriptor in descriptors {
            let semaphore = Arc::clone(&semaphore);
            let transport = Arc::clone(&self.transport);
            let verifier = self.verifier.clone();
            let did = did.to_string();
            let timeout = self.lookup_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match tokio::time::timeout(
                    timeout,
                    query_one_ledger(&descriptor, &did, transport, verifier),
                )
                .await
                {
                    Ok(answer) => answer,
                    Err(_) => {
                        warn!(did = %did, ledger = %descriptor.id, "Ledger lookup timed out");
                        None
                    }
                }
            });
        }

        // Arbitration only after every task settles: a lower-priority
        // ledger answering first must not win on timing.
        let mut answers = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(answer)) => answers.push(answer),
                Ok(None) => {}
                Err(e) if e.is_panic() => warn!("Ledger lookup task panicked: {}", e),
                Err(_) => {}
            }
        }
        timer.observe_duration();

        match arbitrate(answers) {
            Some(winner) => {
                metrics::DID_LOOKUPS_TOTAL.with_label_values(&["resolved"]).inc();
                info!(
                    did,
                    ledger = %winner.ledger_id,
                    self_certified = winner.is_self_certified,
                    "DID resolved"
                );
                Ok(winner)
            }
            None => {
                metrics::DID_LOOKUPS_TOTAL.with_label_values(&["not_found"]).inc();
                Err(VdrError::DidNotFound {
                    did: did.to_string(),
                    production_searched,
                    non_production_searched,
                })
            }
        }
    }
}

/// Query one ledger for the DID and classify a verified answer.
///
/// Every failure mode here (pool trouble, transport error, REQNACK/REJECT,
/// missing record, unverifiable proof, malformed payload) is a logged
/// non-answer; none of them may fail the surrounding lookup.
async fn query_one_ledger(
    descriptor: &LedgerDescriptor,
    did: &str,
    transport: Arc<dyn LedgerTransport>,
    verifier: StateProofVerifier,
) -> Option<RankedAnswer> {
    let guard = match Arc::clone(&descriptor.pool).acquire().await {
        Ok(guard) => guard,
        Err(e) => {
            warn!(ledger = %descriptor.id, "Could not acquire pool: {}", e);
            return None;
        }
    };

    let answer = query_open_pool(descriptor, did, &transport, &verifier, &guard).await;

    if let Err(e) = guard.release().await {
        // The reference is released regardless; a failed close only means
        // the connection may linger.
        warn!(ledger = %descriptor.id, "Pool release: {}", e);
    }

    answer.map(|is_self_certified| {
        metrics::LEDGER_ANSWERS_TOTAL
            .with_label_values(&[
                descriptor.id.as_str(),
                if is_self_certified { "self_certified" } else { "endorsed" },
            ])
            .inc();
        RankedAnswer {
            result: DidLookupResult {
                ledger_id: descriptor.id.clone(),
                pool: descriptor.pool.clone(),
                is_self_certified,
            },
            is_production: descriptor.is_production,
            index: descriptor.index,
        }
    })
}

async fn query_open_pool(
    descriptor: &LedgerDescriptor,
    did: &str,
    transport: &Arc<dyn LedgerTransport>,
    verifier: &StateProofVerifier,
    guard: &crate::pool::PoolGuard,
) -> Option<bool> {
    let request = LedgerRequest::get_nym(None, did);
    let raw = match transport.submit(guard.handle(), &request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(ledger = %descriptor.id, did, "Transport error: {}", e);
            return None;
        }
    };

    let envelope: ReplyEnvelope = match serde_json::from_value(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(ledger = %descriptor.id, did, "Unparseable reply: {}", e);
            return None;
        }
    };

    if !envelope.has_record() {
        debug!(ledger = %descriptor.id, did, "No record on this ledger");
        return None;
    }

    if !verifier.verify_envelope(&envelope) {
        warn!(ledger = %descriptor.id, did, "Reply failed state-proof verification");
        return None;
    }

    let data = envelope.result.as_ref()?.data.as_ref()?;
    let nym: NymRecord = match serde_json::from_str(data) {
        Ok(nym) => nym,
        Err(e) => {
            warn!(ledger = %descriptor.id, did, "Malformed nym record: {}", e);
            return None;
        }
    };

    Some(is_self_certified(&nym.dest, &nym.verkey))
}

/// Strict priority over the four `(production, self-certified)` buckets;
/// within a bucket the lowest original insertion index wins.
fn arbitrate(answers: Vec<RankedAnswer>) -> Option<DidLookupResult> {
    let mut buckets: [Vec<RankedAnswer>; 4] = Default::default();
    for answer in answers {
        let bucket = match (answer.is_production, answer.result.is_self_certified) {
            (true, true) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (false, false) => 3,
        };
        buckets[bucket].push(answer);
    }

    buckets.into_iter().find(|b| !b.is_empty()).and_then(|mut bucket| {
        bucket.sort_by_key(|a| a.index);
        bucket.into_iter().next().map(|a| a.result)
    })
}

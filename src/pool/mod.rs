/// Ledger pool lifecycle management
///
/// A `LedgerPool` owns one lazily-opened connection to one ledger network.
/// Acquisition is ref-counted; when the last reference is released the
/// connection is either closed immediately or kept alive for the configured
/// keepalive window, amortizing reconnection cost across bursty lookups.
pub mod connector;

use crate::error::{VdrError, VdrResult};
use crate::genesis::GenesisTransactions;
use crate::metrics;
use connector::{LedgerConnector, NodeHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CLOSE_ATTEMPTS: u32 = 3;
const CLOSE_BACKOFF: Duration = Duration::from_millis(10);

/// Immutable per-pool configuration
#[derive(Debug, Clone)]
pub struct LedgerPoolConfig {
    pub name: String,
    /// Seconds an idle connection stays open; 0 disables deferred close
    pub keepalive_secs: u64,
    pub read_only: bool,
    /// Inline genesis blob; when absent the well-known path is used
    pub genesis_transactions: Option<String>,
    /// Root directory for well-known genesis files
    pub genesis_dir: PathBuf,
    pub socks_proxy: Option<String>,
}

/// Mutable pool state, guarded by the per-pool mutex.
///
/// Invariant: `handle.is_some()` iff `opened`. `opened` may remain true at
/// `ref_count == 0` while a pending close timer is outstanding.
struct PoolState {
    opened: bool,
    handle: Option<Arc<NodeHandle>>,
    ref_count: u32,
    pending_close: Option<JoinHandle<()>>,
}

/// One ref-counted, lazily-opened connection to a ledger network
pub struct LedgerPool {
    config: LedgerPoolConfig,
    connector: Arc<dyn LedgerConnector>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for LedgerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerPool")
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

impl LedgerPool {
    pub fn new(config: LedgerPoolConfig, connector: Arc<dyn LedgerConnector>) -> Self {
        Self {
            config,
            connector,
            state: Mutex::new(PoolState {
                opened: false,
                handle: None,
                ref_count: 0,
                pending_close: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LedgerPoolConfig {
        &self.config
    }

    /// Open the underlying connection. Idempotent: an already-open pool is
    /// left untouched. Open failures are not retried here; retrying is the
    /// caller's responsibility.
    pub async fn open(&self) -> VdrResult<()> {
        let mut state = self.state.lock().await;
        self.open_locked(&mut state).await
    }

    async fn open_locked(&self, state: &mut PoolState) -> VdrResult<()> {
        if state.opened {
            return Ok(());
        }

        let genesis = GenesisTransactions::resolve(
            &self.config.name,
            self.config.genesis_transactions.as_deref(),
            &self.config.genesis_dir,
        )
        .await?;

        let handle = self.connector.open(&self.config, &genesis).await?;
        state.handle = Some(Arc::new(handle));
        state.opened = true;
        metrics::POOL_OPENS_TOTAL
            .with_label_values(&[self.config.name.as_str()])
            .inc();
        debug!(pool = %self.config.name, "Pool opened");
        Ok(())
    }

    /// Acquire a scoped reference to the open pool.
    ///
    /// Increments the ref count, cancelling any pending deferred close, and
    /// opens the connection lazily. The returned guard's `release()` must be
    /// called exactly once on every normal exit path; dropping an unreleased
    /// guard (a cancelled task) performs the same decrement asynchronously
    /// so cancellation cannot leak a reference.
    pub async fn acquire(self: Arc<Self>) -> VdrResult<PoolGuard> {
        let mut state = self.state.lock().await;

        if let Some(timer) = state.pending_close.take() {
            timer.abort();
            debug!(pool = %self.config.name, "Cancelled pending close");
        }

        self.open_locked(&mut state).await?;

        let handle = state
            .handle
            .clone()
            .ok_or_else(|| VdrError::Internal(format!("Pool {} open without handle", self.config.name)))?;
        state.ref_count += 1;
        drop(state);

        Ok(PoolGuard {
            pool: self,
            handle,
            released: false,
        })
    }

    /// Drop one reference; at zero, close now or arm the keepalive timer.
    async fn release_ref(self: Arc<Self>) -> VdrResult<()> {
        let mut state = self.state.lock().await;
        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count > 0 || !state.opened {
            return Ok(());
        }

        if self.config.keepalive_secs == 0 {
            return self.close_locked(&mut state).await;
        }

        let pool = Arc::clone(&self);
        let delay = Duration::from_secs(self.config.keepalive_secs);
        state.pending_close = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pool.close_if_idle().await;
        }));
        debug!(
            pool = %self.config.name,
            keepalive = self.config.keepalive_secs,
            "Idle, deferred close armed"
        );
        Ok(())
    }

    /// Timer body: the ref count is re-checked under the pool mutex so an
    /// `acquire` racing the firing timer always wins.
    async fn close_if_idle(self: Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.ref_count > 0 || !state.opened {
            return;
        }
        state.pending_close = None;
        if let Err(e) = self.close_locked(&mut state).await {
            warn!(pool = %self.config.name, "Deferred close failed: {}", e);
        }
    }

    /// Close the underlying connection, retrying up to 3 times with a short
    /// fixed backoff. On exhaustion the ref count is bumped by one before
    /// the error is returned, so a release that already decremented cannot
    /// leave the count understated (see DESIGN.md for the policy decision).
    pub async fn close(&self) -> VdrResult<()> {
        let mut state = self.state.lock().await;
        if let Some(timer) = state.pending_close.take() {
            timer.abort();
        }
        self.close_locked(&mut state).await
    }

    async fn close_locked(&self, state: &mut PoolState) -> VdrResult<()> {
        let handle = match state.handle.clone() {
            Some(handle) => handle,
            None => {
                state.opened = false;
                return Ok(());
            }
        };

        let mut last_err = String::new();
        for attempt in 1..=CLOSE_ATTEMPTS {
            match self.connector.close(&handle).await {
                Ok(()) => {
                    state.opened = false;
                    state.handle = None;
                    debug!(pool = %self.config.name, "Pool closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        pool = %self.config.name,
                        attempt,
                        "Close attempt failed: {}", e
                    );
                    last_err = e.to_string();
                    if attempt < CLOSE_ATTEMPTS {
                        tokio::time::sleep(CLOSE_BACKOFF).await;
                    }
                }
            }
        }

        state.ref_count += 1;
        metrics::POOL_CLOSE_FAILURES_TOTAL
            .with_label_values(&[self.config.name.as_str()])
            .inc();
        Err(VdrError::PoolClose(format!(
            "Pool {} close failed after {} attempts: {}",
            self.config.name, CLOSE_ATTEMPTS, last_err
        )))
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.opened
    }

    pub async fn ref_count(&self) -> u32 {
        self.state.lock().await.ref_count
    }

    #[cfg(test)]
    async fn has_pending_close(&self) -> bool {
        self.state.lock().await.pending_close.is_some()
    }
}

/// Scoped pool reference returned by [`LedgerPool::acquire`].
///
/// Call `release()` once on every normal exit path. `Drop` is only the
/// backstop for cancelled futures: it schedules the same decrement on the
/// runtime instead of performing it inline.
pub struct PoolGuard {
    pool: Arc<LedgerPool>,
    handle: Arc<NodeHandle>,
    released: bool,
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("pool", &self.pool.name())
            .field("released", &self.released)
            .finish()
    }
}

impl PoolGuard {
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn pool(&self) -> &Arc<LedgerPool> {
        &self.pool
    }

    /// Release this reference. Close failures surface here as
    /// `VdrError::PoolClose`; the reference itself is always released.
    pub async fn release(mut self) -> VdrResult<()> {
        self.released = true;
        Arc::clone(&self.pool).release_ref().await
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = Arc::clone(&self.pool);
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let name = pool.name().to_string();
                if let Err(e) = pool.release_ref().await {
                    warn!(pool = %name, "Release on drop failed: {}", e);
                }
            });
        } else {
            warn!(pool = %self.pool.name(), "Pool guard dropped outside a runtime; reference leaked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::connector::*;
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockConnector {
        opens: AtomicUsize,
        closes: AtomicUsize,
        fail_close: AtomicBool,
    }

    impl MockConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_close: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
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
            if self.fail_close.load(Ordering::SeqCst) {
                Err(VdrError::Transport("simulated close failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_genesis() -> String {
        r#"{"txn":{"data":{"data":{"alias":"Node1","client_ip":"127.0.0.1","client_port":9702},"dest":"Gw6pDLhcBcoQesN72qfotTgFa7cbuqZpkX3Xo6pLhPhv"},"type":"0"}}"#
            .to_string()
    }

    fn make_pool(keepalive_secs: u64, connector: Arc<MockConnector>) -> Arc<LedgerPool> {
        Arc::new(LedgerPool::new(
            LedgerPoolConfig {
                name: "test-pool".to_string(),
                keepalive_secs,
                read_only: false,
                genesis_transactions: Some(sample_genesis()),
                genesis_dir: PathBuf::from("/nonexistent"),
                socks_proxy: None,
            },
            connector,
        ))
    }

    #[tokio::test]
    async fn test_acquire_opens_lazily_once() {
        let connector = MockConnector::new();
        let pool = make_pool(0, Arc::clone(&connector));
        assert!(!pool.is_open().await);

        let a = Arc::clone(&pool).acquire().await.unwrap();
        let b = Arc::clone(&pool).acquire().await.unwrap();
        assert!(pool.is_open().await);
        assert_eq!(pool.ref_count().await, 2);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        a.release().await.unwrap();
        assert!(pool.is_open().await);
        b.release().await.unwrap();
        assert!(!pool.is_open().await);
        assert_eq!(pool.ref_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_genesis_is_pool_config_error() {
        let connector = MockConnector::new();
        let pool = Arc::new(LedgerPool::new(
            LedgerPoolConfig {
                name: "ghost".to_string(),
                keepalive_secs: 0,
                read_only: false,
                genesis_transactions: None,
                genesis_dir: PathBuf::from("/nonexistent"),
                socks_proxy: None,
            },
            Arc::clone(&connector) as Arc<dyn LedgerConnector>,
        ));
        let err = Arc::clone(&pool).acquire().await.unwrap_err();
        assert!(matches!(err, VdrError::PoolConfig(_)));
        // No connection attempt may precede genesis resolution.
        assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_defers_close() {
        let connector = MockConnector::new();
        let pool = make_pool(30, Arc::clone(&connector));

        let guard = Arc::clone(&pool).acquire().await.unwrap();
        guard.release().await.unwrap();

        assert!(pool.is_open().await);
        assert!(pool.has_pending_close().await);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!pool.is_open().await);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancels_pending_close_and_reuses_handle() {
        let connector = MockConnector::new();
        let pool = make_pool(30, Arc::clone(&connector));

        let guard = Arc::clone(&pool).acquire().await.unwrap();
        guard.release().await.unwrap();
        assert!(pool.has_pending_close().await);

        let guard = Arc::clone(&pool).acquire().await.unwrap();
        assert!(!pool.has_pending_close().await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(pool.is_open().await);
        // Same handle: no second open observed.
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 0);

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_failure_bumps_ref_count() {
        let connector = MockConnector::new();
        connector.fail_close.store(true, Ordering::SeqCst);
        let pool = make_pool(0, Arc::clone(&connector));

        let guard = Arc::clone(&pool).acquire().await.unwrap();
        let err = guard.release().await.unwrap_err();
        assert!(matches!(err, VdrError::PoolClose(_)));
        assert_eq!(connector.closes.load(Ordering::SeqCst), 3);
        // Decremented to zero by release, then bumped back by the failed close.
        assert_eq!(pool.ref_count().await, 1);
        assert!(pool.is_open().await);
    }

    #[tokio::test]
    async fn test_explicit_close_is_idempotent() {
        let connector = MockConnector::new();
        let pool = make_pool(0, Arc::clone(&connector));
        pool.open().await.unwrap();
        pool.close().await.unwrap();
        pool.close().await.unwrap();
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_reference() {
        let connector = MockConnector::new();
        let pool = make_pool(0, Arc::clone(&connector));

        {
            let _guard = Arc::clone(&pool).acquire().await.unwrap();
            assert_eq!(pool.ref_count().await, 1);
        }
        // Drop schedules the release on the runtime.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.ref_count().await, 0);
        assert!(!pool.is_open().await);
    }
}

/// Ledger Atlas - multi-ledger DID resolution and trust layer
///
/// The trust-and-resolution core of a decentralized-identity agent: given a
/// DID or a ledger-scoped object identifier, locate which of the configured
/// ledger networks holds the authoritative record, fetch it, and verify the
/// responding node's answer against the ledger's committed state.

pub mod cache;
pub mod config;
pub mod error;
pub mod genesis;
pub mod metrics;
pub mod pool;
pub mod proof;
pub mod registry;
pub mod resolver;

pub use cache::{MemoryResolutionCache, RedisResolutionCache, ResolutionCache};
pub use config::{LedgerEntryConfig, VdrConfig};
pub use error::{VdrError, VdrResult};
pub use genesis::GenesisTransactions;
pub use pool::connector::{
    HttpLedgerConnector, HttpLedgerTransport, LedgerConnector, LedgerRequest, LedgerTransport,
    NodeHandle,
};
pub use pool::{LedgerPool, LedgerPoolConfig, PoolGuard};
pub use proof::{ProofCrypto, ReplyEnvelope, StateProofVerifier};
pub use registry::{LedgerDescriptor, LedgerRegistry, RegistrySnapshot};
pub use resolver::did::{extract_did_from_identifier, is_self_certified};
pub use resolver::{DidLookupResult, MultiLedgerManager};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for embedding binaries.
///
/// Honors `RUST_LOG`, falling back to the given default filter.
pub fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

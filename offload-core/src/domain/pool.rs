//! The pool of servers tasks may be offloaded to.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::domain::probe::Prober;
use crate::domain::server::{LivenessSample, ServerRecord, SharedServer};

/// Any real measurement beats this when picking the lowest latency.
pub const DEFAULT_LATENCY_CEILING_MS: f64 = 3000.0;

/// Upper bound on probes in flight during one fan-out.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 16;

/// A lock-free pool of servers, unique by address.
///
/// Membership lives behind an `ArcSwap`, so readers take a snapshot without locking
/// and writers publish a whole new member list. Each record guards its own history.
#[derive(Debug)]
pub struct ServerPool {
    servers: ArcSwap<Vec<SharedServer>>,
    prober: Arc<dyn Prober>,
    probe_concurrency: usize,
    latency_ceiling_ms: f64,
}

impl ServerPool {
    /// Create an empty pool probing through `prober`.
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self::from_servers(Vec::new(), prober)
    }

    /// Build a pool straight from a name to address mapping, deduplicated by address.
    pub fn specify<I, K, V>(mapping: I, prober: Arc<dyn Prober>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let servers = mapping
            .into_iter()
            .map(|(name, address)| Arc::new(ServerRecord::new(name, address)))
            .collect();
        Self::from_servers(dedup_by_address(servers), prober)
    }

    fn from_servers(servers: Vec<SharedServer>, prober: Arc<dyn Prober>) -> Self {
        Self {
            servers: ArcSwap::from_pointee(servers),
            prober,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            latency_ceiling_ms: DEFAULT_LATENCY_CEILING_MS,
        }
    }

    /// Limit the number of concurrent probes in a fan-out.
    pub fn with_probe_concurrency(mut self, probe_concurrency: usize) -> Self {
        self.probe_concurrency = probe_concurrency.max(1);
        self
    }

    /// Ignore servers whose latency is at or above `ceiling_ms` during min-latency selection.
    pub fn with_latency_ceiling(mut self, ceiling_ms: f64) -> Self {
        self.latency_ceiling_ms = ceiling_ms;
        self
    }

    /// Add every entry of a configured name to address mapping.
    ///
    /// Returns how many entries were read.
    pub fn load_from_config<I, K, V>(&self, mapping: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let loaded: Vec<SharedServer> = mapping
            .into_iter()
            .map(|(name, address)| Arc::new(ServerRecord::new(name, address)))
            .collect();
        let count = loaded.len();

        self.servers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.extend(loaded.iter().cloned());
            dedup_by_address(next)
        });

        info!(count, pool_size = self.len(), "loaded servers from config");
        count
    }

    /// Add a server unless one with the same address is already present.
    pub fn add(&self, server: SharedServer) -> bool {
        let mut added = false;
        self.servers.rcu(|current| {
            added = !current.iter().any(|s| s.address == server.address);
            let mut next = Vec::clone(current);
            if added {
                next.push(server.clone());
            }
            next
        });
        if added {
            info!(%server, "added server to pool");
        }
        added
    }

    /// Drop the server with `address`. Returns whether anything was removed.
    pub fn remove_address(&self, address: &str) -> bool {
        let mut removed = false;
        self.servers.rcu(|current| {
            let next: Vec<SharedServer> = current
                .iter()
                .filter(|s| s.address != address)
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        if removed {
            info!(address, "removed server from pool");
        }
        removed
    }

    /// Whether a server with `address` is a member.
    pub fn contains(&self, address: &str) -> bool {
        self.servers.load().iter().any(|s| s.address == address)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    /// Whether the pool has no members.
    pub fn is_empty(&self) -> bool {
        self.servers.load().is_empty()
    }

    /// A snapshot of the current members in iteration order.
    pub fn snapshot(&self) -> Arc<Vec<SharedServer>> {
        self.servers.load_full()
    }

    /// The distinct member addresses.
    pub fn addresses(&self) -> HashSet<String> {
        self.servers
            .load()
            .iter()
            .map(|s| s.address.clone())
            .collect()
    }

    /// A detached copy of this pool without `address`.
    ///
    /// The copy shares the records (and so their histories) but not the member list:
    /// nothing done to it changes the membership of `self`.
    pub fn without(&self, address: &str) -> ServerPool {
        let remaining = self
            .snapshot()
            .iter()
            .filter(|s| s.address != address)
            .cloned()
            .collect();

        Self {
            servers: ArcSwap::from_pointee(remaining),
            prober: self.prober.clone(),
            probe_concurrency: self.probe_concurrency,
            latency_ceiling_ms: self.latency_ceiling_ms,
        }
    }

    /// Pick a member uniformly at random.
    pub fn select_random(&self) -> Option<SharedServer> {
        let servers = self.servers.load();
        servers.choose(&mut rand::thread_rng()).cloned()
    }

    /// Probe every member and pick the one that answered fastest.
    ///
    /// Waits for all probes before deciding. Ties go to the member seen first.
    pub async fn select_min_latency(&self) -> Option<SharedServer> {
        let servers = self.snapshot();
        if servers.is_empty() {
            return None;
        }

        let samples = self.probe_all(&servers).await;

        let mut chosen = None;
        let mut min_latency = self.latency_ceiling_ms;
        for (server, sample) in servers.iter().zip(samples.iter()) {
            if sample.reachable && sample.latency_ms < min_latency {
                min_latency = sample.latency_ms;
                chosen = Some(server.clone());
            }
        }

        if let Some(server) = &chosen {
            debug!(%server, latency_ms = min_latency, "lowest latency server");
        }
        chosen
    }

    /// Re-probe the pool and merge in the reachable `candidates`.
    ///
    /// Members that fail a probe now are dropped. Candidates that answer are added under
    /// `source_label`. Members already present keep their name and history.
    pub async fn refresh<S: AsRef<str>>(&self, candidates: &[S], source_label: &str) {
        let current = self.snapshot();
        let current_samples = self.probe_all(&current).await;
        let mut stale = HashSet::new();
        for (server, sample) in current.iter().zip(current_samples.iter()) {
            if !sample.reachable {
                warn!(%server, source = source_label, "server failed probe, pruning from pool");
                stale.insert(server.address.clone());
            }
        }

        let held: HashSet<&str> = current.iter().map(|s| s.address.as_str()).collect();
        let mut seen = HashSet::new();
        let fresh: Vec<SharedServer> = candidates
            .iter()
            .map(|candidate| candidate.as_ref())
            .filter(|address| !held.contains(address) && seen.insert(*address))
            .map(|address| Arc::new(ServerRecord::new(source_label, address)))
            .collect();
        let fresh_samples = self.probe_all(&fresh).await;
        let reachable: Vec<SharedServer> = fresh
            .into_iter()
            .zip(fresh_samples)
            .filter(|(_, sample)| sample.reachable)
            .map(|(server, _)| server)
            .collect();

        self.servers.rcu(|servers| {
            let mut next: Vec<SharedServer> = servers
                .iter()
                .filter(|s| !stale.contains(&s.address))
                .cloned()
                .collect();
            next.extend(reachable.iter().cloned());
            dedup_by_address(next)
        });

        info!(
            source = source_label,
            pruned = stale.len(),
            added = reachable.len(),
            pool_size = self.len(),
            "refreshed server pool"
        );
        debug!(pool = %self, "pool members after refresh");
    }

    /// Probe `servers` with bounded concurrency, returning samples in the same order.
    async fn probe_all(&self, servers: &[SharedServer]) -> Vec<LivenessSample> {
        stream::iter(servers.to_vec())
            .map(|server| {
                let prober = self.prober.clone();
                async move { server.test(&*prober).await }
            })
            .buffered(self.probe_concurrency)
            .collect()
            .await
    }
}

impl std::fmt::Display for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let servers = self.servers.load();
        let names: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Keep the first record seen for every address.
fn dedup_by_address(servers: Vec<SharedServer>) -> Vec<SharedServer> {
    let mut seen = HashSet::new();
    servers
        .into_iter()
        .filter(|s| seen.insert(s.address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::probe::testing::FixedProber;
    use proptest::prelude::*;

    fn prober<'a>(entries: impl IntoIterator<Item = (&'a str, Option<f64>)>) -> Arc<dyn Prober> {
        Arc::new(FixedProber::new(entries))
    }

    fn cloud_mapping() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AWS", "95.69.98.253"),
            ("GCP", "43.56.87.99"),
            ("Azure", "123.123.33.44"),
        ]
    }

    #[test]
    fn test_specify_dedups_addresses() {
        let mut mapping = cloud_mapping();
        mapping.extend([
            ("AWS1", "95.69.98.253"),
            ("GCP1", "43.56.87.99"),
            ("Azure1", "123.123.33.44"),
        ]);

        let pool = ServerPool::specify(mapping, prober([]));
        assert_eq!(pool.len(), 3);
        assert!(pool.contains("43.56.87.99"));
    }

    #[test]
    fn test_load_from_config_keeps_order() {
        let pool = ServerPool::new(prober([]));
        let read = pool.load_from_config([("PC", "127.0.0.1"), ("vagrant-ubuntu", "192.168.56.2")]);

        assert_eq!(read, 2);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].name, "PC");
        assert_eq!(snapshot[0].address, "127.0.0.1");
        assert_eq!(snapshot[1].name, "vagrant-ubuntu");
        assert_eq!(snapshot[1].address, "192.168.56.2");
    }

    #[test]
    fn test_add_and_remove() {
        let pool = ServerPool::new(prober([]));
        assert!(pool.add(Arc::new(ServerRecord::new("a", "10.0.0.1"))));
        assert!(!pool.add(Arc::new(ServerRecord::new("b", "10.0.0.1"))));
        assert_eq!(pool.len(), 1);

        assert!(pool.remove_address("10.0.0.1"));
        assert!(!pool.remove_address("10.0.0.1"));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_addresses_are_distinct() {
        let pool = ServerPool::specify(
            [("a", "10.0.0.1"), ("b", "10.0.0.2"), ("c", "10.0.0.1")],
            prober([]),
        );
        let addresses = pool.addresses();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains("10.0.0.2"));
    }

    #[test]
    fn test_without_leaves_live_pool_untouched() {
        let pool = ServerPool::specify(
            [("PC", "127.0.0.1"), ("edge", "10.0.0.2")],
            prober([]),
        );
        let remote = pool.without("127.0.0.1");

        assert_eq!(remote.len(), 1);
        assert!(!remote.contains("127.0.0.1"));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("127.0.0.1"));

        remote.remove_address("10.0.0.2");
        assert!(pool.contains("10.0.0.2"));
    }

    #[test]
    fn test_display_lists_members() {
        let pool = ServerPool::specify([("PC", "127.0.0.1"), ("edge", "10.0.0.2")], prober([]));
        assert_eq!(pool.to_string(), "[Server(PC, 127.0.0.1), Server(edge, 10.0.0.2)]");
        assert_eq!(ServerPool::new(prober([])).to_string(), "[]");
    }

    #[test]
    fn test_select_random_from_empty_pool() {
        let pool = ServerPool::new(prober([]));
        assert!(pool.select_random().is_none());
    }

    #[test]
    fn test_select_random_returns_member() {
        let pool = ServerPool::specify(cloud_mapping(), prober([]));
        for _ in 0..20 {
            let chosen = pool.select_random().expect("non-empty pool");
            assert!(pool.contains(&chosen.address));
        }
    }

    #[tokio::test]
    async fn test_select_min_latency_picks_fastest() {
        let pool = ServerPool::specify(
            [("A", "10.0.0.1"), ("B", "10.0.0.2"), ("C", "10.0.0.3")],
            prober([
                ("10.0.0.1", Some(50.0)),
                ("10.0.0.2", Some(10.0)),
                ("10.0.0.3", None),
            ]),
        );

        let chosen = pool.select_min_latency().await.expect("B is reachable");
        assert_eq!(chosen.name, "B");

        // every member got exactly one fresh sample
        for server in pool.snapshot().iter() {
            assert_eq!(server.history().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_select_min_latency_ties_go_to_first() {
        let pool = ServerPool::specify(
            [("first", "10.0.0.1"), ("second", "10.0.0.2")],
            prober([("10.0.0.1", Some(20.0)), ("10.0.0.2", Some(20.0))]),
        );

        let chosen = pool.select_min_latency().await.expect("both reachable");
        assert_eq!(chosen.name, "first");
    }

    #[tokio::test]
    async fn test_select_min_latency_none_reachable() {
        let pool = ServerPool::specify(
            [("gone", "10.0.0.1"), ("unknown", "no-such-host.invalid")],
            prober([("10.0.0.1", None)]),
        );
        assert!(pool.select_min_latency().await.is_none());

        let empty = ServerPool::new(prober([]));
        assert!(empty.select_min_latency().await.is_none());
    }

    #[tokio::test]
    async fn test_select_min_latency_respects_ceiling() {
        let pool = ServerPool::specify(
            [("slow", "10.0.0.1")],
            prober([("10.0.0.1", Some(3500.0))]),
        );
        assert!(pool.select_min_latency().await.is_none());

        let strict = ServerPool::specify(
            [("edge", "10.0.0.2")],
            prober([("10.0.0.2", Some(150.0))]),
        )
        .with_latency_ceiling(100.0);
        assert!(strict.select_min_latency().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_prunes_and_adds() {
        let pool = ServerPool::specify(
            cloud_mapping(),
            prober([("127.0.0.1", Some(0.1))]),
        );
        assert_eq!(pool.len(), 3);

        pool.refresh(&["127.0.0.1", "128.0.0.0"], "Discovered").await;

        assert_eq!(pool.len(), 1);
        let only = &pool.snapshot()[0];
        assert_eq!(only.address, "127.0.0.1");
        assert_eq!(only.name, "Discovered");
    }

    #[tokio::test]
    async fn test_refresh_with_duplicates() {
        let pool = ServerPool::specify(
            [("PC", "127.0.0.1"), ("vagrant-ubuntu", "192.168.56.2")],
            prober([("127.0.0.1", Some(0.1)), ("192.168.56.2", Some(1.2))]),
        );

        pool.refresh(&["127.0.0.1", "127.0.0.1", "192.168.56.2"], "Discovered")
            .await;

        assert_eq!(pool.len(), 2);
        // existing members keep their configured names
        assert_eq!(pool.snapshot()[0].name, "PC");
    }

    #[tokio::test]
    async fn test_refresh_probes_each_candidate_once() {
        let fixed = Arc::new(FixedProber::new([("10.0.0.9", Some(3.0))]));
        let pool = ServerPool::new(fixed.clone());

        pool.refresh(&["10.0.0.9", "10.0.0.9", "10.0.0.9"], "Discovered")
            .await;

        assert_eq!(pool.len(), 1);
        assert_eq!(fixed.calls(), 1);
    }

    proptest! {
        #[test]
        fn prop_specify_size_equals_distinct_addresses(
            entries in proptest::collection::vec(("[a-z]{1,6}", 0u8..8), 0..40)
        ) {
            let mapping: Vec<(String, String)> = entries
                .iter()
                .map(|(name, host)| (name.clone(), format!("10.0.0.{host}")))
                .collect();
            let distinct: HashSet<&String> = mapping.iter().map(|(_, addr)| addr).collect();

            let pool = ServerPool::specify(mapping.clone(), prober([]));
            prop_assert_eq!(pool.len(), distinct.len());
            prop_assert_eq!(pool.addresses().len(), distinct.len());
        }
    }
}

//! Owns the three endpoint data structures (PermaBranches, the ActiveBranch
//! cache, the Switch-mode address→branch caches) and implements the
//! "learn on receive, forget on timeout" policy. Lives exclusively on the
//! processing domain, alongside the VM used by Switch mode.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::strand::Strand;
use crate::timeout_cache::TimeoutCache;
use crate::vm::Vm;

pub type Endpoint = SocketAddr;

/// State owned by the processing domain: the endpoint directory and the
/// Switch-mode VM. Only ever touched from jobs posted to `processing`.
pub struct ProcessingState {
    pub directory: Directory,
    pub vm: Option<Vm>,
}

#[derive(Clone)]
enum CacheId {
    Active,
    Addr(u64),
}

fn make_scheduler(strand: Strand<ProcessingState>, id: CacheId) -> crate::timeout_cache::Scheduler<Endpoint> {
    Arc::new(move |key: Endpoint, after: Duration| {
        let strand = strand.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            strand.post(move |state: &mut ProcessingState| {
                state.directory.on_wake(id, key);
            });
        });
    })
}

pub struct Directory {
    perma: HashSet<Endpoint>,
    inactive_perma: HashSet<Endpoint>,
    active: TimeoutCache<Endpoint>,
    addr_branches: HashMap<u64, TimeoutCache<Endpoint>>,
    timeout: Duration,
    strand: Strand<ProcessingState>,
}

impl Directory {
    pub fn new(perma: HashSet<Endpoint>, timeout: Duration, strand: Strand<ProcessingState>) -> Self {
        let scheduler = make_scheduler(strand.clone(), CacheId::Active);
        Directory {
            inactive_perma: perma.clone(),
            perma,
            active: TimeoutCache::new(timeout, scheduler),
            addr_branches: HashMap::new(),
            timeout,
            strand,
        }
    }

    /// If `sender` is the trunk, does nothing; otherwise adds/refreshes
    /// `sender` in the ActiveBranch cache and, if it is a perma branch,
    /// removes it from InactivePermaBranches. Returns the current
    /// ActiveBranch key sequence.
    pub fn observe(&mut self, sender: Endpoint, trunk: Option<Endpoint>) -> Vec<Endpoint> {
        if trunk != Some(sender) {
            self.active.add(sender);
            self.inactive_perma.remove(&sender);
        }
        self.active.keys()
    }

    /// Lazily materializes the inner cache for `addr`; if `associate`, adds
    /// or refreshes `sender` in it. Returns the inner cache's key sequence.
    pub fn address_branches(&mut self, sender: Endpoint, addr: u64, associate: bool) -> Vec<Endpoint> {
        let strand = self.strand.clone();
        let timeout = self.timeout;
        let cache = self
            .addr_branches
            .entry(addr)
            .or_insert_with(|| TimeoutCache::new(timeout, make_scheduler(strand, CacheId::Addr(addr))));
        if associate {
            cache.add(sender);
        }
        cache.keys()
    }

    pub fn perma_snapshot(&self) -> Vec<Endpoint> {
        self.perma.iter().copied().collect()
    }

    pub fn inactive_perma_snapshot(&self) -> Vec<Endpoint> {
        self.inactive_perma.iter().copied().collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    fn on_wake(&mut self, id: CacheId, key: Endpoint) {
        match id {
            CacheId::Active => {
                if let Some(expired) = self.active.on_wake(key) {
                    self.handle_active_expiry(expired);
                }
            }
            CacheId::Addr(addr) => {
                if let Some(cache) = self.addr_branches.get_mut(&addr) {
                    let expired = cache.on_wake(key);
                    if expired.is_some() {
                        tracing::debug!(addr, ?key, "address-branch cache entry timed out");
                        if cache.is_empty() {
                            self.addr_branches.remove(&addr);
                        }
                    }
                }
            }
        }
    }

    fn handle_active_expiry(&mut self, ep: Endpoint) {
        tracing::debug!(endpoint = %ep, "active-branch cache entry timed out");
        if self.perma.contains(&ep) {
            self.inactive_perma.insert(ep);
        }
    }
}

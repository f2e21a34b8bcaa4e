//! Descriptor cache
//!
//! Maps signatures to shared call descriptors and their register plans.
//! Signatures without a descriptor are cached too, so the fallback decision
//! is made once per signature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::ffi::descr::{build_call_descriptor, CallDescriptor, EffectInfo};
use crate::ffi::types::{CpuCapabilities, Signature};
use crate::jit::backend::regs::{RegisterBudget, RegisterPlan};

/// A cached descriptor with its register plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCall {
    /// Shared descriptor
    pub descr: Arc<CallDescriptor>,
    /// Register usage under the cache's budget
    pub plan: RegisterPlan,
}

/// Thread-safe cache of call descriptors
pub struct DescriptorCache {
    cpu: CpuCapabilities,
    budget: RegisterBudget,
    /// (signature, effects) → descriptor, or `None` when unsupported
    entries: RwLock<FxHashMap<(Signature, EffectInfo), Option<CachedCall>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl DescriptorCache {
    /// Create an empty cache for `cpu` and `budget`
    pub fn new(cpu: CpuCapabilities, budget: RegisterBudget) -> Self {
        DescriptorCache {
            cpu,
            budget,
            entries: RwLock::new(FxHashMap::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Look up `sig`, building and caching its descriptor on first use.
    ///
    /// Returns `None` when the signature has no descriptor on this CPU.
    pub fn get_or_build(&self, sig: &Signature, extra: EffectInfo) -> Option<CachedCall> {
        let key = (sig.clone(), extra);
        if let Some(entry) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let built = build_call_descriptor(&self.cpu, sig, extra).map(|descr| {
            let kinds: Vec<_> = descr.arg_kinds().collect();
            let plan = self.budget.assign(&kinds);
            CachedCall { descr: Arc::new(descr), plan }
        });
        tracing::debug!(
            nargs = sig.nargs(),
            supported = built.is_some(),
            "descriptor cache miss"
        );

        // A racing builder may have inserted first; keep its entry so every
        // caller shares one Arc.
        let mut entries = self.entries.write();
        entries.entry(key).or_insert(built).clone()
    }

    /// Whether `sig` has been looked up before
    pub fn contains(&self, sig: &Signature, extra: EffectInfo) -> bool {
        self.entries.read().contains_key(&(sig.clone(), extra))
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached signatures, supported or not
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Lookups answered from the cache
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to build
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Capabilities descriptors are built against
    pub fn capabilities(&self) -> CpuCapabilities {
        self.cpu
    }

    /// Register budget plans are computed with
    pub fn budget(&self) -> RegisterBudget {
        self.budget
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("cpu", &self.cpu)
            .field("budget", &self.budget)
            .field("entries", &self.entry_count())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

//! Dependency and tag based cache invalidation
//!
//! The graph records, for every cached key, which keys it depends on and
//! which tags it carries. Invalidating a key removes it and everything that
//! transitively depends on it:
//!
//! - Dependency: `invalidate(B)` also removes every key registered with B as
//!   a dependency, then their dependents, and so on
//! - Tag: `invalidate_by_tag(t)` removes every key tagged `t` plus dependents
//! - Pattern: `invalidate_by_pattern(p)` removes keys matching a prefix or glob
//!
//! Closures are computed with a visited set, so a cyclic registration
//! invalidates each reachable key once and terminates.

use crate::cache::key::glob_match;
use crate::error::Result;
use crate::metrics::{MetricsCollector, Operation};
use crate::scheduler::Scheduler;
use crate::tier::CacheTier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Manual invalidation by key (and its dependents)
    Manual,

    /// Invalidated by tag match
    TagMatch { tag: String },

    /// Invalidated by key pattern
    PatternMatch { pattern: String },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::PatternMatch { pattern } => write!(f, "pattern match: {}", pattern),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Keys whose removal from the store failed
    #[serde(default)]
    pub failed: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            failed: Vec::new(),
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    /// Whether every key was removed from the store
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Size of the graph indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// `dependency -> dependent` edges
    pub dependency_edges: usize,
    /// Distinct tags with at least one key
    pub tags: usize,
    /// Keys with at least one dependency or tag
    pub tracked_keys: usize,
}

#[derive(Debug, Default)]
struct GraphState {
    /// dependency -> keys that depend on it
    dependents: HashMap<String, HashSet<String>>,
    /// key -> its dependencies (reverse index for pruning)
    dependencies: HashMap<String, HashSet<String>>,
    /// tag -> keys carrying it
    tags: HashMap<String, HashSet<String>>,
    /// key -> its tags (reverse index for pruning)
    key_tags: HashMap<String, HashSet<String>>,
    /// key -> registration number, bumped on every `register`
    stamps: HashMap<String, u64>,
    next_stamp: u64,
}

impl GraphState {
    /// Drop the key's own dependency edges and tag memberships
    fn detach(&mut self, key: &str) {
        self.stamps.remove(key);
        if let Some(deps) = self.dependencies.remove(key) {
            for dep in deps {
                remove_member(&mut self.dependents, &dep, key);
            }
        }
        if let Some(tags) = self.key_tags.remove(key) {
            for tag in tags {
                remove_member(&mut self.tags, &tag, key);
            }
        }
    }

    /// Drop every edge that mentions the key
    fn prune(&mut self, key: &str) {
        self.detach(key);
        if let Some(dependents) = self.dependents.remove(key) {
            for dependent in dependents {
                remove_member(&mut self.dependencies, &dependent, key);
            }
        }
    }

    /// Breadth-first transitive closure of dependents, roots first
    fn closure(&self, roots: &[String]) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut order = Vec::new();

        for root in roots {
            if visited.insert(root.as_str()) {
                queue.push_back(root.as_str());
            }
        }

        while let Some(key) = queue.pop_front() {
            order.push(key.to_string());

            let Some(dependents) = self.dependents.get(key) else {
                continue;
            };
            let mut next: Vec<&str> = dependents.iter().map(String::as_str).collect();
            next.sort_unstable();

            for dependent in next {
                if visited.insert(dependent) {
                    queue.push_back(dependent);
                } else if roots.iter().any(|r| r == dependent) {
                    warn!(
                        "Dependency cycle: {} leads back to {}, invalidating each key once",
                        key, dependent
                    );
                }
            }
        }

        order
    }

    fn tracked_keys(&self) -> HashSet<&str> {
        self.dependencies
            .keys()
            .chain(self.dependents.keys())
            .chain(self.key_tags.keys())
            .map(String::as_str)
            .collect()
    }
}

fn remove_member(index: &mut HashMap<String, HashSet<String>>, set_key: &str, member: &str) {
    if let Some(members) = index.get_mut(set_key) {
        members.remove(member);
        if members.is_empty() {
            index.remove(set_key);
        }
    }
}

/// Dependency and tag index with cascading invalidation
pub struct InvalidationGraph {
    tier: Arc<dyn CacheTier>,
    metrics: Arc<MetricsCollector>,
    state: Mutex<GraphState>,
}

impl InvalidationGraph {
    pub fn new(tier: Arc<dyn CacheTier>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            tier,
            metrics,
            state: Mutex::new(GraphState::default()),
        }
    }

    /// Record `dependency -> key` edges and `tag -> key` memberships.
    ///
    /// Replaces whatever the key registered before; edges pointing at the
    /// key from its own dependents are kept.
    pub fn register(&self, key: &str, dependencies: &[&str], tags: &[&str]) {
        let mut state = self.state.lock();
        state.detach(key);
        state.next_stamp += 1;
        let stamp = state.next_stamp;
        state.stamps.insert(key.to_string(), stamp);

        for dep in dependencies {
            if *dep == key {
                warn!("Ignoring self-dependency on {}", key);
                continue;
            }
            state
                .dependents
                .entry(dep.to_string())
                .or_default()
                .insert(key.to_string());
            state
                .dependencies
                .entry(key.to_string())
                .or_default()
                .insert(dep.to_string());
        }

        for tag in tags {
            state
                .tags
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
            state
                .key_tags
                .entry(key.to_string())
                .or_default()
                .insert(tag.to_string());
        }

        debug!(
            "Registered {} with {} dependencies and {} tags",
            key,
            dependencies.len(),
            tags.len()
        );
    }

    /// Forget the key's own dependencies and tags (overwrite or delete)
    pub fn forget(&self, key: &str) {
        self.state.lock().detach(key);
    }

    /// Remove `key` and every key that transitively depends on it
    pub async fn invalidate(&self, key: &str) -> InvalidationEvent {
        let keys = self.plan(&[key.to_string()]);
        self.execute(InvalidationReason::Manual, keys).await
    }

    /// Remove every key tagged `tag`, plus their dependents
    pub async fn invalidate_by_tag(&self, tag: &str) -> InvalidationEvent {
        let keys = {
            let mut state = self.state.lock();
            let mut roots: Vec<String> = state
                .tags
                .remove(tag)
                .map(|keys| keys.into_iter().collect())
                .unwrap_or_default();
            roots.sort_unstable();
            let keys = state.closure(&roots);
            for key in &keys {
                state.prune(key);
            }
            keys
        };

        self.execute(
            InvalidationReason::TagMatch {
                tag: tag.to_string(),
            },
            keys,
        )
        .await
    }

    /// Remove keys matching a prefix or glob pattern, plus their dependents.
    ///
    /// Matches keys in the store as well as keys only known to the graph.
    /// Fails only if the store scan fails.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<InvalidationEvent> {
        let mut roots = self.tier.keys_matching(pattern).await?;
        {
            let state = self.state.lock();
            roots.extend(
                state
                    .tracked_keys()
                    .into_iter()
                    .filter(|k| glob_match(pattern, k))
                    .map(str::to_string),
            );
        }
        roots.sort_unstable();
        roots.dedup();

        let keys = self.plan(&roots);
        Ok(self
            .execute(
                InvalidationReason::PatternMatch {
                    pattern: pattern.to_string(),
                },
                keys,
            )
            .await)
    }

    /// Drop the registrations of keys the store no longer holds.
    ///
    /// Keys that expired by TTL leave their edges behind until something
    /// invalidates them; this sweeps those out. Edges pointing at an absent
    /// key from live dependents are kept. A key registered again while the
    /// store is being checked keeps its new registration. Returns the number
    /// of keys detached.
    pub async fn prune_absent(&self) -> usize {
        let candidates: Vec<(String, u64)> = {
            let state = self.state.lock();
            state.stamps.iter().map(|(k, s)| (k.clone(), *s)).collect()
        };

        let mut absent = Vec::new();
        for (key, stamp) in candidates {
            match self.tier.contains(&key).await {
                Ok(false) => absent.push((key, stamp)),
                Ok(true) => {}
                Err(e) => debug!("Skipping prune check for {}: {}", key, e),
            }
        }

        let mut state = self.state.lock();
        let mut pruned = 0;
        for (key, stamp) in absent {
            if state.stamps.get(&key) == Some(&stamp) {
                state.detach(&key);
                pruned += 1;
            }
        }

        if pruned > 0 {
            debug!("Pruned graph registrations of {} absent keys", pruned);
        }
        pruned
    }

    /// Start the periodic [`InvalidationGraph::prune_absent`] sweep
    pub fn start_pruning(self: &Arc<Self>, interval: Duration) -> Scheduler {
        let graph = Arc::clone(self);
        Scheduler::start("invalidation-graph-prune", interval, move || {
            let graph = Arc::clone(&graph);
            async move {
                graph.prune_absent().await;
            }
        })
    }

    /// Keys that `invalidate(key)` would remove, without removing them
    pub fn closure_of(&self, key: &str) -> Vec<String> {
        self.state.lock().closure(&[key.to_string()])
    }

    /// Direct dependents of a key
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        sorted(self.state.lock().dependents.get(key))
    }

    /// Direct dependencies of a key
    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        sorted(self.state.lock().dependencies.get(key))
    }

    /// Keys carrying a tag
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        sorted(self.state.lock().tags.get(tag))
    }

    /// Tags of a key
    pub fn tags_of(&self, key: &str) -> Vec<String> {
        sorted(self.state.lock().key_tags.get(key))
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.state.lock();
        GraphStats {
            dependency_edges: state.dependents.values().map(HashSet::len).sum(),
            tags: state.tags.len(),
            tracked_keys: state.tracked_keys().len(),
        }
    }

    /// Whether the graph holds no edges at all
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.dependents.is_empty() && state.tags.is_empty()
    }

    /// Compute the closure and prune its edges in one critical section
    fn plan(&self, roots: &[String]) -> Vec<String> {
        let mut state = self.state.lock();
        let keys = state.closure(roots);
        for key in &keys {
            state.prune(key);
        }
        keys
    }

    /// Delete planned keys from the store; failures are logged and counted
    async fn execute(&self, reason: InvalidationReason, keys: Vec<String>) -> InvalidationEvent {
        let mut failed = Vec::new();

        for key in &keys {
            let start = Instant::now();
            match self.tier.remove(key).await {
                Ok(_) => self.metrics.record(Operation::Delete, key, start.elapsed()),
                Err(e) => {
                    self.metrics.record(Operation::Error, key, start.elapsed());
                    warn!("Failed to remove {} during invalidation: {}", key, e);
                    failed.push(key.clone());
                }
            }
        }

        if !keys.is_empty() {
            info!("Invalidated {} keys ({})", keys.len(), reason);
        }

        let context = format!("{} keys, {} failed", keys.len(), failed.len());
        let mut event = InvalidationEvent::new(reason, keys).with_context(context);
        event.failed = failed;
        event
    }
}

impl std::fmt::Debug for InvalidationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationGraph")
            .field("tier", &self.tier.name())
            .field("stats", &self.stats())
            .finish()
    }
}

fn sorted(set: Option<&HashSet<String>>) -> Vec<String> {
    let mut keys: Vec<String> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
    keys.sort_unstable();
    keys
}

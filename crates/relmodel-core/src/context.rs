//! Execution contexts: per-call-chain key/value bags.
//!
//! Every logical call chain owns an [`ExecutionContext`]. Values published
//! into it (the active transaction, the model registry) are visible to every
//! operation the chain hands its context to. A child chain created with
//! [`ExecutionContext::spawn_child`] shares its parent's bag by reference and
//! only gets a private copy the first time it publishes, so a child never
//! writes into its parent. Dropping a context removes its entry from the
//! [`ContextStore`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A value stored in a context bag.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

type Bag = Arc<Mutex<HashMap<String, ContextValue>>>;

/// Identity of one call chain in a [`ContextStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

struct ChainEntry {
    bag: Bag,
    /// False while the bag is still shared with the chain it was inherited from.
    owned: bool,
}

/// Process-wide map from chain identity to that chain's bag.
pub struct ContextStore {
    next_id: AtomicU64,
    chains: Mutex<HashMap<ChainId, ChainEntry>>,
}

impl ContextStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            chains: Mutex::new(HashMap::new()),
        })
    }

    /// Start a new top-level chain with an empty bag.
    pub fn root(self: &Arc<Self>) -> ExecutionContext {
        let id = self.allocate();
        self.chains().insert(
            id,
            ChainEntry {
                bag: Arc::new(Mutex::new(HashMap::new())),
                owned: true,
            },
        );
        tracing::trace!(chain = %id, "root execution context created");
        ExecutionContext {
            id,
            store: Arc::clone(self),
        }
    }

    /// Number of live chains.
    pub fn len(&self) -> usize {
        self.chains().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains().is_empty()
    }

    fn allocate(&self) -> ChainId {
        ChainId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn chains(&self) -> MutexGuard<'_, HashMap<ChainId, ChainEntry>> {
        self.chains
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn spawn(&self, parent: ChainId) -> ChainId {
        let id = self.allocate();
        let mut chains = self.chains();
        let bag = chains.get(&parent).map_or_else(
            || Arc::new(Mutex::new(HashMap::new())),
            |entry| Arc::clone(&entry.bag),
        );
        chains.insert(id, ChainEntry { bag, owned: false });
        tracing::trace!(chain = %id, parent = %parent, "child execution context created");
        id
    }

    fn publish(&self, chain: ChainId, key: &str, value: ContextValue) {
        let mut chains = self.chains();
        let Some(entry) = chains.get_mut(&chain) else {
            return;
        };
        if !entry.owned {
            let copy = lock_bag(&entry.bag).clone();
            entry.bag = Arc::new(Mutex::new(copy));
            entry.owned = true;
        }
        lock_bag(&entry.bag).insert(key.to_string(), value);
    }

    fn get(&self, chain: ChainId, key: &str) -> Option<ContextValue> {
        let chains = self.chains();
        let entry = chains.get(&chain)?;
        lock_bag(&entry.bag).get(key).cloned()
    }

    fn remove(&self, chain: ChainId) {
        self.chains().remove(&chain);
        tracing::trace!(chain = %chain, "execution context discarded");
    }
}

fn lock_bag(bag: &Bag) -> MutexGuard<'_, HashMap<String, ContextValue>> {
    bag.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("chains", &self.len())
            .finish()
    }
}

/// Handle to one call chain's bag.
///
/// Not `Clone`: a chain has exactly one owner, and continuing work on the
/// same chain borrows the handle. Hand a new task its own chain with
/// [`spawn_child`](Self::spawn_child).
pub struct ExecutionContext {
    id: ChainId,
    store: Arc<ContextStore>,
}

impl ExecutionContext {
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// The store this chain lives in.
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Create a child chain that inherits this chain's current bag.
    pub fn spawn_child(&self) -> ExecutionContext {
        ExecutionContext {
            id: self.store.spawn(self.id),
            store: Arc::clone(&self.store),
        }
    }

    /// Publish a value under `key` for this chain (and children spawned
    /// from it afterwards).
    pub fn publish<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) {
        self.store.publish(self.id, key, value);
    }

    /// Look up a value published under `key` with the expected type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.store
            .get(self.id, key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.get(self.id, key).is_some()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.store.remove(self.id);
    }
}

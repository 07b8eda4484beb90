//! Bidirectional name ↔ id table.
//!
//! Lookups of already-interned names only take a shard read lock, so the hot
//! path (an instrumented method re-entering a known class) never contends with
//! other readers. Allocation takes the write lock of a single shard and
//! re-checks before drawing an id from the shared atomic counter, so two
//! racing callers can never assign two ids to the same name.

use crate::tracing_compat::warn;
use crate::types::SymbolId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Name returned for the null symbol.
pub const NULL_SYMBOL_NAME: &str = "<null>";
/// Name returned for ids the registry has never seen.
pub const UNKNOWN_SYMBOL_NAME: &str = "<?>";

const DEFAULT_SHARDS: usize = 16;

/// Concurrent symbol table.
///
/// # Example
///
/// ```
/// use calltrace::symbol::SymbolRegistry;
///
/// let registry = SymbolRegistry::new();
/// let id = registry.id("com.example.Service");
/// assert_eq!(registry.id("com.example.Service"), id);
/// assert_eq!(registry.name(id), "com.example.Service");
/// assert!(registry.id(None).is_null());
/// ```
#[derive(Debug)]
pub struct SymbolRegistry {
    by_name: Box<[RwLock<HashMap<Arc<str>, SymbolId>>]>,
    by_id: Box<[RwLock<HashMap<u32, Arc<str>>>]>,
    /// Next id to hand out. Never below 1.
    next_id: AtomicU32,
}

impl SymbolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates an empty registry with the given number of lock shards.
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            by_name: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            by_id: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Returns the id of `name`, allocating one if the name is new.
    ///
    /// `None` maps to the null symbol.
    pub fn id<'a>(&self, name: impl Into<Option<&'a str>>) -> SymbolId {
        let Some(name) = name.into() else {
            return SymbolId::NULL;
        };

        let shard = &self.by_name[self.name_shard(name)];
        if let Some(id) = shard.read().get(name) {
            return *id;
        }

        let mut names = shard.write();
        if let Some(id) = names.get(name) {
            return *id;
        }

        let raw = self.next_id.fetch_add(1, Ordering::AcqRel);
        let key: Arc<str> = Arc::from(name);
        // Reverse entry first: once the id is observable its name must resolve.
        self.by_id[self.id_shard(raw)]
            .write()
            .insert(raw, Arc::clone(&key));
        let id = SymbolId::new(raw);
        names.insert(key, id);
        id
    }

    /// Shorthand for [`id`](Self::id) with a present name.
    #[inline]
    pub fn id_of(&self, name: &str) -> SymbolId {
        self.id(Some(name))
    }

    /// Returns the id of `name` if it was already interned. Never allocates.
    pub fn try_id(&self, name: &str) -> Option<SymbolId> {
        self.by_name[self.name_shard(name)].read().get(name).copied()
    }

    /// Returns the name of `id`, or a sentinel for the null and unknown ids.
    pub fn name(&self, id: SymbolId) -> String {
        if id.is_null() {
            return NULL_SYMBOL_NAME.to_string();
        }
        self.lookup(id)
            .map_or_else(|| UNKNOWN_SYMBOL_NAME.to_string(), |name| name.to_string())
    }

    /// Returns the interned name of `id` without copying it.
    pub fn lookup(&self, id: SymbolId) -> Option<Arc<str>> {
        let raw = id.as_u32();
        self.by_id[self.id_shard(raw)].read().get(&raw).cloned()
    }

    /// Installs a mapping received from elsewhere.
    ///
    /// Used on the receiving side of a stream to mirror the sender's ids. The
    /// allocation counter is moved past `id` so locally interned names never
    /// collide with installed ones. Installing the null id is ignored.
    ///
    /// Names and ids stay one-to-one: a mapping that conflicts with an
    /// existing one is logged and dropped, and the existing one kept.
    pub fn put(&self, id: SymbolId, name: &str) {
        if id.is_null() {
            return;
        }
        let raw = id.as_u32();
        let mut names = self.by_name[self.name_shard(name)].write();
        let mut ids = self.by_id[self.id_shard(raw)].write();
        let known_id = names.get(name).copied();
        let known_name = ids.get(&raw).cloned();
        match (known_id, known_name) {
            (Some(known), _) if known != id => {
                warn!(symbol = name, id = %id, existing = %known, "symbol name already mapped, keeping existing id");
            }
            (_, Some(known)) if &*known != name => {
                warn!(symbol = name, id = %id, existing = %known, "symbol id already mapped, keeping existing name");
            }
            (Some(_), Some(_)) => {}
            _ => {
                let key: Arc<str> = Arc::from(name);
                ids.insert(raw, Arc::clone(&key));
                names.insert(key, id);
                self.next_id
                    .fetch_max(raw.saturating_add(1), Ordering::AcqRel);
            }
        }
    }

    /// Returns the number of interned names.
    pub fn len(&self) -> usize {
        self.by_name.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns true if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the highest id allocated or installed so far (0 if none).
    pub fn last_id(&self) -> SymbolId {
        SymbolId::new(self.next_id.load(Ordering::Acquire).saturating_sub(1))
    }

    /// Returns every mapping, ordered by id.
    pub fn snapshot(&self) -> Vec<(SymbolId, String)> {
        let mut all: Vec<(SymbolId, String)> = self
            .by_id
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(raw, name)| (SymbolId::new(*raw), name.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    fn name_shard(&self, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        hasher.finish() as usize % self.by_name.len()
    }

    fn id_shard(&self, raw: u32) -> usize {
        raw as usize % self.by_id.len()
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Stream-scoped record of which definitions were already sent.

use crate::types::SymbolId;

/// Growable set of small integers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitVector {
    words: Vec<u64>,
}

impl BitVector {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Returns true if `index` is in the set.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        let (word, bit) = Self::locate(index);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// Adds `index`. Returns true if it was not present.
    pub fn insert(&mut self, index: u32) -> bool {
        let (word, bit) = Self::locate(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let fresh = self.words[word] & bit == 0;
        self.words[word] |= bit;
        fresh
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Removes every member, keeping the allocation.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    const fn locate(index: u32) -> (usize, u64) {
        ((index / 64) as usize, 1 << (index % 64))
    }
}

/// What the other end of a stream already knows.
///
/// Both ends keep one: the writer to decide which definitions to emit, the
/// reader to reject references to definitions it never received.
#[derive(Debug, Clone, Default)]
pub struct Disclosure {
    symbols: BitVector,
    metrics: BitVector,
    templates: BitVector,
}

impl Disclosure {
    /// Creates an empty disclosure state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` disclosed. Returns true the first time; the null symbol is
    /// implicitly known and always returns false.
    pub fn disclose_symbol(&mut self, id: SymbolId) -> bool {
        !id.is_null() && self.symbols.insert(id.as_u32())
    }

    /// Returns true if `id` is the null symbol or was disclosed.
    #[must_use]
    pub fn knows_symbol(&self, id: SymbolId) -> bool {
        id.is_null() || self.symbols.contains(id.as_u32())
    }

    /// Marks a metric disclosed. Returns true the first time.
    pub fn disclose_metric(&mut self, id: u32) -> bool {
        self.metrics.insert(id)
    }

    /// Returns true if the metric was disclosed.
    #[must_use]
    pub fn knows_metric(&self, id: u32) -> bool {
        self.metrics.contains(id)
    }

    /// Marks a template disclosed. Returns true the first time.
    pub fn disclose_template(&mut self, id: u32) -> bool {
        self.templates.insert(id)
    }

    /// Returns true if the template was disclosed.
    #[must_use]
    pub fn knows_template(&self, id: u32) -> bool {
        self.templates.contains(id)
    }

    /// Returns the number of symbols disclosed so far.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Forgets everything. Called at every stream boundary.
    pub fn reset(&mut self) {
        self.symbols.clear();
        self.metrics.clear();
        self.templates.clear();
    }
}

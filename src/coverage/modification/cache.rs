use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of a class: its binary name, within one class loader
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey {
    pub name: String,
    pub loader_id: u64,
}

impl ClassKey {
    pub fn new(name: impl Into<String>, loader_id: u64) -> ClassKey {
        ClassKey {
            name: name.into(),
            loader_id,
        }
    }
}

/// Work done on classes so far, so that no class is instrumented twice
///
/// One cache is shared by everything that modifies classes over a test run. Entries are only
/// dropped by [`ModificationCache::clear`], at the end of the run.
#[derive(Debug, Default)]
pub struct ModificationCache {
    /// Instrumented bytecode of every class modified so far
    modified: Mutex<HashMap<ClassKey, Arc<[u8]>>>,

    /// Nested classes instrumented along with their outer class, but not yet asked for
    nested: Mutex<HashMap<ClassKey, Arc<[u8]>>>,

    /// Whether a class was selected for coverage
    decisions: Mutex<HashMap<ClassKey, bool>>,
}

impl ModificationCache {
    pub fn new() -> ModificationCache {
        ModificationCache::default()
    }

    pub fn modified_bytes(&self, key: &ClassKey) -> Option<Arc<[u8]>> {
        self.modified.lock().get(key).cloned()
    }

    pub fn is_modified(&self, key: &ClassKey) -> bool {
        self.modified.lock().contains_key(key)
    }

    pub fn modified_count(&self) -> usize {
        self.modified.lock().len()
    }

    /// Names of the classes modified so far, sorted
    pub fn modified_classes(&self) -> Vec<ClassKey> {
        let mut keys: Vec<ClassKey> = self.modified.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Record the instrumented bytecode of a class, unless another thread got there first
    ///
    /// Returns the bytecode that ends up in the cache.
    pub fn record_modified(&self, key: ClassKey, bytes: Vec<u8>) -> Arc<[u8]> {
        self.modified
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::from(bytes))
            .clone()
    }

    pub fn contains_nested(&self, key: &ClassKey) -> bool {
        self.nested.lock().contains_key(key) || self.is_modified(key)
    }

    /// Keep the instrumented bytecode of a nested class until it is asked for
    ///
    /// Returns `false` if there already was bytecode for that class.
    pub fn insert_nested_if_absent(&self, key: ClassKey, bytes: Vec<u8>) -> bool {
        let mut nested = self.nested.lock();
        if nested.contains_key(&key) {
            return false;
        }
        nested.insert(key, Arc::from(bytes));
        true
    }

    pub fn take_nested(&self, key: &ClassKey) -> Option<Arc<[u8]>> {
        self.nested.lock().remove(key)
    }

    /// Selection decision for a class, computed on first use
    pub fn decision(&self, key: &ClassKey, decide: impl FnOnce() -> bool) -> bool {
        if let Some(&decision) = self.decisions.lock().get(key) {
            return decision;
        }
        let decision = decide();
        *self.decisions.lock().entry(key.clone()).or_insert(decision)
    }

    /// Forget everything, at the end of a run
    pub fn clear(&self) {
        self.modified.lock().clear();
        self.nested.lock().clear();
        self.decisions.lock().clear();
    }
}

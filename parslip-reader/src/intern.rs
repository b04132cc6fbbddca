// parslip-reader - Shared interner for namespace/name pairs
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The interner backing both symbols and keywords.
//!
//! Symbols and keywords are interned pairs of optional namespace and name:
//! two values with the same namespace and name share one allocation, so
//! equality is a pointer comparison and hashing is a pointer hash. Interned
//! pairs are never deallocated; the tables hold strong references for the
//! life of the program. Symbols and keywords intern into *separate* tables
//! (`'foo` and `:foo` are unrelated values), so the table is a value here
//! and each caller owns its own static instance.
//!
//! The tables are behind `Mutex`es, making creation thread-safe; lookup
//! and comparison after creation are lock-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An interned (namespace, name) pair.
#[derive(Debug)]
pub(crate) struct NameInner {
    pub(crate) namespace: Option<Arc<str>>,
    pub(crate) name: Arc<str>,
}

type InternerKey = (Option<Arc<str>>, Arc<str>);

/// One interning table: pairs plus a string pool shared between them.
pub(crate) struct Interner {
    names: HashMap<InternerKey, Arc<NameInner>>,
    strings: HashMap<String, Arc<str>>,
}

impl Interner {
    pub(crate) fn new() -> Self {
        Interner {
            names: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    fn intern_string(&mut self, s: &str) -> Arc<str> {
        if let Some(interned) = self.strings.get(s) {
            Arc::clone(interned)
        } else {
            let interned: Arc<str> = Arc::from(s);
            self.strings.insert(s.to_string(), Arc::clone(&interned));
            interned
        }
    }

    pub(crate) fn intern(&mut self, namespace: Option<&str>, name: &str) -> Arc<NameInner> {
        let ns = namespace.map(|s| self.intern_string(s));
        let n = self.intern_string(name);

        let key = (ns.clone(), n.clone());
        if let Some(existing) = self.names.get(&key) {
            Arc::clone(existing)
        } else {
            let inner = Arc::new(NameInner {
                namespace: ns,
                name: n,
            });
            self.names.insert(key, Arc::clone(&inner));
            inner
        }
    }
}

/// Lock a table and intern, mapping a poisoned lock to a clear panic.
pub(crate) fn intern_in(
    table: &'static Mutex<Interner>,
    namespace: Option<&str>,
    name: &str,
) -> Arc<NameInner> {
    table
        .lock()
        .expect("interner mutex poisoned: another thread panicked while holding the lock")
        .intern(namespace, name)
}

// ============================================================================
// Tests
// ============================================================================

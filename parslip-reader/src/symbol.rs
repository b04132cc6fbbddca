// parslip-reader - Symbol type
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Symbols: identifiers with an optional namespace, interned globally (see
//! the interner module for the sharing and memory behaviour).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use crate::intern::{Interner, NameInner, intern_in};

/// A symbol with optional namespace.
///
/// Two symbols with the same namespace and name share storage, so equality
/// and hashing are pointer operations.
#[derive(Clone)]
pub struct Symbol {
    inner: Arc<NameInner>,
}

static SYMBOL_INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();

fn interner() -> &'static Mutex<Interner> {
    SYMBOL_INTERNER.get_or_init(|| Mutex::new(Interner::new()))
}

impl Symbol {
    /// Create a symbol with no namespace.
    pub fn new(name: &str) -> Self {
        Symbol {
            inner: intern_in(interner(), None, name),
        }
    }

    /// Create a namespace-qualified symbol.
    pub fn with_namespace(namespace: &str, name: &str) -> Self {
        Symbol {
            inner: intern_in(interner(), Some(namespace), name),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn has_namespace(&self) -> bool {
        self.inner.namespace.is_some()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.inner.namespace {
            write!(f, "{}/{}", ns, self.inner.name)
        } else {
            write!(f, "{}", self.inner.name)
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        // Interning makes pointer comparison sufficient
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Symbol {}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (&self.inner.namespace, &other.inner.namespace) {
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, None) => self.inner.name.cmp(&other.inner.name),
            (Some(a), Some(b)) => match a.cmp(b) {
                std::cmp::Ordering::Equal => self.inner.name.cmp(&other.inner.name),
                other => other,
            },
        }
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

// ============================================================================
// Tests
// ============================================================================

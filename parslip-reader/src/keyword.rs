// parslip-reader - Keyword type
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Keywords: self-evaluating identifiers with an optional namespace,
//! interned globally in a table separate from symbols.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use crate::intern::{Interner, NameInner, intern_in};

/// A keyword with optional namespace. Prints with a leading `:`.
#[derive(Clone)]
pub struct Keyword {
    inner: Arc<NameInner>,
}

static KEYWORD_INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();

fn interner() -> &'static Mutex<Interner> {
    KEYWORD_INTERNER.get_or_init(|| Mutex::new(Interner::new()))
}

impl Keyword {
    /// Create a keyword with no namespace.
    pub fn new(name: &str) -> Self {
        Keyword {
            inner: intern_in(interner(), None, name),
        }
    }

    /// Create a namespace-qualified keyword.
    pub fn with_namespace(namespace: &str, name: &str) -> Self {
        Keyword {
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

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.inner.namespace {
            write!(f, ":{}/{}", ns, self.inner.name)
        } else {
            write!(f, ":{}", self.inner.name)
        }
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyword({})", self)
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Keyword {}

impl PartialOrd for Keyword {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Keyword {
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

impl Hash for Keyword {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

// ============================================================================
// Tests
// ============================================================================

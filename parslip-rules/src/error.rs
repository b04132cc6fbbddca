// parslip-rules - Hard-failure type
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Hard failures.
//!
//! A [`Halt`] is not a parse mismatch: it aborts the whole run, propagating
//! through every combinator via `?` without backtracking, and surfaces to
//! the matcher driver's caller.

use std::fmt;

/// A hard failure raised from inside a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub message: String,
    pub position: usize,
}

impl Halt {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Halt {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse halted at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for Halt {}

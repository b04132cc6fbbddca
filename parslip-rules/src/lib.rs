// parslip-rules - Parser combinators over token streams
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # parslip-rules
//!
//! A small algebra of first-class parse rules. A [`Rule`] consumes tokens
//! from an immutable [`State`], producing a typed product on success, a
//! backtrackable soft failure, or a [`Halt`] that escapes the algebra
//! entirely. Combinators cover sequencing, ordered choice, repetition,
//! lookahead, negative lookahead, subtraction, semantic transforms, and
//! opt-in per-position memoization (with seed-growing left recursion).

pub mod chars;
pub mod error;
pub mod matcher;
pub mod rule;
pub mod state;

pub use error::Halt;
pub use matcher::{MatchOutcome, match_rule, match_with};
pub use rule::{
    Forward, Outcome, Rule, RuleId, RuleResult, anything, choice, emptiness, end_of_input,
    get_context, get_state, halt, inspect, lit, nothing, sequence, set_context, set_state, term,
    update_context,
};
pub use state::State;

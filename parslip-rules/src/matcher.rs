// parslip-rules - Matcher driver
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runs a top-level rule against an initial state, enforcing match-to-end.

use crate::error::Halt;
use crate::rule::{Outcome, Rule};
use crate::state::State;

/// How a top-level match ended.
#[derive(Debug)]
pub enum MatchOutcome<K, C, T> {
    /// The rule matched and consumed the whole input.
    Complete(T),
    /// The rule failed softly. Carries the initial state.
    Failed(State<K, C>),
    /// The rule matched but input remains.
    Incomplete {
        product: T,
        rest: State<K, C>,
        initial: State<K, C>,
    },
}

/// Run `rule` against `state`, requiring it to consume the whole input.
/// Hard failures pass straight through.
pub fn match_rule<K: 'static, C: Clone + 'static, T: 'static>(
    rule: &Rule<K, C, T>,
    state: State<K, C>,
) -> Result<MatchOutcome<K, C, T>, Halt> {
    let initial = state.clone();
    match rule.apply(state)? {
        Outcome::Parsed(product, rest) => {
            if rest.is_at_end() {
                Ok(MatchOutcome::Complete(product))
            } else {
                Ok(MatchOutcome::Incomplete {
                    product,
                    rest,
                    initial,
                })
            }
        }
        Outcome::Failed => Ok(MatchOutcome::Failed(initial)),
    }
}

/// Callback-shaped driver: `on_failure` sees the initial state on soft
/// failure; `on_incomplete` sees the product, the rest, and the initial
/// state when input remains. Pass closures returning `None` to mirror the
/// nil-producing defaults.
pub fn match_with<K: 'static, C: Clone + 'static, T: 'static>(
    rule: &Rule<K, C, T>,
    state: State<K, C>,
    on_failure: impl FnOnce(&State<K, C>) -> Option<T>,
    on_incomplete: impl FnOnce(T, &State<K, C>, &State<K, C>) -> Option<T>,
) -> Result<Option<T>, Halt> {
    match match_rule(rule, state)? {
        MatchOutcome::Complete(product) => Ok(Some(product)),
        MatchOutcome::Failed(initial) => Ok(on_failure(&initial)),
        MatchOutcome::Incomplete {
            product,
            rest,
            initial,
        } => Ok(on_incomplete(product, &rest, &initial)),
    }
}

// ============================================================================
// Tests
// ============================================================================

// parslip-rules - Character-level rule kit
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Convenience rules over character tokens.

use crate::rule::{Outcome, Rule, anything, term};
use crate::state::State;

/// Build a character-token state from a source string.
pub fn char_state<C>(source: &str, context: C) -> State<char, C> {
    State::new(source.chars().collect::<Vec<char>>(), context)
}

/// Match the characters of `text` in order; the product is the matched
/// text.
pub fn lit_str<C: Clone + 'static>(text: &str) -> Rule<char, C, String> {
    let chars: Vec<char> = text.chars().collect();
    Rule::new(move |state| {
        let mut current = state;
        for expected in &chars {
            match current.peek() {
                Some(c) if c == expected => current = current.advance(),
                _ => return Ok(Outcome::Failed),
            }
        }
        Ok(Outcome::Parsed(chars.iter().collect(), current))
    })
}

/// Match any one character of `set`.
pub fn one_of<C: Clone + 'static>(label: &'static str, set: &'static str) -> Rule<char, C, char> {
    term(move |c: &char| set.contains(*c)).label(label)
}

/// Match any one character except `unwanted`.
pub fn not_char<C: Clone + 'static>(unwanted: char) -> Rule<char, C, char> {
    term(move |c: &char| *c != unwanted)
}

/// Match any one character at which `forbidden` would fail.
pub fn any_except<C: Clone + 'static, T: 'static>(
    label: &'static str,
    forbidden: Rule<char, C, T>,
) -> Rule<char, C, char> {
    anything().except(forbidden).label(label)
}

/// Match one digit of the given base (2 to 36), yielding its value.
/// Letter digits match either case.
pub fn radix_digit<C: Clone + 'static>(base: u32) -> Rule<char, C, u32> {
    assert!((2..=36).contains(&base), "radix must be in 2..=36");
    Rule::new(move |state| match state.peek().and_then(|c: &char| c.to_digit(base)) {
        Some(value) => Ok(Outcome::Parsed(value, state.advance())),
        None => Ok(Outcome::Failed),
    })
}

// ============================================================================
// Tests
// ============================================================================

// parslip-rules - Rule algebra
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Rules and the combinators that build them.
//!
//! A [`Rule`] is a first-class value: a reference-counted closure from
//! [`State`] to [`RuleResult`], plus a stable identity assigned at
//! construction time (memo keys pair that identity with a position).
//!
//! Failure comes in two strengths. A *soft* failure is the ordinary result
//! of a non-matching rule: it carries nothing, and the caller simply
//! continues with its own pre-call state, so `choice`, `opt`, `many`,
//! `except`, and `not_ahead` consume it silently. A *hard* failure is a
//! [`Halt`]: it propagates out of every combinator with `?` and reaches the
//! matcher driver's caller without any backtracking.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Halt;
use crate::state::{MemoEntry, State};

/// Stable rule identity, assigned once at construction.
///
/// Two structurally identical rules get distinct ids: identity, not shape,
/// is what memoization keys on, since two rules of the same shape may
/// differ in attached side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RuleId(u32);

impl RuleId {
    fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        RuleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The soft outcome of running a rule.
#[derive(Debug)]
pub enum Outcome<K, C, T> {
    /// The rule matched: the product plus the successor state.
    Parsed(T, State<K, C>),
    /// The rule did not match. Carries nothing; the caller resumes with
    /// the state it already holds.
    Failed,
}

impl<K, C, T> Outcome<K, C, T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }

    /// The product, discarding the state.
    pub fn product(self) -> Option<T> {
        match self {
            Outcome::Parsed(product, _) => Some(product),
            Outcome::Failed => None,
        }
    }
}

/// What running a rule yields: a soft outcome, or a hard [`Halt`].
pub type RuleResult<K, C, T> = Result<Outcome<K, C, T>, Halt>;

/// A first-class parse step over a token stream.
pub struct Rule<K, C, T> {
    id: RuleId,
    label: Option<Rc<str>>,
    run: Rc<dyn Fn(State<K, C>) -> RuleResult<K, C, T>>,
}

impl<K, C, T> Clone for Rule<K, C, T> {
    fn clone(&self) -> Self {
        Rule {
            id: self.id,
            label: self.label.clone(),
            run: Rc::clone(&self.run),
        }
    }
}

impl<K, C, T> fmt::Debug for Rule<K, C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl<K: 'static, C: Clone + 'static, T: 'static> Rule<K, C, T> {
    pub fn new(run: impl Fn(State<K, C>) -> RuleResult<K, C, T> + 'static) -> Self {
        Rule {
            id: RuleId::fresh(),
            label: None,
            run: Rc::new(run),
        }
    }

    fn with_id(id: RuleId, run: impl Fn(State<K, C>) -> RuleResult<K, C, T> + 'static) -> Self {
        Rule {
            id,
            label: None,
            run: Rc::new(run),
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    /// Run this rule against a state.
    pub fn apply(&self, state: State<K, C>) -> RuleResult<K, C, T> {
        (self.run)(state)
    }

    /// Attach a diagnostic label. Semantically a no-op.
    pub fn label(mut self, text: impl Into<Rc<str>>) -> Self {
        self.label = Some(text.into());
        self
    }

    pub fn label_text(&self) -> Option<&str> {
        self.label.as_deref()
    }

    // ------------------------------------------------------------------
    // Semantic transforms
    // ------------------------------------------------------------------

    /// Replace the product with `f(product)`.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Rule<K, C, U> {
        Rule::new(move |state| match self.apply(state)? {
            Outcome::Parsed(product, next) => Ok(Outcome::Parsed(f(product), next)),
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// Replace the product with a constant.
    pub fn constant<U: Clone + 'static>(self, product: U) -> Rule<K, C, U> {
        self.map(move |_| product.clone())
    }

    /// Succeed only when the product satisfies `pred`.
    pub fn validate(self, pred: impl Fn(&T) -> bool + 'static) -> Rule<K, C, T> {
        Rule::new(move |state| match self.apply(state)? {
            Outcome::Parsed(product, next) if pred(&product) => Ok(Outcome::Parsed(product, next)),
            _ => Ok(Outcome::Failed),
        })
    }

    /// Succeed only when the product does *not* satisfy `pred`. The label
    /// is diagnostic only.
    pub fn exclude(self, label: &'static str, pred: impl Fn(&T) -> bool + 'static) -> Rule<K, C, T> {
        self.validate(move |product| !pred(product)).label(label)
    }

    // ------------------------------------------------------------------
    // Sequencing and choice
    // ------------------------------------------------------------------

    /// Sequential composition of a pair.
    pub fn then<U: 'static>(self, next: Rule<K, C, U>) -> Rule<K, C, (T, U)> {
        Rule::new(move |state| match self.apply(state)? {
            Outcome::Parsed(left, mid) => match next.apply(mid)? {
                Outcome::Parsed(right, out) => Ok(Outcome::Parsed((left, right), out)),
                Outcome::Failed => Ok(Outcome::Failed),
            },
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// Monadic bind: the continuation sees the product and picks the next
    /// rule, which makes context-sensitive grammars expressible.
    pub fn and_then<U: 'static>(self, f: impl Fn(T) -> Rule<K, C, U> + 'static) -> Rule<K, C, U> {
        Rule::new(move |state| match self.apply(state)? {
            Outcome::Parsed(product, mid) => f(product).apply(mid),
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// Ordered choice of a pair; see [`choice`] for the n-ary form.
    pub fn or(self, other: Rule<K, C, T>) -> Rule<K, C, T> {
        Rule::new(move |state| match self.apply(state.clone())? {
            Outcome::Parsed(product, next) => Ok(Outcome::Parsed(product, next)),
            Outcome::Failed => other.apply(state),
        })
    }

    /// Match both, keep this rule's product.
    pub fn after<U: 'static>(self, pre: Rule<K, C, U>) -> Rule<K, C, T> {
        pre.then(self).map(|(_, product)| product)
    }

    /// Match both, keep this rule's product.
    pub fn before<U: 'static>(self, post: Rule<K, C, U>) -> Rule<K, C, T> {
        self.then(post).map(|(product, _)| product)
    }

    /// Match open, body, close; keep the body's product.
    pub fn between<A: 'static, B: 'static>(
        self,
        open: Rule<K, C, A>,
        close: Rule<K, C, B>,
    ) -> Rule<K, C, T> {
        self.after(open).before(close)
    }

    // ------------------------------------------------------------------
    // Repetition
    // ------------------------------------------------------------------

    /// Greedy zero-or-more. Never fails; the product is the (possibly
    /// empty) ordered collection of sub-products.
    ///
    /// Deliberately a loop rather than recursion through `many1`: deep
    /// repetitions must not grow the call stack.
    pub fn many(self) -> Rule<K, C, Vec<T>> {
        Rule::new(move |state| {
            let mut products = Vec::new();
            let mut current = state;
            loop {
                match self.apply(current.clone())? {
                    Outcome::Parsed(product, next) => {
                        // A zero-width match cannot make progress; keep it
                        // once and stop.
                        let stalled = next.position() == current.position();
                        products.push(product);
                        current = next;
                        if stalled {
                            break;
                        }
                    }
                    Outcome::Failed => break,
                }
            }
            Ok(Outcome::Parsed(products, current))
        })
    }

    /// One-or-more: fails iff the first application fails.
    pub fn many1(self) -> Rule<K, C, Vec<T>> {
        let head = self.clone();
        Rule::new(move |state| match head.apply(state)? {
            Outcome::Parsed(first, start) => {
                let mut products = vec![first];
                let mut current = start;
                loop {
                    match self.apply(current.clone())? {
                        Outcome::Parsed(product, next) => {
                            let stalled = next.position() == current.position();
                            products.push(product);
                            current = next;
                            if stalled {
                                break;
                            }
                        }
                        Outcome::Failed => break,
                    }
                }
                Ok(Outcome::Parsed(products, current))
            }
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// Greedy repetition validated to exactly `n` matches.
    pub fn many_exact(self, n: usize) -> Rule<K, C, Vec<T>> {
        self.many().validate(move |products| products.len() == n)
    }

    /// Greedy repetition validated to fewer than `n` matches.
    pub fn many_under(self, n: usize) -> Rule<K, C, Vec<T>> {
        self.many().validate(move |products| products.len() < n)
    }

    /// Greedy repetition validated to at most `n` matches.
    pub fn many_at_most(self, n: usize) -> Rule<K, C, Vec<T>> {
        self.many().validate(move |products| products.len() <= n)
    }

    /// Exactly `n` in sequence (not greedy-then-validated: the `n`-fold
    /// sequential composition).
    pub fn times(self, n: usize) -> Rule<K, C, Vec<T>>
    where
        T: Clone,
    {
        sequence((0..n).map(|_| self.clone()))
    }

    /// `n - 1` in sequence, falling back to fewer-than-`n` greedy. Never
    /// fails for `n >= 1`.
    pub fn times_under(self, n: usize) -> Rule<K, C, Vec<T>>
    where
        T: Clone,
    {
        if n == 0 {
            return nothing();
        }
        self.clone().times(n - 1).or(self.many_under(n))
    }

    /// `n` in sequence, falling back to at-most-`n` greedy.
    pub fn times_at_most(self, n: usize) -> Rule<K, C, Vec<T>>
    where
        T: Clone,
    {
        self.clone().times(n).or(self.many_at_most(n))
    }

    /// One-or-more folded into an accumulator in a single pass: the first
    /// product seeds via `init`, the rest fold via `step`.
    pub fn fold1<A: 'static>(
        self,
        init: impl Fn(T) -> A + 'static,
        step: impl Fn(A, T) -> A + 'static,
    ) -> Rule<K, C, A> {
        Rule::new(move |state| match self.apply(state)? {
            Outcome::Parsed(first, start) => {
                let mut acc = init(first);
                let mut current = start;
                loop {
                    match self.apply(current.clone())? {
                        Outcome::Parsed(product, next) => {
                            let stalled = next.position() == current.position();
                            acc = step(acc, product);
                            current = next;
                            if stalled {
                                break;
                            }
                        }
                        Outcome::Failed => break,
                    }
                }
                Ok(Outcome::Parsed(acc, current))
            }
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// `opt`: always succeeds, with `None` when the rule fails.
    pub fn opt(self) -> Rule<K, C, Option<T>> {
        Rule::new(move |state| match self.apply(state.clone())? {
            Outcome::Parsed(product, next) => Ok(Outcome::Parsed(Some(product), next)),
            Outcome::Failed => Ok(Outcome::Parsed(None, state)),
        })
    }

    // ------------------------------------------------------------------
    // Lookahead and subtraction
    // ------------------------------------------------------------------

    /// Lookahead: yields the product but restores the pre-call state.
    pub fn ahead(self) -> Rule<K, C, T> {
        Rule::new(move |state| match self.apply(state.clone())? {
            Outcome::Parsed(product, _) => Ok(Outcome::Parsed(product, state)),
            Outcome::Failed => Ok(Outcome::Failed),
        })
    }

    /// Negative lookahead: succeeds iff this rule fails; never consumes.
    pub fn not_ahead(self) -> Rule<K, C, ()> {
        Rule::new(move |state| match self.apply(state.clone())? {
            Outcome::Parsed(..) => Ok(Outcome::Failed),
            Outcome::Failed => Ok(Outcome::Parsed((), state)),
        })
    }

    /// Subtraction: succeeds with this rule's product iff this rule
    /// succeeds *and* `forbidden` fails at the same pre-call state.
    pub fn except<U: 'static>(self, forbidden: Rule<K, C, U>) -> Rule<K, C, T> {
        Rule::new(move |state| {
            let start = state.clone();
            match self.apply(state)? {
                Outcome::Parsed(product, next) => match forbidden.apply(start)? {
                    Outcome::Parsed(..) => Ok(Outcome::Failed),
                    Outcome::Failed => Ok(Outcome::Parsed(product, next)),
                },
                Outcome::Failed => Ok(Outcome::Failed),
            }
        })
    }

    /// An atomic unit at the grammar level. Failure never consumes in this
    /// algebra, so this is documentation rather than behavior.
    pub fn atomic(self) -> Rule<K, C, T> {
        self
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    /// On soft failure, hand the pre-call state to `hook` and return its
    /// result as the rule result. The typical hook raises a [`Halt`].
    pub fn on_fail(
        self,
        hook: impl Fn(&State<K, C>) -> RuleResult<K, C, T> + 'static,
    ) -> Rule<K, C, T> {
        Rule::new(move |state| {
            let start = state.clone();
            match self.apply(state)? {
                Outcome::Parsed(product, next) => Ok(Outcome::Parsed(product, next)),
                Outcome::Failed => hook(&start),
            }
        })
    }

    /// Turn soft failure into a hard [`Halt`] with the given message.
    pub fn require(self, message: impl Into<Rc<str>>) -> Rule<K, C, T> {
        let message: Rc<str> = message.into();
        self.on_fail(move |state| Err(Halt::new(message.to_string(), state.position())))
    }

    /// Wrap evaluation: `hook` receives a thunk that runs this rule against
    /// the current state, and its return becomes the rule result. The hook
    /// may translate a [`Halt`] back into a soft failure, or refuse to run
    /// the thunk at all.
    pub fn intercept(
        self,
        hook: impl Fn(&mut dyn FnMut() -> RuleResult<K, C, T>) -> RuleResult<K, C, T> + 'static,
    ) -> Rule<K, C, T> {
        Rule::new(move |state| {
            let mut thunk = || self.apply(state.clone());
            hook(&mut thunk)
        })
    }

    // ------------------------------------------------------------------
    // Memoization
    // ------------------------------------------------------------------

    /// Cache `(rule identity, position) -> outcome` in the run's memo
    /// table. The first application at a position computes and stores; any
    /// later application at that position replays the stored outcome.
    ///
    /// Re-entering the same key while it is being computed is direct left
    /// recursion. The re-entry is answered with a failure seed, and once
    /// the outermost application finishes, the seed is grown: the body is
    /// re-run against the recorded result until the match stops
    /// lengthening.
    pub fn memoize(self) -> Rule<K, C, T>
    where
        T: Clone,
    {
        let id = self.id;
        Rule::with_id(id, move |state: State<K, C>| {
            let key = (id, state.position());
            {
                let memo = state.memo_handle().borrow();
                match memo.get(&key) {
                    Some(MemoEntry::Done(saved)) => {
                        let saved = Rc::clone(saved);
                        drop(memo);
                        return Ok(replay::<K, C, T>(&saved, &state));
                    }
                    Some(MemoEntry::InProgress(flag)) => {
                        flag.set(true);
                        return Ok(Outcome::Failed);
                    }
                    None => {}
                }
            }

            let flag = Rc::new(Cell::new(false));
            state
                .memo_handle()
                .borrow_mut()
                .insert(key, MemoEntry::InProgress(Rc::clone(&flag)));

            let first = match self.apply(state.clone()) {
                Ok(outcome) => outcome,
                Err(halt) => {
                    // Hard failures abort the run; leave no entry behind.
                    state.memo_handle().borrow_mut().remove(&key);
                    return Err(halt);
                }
            };

            if !flag.get() {
                state
                    .memo_handle()
                    .borrow_mut()
                    .insert(key, MemoEntry::Done(snapshot(&first)));
                return Ok(first);
            }

            // Left recursion: grow the seed.
            let mut best = first;
            loop {
                state
                    .memo_handle()
                    .borrow_mut()
                    .insert(key, MemoEntry::Done(snapshot(&best)));
                let next = match self.apply(state.clone()) {
                    Ok(outcome) => outcome,
                    Err(halt) => return Err(halt),
                };
                let grew = match (&next, &best) {
                    (Outcome::Parsed(_, n), Outcome::Parsed(_, b)) => n.position() > b.position(),
                    (Outcome::Parsed(..), Outcome::Failed) => true,
                    _ => false,
                };
                if grew {
                    best = next;
                } else {
                    break;
                }
            }
            state
                .memo_handle()
                .borrow_mut()
                .insert(key, MemoEntry::Done(snapshot(&best)));
            Ok(best)
        })
    }
}

// ============================================================================
// Memo snapshots
// ============================================================================

/// A finished outcome as stored in the memo table. The memo handle itself
/// is never captured (that would cycle the table through its own entries);
/// replaying rebuilds a state against the current run's table.
struct Snapshot<K, C, T> {
    product: T,
    tokens: Rc<[K]>,
    pos: usize,
    context: C,
}

type SavedOutcome<K, C, T> = Option<Snapshot<K, C, T>>;

fn snapshot<K: 'static, C: Clone + 'static, T: Clone + 'static>(
    outcome: &Outcome<K, C, T>,
) -> Rc<dyn Any> {
    let saved: SavedOutcome<K, C, T> = match outcome {
        Outcome::Parsed(product, next) => Some(Snapshot {
            product: product.clone(),
            tokens: next.tokens_handle(),
            pos: next.position(),
            context: next.context().clone(),
        }),
        Outcome::Failed => None,
    };
    Rc::new(saved)
}

fn replay<K: 'static, C: Clone + 'static, T: Clone + 'static>(
    saved: &Rc<dyn Any>,
    at: &State<K, C>,
) -> Outcome<K, C, T> {
    let saved = saved
        .downcast_ref::<SavedOutcome<K, C, T>>()
        .expect("memo entry stored under this rule id has this rule's product type");
    match saved {
        Some(snap) => Outcome::Parsed(
            snap.product.clone(),
            at.rebuilt(Rc::clone(&snap.tokens), snap.pos, snap.context.clone()),
        ),
        None => Outcome::Failed,
    }
}

// ============================================================================
// Primitive rules
// ============================================================================

/// Succeeds with the head token iff any tokens remain; consumes one.
pub fn anything<K: Clone + 'static, C: Clone + 'static>() -> Rule<K, C, K> {
    Rule::new(|state| match state.peek().cloned() {
        Some(token) => Ok(Outcome::Parsed(token, state.advance())),
        None => Ok(Outcome::Failed),
    })
}

/// Always succeeds; consumes nothing.
pub fn emptiness<K: 'static, C: Clone + 'static>() -> Rule<K, C, ()> {
    Rule::new(|state| Ok(Outcome::Parsed((), state)))
}

/// Always fails.
pub fn nothing<K: 'static, C: Clone + 'static, T: 'static>() -> Rule<K, C, T> {
    Rule::new(|_| Ok(Outcome::Failed))
}

/// Succeeds iff no tokens remain; consumes nothing.
pub fn end_of_input<K: 'static, C: Clone + 'static>() -> Rule<K, C, ()> {
    Rule::new(|state| {
        if state.is_at_end() {
            Ok(Outcome::Parsed((), state))
        } else {
            Ok(Outcome::Failed)
        }
    })
}

/// Succeeds with the head token iff it satisfies `pred`.
pub fn term<K: Clone + 'static, C: Clone + 'static>(
    pred: impl Fn(&K) -> bool + 'static,
) -> Rule<K, C, K> {
    anything().validate(pred)
}

/// Succeeds with the head token iff it equals `token`.
pub fn lit<K: Clone + PartialEq + 'static, C: Clone + 'static>(token: K) -> Rule<K, C, K> {
    term(move |t| *t == token)
}

/// Always hard-fails with the given message.
pub fn halt<K: 'static, C: Clone + 'static, T: 'static>(
    message: impl Into<Rc<str>>,
) -> Rule<K, C, T> {
    let message: Rc<str> = message.into();
    Rule::new(move |state| Err(Halt::new(message.to_string(), state.position())))
}

/// Succeeds with `()`, applying `f` to the state for its side effect.
/// Callers own idempotence: a backtracked-over `inspect` has still run.
pub fn inspect<K: 'static, C: Clone + 'static>(
    f: impl Fn(&State<K, C>) + 'static,
) -> Rule<K, C, ()> {
    Rule::new(move |state| {
        f(&state);
        Ok(Outcome::Parsed((), state))
    })
}

// ============================================================================
// N-ary combinators
// ============================================================================

/// Ordered choice: first success wins, with full backtracking between
/// alternatives. Not commutative.
pub fn choice<K: 'static, C: Clone + 'static, T: 'static>(
    rules: impl IntoIterator<Item = Rule<K, C, T>>,
) -> Rule<K, C, T> {
    let rules: Vec<_> = rules.into_iter().collect();
    Rule::new(move |state| {
        for rule in &rules {
            if let Outcome::Parsed(product, next) = rule.apply(state.clone())? {
                return Ok(Outcome::Parsed(product, next));
            }
        }
        Ok(Outcome::Failed)
    })
}

/// Sequential composition of homogeneous rules; the product is the ordered
/// collection of sub-products. Any sub-failure fails the whole, leaving the
/// caller at its pre-call state.
///
/// Sequences are always memoized: nested grammars route most traversal
/// through here, and the cache keeps re-parses at a position from becoming
/// exponential.
pub fn sequence<K: 'static, C: Clone + 'static, T: Clone + 'static>(
    rules: impl IntoIterator<Item = Rule<K, C, T>>,
) -> Rule<K, C, Vec<T>> {
    let rules: Vec<_> = rules.into_iter().collect();
    Rule::new(move |state| {
        let mut products = Vec::with_capacity(rules.len());
        let mut current = state;
        for rule in &rules {
            match rule.apply(current)? {
                Outcome::Parsed(product, next) => {
                    products.push(product);
                    current = next;
                }
                Outcome::Failed => return Ok(Outcome::Failed),
            }
        }
        Ok(Outcome::Parsed(products, current))
    })
    .memoize()
}

// ============================================================================
// State-access rules
// ============================================================================

/// Succeeds with the current state itself; consumes nothing.
pub fn get_state<K: 'static, C: Clone + 'static>() -> Rule<K, C, State<K, C>> {
    Rule::new(|state| Ok(Outcome::Parsed(state.clone(), state)))
}

/// Replaces the state wholesale; the product is the old state.
pub fn set_state<K: 'static, C: Clone + 'static>(new: State<K, C>) -> Rule<K, C, State<K, C>> {
    Rule::new(move |state| Ok(Outcome::Parsed(state, new.clone())))
}

/// Succeeds with the current context; consumes nothing.
pub fn get_context<K: 'static, C: Clone + 'static>() -> Rule<K, C, C> {
    Rule::new(|state: State<K, C>| {
        let context = state.context().clone();
        Ok(Outcome::Parsed(context, state))
    })
}

/// Replaces the context; the product is the old context.
pub fn set_context<K: 'static, C: Clone + 'static>(new: C) -> Rule<K, C, C> {
    Rule::new(move |state: State<K, C>| {
        let old = state.context().clone();
        Ok(Outcome::Parsed(old, state.with_context(new.clone())))
    })
}

/// Replaces the context with `f(context)`; the product is the old context.
pub fn update_context<K: 'static, C: Clone + 'static>(
    f: impl Fn(&C) -> C + 'static,
) -> Rule<K, C, C> {
    Rule::new(move |state: State<K, C>| {
        let old = state.context().clone();
        let next = state.with_context(f(&old));
        Ok(Outcome::Parsed(old, next))
    })
}

// ============================================================================
// Forward references
// ============================================================================

/// A late-bound rule for mutually recursive grammars: take `rule()` now,
/// `define` the body once the rest of the grammar exists.
///
/// Call `rule()` once and clone the result where it is needed; each call
/// mints a rule with a fresh identity.
pub struct Forward<K, C, T> {
    cell: Rc<std::cell::RefCell<Option<Rule<K, C, T>>>>,
}

impl<K: 'static, C: Clone + 'static, T: 'static> Forward<K, C, T> {
    pub fn new() -> Self {
        Forward {
            cell: Rc::new(std::cell::RefCell::new(None)),
        }
    }

    /// A rule that defers to the defined body.
    pub fn rule(&self) -> Rule<K, C, T> {
        let cell = Rc::clone(&self.cell);
        Rule::new(move |state| {
            let rule = cell.borrow().clone();
            match rule {
                Some(rule) => rule.apply(state),
                None => Err(Halt::new(
                    "forward-referenced rule applied before being defined",
                    state.position(),
                )),
            }
        })
    }

    pub fn define(&self, rule: Rule<K, C, T>) {
        *self.cell.borrow_mut() = Some(rule);
    }
}

impl<K: 'static, C: Clone + 'static, T: 'static> Default for Forward<K, C, T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type CRule<T> = Rule<char, (), T>;

    fn st(s: &str) -> State<char, ()> {
        State::new(s.chars().collect::<Vec<char>>(), ())
    }

    fn parsed<T>(result: RuleResult<char, (), T>) -> (T, usize) {
        match result.unwrap() {
            Outcome::Parsed(product, state) => (product, state.position()),
            Outcome::Failed => panic!("expected a match"),
        }
    }

    fn failed<T>(result: RuleResult<char, (), T>) -> bool {
        matches!(result.unwrap(), Outcome::Failed)
    }

    #[test]
    fn test_anything() {
        let r: CRule<char> = anything();
        assert_eq!(parsed(r.apply(st("ab"))), ('a', 1));
        assert!(failed(r.apply(st(""))));
    }

    #[test]
    fn test_emptiness_consumes_nothing() {
        let r: CRule<()> = emptiness();
        assert_eq!(parsed(r.apply(st("ab"))), ((), 0));
        assert_eq!(parsed(r.apply(st(""))), ((), 0));
    }

    #[test]
    fn test_nothing_always_fails() {
        let r: CRule<char> = nothing();
        assert!(failed(r.apply(st("ab"))));
        assert!(failed(r.apply(st(""))));
    }

    #[test]
    fn test_end_of_input() {
        let r: CRule<()> = end_of_input();
        assert_eq!(parsed(r.apply(st(""))), ((), 0));
        assert!(failed(r.apply(st("a"))));
    }

    #[test]
    fn test_lit_and_term() {
        let a: CRule<char> = lit('a');
        assert_eq!(parsed(a.apply(st("ab"))), ('a', 1));
        assert!(failed(a.apply(st("ba"))));

        let digit: CRule<char> = term(|c: &char| c.is_ascii_digit());
        assert_eq!(parsed(digit.apply(st("7x"))), ('7', 1));
        assert!(failed(digit.apply(st("x7"))));
    }

    #[test]
    fn test_map_and_constant() {
        let r: CRule<u32> = term(|c: &char| c.is_ascii_digit()).map(|c| c as u32 - '0' as u32);
        assert_eq!(parsed(r.apply(st("42"))), (4, 1));

        let k: CRule<&str> = lit('a').constant("found");
        assert_eq!(parsed(k.apply(st("a"))), ("found", 1));
    }

    #[test]
    fn test_validate_and_exclude() {
        let even: CRule<char> =
            term(|c: &char| c.is_ascii_digit()).validate(|c| (*c as u32 - '0' as u32) % 2 == 0);
        assert_eq!(parsed(even.apply(st("4"))), ('4', 1));
        assert!(failed(even.apply(st("3"))));

        let nonzero: CRule<char> =
            term(|c: &char| c.is_ascii_digit()).exclude("zero is not allowed", |c| *c == '0');
        assert!(failed(nonzero.apply(st("0"))));
        assert_eq!(parsed(nonzero.apply(st("5"))), ('5', 1));
        assert_eq!(nonzero.label_text(), Some("zero is not allowed"));
    }

    #[test]
    fn test_then_pairs_products() {
        let r: CRule<(char, char)> = lit('a').then(lit('b'));
        assert_eq!(parsed(r.apply(st("ab"))), (('a', 'b'), 2));
        assert!(failed(r.apply(st("ac"))));
        assert!(failed(r.apply(st("xb"))));
    }

    #[test]
    fn test_choice_is_ordered() {
        let r: CRule<&str> = choice([lit('a').constant("first"), lit('a').constant("second")]);
        assert_eq!(parsed(r.apply(st("a"))).0, "first");
    }

    #[test]
    fn test_choice_backtracks_between_alternatives() {
        let ab: CRule<&str> = lit('a').then(lit('b')).constant("ab");
        let ac: CRule<&str> = lit('a').then(lit('c')).constant("ac");
        let r = choice([ab, ac]);
        assert_eq!(parsed(r.apply(st("ac"))), ("ac", 2));
    }

    #[test]
    fn test_singleton_choice_equals_rule() {
        let r: CRule<char> = choice([lit('a')]);
        assert_eq!(parsed(r.apply(st("a"))), ('a', 1));
        assert!(failed(r.apply(st("b"))));
    }

    #[test]
    fn test_singleton_sequence_wraps_product() {
        let r: CRule<Vec<char>> = sequence([lit('a')]);
        assert_eq!(parsed(r.apply(st("a"))), (vec!['a'], 1));
    }

    #[test]
    fn test_sequence_restores_on_failure() {
        let r: CRule<Vec<char>> = sequence([lit('a'), lit('b'), lit('c')]);
        let state = st("abx");
        assert!(failed(r.apply(state.clone())));
        // The caller's state is untouched
        assert_eq!(state.position(), 0);
    }

    #[test]
    fn test_opt_never_fails() {
        let r: CRule<Option<char>> = lit('a').opt();
        assert_eq!(parsed(r.apply(st("a"))), (Some('a'), 1));
        assert_eq!(parsed(r.apply(st("b"))), (None, 0));
        assert_eq!(parsed(r.apply(st(""))), (None, 0));
    }

    #[test]
    fn test_many_never_fails() {
        let r: CRule<Vec<char>> = lit('a').many();
        assert_eq!(parsed(r.apply(st("aaab"))), (vec!['a', 'a', 'a'], 3));
        assert_eq!(parsed(r.apply(st("b"))), (vec![], 0));
        assert_eq!(parsed(r.apply(st(""))), (vec![], 0));
    }

    #[test]
    fn test_many_terminates_on_zero_width_match() {
        let r: CRule<Vec<()>> = emptiness().many();
        let (products, pos) = parsed(r.apply(st("abc")));
        assert_eq!(products.len(), 1);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_many1() {
        let r: CRule<Vec<char>> = lit('a').many1();
        assert_eq!(parsed(r.apply(st("aa"))), (vec!['a', 'a'], 2));
        assert!(failed(r.apply(st("b"))));
    }

    #[test]
    fn test_counted_repetition() {
        let a = || -> CRule<char> { lit('a') };
        assert_eq!(parsed(a().many_exact(2).apply(st("aa"))).0.len(), 2);
        assert!(failed(a().many_exact(2).apply(st("aaa")))); // greedy: matched 3
        assert!(failed(a().many_exact(2).apply(st("a"))));

        assert!(failed(a().many_under(3).apply(st("aaa"))));
        assert_eq!(parsed(a().many_under(3).apply(st("aa"))).0.len(), 2);

        assert_eq!(parsed(a().many_at_most(3).apply(st("aaa"))).0.len(), 3);
        assert!(failed(a().many_at_most(2).apply(st("aaa"))));
    }

    #[test]
    fn test_times_is_not_greedy() {
        // Unlike many_exact, times(2) takes exactly two and leaves the rest
        let r: CRule<Vec<char>> = lit('a').times(2);
        assert_eq!(parsed(r.apply(st("aaa"))), (vec!['a', 'a'], 2));
        assert!(failed(r.apply(st("a"))));
    }

    #[test]
    fn test_times_under_and_at_most() {
        let r: CRule<Vec<char>> = lit('a').times_under(3);
        assert_eq!(parsed(r.apply(st("aaaa"))).0.len(), 2);
        assert_eq!(parsed(r.apply(st(""))).0.len(), 0);

        let r: CRule<Vec<char>> = lit('a').times_at_most(3);
        assert_eq!(parsed(r.apply(st("aaaa"))).0.len(), 3);
        assert_eq!(parsed(r.apply(st("aa"))).0.len(), 2);
    }

    #[test]
    fn test_fold1() {
        let digit: CRule<i64> = term(|c: &char| c.is_ascii_digit()).map(|c| (c as u8 - b'0') as i64);
        let number = digit.fold1(|d| d, |acc, d| acc * 10 + d);
        assert_eq!(parsed(number.apply(st("2049x"))), (2049, 4));
        assert!(failed(number.apply(st("x"))));
    }

    #[test]
    fn test_ahead_consumes_nothing() {
        let r: CRule<char> = lit('a').ahead();
        assert_eq!(parsed(r.apply(st("ab"))), ('a', 0));
        assert!(failed(r.apply(st("b"))));
    }

    #[test]
    fn test_not_ahead() {
        let r: CRule<()> = lit('a').not_ahead();
        assert!(failed(r.apply(st("ab"))));
        assert_eq!(parsed(r.apply(st("b"))), ((), 0));
        assert_eq!(parsed(r.apply(st(""))), ((), 0));
    }

    #[test]
    fn test_double_negation_matches_without_consuming() {
        let r: CRule<()> = lit('a').not_ahead().not_ahead();
        assert_eq!(parsed(r.apply(st("a"))), ((), 0));
        assert!(failed(r.apply(st("b"))));
    }

    #[test]
    fn test_except() {
        let keyword: CRule<String> = lit('i').then(lit('f')).map(|(a, b)| format!("{a}{b}"));
        let r: CRule<char> = anything().except(keyword);
        assert_eq!(parsed(r.apply(st("in"))), ('i', 1));
        assert!(failed(r.apply(st("if"))));
    }

    #[test]
    fn test_except_nothing_is_identity() {
        let r: CRule<char> = lit('a').except(nothing::<char, (), char>());
        assert_eq!(parsed(r.apply(st("a"))), ('a', 1));
        assert!(failed(r.apply(st("b"))));
    }

    #[test]
    fn test_after_before_between() {
        let body: CRule<char> = term(|c: &char| c.is_ascii_alphabetic());
        let r = body.between(lit('<'), lit('>'));
        assert_eq!(parsed(r.apply(st("<x>"))), ('x', 3));
        assert!(failed(r.apply(st("<x"))));

        let r: CRule<char> = lit('b').after(lit('a'));
        assert_eq!(parsed(r.apply(st("ab"))), ('b', 2));

        let r: CRule<char> = lit('a').before(lit('b'));
        assert_eq!(parsed(r.apply(st("ab"))), ('a', 2));
    }

    #[test]
    fn test_and_then_is_context_sensitive() {
        // A count digit followed by exactly that many 'a's
        let digit: CRule<usize> =
            term(|c: &char| c.is_ascii_digit()).map(|c| (c as u8 - b'0') as usize);
        let r = digit.and_then(|n| lit('a').times(n));
        assert_eq!(parsed(r.apply(st("3aaa"))).0.len(), 3);
        assert!(failed(r.apply(st("3aa"))));
    }

    #[test]
    fn test_get_and_update_context() {
        let bump: Rule<char, u32, u32> = update_context(|n: &u32| n + 1);
        let read: Rule<char, u32, u32> = get_context();
        let r = bump.then(read);
        let state = State::new("x".chars().collect::<Vec<char>>(), 7u32);
        match r.apply(state).unwrap() {
            Outcome::Parsed((old, new), _) => {
                assert_eq!(old, 7);
                assert_eq!(new, 8);
            }
            Outcome::Failed => panic!("expected a match"),
        }
    }

    #[test]
    fn test_set_context_yields_old() {
        let r: Rule<char, &str, &str> = set_context("after");
        let state = State::new("x".chars().collect::<Vec<char>>(), "before");
        match r.apply(state).unwrap() {
            Outcome::Parsed(old, next) => {
                assert_eq!(old, "before");
                assert_eq!(*next.context(), "after");
            }
            Outcome::Failed => panic!("expected a match"),
        }
    }

    #[test]
    fn test_get_and_set_state() {
        let r: CRule<State<char, ()>> = get_state();
        let (old, pos) = parsed(r.apply(st("abc")));
        assert_eq!(old.position(), 0);
        assert_eq!(pos, 0);

        let replacement = st("zz").advance();
        let r: CRule<State<char, ()>> = set_state(replacement);
        match r.apply(st("abc")).unwrap() {
            Outcome::Parsed(old, next) => {
                assert_eq!(old.position(), 0);
                assert_eq!(next.position(), 1);
                assert_eq!(next.peek(), Some(&'z'));
            }
            Outcome::Failed => panic!("expected a match"),
        }
    }

    #[test]
    fn test_inspect_runs_per_application() {
        let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let r: CRule<((), char)> =
            inspect(move |state: &State<char, ()>| log.borrow_mut().push(state.position()))
                .then(anything());
        let _ = r.apply(st("a"));
        let _ = r.apply(st("b"));
        assert_eq!(*seen.borrow(), vec![0, 0]);
    }

    #[test]
    fn test_require_halts() {
        let r: CRule<char> = lit('a').require("expected an 'a'");
        let err = r.apply(st("b")).unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("expected an 'a'"));
    }

    #[test]
    fn test_halt_bypasses_choice() {
        // A hard failure in the first alternative escapes; the second is
        // never consulted.
        let r: CRule<char> = choice([halt("no further"), lit('b')]);
        assert!(r.apply(st("b")).is_err());
    }

    #[test]
    fn test_on_fail_can_substitute() {
        let r: CRule<char> = lit('a').on_fail(|state| Ok(Outcome::Parsed('?', state.clone())));
        assert_eq!(parsed(r.apply(st("z"))), ('?', 0));
        assert_eq!(parsed(r.apply(st("a"))), ('a', 1));
    }

    #[test]
    fn test_intercept_bridges_halts() {
        let r: CRule<char> = halt::<char, (), char>("boom").intercept(|thunk| match thunk() {
            Err(_) => Ok(Outcome::Failed),
            other => other,
        });
        assert!(failed(r.apply(st("a"))));
    }

    #[test]
    fn test_memoize_replays_identical_results() {
        let counter = Rc::new(Cell::new(0u32));
        let hits = Rc::clone(&counter);
        let counted: CRule<char> = Rule::new(move |state: State<char, ()>| {
            hits.set(hits.get() + 1);
            match state.peek().copied() {
                Some(c) => Ok(Outcome::Parsed(c, state.advance())),
                None => Ok(Outcome::Failed),
            }
        });
        let r = counted.memoize();
        let state = st("xy");
        let first = parsed(r.apply(state.clone()));
        let second = parsed(r.apply(state.clone()));
        assert_eq!(first, second);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_memoize_caches_failure_too() {
        let counter = Rc::new(Cell::new(0u32));
        let hits = Rc::clone(&counter);
        let failing: CRule<char> = Rule::new(move |_| {
            hits.set(hits.get() + 1);
            Ok(Outcome::Failed)
        });
        let r = failing.memoize();
        let state = st("x");
        assert!(failed(r.apply(state.clone())));
        assert!(failed(r.apply(state.clone())));
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_memoize_is_per_position() {
        let r: CRule<char> = anything().memoize();
        let state = st("ab");
        assert_eq!(parsed(r.apply(state.clone())), ('a', 1));
        assert_eq!(parsed(r.apply(state.advance())), ('b', 2));
    }

    #[test]
    fn test_left_recursion_grows_seed() {
        // expr := expr '-' digit | digit, evaluated left-associatively
        let expr: Forward<char, (), i64> = Forward::new();
        let digit: CRule<i64> =
            term(|c: &char| c.is_ascii_digit()).map(|c| (c as u8 - b'0') as i64);
        let subtraction = expr
            .rule()
            .then(lit('-'))
            .then(digit.clone())
            .map(|((left, _), right)| left - right);
        expr.define(choice([subtraction, digit]).memoize());

        let r = expr.rule();
        // 1 - 2 - 3 must associate left: (1 - 2) - 3 = -4
        assert_eq!(parsed(r.apply(st("1-2-3"))), (-4, 5));
        assert_eq!(parsed(r.apply(st("7"))), (7, 1));
        assert!(failed(r.apply(st("-1"))));
    }

    #[test]
    fn test_forward_undefined_halts() {
        let fwd: Forward<char, (), char> = Forward::new();
        let r = fwd.rule();
        assert!(r.apply(st("a")).is_err());
    }

    #[test]
    fn test_rule_ids_are_distinct() {
        let a: CRule<char> = lit('a');
        let b: CRule<char> = lit('a');
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_success_position_equals_consumed_prefix() {
        let r: CRule<Vec<char>> = lit('a').many();
        let state = st("aaxy");
        let before = state.position();
        let (products, after) = parsed(r.apply(state));
        assert_eq!(after - before, products.len());
    }
}

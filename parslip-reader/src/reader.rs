// parslip-reader - Reader grammar
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The reader: a grammar over character tokens producing [`Value`] trees.
//!
//! The grammar is built once from `parslip-rules` combinators and held in a
//! [`Reader`]. Ordering inside the top-level alternation is significant:
//! `nil`/`true`/`false` must be tried before symbols, `/` before symbols,
//! and numbers demand a form terminator so `123abc` cannot half-match.

use std::fmt;

use im::Vector;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use parslip_rules::chars::{char_state, lit_str, one_of, radix_digit};
use parslip_rules::{
    Forward, Halt, MatchOutcome, Outcome, Rule, anything, choice, emptiness, end_of_input,
    get_context, halt, lit, match_rule, nothing, term, update_context,
};

use crate::keyword::Keyword;
use crate::symbol::Symbol;
use crate::value::{Decimal, Value, pow10};

/// Side-channel data accumulated while reading.
#[derive(Clone, Debug, Default)]
pub struct ReadContext {
    pub(crate) warnings: Vector<String>,
}

type RRule<T> = Rule<char, ReadContext, T>;

const WHITESPACE_CHARS: &str = " ,\t\n";
const INDICATOR_CHARS: &str = ";()[]{}\\\"'@^`#";

const META_WARNING: &str = "the '^' indicator is deprecated; use #^ instead";

fn is_separator(c: char) -> bool {
    WHITESPACE_CHARS.contains(c) || INDICATOR_CHARS.contains(c)
}

/// A read failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// No form could be read from the input.
    Unreadable,
    /// The grammar raised a hard failure.
    Aborted { message: String, position: usize },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Unreadable => write!(f, "Unreadable form"),
            ReadError::Aborted { message, position } => {
                write!(f, "Read aborted at position {}: {}", position, message)
            }
        }
    }
}

impl std::error::Error for ReadError {}

impl From<Halt> for ReadError {
    fn from(halt: Halt) -> Self {
        ReadError::Aborted {
            message: halt.message,
            position: halt.position,
        }
    }
}

/// Everything a document read produces: the forms, plus warnings the
/// grammar emitted along the way (currently only the deprecated `^`
/// indicator).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub forms: Vec<Value>,
    pub warnings: Vec<String>,
}

/// A reader with its grammar built once; cheap to reuse across inputs.
pub struct Reader {
    form: RRule<Value>,
    document: RRule<(Vec<Value>, ReadContext)>,
    blank: RRule<()>,
}

impl Reader {
    pub fn new() -> Self {
        grammar()
    }

    /// Read the first form. `Ok(None)` when the input holds nothing but
    /// whitespace, comments, and discards.
    pub fn read_str(&self, source: &str) -> Result<Option<Value>, ReadError> {
        let state = char_state(source, ReadContext::default());
        match self.form.apply(state.clone())? {
            Outcome::Parsed(value, _) => Ok(Some(value)),
            Outcome::Failed => match self.blank.apply(state)? {
                Outcome::Parsed(..) => Ok(None),
                Outcome::Failed => Err(ReadError::Unreadable),
            },
        }
    }

    /// Read every form to end of input.
    pub fn read_all(&self, source: &str) -> Result<Vec<Value>, ReadError> {
        Ok(self.read_document(source)?.forms)
    }

    /// Read every form to end of input, keeping accumulated warnings.
    pub fn read_document(&self, source: &str) -> Result<Document, ReadError> {
        let state = char_state(source, ReadContext::default());
        match match_rule(&self.document, state)? {
            MatchOutcome::Complete((forms, context)) => Ok(Document {
                forms,
                warnings: context.warnings.iter().cloned().collect(),
            }),
            MatchOutcome::Failed(_) | MatchOutcome::Incomplete { .. } => Err(ReadError::Unreadable),
        }
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the first form of `source`.
pub fn read_str(source: &str) -> Result<Option<Value>, ReadError> {
    Reader::new().read_str(source)
}

/// Read every form of `source`.
pub fn read_all(source: &str) -> Result<Vec<Value>, ReadError> {
    Reader::new().read_all(source)
}

/// Read every form of `source`, keeping warnings.
pub fn read_document(source: &str) -> Result<Document, ReadError> {
    Reader::new().read_document(source)
}

// ============================================================================
// Grammar construction
// ============================================================================

fn wrap(head: &str, form: Value) -> Value {
    Value::list([Value::symbol(Symbol::new(head)), form])
}

fn grammar() -> Reader {
    let form_fwd: Forward<char, ReadContext, Value> = Forward::new();
    let form_ref = form_fwd.rule();

    // ------------------------------------------------------------------
    // Whitespace, comments, discards, terminators
    // ------------------------------------------------------------------

    let whitespace_char: RRule<char> = one_of("whitespace", WHITESPACE_CHARS);
    let comment: RRule<()> = lit(';')
        .then(term(|c: &char| *c != '\n').many())
        .map(|_| ());
    // `#_` reads and throws away one whole form
    let discard: RRule<()> = lit_str("#_").then(form_ref.clone()).map(|_| ());
    let ws: RRule<()> = choice([whitespace_char.map(|_| ()), comment, discard])
        .many1()
        .map(|_| ());
    let ws_opt: RRule<()> = ws.opt().map(|_| ());

    let separator: RRule<char> = term(|c: &char| is_separator(*c));
    let form_end: RRule<()> = choice([separator.ahead().map(|_| ()), end_of_input()]);

    // ------------------------------------------------------------------
    // Symbols and keywords
    // ------------------------------------------------------------------

    let symbol_char: RRule<char> = term(|c: &char| !is_separator(*c));
    let ns_char: RRule<char> = term(|c: &char| !is_separator(*c) && *c != '/');
    let ascii_letter: RRule<char> = term(|c: &char| c.is_ascii_alphabetic());

    let normal_symbol: RRule<Symbol> = ascii_letter
        .clone()
        .then(symbol_char.clone().many())
        .map(|(first, rest)| {
            let mut name = String::with_capacity(rest.len() + 1);
            name.push(first);
            name.extend(rest);
            Symbol::new(&name)
        });

    let ns_qualified_symbol: RRule<Symbol> = ascii_letter
        .then(ns_char.many())
        .then(lit('/'))
        .then(symbol_char.many1())
        .map(|(((first, ns_rest), _), name_chars)| {
            let mut ns = String::with_capacity(ns_rest.len() + 1);
            ns.push(first);
            ns.extend(ns_rest);
            let name: String = name_chars.into_iter().collect();
            Symbol::with_namespace(&ns, &name)
        })
        .atomic();

    let division_symbol: RRule<Symbol> = lit('/').map(|_| Symbol::new("/"));

    // Qualified first: `a/b` must not stop at the bare `a`
    let symbol_r: RRule<Symbol> = choice([
        ns_qualified_symbol,
        division_symbol.clone(),
        normal_symbol,
    ]);

    let symbol_form: RRule<Value> = symbol_r.clone().map(Value::Symbol);
    let division_form: RRule<Value> = division_symbol.map(Value::Symbol);

    let keyword_form: RRule<Value> = symbol_r.after(lit(':')).map(|sym| {
        let kw = match sym.namespace() {
            Some(ns) => Keyword::with_namespace(ns, sym.name()),
            None => Keyword::new(sym.name()),
        };
        Value::keyword(kw)
    });

    let peculiar_symbol: RRule<Value> = choice([
        lit_str("nil").constant(Value::Nil),
        lit_str("true").constant(Value::Bool(true)),
        lit_str("false").constant(Value::Bool(false)),
    ])
    .before(form_end.clone())
    .atomic();

    // ------------------------------------------------------------------
    // Characters
    // ------------------------------------------------------------------

    let character_form: RRule<Value> = choice([
        lit_str("newline").constant('\n'),
        lit_str("space").constant(' '),
        lit_str("tab").constant('\t'),
        lit_str("backspace").constant('\u{8}'),
        lit_str("formfeed").constant('\u{C}'),
        lit_str("return").constant('\r'),
        anything(),
    ])
    .after(lit('\\'))
    .map(Value::Char);

    // ------------------------------------------------------------------
    // Numbers
    // ------------------------------------------------------------------

    let natural: RRule<BigInt> = radix_digit(10).fold1(BigInt::from, |acc, d| acc * 10u32 + d);

    let fraction: RRule<String> = term(|c: &char| c.is_ascii_digit())
        .many()
        .map(|digits| digits.into_iter().collect())
        .after(lit('.'));

    let exponent: RRule<(Option<char>, String)> = one_of("exponent marker", "eE")
        .then(one_of("exponent sign", "+-").opt())
        .then(
            term(|c: &char| c.is_ascii_digit())
                .many1()
                .map(|digits| digits.into_iter().collect::<String>()),
        )
        .map(|((_, sign), digits)| (sign, digits));

    let number_form: RRule<Value> = {
        let natural_tail = natural.clone();
        let fraction = fraction.clone();
        let exponent = exponent.clone();
        one_of("sign", "+-")
            .opt()
            .then(natural.clone())
            .and_then(move |(sign, nat): (Option<char>, BigInt)| {
                let negative = sign == Some('-');
                choice([
                    imprecise_tail(fraction.clone(), exponent.clone(), nat.clone(), negative),
                    rational_tail(natural_tail.clone(), nat.clone(), negative),
                    radix_tail(nat.clone(), negative),
                    empty_tail(nat.clone(), negative),
                ])
            })
            .before(form_end.clone())
    };

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    let string_escape: RRule<char> = choice([
        lit_str("\\t").constant('\t'),
        lit_str("\\n").constant('\n'),
        lit_str("\\\\").constant('\\'),
        lit_str("\\\"").constant('"'),
    ]);
    let string_char: RRule<char> =
        choice([string_escape, term(|c: &char| *c != '"' && *c != '\\')]);
    let string_form: RRule<Value> = string_char
        .many()
        .between(lit('"'), lit('"').require("unterminated string"))
        .map(|chars| Value::string(chars.into_iter().collect::<String>()));

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    let series: RRule<Vec<Value>> = form_ref.clone().many().before(ws_opt.clone());

    let list_form: RRule<Value> = series
        .clone()
        .between(lit('('), lit(')').require("unmatched delimiter: expected a closing )"))
        .map(|items| Value::list(items));

    let vector_form: RRule<Value> = series
        .clone()
        .between(lit('['), lit(']').require("unmatched delimiter: expected a closing ]"))
        .map(|items| Value::vector(items));

    let map_form: RRule<Value> = series
        .clone()
        .between(lit('{'), lit('}').require("unmatched delimiter: expected a closing }"))
        .and_then(|forms: Vec<Value>| {
            if forms.len() % 2 != 0 {
                return halt("map literal must contain an even number of forms");
            }
            let mut pairs = Vec::with_capacity(forms.len() / 2);
            let mut iter = forms.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                pairs.push((key, value));
            }
            let product = Value::map(pairs);
            emptiness().constant(product)
        });

    let set_form: RRule<Value> = series
        .clone()
        .between(lit('{'), lit('}').require("unmatched delimiter: expected a closing }"))
        .map(|items| Value::set(items));

    // ------------------------------------------------------------------
    // Prefix forms
    // ------------------------------------------------------------------

    let quoted_form: RRule<Value> = form_ref
        .clone()
        .after(lit('\''))
        .map(|form| wrap("quote", form));
    let syntax_quoted_form: RRule<Value> = form_ref
        .clone()
        .after(lit('`'))
        .map(|form| wrap("syntax-quote", form));
    let unquote_spliced_form: RRule<Value> = form_ref
        .clone()
        .after(lit_str("~@").atomic())
        .map(|form| wrap("unquote-splicing", form));
    let unquoted_form: RRule<Value> = form_ref
        .clone()
        .after(lit('~'))
        .map(|form| wrap("unquote", form));
    let deref_form: RRule<Value> = form_ref
        .clone()
        .after(lit('@'))
        .map(|form| wrap("deref", form));

    let note_deprecation: RRule<ReadContext> = update_context(|ctx: &ReadContext| {
        let mut next = ctx.clone();
        next.warnings.push_back(META_WARNING.to_string());
        next
    });
    let deprecated_meta_form: RRule<Value> = form_ref
        .clone()
        .after(lit('^').then(note_deprecation))
        .map(|form| wrap("meta", form));

    // ------------------------------------------------------------------
    // Dispatched # forms
    // ------------------------------------------------------------------

    let var_quoted_form: RRule<Value> = form_ref
        .clone()
        .after(lit('\''))
        .map(|form| wrap("var", form));

    let anon_fn_form: RRule<Value> = series
        .clone()
        .between(lit('('), lit(')').require("unmatched delimiter: expected a closing )"))
        .map(|forms| {
            let mut items = Vec::with_capacity(forms.len() + 1);
            items.push(Value::symbol(Symbol::new("mini-fn")));
            items.extend(forms);
            Value::list(items)
        });

    // `#^` metadata is a map, or a keyword/symbol shorthand for `{:tag k}`
    let metadata_payload: RRule<Value> = choice([
        map_form.clone(),
        keyword_form.clone(),
        symbol_form.clone(),
    ])
    .after(ws_opt.clone())
    .map(|meta| match meta {
        Value::Map(_) => meta,
        tag => Value::map([(Value::keyword(Keyword::new("tag")), tag)]),
    });
    let with_meta_form: RRule<Value> = metadata_payload
        .after(lit('^'))
        .then(form_ref.clone())
        .map(|(meta, form)| {
            Value::list([Value::symbol(Symbol::new("with-meta")), form, meta])
        });

    let dispatched_form: RRule<Value> = choice([
        set_form,
        anon_fn_form,
        var_quoted_form,
        with_meta_form,
    ])
    .require("unknown dispatch indicator")
    .after(lit('#'));

    // ------------------------------------------------------------------
    // Top-level form and document
    // ------------------------------------------------------------------

    let form: RRule<Value> = choice([
        list_form,
        vector_form,
        map_form,
        dispatched_form,
        string_form,
        syntax_quoted_form,
        unquote_spliced_form,
        unquoted_form,
        quoted_form,
        deref_form,
        division_form,
        deprecated_meta_form,
        character_form,
        keyword_form,
        peculiar_symbol,
        symbol_form,
        number_form,
    ])
    .after(ws_opt.clone())
    .memoize();
    form_fwd.define(form.clone());

    let document: RRule<(Vec<Value>, ReadContext)> =
        series.then(get_context()).before(end_of_input());

    let blank: RRule<()> = ws_opt.then(end_of_input()).map(|_| ());

    Reader {
        form,
        document,
        blank,
    }
}

// ------------------------------------------------------------------
// Number tails. The tail choice is made *after* the leading natural
// number is known, so each helper receives it as data.
// ------------------------------------------------------------------

fn imprecise_tail(
    fraction: RRule<String>,
    exponent: RRule<(Option<char>, String)>,
    nat: BigInt,
    negative: bool,
) -> RRule<Value> {
    fraction
        .opt()
        .then(exponent.opt())
        .then(lit('M').opt())
        // An entirely absent tail is the empty tail's business
        .validate(|((frac, exp), marker)| frac.is_some() || exp.is_some() || marker.is_some())
        .map(move |((frac, exp), marker)| {
            if marker.is_some() {
                exact_decimal(&nat, negative, frac.as_deref().unwrap_or(""), exp)
            } else {
                // Reassemble the literal so the double is whatever the
                // platform's decimal-to-binary conversion gives for it
                let mut text = String::new();
                if negative {
                    text.push('-');
                }
                text.push_str(&nat.to_string());
                text.push('.');
                match frac.as_deref() {
                    Some(digits) if !digits.is_empty() => text.push_str(digits),
                    _ => text.push('0'),
                }
                if let Some((sign, digits)) = &exp {
                    text.push('e');
                    if let Some(s) = sign {
                        text.push(*s);
                    }
                    text.push_str(digits);
                }
                let value = text
                    .parse::<f64>()
                    .expect("a reassembled digits-only literal parses as f64");
                Value::float(value)
            }
        })
}

fn exact_decimal(
    nat: &BigInt,
    negative: bool,
    frac_digits: &str,
    exp: Option<(Option<char>, String)>,
) -> Value {
    let mut unscaled = nat * pow10(frac_digits.len() as u32);
    if !frac_digits.is_empty() {
        unscaled += frac_digits
            .parse::<BigInt>()
            .expect("fraction digits parse as an integer");
    }
    if negative {
        unscaled = -unscaled;
    }
    let exp_value = exp
        .map(|(sign, digits)| {
            let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
            if sign == Some('-') { -magnitude } else { magnitude }
        })
        .unwrap_or(0);
    let scale = (frac_digits.len() as i64).saturating_sub(exp_value);
    Value::decimal(Decimal::new(unscaled, scale))
}

fn rational_tail(natural: RRule<BigInt>, numerator: BigInt, negative: bool) -> RRule<Value> {
    natural
        .after(lit('/'))
        .exclude("a fraction's denominator cannot be zero", |den: &BigInt| {
            den.is_zero()
        })
        .map(move |den| {
            let num = if negative {
                -numerator.clone()
            } else {
                numerator.clone()
            };
            Value::big_ratio(num, den)
        })
}

fn radix_tail(base: BigInt, negative: bool) -> RRule<Value> {
    let Some(base) = base.to_u32().filter(|b| (2..=36).contains(b)) else {
        return nothing();
    };
    radix_digit(base)
        .fold1(BigInt::from, move |acc, d| acc * base + d)
        .after(one_of("radix marker", "rR"))
        .map(move |magnitude| Value::bigint(if negative { -magnitude } else { magnitude }))
}

fn empty_tail(nat: BigInt, negative: bool) -> RRule<Value> {
    let value = Value::bigint(if negative { -nat } else { nat });
    emptiness().constant(value)
}

// ============================================================================
// Tests
// ============================================================================

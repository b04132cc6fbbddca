// parslip-reader - Value types
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Core value type for read forms.
//!
//! `Value` is the sum over everything the reader can produce. Reader-macro
//! forms (`'x`, `~@x`, `#'x`, metadata) are not distinct variants: they
//! read as plain lists headed by a distinguished symbol.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use im::{OrdMap, OrdSet, Vector};
use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::keyword::Keyword;
use crate::symbol::Symbol;

/// An exact decimal: `unscaled × 10^(−scale)`. Produced by `M`-suffixed
/// literals, which must not round through an f64.
///
/// Values are kept normalized: non-negative scale with no trailing zero
/// digits, so equality, ordering, and hashing agree.
#[derive(Clone, Debug)]
pub struct Decimal {
    unscaled: BigInt,
    scale: i64,
}

impl Decimal {
    pub fn new(unscaled: BigInt, scale: i64) -> Self {
        let mut unscaled = unscaled;
        let mut scale = scale;
        if unscaled.is_zero() {
            scale = 0;
        }
        while scale < 0 {
            unscaled *= 10u32;
            scale += 1;
        }
        let ten = BigInt::from(10u32);
        while scale > 0 && (&unscaled % &ten).is_zero() {
            unscaled /= 10u32;
            scale -= 1;
        }
        Decimal { unscaled, scale }
    }

    pub fn unscaled(&self) -> &BigInt {
        &self.unscaled
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        // Normalized on construction, so field equality is value equality
        self.scale == other.scale && self.unscaled == other.unscaled
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // a/10^sa vs b/10^sb  =>  a*10^sb vs b*10^sa
        let left = &self.unscaled * pow10(other.scale as u32);
        let right = &other.unscaled * pow10(self.scale as u32);
        left.cmp(&right)
    }
}

impl Hash for Decimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unscaled.hash(state);
        self.scale.hash(state);
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}M", self.unscaled);
        }
        let sign = if self.unscaled.is_negative() { "-" } else { "" };
        let digits = self.unscaled.abs().to_string();
        let scale = self.scale as usize;
        if digits.len() <= scale {
            write!(f, "{}0.{}{}M", sign, "0".repeat(scale - digits.len()), digits)
        } else {
            let (whole, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}M", sign, whole, frac)
        }
    }
}

pub(crate) fn pow10(exp: u32) -> BigInt {
    (0..exp).fold(BigInt::one(), |acc, _| acc * 10u32)
}

/// A value as read from source.
#[derive(Clone, Debug)]
pub enum Value {
    /// The nil value
    Nil,
    /// Boolean true or false
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Arbitrary precision integer
    BigInt(BigInt),
    /// 64-bit floating point number
    Float(f64),
    /// Arbitrary precision decimal (the `M` suffix)
    Decimal(Decimal),
    /// Rational number (numerator/denominator)
    Ratio(i64, i64),
    /// Arbitrary precision rational number
    BigRatio(BigInt, BigInt),
    /// Unicode character
    Char(char),
    /// Immutable string
    String(Rc<str>),
    /// Symbol (optionally namespaced identifier)
    Symbol(Symbol),
    /// Keyword (optionally namespaced, self-evaluating)
    Keyword(Keyword),
    /// List (persistent, structural sharing)
    List(Vector<Value>),
    /// Indexed vector (persistent, structural sharing)
    Vector(Vector<Value>),
    /// Ordered map with unique keys
    Map(OrdMap<Value, Value>),
    /// Ordered set with unique elements
    Set(OrdSet<Value>),
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    /// An integer from a `BigInt`, narrowed to `Int` when it fits.
    pub fn bigint(n: BigInt) -> Self {
        match n.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::BigInt(n),
        }
    }

    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    pub fn decimal(d: Decimal) -> Self {
        Value::Decimal(d)
    }

    /// A rational, reduced by gcd with the sign on the numerator.
    /// `n/1` collapses to an integer. The denominator must be non-zero.
    pub fn ratio(num: i64, den: i64) -> Self {
        assert!(den != 0, "ratio denominator must be non-zero");
        // i128 arithmetic so i64::MIN inputs cannot overflow on negation
        let mut num = num as i128;
        let mut den = den as i128;
        if den < 0 {
            num = -num;
            den = -den;
        }
        let d = gcd_i128(num.unsigned_abs(), den.unsigned_abs());
        if d > 1 {
            num /= d as i128;
            den /= d as i128;
        }
        match (num.to_i64(), den.to_i64()) {
            (Some(n), Some(1)) => Value::Int(n),
            (Some(n), Some(d)) => Value::Ratio(n, d),
            _ => Value::big_ratio(BigInt::from(num), BigInt::from(den)),
        }
    }

    /// An arbitrary-precision rational, reduced and narrowed: `n/1`
    /// collapses to an integer, and ratios that fit i64 become `Ratio`.
    pub fn big_ratio(num: BigInt, den: BigInt) -> Self {
        assert!(!den.is_zero(), "ratio denominator must be non-zero");
        let (mut num, mut den) = if den.is_negative() {
            (-num, -den)
        } else {
            (num, den)
        };
        let d = gcd_big(num.abs(), den.clone());
        if !d.is_one() {
            num /= &d;
            den /= &d;
        }
        if den.is_one() {
            return Value::bigint(num);
        }
        match (num.to_i64(), den.to_i64()) {
            (Some(n), Some(d)) => Value::Ratio(n, d),
            _ => Value::BigRatio(num, den),
        }
    }

    pub fn char(c: char) -> Self {
        Value::Char(c)
    }

    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn symbol(sym: Symbol) -> Self {
        Value::Symbol(sym)
    }

    pub fn keyword(kw: Keyword) -> Self {
        Value::Keyword(kw)
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn vector(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Vector(items.into_iter().collect())
    }

    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(pairs.into_iter().collect())
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(items.into_iter().collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::BigInt(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Ratio(..) => "ratio",
            Value::BigRatio(..) => "ratio",
            Value::Char(_) => "character",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }
}

fn gcd_i128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a.max(1)
}

fn gcd_big(mut a: BigInt, mut b: BigInt) -> BigInt {
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    if a.is_zero() { BigInt::one() } else { a }
}

// ============================================================================
// Equality and ordering (for use as map keys and set elements)
// ============================================================================

/// Map a float to bits giving a consistent total order: all NaNs collapse
/// to one value, and +0.0 / -0.0 collapse together.
fn normalize_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0u64
    } else {
        f.to_bits()
    }
}

/// The exact (numerator, denominator) form of a non-float numeric value.
fn as_exact(v: &Value) -> Option<(BigInt, BigInt)> {
    match v {
        Value::Int(n) => Some((BigInt::from(*n), BigInt::one())),
        Value::BigInt(n) => Some((n.clone(), BigInt::one())),
        Value::Ratio(n, d) => Some((BigInt::from(*n), BigInt::from(*d))),
        Value::BigRatio(n, d) => Some((n.clone(), d.clone())),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::BigInt(n) => Some(big_to_f64(n)),
        Value::Float(f) => Some(*f),
        Value::Ratio(n, d) => Some(*n as f64 / *d as f64),
        Value::BigRatio(n, d) => Some(big_to_f64(n) / big_to_f64(d)),
        _ => None,
    }
}

fn big_to_f64(n: &BigInt) -> f64 {
    n.to_f64().unwrap_or(if n.is_negative() {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    })
}

/// Compare two members of the numeric family: exactly when both are
/// exact, through floats when either side is a float.
fn numeric_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    if let (Some((an, ad)), Some((bn, bd))) = (as_exact(a), as_exact(b)) {
        // an/ad vs bn/bd  =>  an*bd vs bn*ad (denominators positive)
        return (an * bd).cmp(&(bn * ad));
    }
    match (as_float(a), as_float(b)) {
        (Some(af), Some(bf)) => normalize_float_bits(af).cmp(&normalize_float_bits(bf)),
        _ => std::cmp::Ordering::Equal,
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Int(_) | Value::BigInt(_) | Value::Float(_) | Value::Ratio(..) | Value::BigRatio(..)
    )
}

fn type_order(v: &Value) -> u8 {
    match v {
        Value::Nil => 0,
        Value::Bool(_) => 1,
        // One bucket for the whole numeric family so cross-precision
        // comparison happens
        Value::Int(_) | Value::BigInt(_) | Value::Float(_) | Value::Ratio(..)
        | Value::BigRatio(..) => 2,
        Value::Decimal(_) => 3,
        Value::Char(_) => 4,
        Value::String(_) => 5,
        Value::Symbol(_) => 6,
        Value::Keyword(_) => 7,
        Value::List(_) => 8,
        Value::Vector(_) => 9,
        Value::Map(_) => 10,
        Value::Set(_) => 11,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if is_numeric(self) && is_numeric(other) {
            return numeric_cmp(self, other) == std::cmp::Ordering::Equal;
        }
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        let ta = type_order(self);
        let tb = type_order(other);
        if ta != tb {
            return ta.cmp(&tb);
        }

        match (self, other) {
            _ if is_numeric(self) && is_numeric(other) => numeric_cmp(self, other),
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::Keyword(a), Value::Keyword(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Nil => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // The numeric family hashes through its exact form when one
            // exists, so equal values hash identically
            Value::Int(n) => {
                2u8.hash(state);
                BigInt::from(*n).hash(state);
            }
            Value::BigInt(n) => {
                2u8.hash(state);
                n.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                normalize_float_bits(*f).hash(state);
            }
            Value::Ratio(n, d) => {
                4u8.hash(state);
                BigInt::from(*n).hash(state);
                BigInt::from(*d).hash(state);
            }
            Value::BigRatio(n, d) => {
                4u8.hash(state);
                n.hash(state);
                d.hash(state);
            }
            Value::Decimal(d) => {
                5u8.hash(state);
                d.hash(state);
            }
            Value::Char(c) => {
                6u8.hash(state);
                c.hash(state);
            }
            Value::String(s) => {
                7u8.hash(state);
                s.hash(state);
            }
            Value::Symbol(sym) => {
                8u8.hash(state);
                sym.hash(state);
            }
            Value::Keyword(kw) => {
                9u8.hash(state);
                kw.hash(state);
            }
            Value::List(items) => {
                10u8.hash(state);
                items.hash(state);
            }
            Value::Vector(items) => {
                11u8.hash(state);
                items.hash(state);
            }
            Value::Map(map) => {
                12u8.hash(state);
                map.hash(state);
            }
            Value::Set(set) => {
                13u8.hash(state);
                set.hash(state);
            }
        }
    }
}

// ============================================================================
// Display
// ============================================================================

fn format_char(c: char) -> String {
    match c {
        '\n' => "newline".to_string(),
        ' ' => "space".to_string(),
        '\t' => "tab".to_string(),
        '\r' => "return".to_string(),
        '\x08' => "backspace".to_string(),
        '\x0C' => "formfeed".to_string(),
        _ => c.to_string(),
    }
}

fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => result.push_str("\\n"),
            '\t' => result.push_str("\\t"),
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            _ => result.push(c),
        }
    }
    result
}

fn write_spaced(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = impl fmt::Display>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}.0", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Ratio(num, den) => write!(f, "{}/{}", num, den),
            Value::BigRatio(num, den) => write!(f, "{}/{}", num, den),
            Value::Char(c) => write!(f, "\\{}", format_char(*c)),
            Value::String(s) => write!(f, "\"{}\"", escape_string(s)),
            Value::Symbol(sym) => write!(f, "{}", sym),
            Value::Keyword(kw) => write!(f, "{}", kw),
            Value::List(items) => {
                write!(f, "(")?;
                write_spaced(f, items.iter())?;
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "[")?;
                write_spaced(f, items.iter())?;
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(set) => {
                write!(f, "#{{")?;
                write_spaced(f, set.iter())?;
                write!(f, "}}")
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigint_narrows() {
        assert_eq!(Value::bigint(BigInt::from(255)), Value::Int(255));
        let huge: BigInt = "18446744073709551614".parse().unwrap();
        assert!(matches!(Value::bigint(huge), Value::BigInt(_)));
    }

    #[test]
    fn test_ratio_reduces() {
        assert_eq!(Value::ratio(2, 4), Value::Ratio(1, 2));
        assert_eq!(Value::ratio(4, 2), Value::Int(2));
        assert_eq!(Value::ratio(-2, 4), Value::Ratio(-1, 2));
        assert_eq!(Value::ratio(2, -4), Value::Ratio(-1, 2));
        assert_eq!(Value::ratio(0, 5), Value::Int(0));
    }

    #[test]
    fn test_big_ratio_narrows() {
        let v = Value::big_ratio(BigInt::from(2), BigInt::from(4));
        assert_eq!(v, Value::Ratio(1, 2));
        let v = Value::big_ratio(BigInt::from(6), BigInt::from(3));
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn test_numeric_equality_crosses_precision() {
        assert_eq!(Value::Int(1), Value::BigInt(BigInt::from(1)));
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Ratio(1, 2), Value::Float(0.5));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn test_decimal_is_exact_not_float() {
        let d = Value::Decimal(Decimal::new(BigInt::from(314), 2));
        assert_ne!(d, Value::Float(3.14));
        assert_eq!(d, Value::Decimal(Decimal::new(BigInt::from(3140), 3)));
    }

    #[test]
    fn test_decimal_normalizes() {
        let d = Decimal::new(BigInt::from(1500), 2);
        assert_eq!(d.unscaled(), &BigInt::from(15));
        assert_eq!(d.scale(), 1);

        // Negative scale expands
        let d = Decimal::new(BigInt::from(15), -2);
        assert_eq!(d.unscaled(), &BigInt::from(1500));
        assert_eq!(d.scale(), 0);
    }

    #[test]
    fn test_decimal_display() {
        assert_eq!(Decimal::new(BigInt::from(314), 2).to_string(), "3.14M");
        assert_eq!(Decimal::new(BigInt::from(100), 0).to_string(), "100M");
        assert_eq!(Decimal::new(BigInt::from(5), 3).to_string(), "0.005M");
        assert_eq!(Decimal::new(BigInt::from(-314), 2).to_string(), "-3.14M");
    }

    #[test]
    fn test_collections_deduplicate() {
        let set = Value::set([Value::Int(1), Value::Int(1), Value::Int(2)]);
        if let Value::Set(s) = &set {
            assert_eq!(s.len(), 2);
        } else {
            panic!("expected set");
        }

        let map = Value::map([
            (Value::keyword(Keyword::new("a")), Value::Int(1)),
            (Value::keyword(Keyword::new("a")), Value::Int(2)),
        ]);
        if let Value::Map(m) = &map {
            assert_eq!(m.len(), 1);
            // Later pair wins
            assert_eq!(
                m.get(&Value::keyword(Keyword::new("a"))),
                Some(&Value::Int(2))
            );
        } else {
            panic!("expected map");
        }
    }

    #[test]
    fn test_float_ordering_totality() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.cmp(&nan), std::cmp::Ordering::Equal);
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn test_display_round_trips_surface_syntax() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(16.0).to_string(), "16.0");
        assert_eq!(Value::Ratio(1, 2).to_string(), "1/2");
        assert_eq!(Value::Char('\n').to_string(), "\\newline");
        assert_eq!(Value::Char('a').to_string(), "\\a");
        assert_eq!(Value::string("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(
            Value::list([Value::Int(1), Value::Int(2)]).to_string(),
            "(1 2)"
        );
        assert_eq!(Value::vector([]).to_string(), "[]");
        assert_eq!(
            Value::symbol(Symbol::with_namespace("user", "x")).to_string(),
            "user/x"
        );
        assert_eq!(
            Value::keyword(Keyword::with_namespace("a", "b")).to_string(),
            ":a/b"
        );
    }

    #[test]
    fn test_heterogeneous_ordering_is_stable() {
        let mut values = vec![
            Value::string("s"),
            Value::Int(1),
            Value::Nil,
            Value::Bool(false),
        ];
        values.sort();
        assert_eq!(values[0], Value::Nil);
        assert_eq!(values[1], Value::Bool(false));
        assert_eq!(values[2], Value::Int(1));
        assert_eq!(values[3], Value::string("s"));
    }
}

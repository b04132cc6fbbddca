// parslip-reader - Reader for a Clojure-like Lisp surface syntax
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # parslip-reader
//!
//! Reads Clojure-like surface syntax into [`Value`] trees: symbols,
//! keywords, the numeric tower (integers, ratios, floats, exact decimals),
//! characters, strings, collections, and the reader-macro forms, which
//! appear as plain lists headed by distinguished symbols (`quote`,
//! `unquote-splicing`, `var`, `with-meta`, ...).
//!
//! The grammar is composed from `parslip-rules` combinators; see the
//! `reader` module.

mod intern;

pub mod keyword;
pub mod reader;
pub mod symbol;
pub mod value;

pub use im::{OrdMap, OrdSet, Vector};
pub use keyword::Keyword;
pub use num_bigint::BigInt;
pub use num_traits::ToPrimitive;
pub use reader::{Document, ReadContext, ReadError, Reader, read_all, read_document, read_str};
pub use symbol::Symbol;
pub use value::{Decimal, Value};

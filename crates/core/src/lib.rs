//! Stencil core: the data layer under the template engine.
//!
//! Key pieces:
//! - `Value`: JSON-shaped dynamic tree (objects keep insertion order)
//! - `OrderedMap`: the ordered hash-array behind `Value::Object`
//! - `json`: strict parser, stringifier, escapes, comment stripping
//! - `digit`: shared numeric lexer and exact real formatting
//! - `BigInt`: fixed-width integer feeding the decimal<->double converter
//!
//! Nothing here raises: lookups return `Option`, the JSON parser returns
//! `Value::Undefined` on any malformed input, and number parsing returns a
//! typed `ParsedNumber` with a `NaN` case.

pub mod bigint;
pub mod digit;
pub mod json;
pub mod map;
pub mod value;

pub use bigint::BigInt;
pub use digit::{JSON_PRECISION, ParsedNumber, RealFormat, RealFormatType, TEMPLATE_PRECISION};
pub use map::OrderedMap;
pub use value::Value;

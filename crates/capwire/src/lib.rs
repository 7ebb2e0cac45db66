//! # capwire
//!
//! A structured-value codec for rich runtime values: cyclic and shared
//! references, sparse arrays, special numbers, typed buffers, dates,
//! maps and sets, errors, HTTP messages and live byte streams.
//!
//! ## Architecture
//!
//! A value graph is flattened into a JSON array of entries. Index 0 is the
//! root; containers refer to their children by index, so a node reached
//! twice is written once. Values with no index of their own (`undefined`,
//! `NaN`, the infinities, `-0`, array holes) are written as negative
//! sentinels.
//!
//! ```text
//! {a: 1, b: [1, <hole>, 3]}   =>   [{"a":1,"b":2},1,[1,-2,3],3]
//! ```
//!
//! Anything outside the built-in vocabulary goes through a [`Registry`] of
//! named [`Handler`]s. A handler's reducer turns a value into a replacement,
//! written as `["Tag", index]`, and its reviver turns the replacement back.
//! The [`families`] module provides the standard handler sets.

pub mod error;
pub mod families;
pub mod registry;
pub mod value;

mod b64;
mod decoder;
mod encoder;

#[cfg(test)]
mod tests;

pub use decoder::decode;
pub use encoder::encode;
pub use encoder::format_number;
pub use encoder::stringify_string;
pub use error::Error;
pub use error::Result;
pub use families::platform::ClassMethod;
pub use registry::Handler;
pub use registry::Registry;
pub use registry::handler;
pub use value::*;

// ============================================================================
//  SENTINELS
// ============================================================================

pub const UNDEFINED: i64 = -1;
pub const HOLE: i64 = -2;
pub const NAN: i64 = -3;
pub const POSITIVE_INFINITY: i64 = -4;
pub const NEGATIVE_INFINITY: i64 = -5;
pub const NEGATIVE_ZERO: i64 = -6;

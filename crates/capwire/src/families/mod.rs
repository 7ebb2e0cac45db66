//! # Registry Families
//!
//! Ready-made handler sets, each independently composable into a
//! [`Registry`](crate::Registry).
//!
//! | Family     | Tags                                          |
//! |------------|-----------------------------------------------|
//! | `stream`   | `ReadableStream`, `Blob`                      |
//! | `buffer`   | `ArrayBuffer`, `ArrayBufferView`              |
//! | `errors`   | `Error`                                       |
//! | `http`     | `Headers`, `Request`, `Response`              |
//! | `platform` | `InternalClass`, `PreComputableClassMethod`   |
//!
//! The capability family needs a per-connection heap and lives with the RPC
//! layer.

use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::registry::Handler;
use crate::value::Value;

pub mod buffer;
pub mod errors;
pub mod http;
pub mod platform;
pub mod stream;

/// All connection-independent handlers, in wire order.
pub(crate) fn standard() -> Vec<Arc<dyn Handler>> {
    let mut handlers = stream::handlers();
    handlers.extend(buffer::handlers());
    handlers.extend(errors::handlers());
    handlers.extend(http::handlers());
    handlers.extend(platform::handlers());
    handlers
}

// ============================================================================
//  SHAPE HELPERS
// ============================================================================

/// The elements of an array payload, holes read as `undefined`.
pub(crate) fn elements(tag: &str, value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(array) => Ok(array.to_vec()),
        other => Err(Error::shape(tag, format!("expected an array, found {}", other.type_name()))),
    }
}

pub(crate) fn string_at(tag: &str, items: &[Value], at: usize) -> Result<String> {
    match items.get(at) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::shape(tag, format!("element {} must be a string", at))),
    }
}

pub(crate) fn number_at(tag: &str, items: &[Value], at: usize) -> Result<f64> {
    match items.get(at) {
        Some(Value::Number(n)) => Ok(*n),
        _ => Err(Error::shape(tag, format!("element {} must be a number", at))),
    }
}

/// A non-negative integral number, as used for offsets and lengths.
pub(crate) fn index_at(tag: &str, items: &[Value], at: usize) -> Result<usize> {
    let n = number_at(tag, items, at)?;
    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(Error::shape(tag, format!("element {} must be a non-negative integer", at)));
    }
    Ok(n as usize)
}

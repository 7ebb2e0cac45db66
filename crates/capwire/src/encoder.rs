//! # Encoder
//!
//! Flattens a value graph into the indexed wire array.
//!
//! ## Philosophy
//!
//! One depth-first traversal does everything. Reducers are async, so a
//! handler that must drain a stream simply awaits inside the traversal;
//! there is no buffering pre-pass and no second encode.
//!
//! ## Invariants
//!
//! * Index 0 is the root; an entry's index is allocated before its children
//!   are visited, so cycles point back at an already-reserved slot.
//! * Every handle (and every equal primitive) is emitted once.
//! * Sentinels never get an index.
//! * Every handle that received an index is retained until the encode ends,
//!   so no address can be reused by a later allocation mid-traversal.

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::b64;
use crate::error::Error;
use crate::error::Result;
use crate::registry::Registry;
use crate::value::Value;
use crate::HOLE;
use crate::NAN;
use crate::NEGATIVE_INFINITY;
use crate::NEGATIVE_ZERO;
use crate::POSITIVE_INFINITY;
use crate::UNDEFINED;

/// Encodes `value` to wire text using the handlers in `registry`.
pub async fn encode(value: &Value, registry: &Registry) -> Result<String> {
    let mut encoder = Encoder::new(registry);
    let root = encoder.flatten(value).await?;
    if root < 0 {
        return Ok(root.to_string());
    }
    Ok(format!("[{}]", encoder.stringified.join(",")))
}

/// Memo key: handle address, or primitive value.
#[derive(Hash, PartialEq, Eq)]
enum Identity {
    Handle(usize),
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    BigInt(i128),
}

struct Encoder<'r> {
    registry: &'r Registry,
    stringified: Vec<String>,
    indexes: HashMap<Identity, usize>,
    keys: Vec<String>,
    retained: Vec<Value>,
}

impl<'r> Encoder<'r> {
    fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            stringified: Vec::new(),
            indexes: HashMap::new(),
            keys: Vec::new(),
            retained: Vec::new(),
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Encode { message: message.to_string(), path: self.keys.concat() }
    }

    /// Boxed payloads are literals, so they cannot use sentinels. `-0` is
    /// written as `-0.0`, which parses back with its sign.
    fn boxed_payload(&self, primitive: &Value) -> Result<String> {
        match primitive {
            Value::Number(n) if !n.is_finite() => Err(self.error("Cannot stringify a boxed non-finite number")),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => Ok("-0.0".to_string()),
            other => Ok(stringify_primitive(other)),
        }
    }

    fn flatten<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            if let Value::Function(_) = value {
                return Err(self.error("Cannot stringify a function"));
            }

            let identity = match value {
                Value::Undefined => return Ok(UNDEFINED),
                Value::Number(n) if n.is_nan() => return Ok(NAN),
                Value::Number(n) if *n == f64::INFINITY => return Ok(POSITIVE_INFINITY),
                Value::Number(n) if *n == f64::NEG_INFINITY => return Ok(NEGATIVE_INFINITY),
                Value::Number(n) if *n == 0.0 && n.is_sign_negative() => return Ok(NEGATIVE_ZERO),
                Value::Number(n) => Identity::Number(n.to_bits()),
                Value::Null => Identity::Null,
                Value::Bool(b) => Identity::Bool(*b),
                Value::String(s) => Identity::String(s.clone()),
                Value::BigInt(n) => Identity::BigInt(*n),
                other => match other.identity() {
                    Some(addr) => Identity::Handle(addr),
                    None => return Err(self.error("Cannot stringify arbitrary non-POJOs")),
                },
            };
            if let Some(&index) = self.indexes.get(&identity) {
                return Ok(index as i64);
            }

            let index = self.stringified.len();
            self.stringified.push(String::new());
            self.indexes.insert(identity, index);
            if value.identity().is_some() {
                self.retained.push(value.clone());
            }

            let registry = self.registry;
            for handler in registry.handlers() {
                if let Some(replacement) = handler.reduce(value).await? {
                    let inner = self.flatten(&replacement).await?;
                    self.stringified[index] = format!("[{},{}]", stringify_string(handler.tag()), inner);
                    self.retained.push(replacement);
                    return Ok(index as i64);
                }
            }

            let entry = self.builtin(value).await?;
            self.stringified[index] = entry;
            Ok(index as i64)
        })
    }

    fn builtin<'a>(&'a mut self, value: &'a Value) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let entry = match value {
                Value::Undefined => UNDEFINED.to_string(),
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::BigInt(_) => {
                    stringify_primitive(value)
                }
                Value::Boxed(boxed) => format!("[\"Object\",{}]", self.boxed_payload(boxed.value())?),
                Value::Date(date) => format!("[\"Date\",\"{}\"]", date.to_iso().unwrap_or_default()),
                Value::RegExp(re) if re.flags().is_empty() => {
                    format!("[\"RegExp\",{}]", stringify_string(re.source()))
                }
                Value::RegExp(re) => {
                    format!("[\"RegExp\",{},{}]", stringify_string(re.source()), stringify_string(re.flags()))
                }
                Value::Array(array) => {
                    let mut parts = Vec::new();
                    for (i, slot) in array.snapshot().iter().enumerate() {
                        match slot {
                            Some(item) => {
                                self.keys.push(format!("[{}]", i));
                                parts.push(self.flatten(item).await?.to_string());
                                self.keys.pop();
                            }
                            None => parts.push(HOLE.to_string()),
                        }
                    }
                    format!("[{}]", parts.join(","))
                }
                Value::Set(set) => {
                    let mut entry = String::from("[\"Set\"");
                    for item in set.values() {
                        let index = self.flatten(&item).await?;
                        entry.push_str(&format!(",{}", index));
                    }
                    entry.push(']');
                    entry
                }
                Value::Map(map) => {
                    let mut entry = String::from("[\"Map\"");
                    for (key, item) in map.entries() {
                        let shown = if key.is_primitive() { stringify_primitive(&key) } else { "...".to_string() };
                        self.keys.push(format!(".get({})", shown));
                        let k = self.flatten(&key).await?;
                        let v = self.flatten(&item).await?;
                        self.keys.pop();
                        entry.push_str(&format!(",{},{}", k, v));
                    }
                    entry.push(']');
                    entry
                }
                Value::ArrayBuffer(buffer) => format!("[\"ArrayBuffer\",\"{}\"]", b64::encode(buffer.as_bytes())),
                Value::View(view) if view.kind().is_typed_array() => {
                    format!("[\"{}\",\"{}\"]", view.kind().name(), b64::encode(view.as_bytes()))
                }
                Value::Object(object) => {
                    if object.has_symbols() {
                        return Err(self.error("Cannot stringify POJOs with symbolic keys"));
                    }
                    let null_prototype = object.has_null_prototype();
                    let mut parts = Vec::new();
                    for (key, item) in object.entries() {
                        self.keys.push(stringify_key(&key));
                        let index = self.flatten(&item).await?;
                        self.keys.pop();
                        parts.push(if null_prototype {
                            format!("{},{}", stringify_string(&key), index)
                        } else {
                            format!("{}:{}", stringify_string(&key), index)
                        });
                    }
                    match (null_prototype, parts.is_empty()) {
                        (true, true) => "[\"null\"]".to_string(),
                        (true, false) => format!("[\"null\",{}]", parts.join(",")),
                        (false, _) => format!("{{{}}}", parts.join(",")),
                    }
                }
                Value::Function(_) => return Err(self.error("Cannot stringify a function")),
                Value::View(_)
                | Value::Error(_)
                | Value::Headers(_)
                | Value::Request(_)
                | Value::Response(_)
                | Value::Stream(_)
                | Value::Blob(_)
                | Value::Capability(_)
                | Value::Platform(_)
                | Value::Opaque(_) => return Err(self.error("Cannot stringify arbitrary non-POJOs")),
            };
            Ok(entry)
        })
    }
}

// ============================================================================
//  TEXT FORMS
// ============================================================================

fn stringify_primitive(value: &Value) -> String {
    match value {
        Value::Undefined => UNDEFINED.to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if *n == 0.0 && n.is_sign_negative() => NEGATIVE_ZERO.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => stringify_string(s),
        Value::BigInt(n) => format!("[\"BigInt\",\"{}\"]", n),
        _ => "null".to_string(),
    }
}

/// Shortest round-trip decimal, switching to exponent form outside `[1e-6, 1e21)`.
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return "null".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{:e}", n);
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        };
    }
    format!("{}", n)
}

/// Quotes a string for the wire. Besides the JSON escapes this also escapes
/// `<` and the two line separators so the text can be inlined in HTML/JS.
pub fn stringify_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '<' => out.push_str("\\u003C"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Path segment for an object key: `.key` or `["key"]`.
fn stringify_key(key: &str) -> String {
    if is_identifier(key) {
        return format!(".{}", key);
    }
    let quoted = serde_json::to_string(key).unwrap_or_else(|_| stringify_string(key));
    format!("[{}]", quoted)
}

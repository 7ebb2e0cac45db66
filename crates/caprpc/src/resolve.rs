//! # Chain Resolver
//!
//! Walks a chain against a live value graph.
//!
//! ## Invariants
//!
//! * A method read with `Get` is bound to the value it was read from, unless
//!   a capability reported it as a plain property.
//! * Arguments of one `Apply` are resolved concurrently; the call proceeds
//!   only once every one of them has settled.
//! * Only the final result of a request is minted into the heap. Chain
//!   arguments hand their raw value to the callee.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::future::try_join_all;
use tracing::debug;

use capwire::ByteStream;
use capwire::Function;
use capwire::Headers;
use capwire::Member;
use capwire::Value;
use capwire::families::platform::body_method;

use crate::chain::Argument;
use crate::chain::ChainOp;
use crate::chain::ChainRef;
use crate::error::Error;
use crate::error::Result;
use crate::heap::Heap;

pub struct Resolver {
    heap: Arc<Heap>,
}

impl Resolver {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self { heap }
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Evaluates `chain` against `target`.
    ///
    /// A capability result is stored in the heap and returned as a chain
    /// reference to its new id.
    pub async fn resolve_chain(&self, target: Value, chain: &[ChainOp]) -> Result<Value> {
        let value = self.walk(target, chain).await?;
        Ok(self.mint(value))
    }

    fn mint(&self, value: Value) -> Value {
        match value {
            Value::Capability(_) => ChainRef::heap(self.heap.put(value)).into_value(),
            other => other,
        }
    }

    fn walk<'a>(&'a self, root: Value, chain: &'a [ChainOp]) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut current = root.clone();
            let mut last: Option<&str> = None;
            for (step, op) in chain.iter().enumerate() {
                match op {
                    ChainOp::Get(property) => {
                        debug!(step, property = %property, on = current.type_name(), "chain get");
                        current = match read_property(&current, property)? {
                            Member::Method(method) => Value::Function(method.bind(current.clone())),
                            Member::Property(value) => value,
                        };
                        last = Some(property.as_str());
                    }
                    ChainOp::Apply(arguments) => {
                        let Value::Function(function) = &current else {
                            let callee = last.unwrap_or(current.type_name());
                            return Err(Error::Resolution(format!("{} is not a function", callee)));
                        };
                        debug!(step, function = function.name(), arity = arguments.len(), "chain apply");
                        let args = try_join_all(arguments.iter().map(|arg| self.argument(&root, arg))).await?;
                        current = function.call(args).await?;
                        last = None;
                    }
                }
            }
            Ok(current)
        })
    }

    async fn argument(&self, root: &Value, argument: &Argument) -> Result<Value> {
        match argument {
            Argument::Literal(value) => Ok(value.clone()),
            Argument::Chain(reference) => {
                let base = match &reference.target {
                    Some(id) => self
                        .heap
                        .get(id)
                        .ok_or_else(|| Error::Capability(format!("No capability with id {}", id)))?,
                    None => root.clone(),
                };
                self.walk(base, &reference.chain).await
            }
        }
    }
}

// ============================================================================
//  PROPERTY ACCESS
// ============================================================================

fn plain(value: impl Into<Value>) -> Result<Member> {
    Ok(Member::Property(value.into()))
}

fn undefined() -> Result<Member> {
    Ok(Member::Property(Value::Undefined))
}

/// Reads `property` off `receiver`, the way a dotted access would.
pub fn read_property(receiver: &Value, property: &str) -> Result<Member> {
    match receiver {
        Value::Undefined | Value::Null => Err(Error::Resolution(format!(
            "Cannot read properties of {} (reading '{}')",
            receiver.type_name(),
            property
        ))),
        Value::Object(object) => match object.get(property) {
            Some(value) => property_of(value),
            None => undefined(),
        },
        Value::Array(array) => {
            if property == "length" {
                return plain(array.len());
            }
            match array_index(property) {
                Some(i) => property_of(array.get(i).unwrap_or_default()),
                None => undefined(),
            }
        }
        Value::String(s) => match property {
            "length" => plain(s.encode_utf16().count()),
            _ => undefined(),
        },
        Value::Map(map) => match property {
            "size" => plain(map.len()),
            "get" => {
                let map = map.clone();
                method("get", move |args| Ok(map.get(&first(&args)).unwrap_or_default()))
            }
            "has" => {
                let map = map.clone();
                method("has", move |args| Ok(Value::Bool(map.get(&first(&args)).is_some())))
            }
            _ => undefined(),
        },
        Value::Set(set) => match property {
            "size" => plain(set.len()),
            "has" => {
                let set = set.clone();
                method("has", move |args| Ok(Value::Bool(set.has(&first(&args)))))
            }
            _ => undefined(),
        },
        Value::Date(date) => match property {
            "getTime" => {
                let date = date.clone();
                method("getTime", move |_| {
                    Ok(date.timestamp_millis().map(|ms| Value::Number(ms as f64)).unwrap_or(Value::Number(f64::NAN)))
                })
            }
            "toISOString" => {
                let date = date.clone();
                method("toISOString", move |_| match date.to_iso() {
                    Some(iso) => Ok(Value::String(iso)),
                    None => Err(capwire::Error::throw("RangeError", "Invalid time value")),
                })
            }
            _ => undefined(),
        },
        Value::RegExp(regexp) => match property {
            "source" => plain(regexp.source()),
            "flags" => plain(regexp.flags()),
            _ => undefined(),
        },
        Value::ArrayBuffer(buffer) => match property {
            "byteLength" => plain(buffer.len()),
            _ => undefined(),
        },
        Value::View(view) => match property {
            "length" if view.kind().is_typed_array() => plain(view.len()),
            "byteLength" => plain(view.byte_length()),
            "byteOffset" => plain(view.byte_offset()),
            "buffer" => plain(Value::ArrayBuffer(view.buffer().clone())),
            _ => undefined(),
        },
        Value::Error(error) => match property {
            "name" => plain(error.name()),
            "message" => plain(error.message()),
            "stack" => plain(error.stack().map(Value::from).unwrap_or_default()),
            "cause" => property_of(error.cause().cloned().unwrap_or_default()),
            _ => undefined(),
        },
        Value::Headers(headers) => headers_member(headers, property),
        Value::Request(request) => match property {
            "method" => plain(request.method()),
            "url" => plain(request.url()),
            "headers" => plain(Value::Headers(request.headers().clone())),
            "cf" => property_of(request.cf().clone()),
            "body" => plain(body_value(request.body())),
            name => body_member(request.body(), name),
        },
        Value::Response(response) => match property {
            "status" => plain(u32::from(response.status())),
            "statusText" => plain(response.status_text()),
            "ok" => plain((200..=299).contains(&response.status())),
            "headers" => plain(Value::Headers(response.headers().clone())),
            "cf" => property_of(response.cf().clone()),
            "body" => plain(body_value(response.body())),
            name => body_member(response.body(), name),
        },
        Value::Blob(blob) => match property {
            "size" => plain(blob.size()),
            "type" => plain(blob.mime_type()),
            "name" => plain(blob.file_info().map(|f| Value::from(f.name.as_str())).unwrap_or_default()),
            _ => undefined(),
        },
        Value::Platform(object) => {
            if let Some(field) = object.fields().get(property) {
                return property_of(field);
            }
            if let Some(found) = object.method(property) {
                return Ok(Member::Method(found));
            }
            match property {
                "body" => plain(body_value(object.body())),
                name => body_member(object.body(), name),
            }
        }
        Value::Function(function) => match property {
            "name" => plain(function.name()),
            _ => undefined(),
        },
        Value::Capability(stub) => Ok(stub.get(property)?),
        _ => undefined(),
    }
}

/// Functions stored as data are still methods of their holder.
fn property_of(value: Value) -> Result<Member> {
    match value {
        Value::Function(function) => Ok(Member::Method(function)),
        other => Ok(Member::Property(other)),
    }
}

fn method<F>(name: &str, f: F) -> Result<Member>
where
    F: Fn(Vec<Value>) -> capwire::Result<Value> + Send + Sync + 'static,
{
    Ok(Member::Method(Function::sync(name, move |_, args| f(args))))
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

/// Canonical array index: digits only, no leading zero.
fn array_index(property: &str) -> Option<usize> {
    let index = property.parse::<usize>().ok()?;
    (index.to_string() == property).then_some(index)
}

fn headers_member(headers: &Headers, property: &str) -> Result<Member> {
    let headers = headers.clone();
    match property {
        "get" => method("get", move |args| {
            Ok(headers.get(&header_name(&args)?).map(Value::String).unwrap_or(Value::Null))
        }),
        "has" => method("has", move |args| Ok(Value::Bool(headers.get(&header_name(&args)?).is_some()))),
        "set" => method("set", move |args| {
            headers.set(&header_name(&args)?, header_value(&args));
            Ok(Value::Undefined)
        }),
        "append" => method("append", move |args| {
            headers.append(&header_name(&args)?, header_value(&args));
            Ok(Value::Undefined)
        }),
        _ => undefined(),
    }
}

fn header_name(args: &[Value]) -> capwire::Result<String> {
    match args.first() {
        Some(Value::String(name)) => Ok(name.clone()),
        _ => Err(capwire::Error::throw("TypeError", "Header name must be a string")),
    }
}

fn header_value(args: &[Value]) -> String {
    match args.get(1) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(n)) => capwire::format_number(*n),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn body_value(body: Option<&ByteStream>) -> Value {
    body.map(|b| Value::Stream(b.clone())).unwrap_or(Value::Null)
}

fn body_member(body: Option<&ByteStream>, name: &str) -> Result<Member> {
    match body.and_then(|b| body_method(name, b)) {
        Some(reader) => Ok(Member::Method(reader)),
        None => undefined(),
    }
}

//! # Platform-Internal Objects
//!
//! Objects such as storage results are instances of host classes: they carry
//! plain fields, a few zero-argument methods and sometimes a byte body.
//!
//! `InternalClass` sends one as `[className, {fields..., methods}, body]`.
//! Each allow-listed method is wrapped in a [`ClassMethod`] named
//! `Class::method`, and `PreComputableClassMethod` turns the wrappers it knows
//! into a snapshot of their result. The receiving side gets a function that
//! replays the snapshot instead of a dead reference to a remote method.
//!
//! ## Invariants
//!
//! * Only objects flagged internal are reduced here.
//! * Only `writeHttpMetadata` and `toJSON` are wrapped; other methods stay
//!   behind.
//! * A method wrapper whose name is not precomputable has no wire form.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::Error;
use crate::error::Result;
use crate::families::elements;
use crate::families::string_at;
use crate::registry::Handler;
use crate::value::Array;
use crate::value::ArrayBuffer;
use crate::value::ByteStream;
use crate::value::Function;
use crate::value::Headers;
use crate::value::Object;
use crate::value::Opaque;
use crate::value::PlatformObject;
use crate::value::Value;

/// Methods lifted off internal objects.
pub const WRAPPED_METHODS: [&str; 2] = ["writeHttpMetadata", "toJSON"];

const CHECKSUMS_TO_JSON: &str = "Checksums::toJSON";
const HEAD_RESULT_WRITE_HTTP_METADATA: &str = "HeadResult::writeHttpMetadata";
const GET_RESULT_WRITE_HTTP_METADATA: &str = "GetResult::writeHttpMetadata";

/// Methods evaluated at encode time.
pub const PRECOMPUTABLE: [&str; 3] =
    [CHECKSUMS_TO_JSON, HEAD_RESULT_WRITE_HTTP_METADATA, GET_RESULT_WRITE_HTTP_METADATA];

pub fn handlers() -> Vec<Arc<dyn Handler>> {
    vec![Arc::new(InternalClassHandler), Arc::new(PreComputableClassMethodHandler)]
}

/// A method of an internal object, bound to its instance.
#[derive(Clone)]
pub struct ClassMethod {
    pub name: String,
    pub function: Function,
}

impl ClassMethod {
    pub fn into_value(self) -> Value {
        Value::Opaque(Opaque::new(self))
    }
}

// ============================================================================
//  INTERNAL CLASS
// ============================================================================

pub struct InternalClassHandler;

#[async_trait]
impl Handler for InternalClassHandler {
    fn tag(&self) -> &str {
        "InternalClass"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Platform(object) = value else {
            return Ok(None);
        };
        if !object.is_internal() {
            return Ok(None);
        }

        let fields = Object::new();
        for (key, field) in object.fields().entries() {
            fields.set(key, field);
        }
        for name in WRAPPED_METHODS {
            if let Some(method) = object.method(name) {
                let wrapper = ClassMethod {
                    name: format!("{}::{}", object.class(), name),
                    function: method.bind(value.clone()),
                };
                fields.set(name, wrapper.into_value());
            }
        }
        let body = object.body().map(|b| Value::Stream(b.clone())).unwrap_or_default();

        Ok(Some(Value::array([Value::from(object.class()), Value::Object(fields), body])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let class = string_at(tag, &items, 0)?;
        let fields = match items.get(1) {
            Some(Value::Object(fields)) => fields.entries(),
            _ => return Err(Error::shape(tag, "element 1 must be an object")),
        };

        let mut builder = PlatformObject::builder(class).internal();
        for (key, field) in fields {
            builder = builder.field(key, field);
        }
        match items.get(2) {
            None | Some(Value::Undefined) | Some(Value::Null) => {}
            Some(Value::Stream(body)) => {
                builder = builder.body(body.clone());
                for name in BODY_READERS {
                    if let Some(reader) = body_method(name, body) {
                        builder = builder.method(name, reader);
                    }
                }
            }
            Some(other) => return Err(Error::shape(tag, format!("body must be a stream, found {}", other.type_name()))),
        }
        Ok(Value::Platform(builder.build()))
    }
}

/// Readers attached to a revived body.
pub const BODY_READERS: [&str; 3] = ["text", "arrayBuffer", "json"];

/// A zero-argument reader that drains `body`: `text`, `arrayBuffer` or `json`.
pub fn body_method(name: &str, body: &ByteStream) -> Option<Function> {
    let convert: fn(Vec<u8>) -> Result<Value> = match name {
        "text" => |bytes| Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        "arrayBuffer" => |bytes| Ok(Value::ArrayBuffer(ArrayBuffer::new(bytes))),
        "json" => |bytes| {
            let parsed: Json =
                serde_json::from_slice(&bytes).map_err(|e| Error::throw("SyntaxError", e.to_string()))?;
            Ok(from_json(parsed))
        },
        _ => return None,
    };
    let body = body.clone();
    Some(Function::new(name, move |_, _| {
        let body = body.clone();
        async move {
            let bytes = body.read_all().await.map_err(|e| Error::throw("TypeError", e.to_string()))?;
            convert(bytes)
        }
    }))
}

/// Converts parsed JSON into a value graph.
pub fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(Array::from_values(items.into_iter().map(from_json))),
        Json::Object(map) => Value::object(map.into_iter().map(|(k, v)| (k, from_json(v)))),
    }
}

// ============================================================================
//  PRECOMPUTED SNAPSHOTS
// ============================================================================

pub struct PreComputableClassMethodHandler;

#[async_trait]
impl Handler for PreComputableClassMethodHandler {
    fn tag(&self) -> &str {
        "PreComputableClassMethod"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Opaque(opaque) = value else {
            return Ok(None);
        };
        let Some(method) = opaque.downcast_ref::<ClassMethod>() else {
            return Ok(None);
        };
        let snapshot = match method.name.as_str() {
            CHECKSUMS_TO_JSON => method.function.call(Vec::new()).await?,
            HEAD_RESULT_WRITE_HTTP_METADATA | GET_RESULT_WRITE_HTTP_METADATA => {
                let headers = Headers::new();
                method.function.call(vec![Value::Headers(headers.clone())]).await?;
                Value::Headers(headers)
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::array([Value::from(method.name.as_str()), snapshot])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let name = string_at(tag, &items, 0)?;
        let snapshot = items.get(1).cloned().unwrap_or_default();
        match name.as_str() {
            CHECKSUMS_TO_JSON => Ok(Value::Function(Function::sync(name, move |_, _| Ok(snapshot.clone())))),
            HEAD_RESULT_WRITE_HTTP_METADATA | GET_RESULT_WRITE_HTTP_METADATA => {
                let entries: Vec<(String, String)> = match &snapshot {
                    Value::Headers(headers) => headers.entries(),
                    Value::Object(object) => object
                        .entries()
                        .into_iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k, v.to_string())))
                        .collect(),
                    other => {
                        return Err(Error::shape(tag, format!("expected headers, found {}", other.type_name())));
                    }
                };
                Ok(Value::Function(Function::sync(name, move |_, args| match args.first() {
                    Some(Value::Headers(target)) => {
                        for (header, v) in &entries {
                            target.set(header, v.clone());
                        }
                        Ok(Value::Undefined)
                    }
                    _ => Err(Error::throw("TypeError", "writeHttpMetadata expects a Headers argument")),
                })))
            }
            other => Err(Error::shape(tag, format!("'{}' is not precomputable", other))),
        }
    }
}

//! # Decoder
//!
//! Rebuilds a value graph from the indexed wire array.
//!
//! ## Invariants
//!
//! * Each index is hydrated at most once; later references get the same
//!   handle, which is how shared references and cycles survive the trip.
//! * Containers are published to the memo *before* their children are
//!   hydrated, so a child may point back at its parent.
//! * A revived entry cannot be published until its reviver returns. An index
//!   revisited while its reviver is pending is a cycle through a revived
//!   value and fails instead of recursing.

use serde_json::Value as Json;

use crate::b64;
use crate::error::Error;
use crate::error::Result;
use crate::registry::Registry;
use crate::value::Array;
use crate::value::ArrayBuffer;
use crate::value::Boxed;
use crate::value::Date;
use crate::value::MapValue;
use crate::value::Object;
use crate::value::RegExp;
use crate::value::SetValue;
use crate::value::TypedArray;
use crate::value::Value;
use crate::value::ViewKind;
use crate::HOLE;
use crate::NAN;
use crate::NEGATIVE_INFINITY;
use crate::NEGATIVE_ZERO;
use crate::POSITIVE_INFINITY;
use crate::UNDEFINED;

/// Decodes wire text using the revivers in `registry`.
pub fn decode(text: &str, registry: &Registry) -> Result<Value> {
    let parsed: Json = serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;
    match parsed {
        Json::Number(n) => n
            .as_i64()
            .and_then(sentinel)
            .ok_or_else(|| Error::Decode(format!("a bare {} is not a sentinel", n))),
        // A primitive root is always the only entry; anything after it means
        // the payload is a bare tagged entry or garbage.
        Json::Array(values) if values.len() > 1 && !matches!(values[0], Json::Array(_) | Json::Object(_)) => {
            match &values[0] {
                Json::String(tag) if registry.handler(tag).is_none() && !is_builtin_tag(tag) => {
                    Err(Error::UnknownTag(tag.clone()))
                }
                _ => Err(Error::Decode("a primitive root cannot have further entries".into())),
            }
        }
        Json::Array(values) if !values.is_empty() => {
            let mut decoder = Decoder::new(values, registry);
            decoder.hydrate(0)
        }
        _ => Err(Error::Decode("expected a non-empty array".into())),
    }
}

fn sentinel(index: i64) -> Option<Value> {
    match index {
        UNDEFINED => Some(Value::Undefined),
        NAN => Some(Value::Number(f64::NAN)),
        POSITIVE_INFINITY => Some(Value::Number(f64::INFINITY)),
        NEGATIVE_INFINITY => Some(Value::Number(f64::NEG_INFINITY)),
        NEGATIVE_ZERO => Some(Value::Number(-0.0)),
        _ => None,
    }
}

enum Slot {
    Empty,
    Pending,
    Done(Value),
}

struct Decoder<'r> {
    registry: &'r Registry,
    values: Vec<Json>,
    hydrated: Vec<Slot>,
}

impl<'r> Decoder<'r> {
    fn new(values: Vec<Json>, registry: &'r Registry) -> Self {
        let hydrated = values.iter().map(|_| Slot::Empty).collect();
        Self { registry, values, hydrated }
    }

    fn publish(&mut self, index: usize, value: Value) -> Value {
        self.hydrated[index] = Slot::Done(value.clone());
        value
    }

    /// Hydrates the entry referenced by an index stored inside another entry.
    fn hydrate_ref(&mut self, reference: &Json) -> Result<Value> {
        let index = reference
            .as_i64()
            .ok_or_else(|| Error::Decode(format!("expected an index, found {}", reference)))?;
        self.hydrate(index)
    }

    fn hydrate(&mut self, index: i64) -> Result<Value> {
        if let Some(value) = sentinel(index) {
            return Ok(value);
        }
        let slot = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.values.len())
            .ok_or_else(|| Error::Decode(format!("index {} is out of range", index)))?;
        match &self.hydrated[slot] {
            Slot::Done(value) => return Ok(value.clone()),
            Slot::Pending => {
                return Err(Error::Decode(format!("index {} refers back to a value still being revived", slot)));
            }
            Slot::Empty => {}
        }

        // Each entry is read exactly once.
        let entry = std::mem::take(&mut self.values[slot]);
        match entry {
            Json::Null => Ok(self.publish(slot, Value::Null)),
            Json::Bool(b) => Ok(self.publish(slot, Value::Bool(b))),
            Json::Number(n) => {
                let n = n.as_f64().ok_or_else(|| Error::Decode(format!("unrepresentable number {}", n)))?;
                Ok(self.publish(slot, Value::Number(n)))
            }
            Json::String(s) => Ok(self.publish(slot, Value::String(s))),
            Json::Array(items) => match items.first() {
                Some(Json::String(tag)) => {
                    let tag = tag.clone();
                    self.tagged(slot, &tag, &items)
                }
                _ => self.array(slot, &items),
            },
            Json::Object(map) => {
                let object = Object::new();
                self.publish(slot, Value::Object(object.clone()));
                for (key, reference) in map {
                    let value = self.hydrate_ref(&reference)?;
                    object.set(key, value);
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn array(&mut self, slot: usize, items: &[Json]) -> Result<Value> {
        let array = Array::with_len(items.len());
        self.publish(slot, Value::Array(array.clone()));
        for (i, reference) in items.iter().enumerate() {
            if reference.as_i64() == Some(HOLE) {
                continue;
            }
            let value = self.hydrate_ref(reference)?;
            array.set(i, value);
        }
        Ok(Value::Array(array))
    }

    fn tagged(&mut self, slot: usize, tag: &str, items: &[Json]) -> Result<Value> {
        let registry = self.registry;
        if let Some(handler) = registry.handler(tag) {
            let reference = items.get(1).ok_or_else(|| Error::shape(tag, "missing payload index"))?;
            self.hydrated[slot] = Slot::Pending;
            let replacement = self.hydrate_ref(reference)?;
            let value = handler.revive(replacement)?;
            return Ok(self.publish(slot, value));
        }

        let value = match tag {
            "Date" => Value::Date(Date::parse(literal_str(tag, items, 1)?)),
            "RegExp" => {
                let flags = match items.get(2) {
                    Some(_) => literal_str(tag, items, 2)?,
                    None => "",
                };
                Value::RegExp(RegExp::new(literal_str(tag, items, 1)?, flags))
            }
            "Object" => {
                let primitive = match items.get(1) {
                    Some(Json::Bool(b)) => Value::Bool(*b),
                    Some(Json::Number(n)) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
                    Some(Json::String(s)) => Value::String(s.clone()),
                    _ => return Err(Error::shape(tag, "expected a boxable primitive")),
                };
                Value::Boxed(Boxed::new(primitive)?)
            }
            "BigInt" => {
                let digits = match items.get(1) {
                    Some(Json::String(s)) => s.clone(),
                    Some(Json::Number(n)) => n.to_string(),
                    _ => return Err(Error::shape(tag, "expected digits")),
                };
                let n = digits
                    .parse::<i128>()
                    .map_err(|_| Error::shape(tag, format!("'{}' is not an integer in the 128-bit range", digits)))?;
                Value::BigInt(n)
            }
            "ArrayBuffer" => Value::ArrayBuffer(ArrayBuffer::new(b64::decode(literal_str(tag, items, 1)?)?)),
            "Set" => {
                let set = SetValue::new();
                self.publish(slot, Value::Set(set.clone()));
                for reference in &items[1..] {
                    let value = self.hydrate_ref(reference)?;
                    set.add(value);
                }
                return Ok(Value::Set(set));
            }
            "Map" => {
                if items.len() % 2 == 0 {
                    return Err(Error::shape(tag, "unpaired key"));
                }
                let map = MapValue::new();
                self.publish(slot, Value::Map(map.clone()));
                for pair in items[1..].chunks(2) {
                    let key = self.hydrate_ref(&pair[0])?;
                    let value = self.hydrate_ref(&pair[1])?;
                    map.set(key, value);
                }
                return Ok(Value::Map(map));
            }
            "null" => {
                if items.len() % 2 == 0 {
                    return Err(Error::shape(tag, "unpaired key"));
                }
                let object = Object::with_null_prototype();
                self.publish(slot, Value::Object(object.clone()));
                for pair in items[1..].chunks(2) {
                    let key = pair[0].as_str().ok_or_else(|| Error::shape(tag, "keys must be strings"))?;
                    let value = self.hydrate_ref(&pair[1])?;
                    object.set(key, value);
                }
                return Ok(Value::Object(object));
            }
            other => match ViewKind::from_name(other).filter(|k| k.is_typed_array()) {
                Some(kind) => {
                    let bytes = b64::decode(literal_str(tag, items, 1)?)?;
                    Value::View(TypedArray::from_bytes(kind, bytes)?)
                }
                None => return Err(Error::UnknownTag(other.to_string())),
            },
        };
        Ok(self.publish(slot, value))
    }
}

fn is_builtin_tag(tag: &str) -> bool {
    matches!(tag, "Date" | "RegExp" | "Object" | "BigInt" | "ArrayBuffer" | "Set" | "Map" | "null")
        || ViewKind::from_name(tag).is_some_and(ViewKind::is_typed_array)
}

fn literal_str<'a>(tag: &str, items: &'a [Json], at: usize) -> Result<&'a str> {
    items
        .get(at)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::shape(tag, format!("element {} must be a string", at)))
}

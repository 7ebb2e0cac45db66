//! Raw buffers and views over them.
//!
//! `ArrayBuffer` travels as `[base64]`. A view travels as
//! `[ctorName, buffer, byteOffset, byteLength]`, keeping the whole backing
//! buffer so views sharing one buffer still share it after decoding.

use std::sync::Arc;

use async_trait::async_trait;

use crate::b64;
use crate::error::Error;
use crate::error::Result;
use crate::families::elements;
use crate::families::index_at;
use crate::families::string_at;
use crate::registry::Handler;
use crate::value::ArrayBuffer;
use crate::value::TypedArray;
use crate::value::Value;
use crate::value::ViewKind;

pub fn handlers() -> Vec<Arc<dyn Handler>> {
    vec![Arc::new(ArrayBufferHandler), Arc::new(ArrayBufferViewHandler)]
}

pub struct ArrayBufferHandler;

#[async_trait]
impl Handler for ArrayBufferHandler {
    fn tag(&self) -> &str {
        "ArrayBuffer"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        match value {
            Value::ArrayBuffer(buffer) => Ok(Some(Value::array([Value::from(b64::encode(buffer.as_bytes()))]))),
            _ => Ok(None),
        }
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let items = elements(self.tag(), &value)?;
        let encoded = string_at(self.tag(), &items, 0)?;
        Ok(Value::ArrayBuffer(ArrayBuffer::new(b64::decode(&encoded)?)))
    }
}

pub struct ArrayBufferViewHandler;

#[async_trait]
impl Handler for ArrayBufferViewHandler {
    fn tag(&self) -> &str {
        "ArrayBufferView"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::View(view) = value else {
            return Ok(None);
        };
        Ok(Some(Value::array([
            Value::from(view.kind().name()),
            Value::ArrayBuffer(view.buffer().clone()),
            Value::from(view.byte_offset()),
            Value::from(view.byte_length()),
        ])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let name = string_at(tag, &items, 0)?;
        let kind = ViewKind::from_name(&name)
            .ok_or_else(|| Error::shape(tag, format!("'{}' is not an allowed view constructor", name)))?;
        let buffer = match items.get(1) {
            Some(Value::ArrayBuffer(buffer)) => buffer.clone(),
            _ => return Err(Error::shape(tag, "element 1 must be an ArrayBuffer")),
        };
        let byte_offset = index_at(tag, &items, 2)?;
        let byte_length = index_at(tag, &items, 3)?;
        let length = byte_length / kind.bytes_per_element();
        Ok(Value::View(TypedArray::new(kind, buffer, byte_offset, length)?))
    }
}

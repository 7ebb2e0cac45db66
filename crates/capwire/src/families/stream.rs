//! Byte streams and blobs.
//!
//! Streams are drained while the encoder walks the graph (the reducer simply
//! awaits) and cross the wire as an `ArrayBuffer`. A `Blob` is
//! `[buffer, type]`; a `File` adds `[name, lastModified]`. On the way back
//! the bytes become a fresh pull-based stream, blob or file.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::Error;
use crate::error::Result;
use crate::families::elements;
use crate::families::number_at;
use crate::families::string_at;
use crate::registry::Handler;
use crate::value::ArrayBuffer;
use crate::value::Blob;
use crate::value::ByteStream;
use crate::value::Value;

pub fn handlers() -> Vec<Arc<dyn Handler>> {
    vec![Arc::new(ReadableStreamHandler), Arc::new(BlobHandler)]
}

fn buffer_at(tag: &str, items: &[Value]) -> Result<ArrayBuffer> {
    match items.first() {
        Some(Value::ArrayBuffer(buffer)) => Ok(buffer.clone()),
        _ => Err(Error::shape(tag, "element 0 must be an ArrayBuffer")),
    }
}

pub struct ReadableStreamHandler;

#[async_trait]
impl Handler for ReadableStreamHandler {
    fn tag(&self) -> &str {
        "ReadableStream"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Stream(stream) = value else {
            return Ok(None);
        };
        let bytes = stream.read_all().await?;
        trace!(len = bytes.len(), "buffered stream");
        Ok(Some(Value::ArrayBuffer(ArrayBuffer::new(bytes))))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        match value {
            Value::ArrayBuffer(buffer) => Ok(Value::Stream(ByteStream::from_bytes(buffer.as_bytes().to_vec()))),
            other => Err(Error::shape(self.tag(), format!("expected an ArrayBuffer, found {}", other.type_name()))),
        }
    }
}

pub struct BlobHandler;

#[async_trait]
impl Handler for BlobHandler {
    fn tag(&self) -> &str {
        "Blob"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Blob(blob) = value else {
            return Ok(None);
        };
        let mut items = vec![
            Value::ArrayBuffer(ArrayBuffer::new(blob.data().to_vec())),
            Value::from(blob.mime_type()),
        ];
        if let Some(file) = blob.file_info() {
            items.push(Value::from(file.name.as_str()));
            items.push(Value::Number(file.last_modified));
        }
        Ok(Some(Value::array(items)))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        match items.len() {
            2 => {
                let buffer = buffer_at(tag, &items)?;
                let mime_type = string_at(tag, &items, 1)?;
                Ok(Value::Blob(Blob::new(buffer.as_bytes().to_vec(), mime_type)))
            }
            4 => {
                let buffer = buffer_at(tag, &items)?;
                let mime_type = string_at(tag, &items, 1)?;
                let name = string_at(tag, &items, 2)?;
                let last_modified = number_at(tag, &items, 3)?;
                Ok(Value::Blob(Blob::file(buffer.as_bytes().to_vec(), mime_type, name, last_modified)))
            }
            n => Err(Error::shape(tag, format!("expected 2 or 4 elements, found {}", n))),
        }
    }
}

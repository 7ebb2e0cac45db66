//! Fetch-style HTTP messages.
//!
//! `Headers` travel as a plain object of combined entries. `Request` is
//! `[method, url, headers, cf, body]` and `Response` is
//! `[status, statusText, headers, cf, body]`; a body is `null` or a byte
//! stream, which the streaming family takes care of.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::Result;
use crate::families::elements;
use crate::families::number_at;
use crate::families::string_at;
use crate::registry::Handler;
use crate::value::ByteStream;
use crate::value::Headers;
use crate::value::Object;
use crate::value::Request;
use crate::value::Response;
use crate::value::Value;

pub fn handlers() -> Vec<Arc<dyn Handler>> {
    vec![Arc::new(HeadersHandler), Arc::new(RequestHandler), Arc::new(ResponseHandler)]
}

fn body_value(body: Option<&ByteStream>) -> Value {
    body.map(|b| Value::Stream(b.clone())).unwrap_or(Value::Null)
}

fn body_at(tag: &str, items: &[Value]) -> Result<Option<ByteStream>> {
    match items.get(4) {
        None | Some(Value::Null) | Some(Value::Undefined) => Ok(None),
        Some(Value::Stream(stream)) => Ok(Some(stream.clone())),
        Some(other) => Err(Error::shape(tag, format!("body must be null or a stream, found {}", other.type_name()))),
    }
}

fn headers_at(tag: &str, items: &[Value]) -> Result<Headers> {
    match items.get(2) {
        Some(Value::Headers(headers)) => Ok(headers.clone()),
        Some(Value::Object(object)) => headers_from_object(tag, object),
        _ => Err(Error::shape(tag, "element 2 must be Headers")),
    }
}

fn headers_from_object(tag: &str, object: &Object) -> Result<Headers> {
    let headers = Headers::new();
    for (name, value) in object.entries() {
        match value {
            Value::String(v) => headers.append(&name, v),
            _ => return Err(Error::shape(tag, format!("header '{}' must be a string", name))),
        }
    }
    Ok(headers)
}

pub struct HeadersHandler;

#[async_trait]
impl Handler for HeadersHandler {
    fn tag(&self) -> &str {
        "Headers"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Headers(headers) = value else {
            return Ok(None);
        };
        let entries = headers.entries().into_iter().map(|(name, v)| (name, Value::from(v)));
        Ok(Some(Value::object(entries)))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        match value {
            Value::Object(object) => Ok(Value::Headers(headers_from_object(self.tag(), &object)?)),
            other => Err(Error::shape(self.tag(), format!("expected an object, found {}", other.type_name()))),
        }
    }
}

pub struct RequestHandler;

#[async_trait]
impl Handler for RequestHandler {
    fn tag(&self) -> &str {
        "Request"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Request(request) = value else {
            return Ok(None);
        };
        Ok(Some(Value::array([
            Value::from(request.method()),
            Value::from(request.url()),
            Value::Headers(request.headers().clone()),
            request.cf().clone(),
            body_value(request.body()),
        ])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let method = string_at(tag, &items, 0)?;
        let url = string_at(tag, &items, 1)?;
        let headers = headers_at(tag, &items)?;
        let cf = items.get(3).cloned().unwrap_or_default();
        let body = body_at(tag, &items)?;
        Ok(Value::Request(Request::new(method, url, headers, cf, body)))
    }
}

pub struct ResponseHandler;

#[async_trait]
impl Handler for ResponseHandler {
    fn tag(&self) -> &str {
        "Response"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Response(response) = value else {
            return Ok(None);
        };
        Ok(Some(Value::array([
            Value::from(response.status() as u32),
            Value::from(response.status_text()),
            Value::Headers(response.headers().clone()),
            response.cf().clone(),
            body_value(response.body()),
        ])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let status = number_at(tag, &items, 0)?;
        if !(0.0..=999.0).contains(&status) || status.fract() != 0.0 {
            return Err(Error::shape(tag, format!("{} is not a valid status", status)));
        }
        let status_text = string_at(tag, &items, 1)?;
        let headers = headers_at(tag, &items)?;
        let cf = items.get(3).cloned().unwrap_or_default();
        let body = body_at(tag, &items)?;
        Ok(Value::Response(Response::new(status as u16, status_text, headers, cf, body)))
    }
}

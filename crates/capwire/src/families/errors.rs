//! Error values as `[name, message, stack, cause]`.
//!
//! Only the standard constructor names are trusted. An error with any other
//! name is sent as a plain `Error`, and a payload naming anything off the
//! list is rejected on revival.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::Result;
use crate::families::elements;
use crate::families::string_at;
use crate::registry::Handler;
use crate::value::ErrorValue;
use crate::value::Value;

/// Allowed error names. Generic `Error` is last.
pub const ALLOWED_ERROR_NAMES: [&str; 7] =
    ["EvalError", "RangeError", "ReferenceError", "SyntaxError", "TypeError", "URIError", "Error"];

pub fn handlers() -> Vec<Arc<dyn Handler>> {
    vec![Arc::new(ErrorHandler)]
}

pub struct ErrorHandler;

#[async_trait]
impl Handler for ErrorHandler {
    fn tag(&self) -> &str {
        "Error"
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Error(error) = value else {
            return Ok(None);
        };
        let name = ALLOWED_ERROR_NAMES.iter().find(|n| **n == error.name()).copied().unwrap_or("Error");
        Ok(Some(Value::array([
            Value::from(name),
            Value::from(error.message()),
            error.stack().map(Value::from).unwrap_or_default(),
            error.cause().cloned().unwrap_or_default(),
        ])))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        let tag = self.tag();
        let items = elements(tag, &value)?;
        let name = string_at(tag, &items, 0)?;
        if !ALLOWED_ERROR_NAMES.contains(&name.as_str()) {
            return Err(Error::shape(tag, format!("'{}' is not an allowed error constructor", name)));
        }
        let message = string_at(tag, &items, 1)?;
        let stack = match items.get(2) {
            None | Some(Value::Undefined) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(Error::shape(tag, "stack must be a string or undefined")),
        };
        let cause = items.get(3).filter(|c| !c.is_undefined()).cloned();
        Ok(Value::Error(ErrorValue::with_details(name, message, stack, cause)))
    }
}

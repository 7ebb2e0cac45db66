//! Wire envelope: a fixed-width correlation id followed by the codec payload.

use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;

/// Width of the textual UUID that prefixes every message.
pub const CORRELATION_ID_WIDTH: usize = 36;

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Splits a message into `(correlation id, payload)`.
pub fn split(message: &str) -> Result<(&str, &str)> {
    if message.len() < CORRELATION_ID_WIDTH || !message.is_char_boundary(CORRELATION_ID_WIDTH) {
        return Err(Error::Protocol(format!(
            "message of {} bytes has no {}-character correlation id",
            message.len(),
            CORRELATION_ID_WIDTH
        )));
    }
    Ok(message.split_at(CORRELATION_ID_WIDTH))
}

pub fn join(id: &str, payload: &str) -> String {
    let mut message = String::with_capacity(id.len() + payload.len());
    message.push_str(id);
    message.push_str(payload);
    message
}

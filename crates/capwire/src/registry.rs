//! # Type Registry
//!
//! Named reducer/reviver pairs that extend the codec beyond its built-in
//! vocabulary.
//!
//! ## Invariants
//!
//! * Handlers are consulted in registration order; the first reducer that
//!   returns a replacement wins.
//! * A tag names exactly one handler. Registering a second handler with the
//!   same tag fails instead of shadowing the first.
//! * Revivers are looked up by exact tag only.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::Result;
use crate::families;
use crate::value::Value;

/// An encode/decode converter for one tag.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Tag written as the first element of `[tag, replacement]`.
    fn tag(&self) -> &str;

    /// Returns the replacement to encode in place of `value`, or `None` when
    /// this handler does not apply. May suspend (e.g. to drain a stream).
    async fn reduce(&self, value: &Value) -> Result<Option<Value>>;

    /// Rebuilds a value from its decoded replacement.
    fn revive(&self, value: Value) -> Result<Value>;
}

/// Ordered, tag-unique set of handlers.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Registry {
    /// A registry with no handlers: the codec's built-in vocabulary only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection-independent family, in wire order: streaming,
    /// buffer, error, HTTP, then platform-internal.
    pub fn standard() -> Self {
        Self { handlers: families::standard() }
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        if self.handler(handler.tag()).is_some() {
            return Err(Error::DuplicateTag(handler.tag().to_string()));
        }
        self.handlers.push(handler);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, handler: Arc<dyn Handler>) -> Result<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn extend(&mut self, handlers: impl IntoIterator<Item = Arc<dyn Handler>>) -> Result<()> {
        for handler in handlers {
            self.register(handler)?;
        }
        Ok(())
    }

    pub fn handler(&self, tag: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.tag() == tag)
    }

    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    pub fn tags(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.tag()).collect()
    }

    pub async fn encode(&self, value: &Value) -> Result<String> {
        crate::encoder::encode(value, self).await
    }

    pub fn decode(&self, text: &str) -> Result<Value> {
        crate::decoder::decode(text, self)
    }
}

// ============================================================================
//  CLOSURE HANDLERS
// ============================================================================

struct FnHandler<R, V> {
    tag: String,
    reduce: R,
    revive: V,
}

#[async_trait]
impl<R, V> Handler for FnHandler<R, V>
where
    R: Fn(&Value) -> Option<Value> + Send + Sync,
    V: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn reduce(&self, value: &Value) -> Result<Option<Value>> {
        Ok((self.reduce)(value))
    }

    fn revive(&self, value: Value) -> Result<Value> {
        (self.revive)(value)
    }
}

/// Builds a handler from a synchronous reducer and a reviver.
pub fn handler<R, V>(tag: impl Into<String>, reduce: R, revive: V) -> Arc<dyn Handler>
where
    R: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    V: Fn(Value) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnHandler { tag: tag.into(), reduce, revive })
}

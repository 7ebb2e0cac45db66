//! # RPC Server
//!
//! Answers requests against an exposed root value.
//!
//! Each inbound message is `<correlation id><payload>`, the payload being an
//! encoded `{chain, targetHeapId}`. The chain is resolved against the heap
//! entry named by `targetHeapId`, or against the exposed root when there is
//! none, and the result goes back under the same id as `{data}` or `{error}`.
//!
//! ## Invariants
//!
//! * Requests are independent: one failing never affects another, and they
//!   may complete in any order.
//! * Every request whose correlation id is readable gets exactly one reply.
//! * The heap lives as long as the connection; `serve` empties it on close.

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use capwire::Handler;
use capwire::Registry;
use capwire::Value;

use crate::capability;
use crate::chain::ChainRef;
use crate::envelope;
use crate::error::Error;
use crate::error::Result;
use crate::heap::Heap;
use crate::resolve::Resolver;
use crate::transport::Transport;

struct ServerInner {
    expose: Value,
    heap: Arc<Heap>,
    registry: Registry,
    resolver: Resolver,
    transport: Arc<dyn Transport>,
}

/// Server end of a connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

pub struct RpcServerBuilder {
    expose: Value,
    handlers: Vec<Arc<dyn Handler>>,
}

impl RpcServerBuilder {
    /// Adds a codec handler after the standard and capability families.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self, transport: impl Transport) -> Result<RpcServer> {
        let heap = Arc::new(Heap::new());
        let mut registry = Registry::standard();
        registry.extend(capability::handlers(Some(heap.clone()), None))?;
        registry.extend(self.handlers)?;

        Ok(RpcServer {
            inner: Arc::new(ServerInner {
                expose: self.expose,
                resolver: Resolver::new(heap.clone()),
                heap,
                registry,
                transport: Arc::new(transport),
            }),
        })
    }
}

impl RpcServer {
    pub fn builder(expose: Value) -> RpcServerBuilder {
        RpcServerBuilder { expose, handlers: Vec::new() }
    }

    pub fn new(expose: Value, transport: impl Transport) -> Result<Self> {
        Self::builder(expose).build(transport)
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.inner.heap
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// Handles one inbound message and sends its reply.
    ///
    /// Fails only when the message has no readable correlation id or the
    /// reply could not be sent; call failures travel back as `{error}`.
    pub async fn receive(&self, message: &str) -> Result<()> {
        let (id, payload) = envelope::split(message).inspect_err(|e| {
            warn!(error = %e, "dropping message without correlation id");
        })?;

        let reply = match self.handle(payload).await {
            Ok(data) => Value::object([("data", data)]),
            Err(e) => {
                debug!(id, error = %e, "call failed");
                Value::object([("error", e.into_value())])
            }
        };
        let text = match self.inner.registry.encode(&reply).await {
            Ok(text) => text,
            Err(e) => {
                warn!(id, error = %e, "reply could not be encoded");
                let fallback = Value::object([("error", Error::Codec(e).into_value())]);
                self.inner.registry.encode(&fallback).await?
            }
        };

        self.inner.transport.send(&envelope::join(id, &text)).await?;
        Ok(())
    }

    async fn handle(&self, payload: &str) -> Result<Value> {
        let request = self.inner.registry.decode(payload)?;
        let reference = ChainRef::from_value(&request)?;
        let root = match &reference.target {
            Some(id) => self
                .inner
                .heap
                .get(id)
                .ok_or_else(|| Error::Capability(format!("No capability with id {}", id)))?,
            None => self.inner.expose.clone(),
        };
        debug!(steps = reference.chain.len(), target = ?reference.target, "resolving request");
        self.inner.resolver.resolve_chain(root, &reference.chain).await
    }

    /// Receives until the transport closes, handling each message on its own
    /// task, then releases the heap.
    pub async fn serve(&self) -> Result<()> {
        let outcome = loop {
            match self.inner.transport.recv().await {
                Ok(Some(message)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.receive(&message).await {
                            warn!(error = %e, "request dropped");
                        }
                    });
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    warn!(error = %e, "transport error, closing connection");
                    break Err(Error::Transport(e));
                }
            }
        };
        self.inner.heap.dispose_all();
        outcome
    }
}

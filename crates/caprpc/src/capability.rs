//! # Capability Family
//!
//! Connection-bound codec handlers. They need the connection's heap (server
//! side) or a stub proxy factory (client side), so they are built per
//! connection and registered after the standard families.
//!
//! * `RpcStub`: a live capability nested anywhere in a value. The server
//!   stores it and sends its heap id; the client turns the id into a proxy.
//! * `UnresolvedChain`: a chain reference, `{chain, targetHeapId}`. Used for
//!   capability results and for pipelined call arguments.

use std::sync::Arc;

use async_trait::async_trait;

use capwire::Handler;
use capwire::Value;

use crate::chain::ChainRef;
use crate::client::Remote;
use crate::heap::Heap;

/// Turns a reference into the local stand-in for a remote capability.
pub type StubProxy = Arc<dyn Fn(ChainRef) -> capwire::Result<Value> + Send + Sync>;

/// Both connection-bound handlers, in wire order.
pub fn handlers(heap: Option<Arc<Heap>>, proxy: Option<StubProxy>) -> Vec<Arc<dyn Handler>> {
    vec![
        Arc::new(RpcStubHandler { heap, proxy: proxy.clone() }),
        Arc::new(UnresolvedChainHandler { proxy }),
    ]
}

pub struct RpcStubHandler {
    heap: Option<Arc<Heap>>,
    proxy: Option<StubProxy>,
}

#[async_trait]
impl Handler for RpcStubHandler {
    fn tag(&self) -> &str {
        "RpcStub"
    }

    async fn reduce(&self, value: &Value) -> capwire::Result<Option<Value>> {
        match (value, &self.heap) {
            (Value::Capability(stub), Some(heap)) if stub.downcast_ref::<Remote>().is_none() => {
                Ok(Some(Value::String(heap.put(value.clone()))))
            }
            _ => Ok(None),
        }
    }

    fn revive(&self, value: Value) -> capwire::Result<Value> {
        let Value::String(id) = value else {
            return Err(capwire::Error::shape(self.tag(), "heap id must be a string"));
        };
        if let Some(heap) = &self.heap {
            return heap
                .get(&id)
                .ok_or_else(|| capwire::Error::Capability(format!("No capability with id {}", id)));
        }
        match &self.proxy {
            Some(proxy) => proxy(ChainRef::heap(id)),
            None => Err(capwire::Error::Capability("Can't inflate RpcStub".into())),
        }
    }
}

pub struct UnresolvedChainHandler {
    proxy: Option<StubProxy>,
}

#[async_trait]
impl Handler for UnresolvedChainHandler {
    fn tag(&self) -> &str {
        "UnresolvedChain"
    }

    async fn reduce(&self, value: &Value) -> capwire::Result<Option<Value>> {
        if let Some(reference) = ChainRef::from_opaque(value) {
            return Ok(Some(reference.to_value()));
        }
        match value {
            Value::Capability(stub) => Ok(stub.downcast_ref::<Remote>().map(|remote| remote.chain_ref().to_value())),
            _ => Ok(None),
        }
    }

    fn revive(&self, value: Value) -> capwire::Result<Value> {
        let reference =
            ChainRef::from_value(&value).map_err(|e| capwire::Error::shape(self.tag(), e.to_string()))?;
        match &self.proxy {
            Some(proxy) => proxy(reference),
            None => Ok(reference.into_value()),
        }
    }
}

//! # RPC Client with Async Pump
//!
//! The calling end of a connection. Requests are built as [`Remote`] chains
//! without any I/O, and only sent when resolved.
//!
//! A background pump reads replies from the transport and routes each to
//! its pending call by correlation id. When the transport closes, every call
//! still waiting fails with `ConnectionLost`.
//!
//! ```text
//! let db = client.root().get("db");          // nothing sent yet
//! let user = db.call("user", [7.into()]);     // still nothing
//! let name = user.get("name").resolve().await?;
//! ```
//!
//! A `Remote` passed as a call argument travels as a chain reference, so the
//! server resolves it in place (pipelining) instead of the client awaiting
//! it first.

use std::any::Any;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use capwire::Capability;
use capwire::Handler;
use capwire::Member;
use capwire::Registry;
use capwire::Stub;
use capwire::Value;

use crate::capability;
use crate::capability::StubProxy;
use crate::chain::Argument;
use crate::chain::ChainOp;
use crate::chain::ChainRef;
use crate::envelope;
use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;

type Pending = DashMap<String, oneshot::Sender<Result<Value>>>;

struct ClientInner {
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    registry: Registry,
    closed: Arc<AtomicBool>,
}

/// Client end of a connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

#[derive(Default)]
pub struct RpcClientBuilder {
    handlers: Vec<Arc<dyn Handler>>,
}

impl RpcClientBuilder {
    /// Adds a codec handler after the standard and capability families.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Creates the client and spawns its pump. Must run inside a tokio
    /// runtime.
    pub fn connect(self, transport: impl Transport) -> Result<RpcClient> {
        // Revived capabilities need the client, which does not exist yet.
        let slot: Arc<OnceLock<Weak<ClientInner>>> = Arc::new(OnceLock::new());
        let proxy_slot = slot.clone();
        let proxy: StubProxy = Arc::new(move |reference: ChainRef| {
            let inner = proxy_slot
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| capwire::Error::Capability("Client closed before the reply was revived".into()))?;
            Ok(Remote::new(RpcClient { inner }, reference).into_value())
        });

        let mut registry = Registry::standard();
        registry.extend(capability::handlers(None, Some(proxy)))?;
        registry.extend(self.handlers)?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_registry = registry.clone();
        let pump_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                match pump_transport.recv().await {
                    Ok(Some(message)) => route(&message, &pump_registry, &pump_pending),
                    Ok(None) => {
                        debug!("connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport error in pump");
                        break;
                    }
                }
            }
            pump_closed.store(true, Ordering::SeqCst);
            notify_all_pending(&pump_pending);
        });

        let inner = Arc::new(ClientInner { transport, pending, registry, closed });
        let _ = slot.set(Arc::downgrade(&inner));
        Ok(RpcClient { inner })
    }
}

/// Delivers one reply to the call waiting for it.
fn route(message: &str, registry: &Registry, pending: &Pending) {
    let (id, payload) = match envelope::split(message) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "dropping reply without correlation id");
            return;
        }
    };
    let Some((_, tx)) = pending.remove(id) else {
        warn!(id, "reply for no pending call");
        return;
    };

    let result = registry.decode(payload).map_err(Error::from).and_then(|reply| {
        let reply = reply.as_object().ok_or_else(|| Error::Protocol("reply is not an object".into()))?;
        match reply.get("error") {
            Some(error) if !error.is_undefined() => Err(Error::Remote(error)),
            _ => Ok(reply.get("data").unwrap_or_default()),
        }
    });
    debug!(id, ok = result.is_ok(), "reply routed");
    let _ = tx.send(result);
}

fn notify_all_pending(pending: &Pending) {
    let keys: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(Error::ConnectionLost));
        }
    }
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::default()
    }

    pub fn new(transport: impl Transport) -> Result<Self> {
        Self::builder().connect(transport)
    }

    /// The server's exposed root.
    pub fn root(&self) -> Remote {
        Remote::new(self.clone(), ChainRef::default())
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Sends `reference` as a request and waits for its reply.
    pub async fn call(&self, reference: &ChainRef) -> Result<Value> {
        let payload = self.inner.registry.encode(&reference.to_value()).await?;
        let id = envelope::new_correlation_id();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.pending.remove(&id);
            return Err(Error::ConnectionLost);
        }

        if let Err(e) = self.inner.transport.send(&envelope::join(&id, &payload)).await {
            self.inner.pending.remove(&id);
            return Err(e.into());
        }
        debug!(id = %id, steps = reference.chain.len(), "call sent");

        rx.await.unwrap_or(Err(Error::ConnectionLost))
    }
}

// ============================================================================
//  REMOTE HANDLES
// ============================================================================

/// A chain rooted at a remote value. Building one never touches the wire.
///
/// Chain arguments without a heap id are resolved against the root of the
/// call that carries them, so a root-relative argument cannot be pipelined
/// into a call on a heap handle. Such a chain is kept, and fails on
/// `resolve` without being sent.
#[derive(Clone)]
pub struct Remote {
    client: RpcClient,
    reference: ChainRef,
    rejected: Option<String>,
}

impl Remote {
    fn new(client: RpcClient, reference: ChainRef) -> Self {
        Self { client, reference, rejected: None }
    }

    fn extend(&self, op: ChainOp) -> Remote {
        let mut reference = self.reference.clone();
        reference.chain.push(op);
        Self { client: self.client.clone(), reference, rejected: self.rejected.clone() }
    }

    pub fn get(&self, property: impl Into<String>) -> Remote {
        self.extend(ChainOp::Get(property.into()))
    }

    /// Arguments that are themselves `Remote`s are resolved by the server.
    pub fn apply(&self, args: impl IntoIterator<Item = Value>) -> Remote {
        let mut rejected = None;
        let args = args
            .into_iter()
            .enumerate()
            .map(|(i, arg)| match Remote::from_value(&arg) {
                Some(remote) => {
                    if rejected.is_none() {
                        rejected = remote.rejected.clone().or_else(|| self.misrooted(i, &remote));
                    }
                    Argument::Chain(remote.reference)
                }
                None => Argument::Literal(arg),
            })
            .collect();

        let mut applied = self.extend(ChainOp::Apply(args));
        if applied.rejected.is_none() {
            applied.rejected = rejected;
        }
        applied
    }

    fn misrooted(&self, position: usize, argument: &Remote) -> Option<String> {
        match (&self.reference.target, &argument.reference.target) {
            (Some(target), None) => Some(format!(
                "argument {} starts at the exposed root but the call targets capability {}; \
                 resolve it first or pass a capability handle",
                position, target
            )),
            _ => None,
        }
    }

    pub fn call(&self, method: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Remote {
        self.get(method).apply(args)
    }

    pub async fn resolve(&self) -> Result<Value> {
        if let Some(reason) = &self.rejected {
            return Err(Error::Protocol(reason.clone()));
        }
        self.client.call(&self.reference).await
    }

    pub fn chain_ref(&self) -> &ChainRef {
        &self.reference
    }

    /// Heap id this chain starts from, if it does not start at the root.
    pub fn target(&self) -> Option<&str> {
        self.reference.target.as_deref()
    }

    pub fn into_value(self) -> Value {
        Value::Capability(Stub::new(self))
    }

    pub fn from_value(value: &Value) -> Option<Remote> {
        match value {
            Value::Capability(stub) => stub.downcast_ref::<Remote>().cloned(),
            _ => None,
        }
    }
}

impl Capability for Remote {
    fn type_name(&self) -> &str {
        "Remote"
    }

    fn get(&self, property: &str) -> capwire::Result<Member> {
        Ok(Member::Property(Remote::get(self, property).into_value()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

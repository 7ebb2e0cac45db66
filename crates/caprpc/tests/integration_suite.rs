//! Integration tests: a server and a client talking over an in-process channel.

use std::any::Any;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use caprpc::ChainOp;
use caprpc::ChainRef;
use caprpc::ChannelTransport;
use caprpc::Error;
use caprpc::Remote;
use caprpc::RpcClient;
use caprpc::RpcServer;
use caprpc::Transport;
use caprpc::capwire;
use caprpc::envelope;
use caprpc::capwire::ArrayBuffer;
use caprpc::capwire::ByteStream;
use caprpc::capwire::Capability;
use caprpc::capwire::Function;
use caprpc::capwire::Member;
use caprpc::capwire::Stub;
use caprpc::capwire::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// --- Fixtures ---

struct Counter {
    count: AtomicI64,
}

impl Capability for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn get(&self, property: &str) -> capwire::Result<Member> {
        match property {
            "add" => Ok(Member::Method(Function::sync("add", |this, args| {
                let counter = match &this {
                    Value::Capability(stub) => stub.downcast_ref::<Counter>(),
                    _ => None,
                };
                let counter = counter.ok_or_else(|| capwire::Error::throw("TypeError", "not a counter"))?;
                let by = args.first().and_then(Value::as_f64).unwrap_or(1.0) as i64;
                Ok(Value::from(counter.count.fetch_add(by, Ordering::SeqCst) + by))
            }))),
            "value" => Ok(Member::Property(Value::from(self.count.load(Ordering::SeqCst)))),
            _ => Ok(Member::Property(Value::Undefined)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn api() -> Value {
    let counter = Function::sync("counter", |_, args| {
        let start = args.first().and_then(Value::as_f64).unwrap_or(0.0) as i64;
        Ok(Value::Capability(Stub::new(Counter { count: AtomicI64::new(start) })))
    });
    let add = Function::sync("add", |_, args| Ok(Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>())));
    let slow = Function::new("slow", |_, args| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(args.into_iter().next().unwrap_or_default())
    });
    let fail = Function::sync("fail", |_, _| Err(capwire::Error::throw("TypeError", "boom")));
    let download = Function::sync("download", |_, _| {
        Ok(Value::Stream(ByteStream::from_bytes(&b"streamed"[..])))
    });

    Value::object([
        ("version", Value::from("1.0")),
        ("counter", Value::Function(counter)),
        ("add", Value::Function(add)),
        ("slow", Value::Function(slow)),
        ("fail", Value::Function(fail)),
        ("download", Value::Function(download)),
        ("settings", Value::object([("limit", Value::from(10))])),
    ])
}

/// Starts a server for `api()` and returns a connected client.
fn connect() -> anyhow::Result<(RpcClient, RpcServer)> {
    init_tracing();
    let (client_end, server_end) = ChannelTransport::pair();
    let server = RpcServer::new(api(), server_end)?;
    let serving = server.clone();
    tokio::spawn(async move { serving.serve().await });
    let client = RpcClient::new(client_end)?;
    Ok((client, server))
}

// --- Calls ---

#[tokio::test]
async fn test_property_and_call() -> anyhow::Result<()> {
    let (client, _server) = connect()?;
    let root = client.root();

    let version = root.get("version").resolve().await?;
    assert_eq!(version.as_str(), Some("1.0"));

    let sum = root.call("add", [Value::from(2), Value::from(3)]).resolve().await?;
    assert_eq!(sum.as_f64(), Some(5.0));

    let limit = root.get("settings").get("limit").resolve().await?;
    assert_eq!(limit.as_f64(), Some(10.0));
    Ok(())
}

#[tokio::test]
async fn test_remote_errors() -> anyhow::Result<()> {
    let (client, _server) = connect()?;

    let err = client.root().call("fail", []).resolve().await.unwrap_err();
    let Error::Remote(Value::Error(error)) = &err else {
        panic!("expected a remote error, got {}", err);
    };
    assert_eq!(error.name(), "TypeError");
    assert_eq!(error.message(), "boom");

    let err = client.root().get("nothing").get("deeper").resolve().await.unwrap_err();
    let Error::Remote(Value::Error(error)) = &err else {
        panic!("expected a remote error, got {}", err);
    };
    assert_eq!(error.name(), "TypeError");
    assert_eq!(error.message(), "Cannot read properties of undefined (reading 'deeper')");
    Ok(())
}

#[tokio::test]
async fn test_failure_does_not_disturb_concurrent_call() -> anyhow::Result<()> {
    let (client, _server) = connect()?;
    let root = client.root();

    let slow = root.call("slow", [Value::from("done")]);
    let fail = root.call("fail", []);
    let (slow, fail) = tokio::join!(slow.resolve(), fail.resolve());

    assert_eq!(slow?.as_str(), Some("done"));
    assert!(matches!(fail, Err(Error::Remote(_))));
    Ok(())
}

#[tokio::test]
async fn test_streams_are_drained() -> anyhow::Result<()> {
    let (client, _server) = connect()?;

    let body = client.root().call("download", []).resolve().await?;
    let Value::Stream(stream) = &body else {
        panic!("expected a stream, got {}", body.type_name());
    };
    assert_eq!(stream.read_all().await?, b"streamed".to_vec());

    let buffer = ArrayBuffer::new(vec![1u8, 2, 3]);
    let echoed = client.root().call("slow", [Value::ArrayBuffer(buffer)]).resolve().await?;
    let Value::ArrayBuffer(echoed) = echoed else {
        panic!("expected an ArrayBuffer");
    };
    assert_eq!(echoed.as_bytes(), &[1, 2, 3]);
    Ok(())
}

// --- Capabilities ---

#[tokio::test]
async fn test_capability_round_trip() -> anyhow::Result<()> {
    let (client, server) = connect()?;

    let counter = client.root().call("counter", [Value::from(5)]).resolve().await?;
    let counter = Remote::from_value(&counter).expect("capabilities come back as remote handles");
    assert!(counter.target().is_some());
    assert_eq!(server.heap().len(), 1);

    assert_eq!(counter.call("add", [Value::from(2)]).resolve().await?.as_f64(), Some(7.0));
    assert_eq!(counter.call("add", []).resolve().await?.as_f64(), Some(8.0));
    assert_eq!(counter.get("value").resolve().await?.as_f64(), Some(8.0));
    Ok(())
}

#[tokio::test]
async fn test_pipelining_across_handles() -> anyhow::Result<()> {
    let (client, _server) = connect()?;

    let first = client.root().call("counter", [Value::from(40)]).resolve().await?;
    let second = client.root().call("counter", [Value::from(1)]).resolve().await?;
    let first = Remote::from_value(&first).expect("remote handle");
    let second = Remote::from_value(&second).expect("remote handle");

    // The server reads `second.value` itself before calling `first.add`.
    let pipelined = first.call("add", [second.get("value").into_value()]);
    assert_eq!(pipelined.resolve().await?.as_f64(), Some(41.0));
    Ok(())
}

#[tokio::test]
async fn test_root_argument_into_handle_call_is_refused() -> anyhow::Result<()> {
    let (client, _server) = connect()?;
    let root = client.root();
    let counter = root.call("counter", [Value::from(5)]).resolve().await?;
    let counter = Remote::from_value(&counter).expect("remote handle");

    let limit = root.get("settings").get("limit");
    let err = counter.call("add", [limit.clone().into_value()]).resolve().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err}");

    // Nothing was sent, so the counter is unchanged.
    assert_eq!(counter.get("value").resolve().await?.as_f64(), Some(5.0));

    // Resolved first, the value goes over as a literal.
    let limit = limit.resolve().await?;
    assert_eq!(counter.call("add", [limit]).resolve().await?.as_f64(), Some(15.0));

    // Root-relative arguments into a call on the root are still pipelined.
    let sum = root.call("add", [root.get("settings").get("limit").into_value(), Value::from(1)]);
    assert_eq!(sum.resolve().await?.as_f64(), Some(11.0));
    Ok(())
}

#[tokio::test]
async fn test_connection_lost() -> anyhow::Result<()> {
    init_tracing();
    let (client_end, server_end) = ChannelTransport::pair();
    let client = RpcClient::new(client_end)?;

    let pending = tokio::spawn({
        let root = client.root();
        async move { root.get("anything").resolve().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(server_end);

    let outcome = pending.await?;
    assert!(matches!(outcome, Err(Error::ConnectionLost)));

    let after = client.root().get("anything").resolve().await;
    assert!(matches!(after, Err(Error::ConnectionLost) | Err(Error::Transport(_))));
    Ok(())
}

#[tokio::test]
async fn test_server_disposes_heap_on_close() -> anyhow::Result<()> {
    init_tracing();
    let (raw, server_end) = ChannelTransport::pair();
    let server = RpcServer::new(api(), server_end)?;
    let serving = server.clone();
    let task = tokio::spawn(async move { serving.serve().await });

    let request = ChainRef::new(vec![ChainOp::Get("counter".into()), ChainOp::Apply(Vec::new())], None);
    let payload = capwire::Registry::standard().encode(&request.to_value()).await?;
    let id = envelope::new_correlation_id();
    raw.send(&envelope::join(&id, &payload)).await?;

    let reply = raw.recv().await?.expect("a reply");
    assert!(reply.starts_with(&id));
    assert!(reply.contains("UnresolvedChain"));
    assert_eq!(server.heap().len(), 1);

    drop(raw);
    task.await??;
    assert!(server.heap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_custom_handler() -> anyhow::Result<()> {
    init_tracing();
    let point = || {
        capwire::handler(
            "Point",
            |v: &Value| {
                let o = v.as_object()?;
                o.contains_key("x").then(|| Value::array([o.get("x").unwrap_or_default(), o.get("y").unwrap_or_default()]))
            },
            |v: Value| {
                let items = v.as_array().map(|a| a.to_vec()).unwrap_or_default();
                let at = |i: usize| items.get(i).cloned().unwrap_or_default();
                Ok(Value::object([("x", at(0)), ("y", at(1)), ("revived", Value::from(true))]))
            },
        )
    };

    let (client_end, server_end) = ChannelTransport::pair();
    let origin = Value::object([("x", Value::from(1)), ("y", Value::from(2))]);
    let server = RpcServer::builder(Value::object([("origin", origin)])).handler(point()).build(server_end)?;
    let serving = server.clone();
    tokio::spawn(async move { serving.serve().await });
    let client = RpcClient::builder().handler(point()).connect(client_end)?;

    let origin = client.root().get("origin").resolve().await?;
    let origin = origin.as_object().expect("object");
    assert_eq!(origin.get("revived").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(origin.get("y").and_then(|v| v.as_f64()), Some(2.0));
    Ok(())
}

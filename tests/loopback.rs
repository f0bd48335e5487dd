//! End-to-end tests over real sockets with the method registry.

use pollrpc::{MethodRegistry, RpcError, Server, ServerConfig, TcpAcceptor};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Polls `server` on a background thread until the returned guard is dropped.
struct Reactor {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Reactor {
    fn start(registry: MethodRegistry, config: ServerConfig) -> Self {
        let mut server = Server::listen("127.0.0.1:0", config, registry).unwrap();
        let addr = server.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                if server.poll().unwrap().is_idle() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            server.shutdown();
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn create_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register("add", |params| {
        let args: Vec<i64> = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        Ok(json!(args.iter().sum::<i64>()))
    });
    registry.register("slow", |params| {
        thread::sleep(Duration::from_millis(20));
        Ok(params.unwrap_or(Value::Null))
    });
    registry
}

fn round_trip(reader: &mut BufReader<TcpStream>, request: &str) -> Value {
    reader.get_mut().write_all(request.as_bytes()).unwrap();
    reader.get_mut().write_all(b"\n").unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    serde_json::from_str(&line).unwrap()
}

#[test]
fn test_builtin_methods() {
    let reactor = Reactor::start(create_registry(), ServerConfig::default());
    let mut client = BufReader::new(TcpStream::connect(reactor.addr).unwrap());

    let reply = round_trip(&mut client, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
    assert_eq!(reply, json!({"jsonrpc": "2.0", "result": "pong", "id": 1}));

    let reply = round_trip(
        &mut client,
        r#"{"jsonrpc":"2.0","method":"echo","params":{"k":[1,2]},"id":"e"}"#,
    );
    assert_eq!(reply["result"], json!({"k": [1, 2]}));
    assert_eq!(reply["id"], json!("e"));

    let reply = round_trip(&mut client, r#"{"jsonrpc":"2.0","method":"rpc_get_methods","id":2}"#);
    assert_eq!(
        reply["result"],
        json!(["add", "echo", "ping", "rpc_get_methods", "slow"])
    );
}

#[test]
fn test_error_responses() {
    let reactor = Reactor::start(create_registry(), ServerConfig::default());
    let mut client = BufReader::new(TcpStream::connect(reactor.addr).unwrap());

    let reply = round_trip(&mut client, r#"{"jsonrpc":"2.0","method":"nope","id":1}"#);
    assert_eq!(reply["error"]["code"], json!(-32601));
    assert_eq!(reply["error"]["message"], json!("Method not found"));

    let reply = round_trip(
        &mut client,
        r#"{"jsonrpc":"2.0","method":"add","params":"x","id":2}"#,
    );
    assert_eq!(reply["error"]["code"], json!(-32600));

    let reply = round_trip(
        &mut client,
        r#"{"jsonrpc":"2.0","method":"add","params":{"a":1},"id":3}"#,
    );
    assert_eq!(reply["error"]["code"], json!(-32602));
    assert_eq!(reply["id"], json!(3));
}

#[test]
fn test_pipelined_requests_answer_in_order() {
    let reactor = Reactor::start(create_registry(), ServerConfig::default());
    let mut stream = TcpStream::connect(reactor.addr).unwrap();

    let batch: String = (1..=20)
        .map(|i| {
            format!("{{\"jsonrpc\":\"2.0\",\"method\":\"add\",\"params\":[{},1],\"id\":{}}}\n", i, i)
        })
        .collect();
    stream.write_all(batch.as_bytes()).unwrap();

    let mut reader = BufReader::new(stream);
    for i in 1..=20i64 {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], json!(i));
        assert_eq!(reply["result"], json!(i + 1));
    }
}

#[test]
fn test_connections_beyond_capacity_wait_in_backlog() {
    let config = ServerConfig::default().max_connections(1);
    let reactor = Reactor::start(create_registry(), config);

    let mut first = BufReader::new(TcpStream::connect(reactor.addr).unwrap());
    let reply = round_trip(&mut first, r#"{"method":"ping","id":1}"#);
    assert_eq!(reply["result"], json!("pong"));

    // Connects at the kernel level but is not served until the first one leaves
    let mut second = BufReader::new(TcpStream::connect(reactor.addr).unwrap());
    second
        .get_mut()
        .write_all(b"{\"method\":\"ping\",\"id\":2}\n")
        .unwrap();
    second
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut line = String::new();
    assert!(second.read_line(&mut line).is_err());

    drop(first);
    second.get_ref().set_read_timeout(None).unwrap();
    line.clear();
    second.read_line(&mut line).unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["id"], json!(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handlers_on_worker_pool() {
    let registry = create_registry().with_runtime(tokio::runtime::Handle::current());
    let reactor = Reactor::start(registry, ServerConfig::default());

    let stream = tokio::net::TcpStream::connect(reactor.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(read_half).lines();

    // Registered methods complete on a worker thread
    write_half
        .write_all(b"{\"method\":\"slow\",\"params\":[\"a\"],\"id\":1}\n")
        .await
        .unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["result"], json!(["a"]));

    write_half
        .write_all(b"{\"method\":\"add\",\"params\":[2,3],\"id\":2}\n{\"method\":\"ping\",\"id\":3}\n")
        .await
        .unwrap();

    // add runs on a worker while ping is answered inline, so either may
    // arrive first
    let mut ids = Vec::new();
    for _ in 0..2 {
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        ids.push(reply["id"].clone());
    }
    ids.sort_by_key(|id| id.as_i64());
    assert_eq!(ids, vec![json!(2), json!(3)]);

    drop(write_half);
    tokio::task::spawn_blocking(move || drop(reactor))
        .await
        .unwrap();
}

#[cfg(unix)]
#[test]
fn test_unix_socket() {
    use std::os::unix::net::UnixStream;

    let path = std::env::temp_dir().join(format!("pollrpc-loopback-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut server =
        Server::listen_unix(&path, ServerConfig::default(), create_registry()).unwrap();
    let mut client = UnixStream::connect(&path).unwrap();
    client
        .write_all(b"{\"method\":\"add\",\"params\":[40,2],\"id\":1}\n")
        .unwrap();

    for _ in 0..10_000 {
        server.poll().unwrap();
        if server.stats().snapshot().responses_sent == 1 {
            break;
        }
        thread::yield_now();
    }

    let mut line = String::new();
    BufReader::new(client).read_line(&mut line).unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["result"], json!(42));

    server.shutdown();
    assert!(!path.exists());
}

#[test]
fn test_bind_failure() {
    let taken = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), 16, true).unwrap();
    let addr = taken.local_addr().unwrap();

    let result = Server::listen(addr, ServerConfig::default(), create_registry());
    assert!(result.is_err());
}

//! pollrpc - A Poll-Driven JSON-RPC Server
//!
//! This is the main entry point for the pollrpc server.
//! It binds the listener, runs the poll loop on a dedicated thread and
//! executes method handlers on a tokio blocking pool.

use anyhow::{anyhow, Context};
use pollrpc::{
    Acceptor, FrameParser, MethodRegistry, RpcError, Server, ServerConfig, ServerStats,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long the poll loop sleeps after a step that did nothing
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Unix socket path; overrides host and port
    unix: Option<PathBuf>,
    /// Connection slots
    max_connections: usize,
    /// Receive buffer per connection, in bytes
    recv_buffer: usize,
    /// Threads available to method handlers
    workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: pollrpc::DEFAULT_HOST.to_string(),
            port: pollrpc::DEFAULT_PORT,
            unix: None,
            max_connections: server.max_connections,
            recv_buffer: server.recv_buffer_size,
            workers: 4,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = parse_value(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = parse_value(&args, i, "--port");
                    i += 2;
                }
                "--unix" | "-u" => {
                    config.unix = Some(parse_value(&args, i, "--unix"));
                    i += 2;
                }
                "--max-connections" | "-c" => {
                    config.max_connections = parse_value(&args, i, "--max-connections");
                    i += 2;
                }
                "--recv-buffer" => {
                    config.recv_buffer = parse_value(&args, i, "--recv-buffer");
                    i += 2;
                }
                "--workers" | "-w" => {
                    config.workers = parse_value(&args, i, "--workers");
                    if config.workers == 0 {
                        eprintln!("Error: --workers must be at least 1");
                        std::process::exit(1);
                    }
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("pollrpc version {}", pollrpc::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .max_connections(self.max_connections)
            .recv_buffer_size(self.recv_buffer)
    }
}

/// Reads the value following the flag at `args[i]`, exiting on error.
fn parse_value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, raw);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
pollrpc - A Poll-Driven JSON-RPC Server

USAGE:
    pollrpc [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 5260)
    -u, --unix <PATH>              Listen on a Unix socket instead of TCP
    -c, --max-connections <N>      Connection slots (default: 64)
        --recv-buffer <BYTES>      Receive buffer per connection (default: 32768)
    -w, --workers <N>              Threads for method handlers (default: 4)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    pollrpc                        # Start on 127.0.0.1:5260
    pollrpc --port 5261            # Start on port 5261
    pollrpc --unix /tmp/rpc.sock   # Listen on a Unix socket

CONNECTING:
    Send one JSON-RPC request per line:
    $ echo '{{"jsonrpc":"2.0","method":"ping","id":1}}' | nc 127.0.0.1 5260
    {{"jsonrpc":"2.0","result":"pong","id":1}}
"#
    );
}

fn print_banner(config: &Config) {
    let address = match &config.unix {
        Some(path) => path.display().to_string(),
        None => config.bind_address(),
    };
    println!(
        r#"
pollrpc v{} - Poll-Driven JSON-RPC Server
──────────────────────────────────────────────────────────────
Server started on {}
Connection slots: {}, handler threads: {}

Use Ctrl+C to shutdown gracefully.
"#,
        pollrpc::VERSION,
        address,
        config.max_connections,
        config.workers
    );
}

/// Adds methods that report on the running server.
fn register_server_methods(registry: &mut MethodRegistry, stats: Arc<ServerStats>) {
    registry.register("server_stats", move |_params| {
        serde_json::to_value(stats.snapshot()).map_err(|e| RpcError::internal(e.to_string()))
    });
}

/// Drives the server until `stop` is set, then shuts it down.
fn run_reactor<A, P>(mut server: Server<MethodRegistry, A, P>, stop: Arc<AtomicBool>)
where
    A: Acceptor,
    P: FrameParser,
{
    while !stop.load(Ordering::Acquire) {
        match server.poll() {
            Ok(summary) if summary.is_idle() => thread::sleep(IDLE_SLEEP),
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Poll step failed");
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
    server.shutdown();
}

fn spawn_reactor<A, P>(
    mut server: Server<MethodRegistry, A, P>,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<()>>
where
    A: Acceptor + Send + 'static,
    A::Stream: Send,
    P: FrameParser + Send + 'static,
{
    let stats = server.stats();
    register_server_methods(server.dispatcher_mut(), stats);

    thread::Builder::new()
        .name("pollrpc-reactor".to_string())
        .spawn(move || run_reactor(server, stop))
        .context("Failed to spawn reactor thread")
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Method handlers run on the blocking pool; the poll loop has its own thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(config.workers)
        .thread_name("pollrpc-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let registry = MethodRegistry::new().with_runtime(runtime.handle().clone());
    let stop = Arc::new(AtomicBool::new(false));

    let reactor = match &config.unix {
        #[cfg(unix)]
        Some(path) => {
            let server = Server::listen_unix(path, config.server_config(), registry)?;
            spawn_reactor(server, Arc::clone(&stop))?
        }
        #[cfg(not(unix))]
        Some(_) => anyhow::bail!("--unix is only supported on Unix platforms"),
        None => {
            let server = Server::listen(config.bind_address(), config.server_config(), registry)?;
            spawn_reactor(server, Arc::clone(&stop))?
        }
    };

    print_banner(&config);

    // Wait for Ctrl+C
    runtime
        .block_on(signal::ctrl_c())
        .context("Failed to install Ctrl+C handler")?;
    info!("Shutdown signal received, stopping server...");

    stop.store(true, Ordering::Release);
    reactor
        .join()
        .map_err(|_| anyhow!("reactor thread panicked"))?;

    info!("Server shutdown complete");
    Ok(())
}

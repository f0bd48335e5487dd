//! Method dispatch table.
//!
//! Built-in methods are answered inline. Registered handlers run inline too,
//! unless the registry was given a tokio runtime, in which case they run on
//! its blocking pool and complete their requests from a worker thread.

use crate::connection::Request;
use crate::protocol::{ErrorCode, RpcError};
use crate::server::Dispatcher;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// Outcome of a method handler.
pub type MethodResult = Result<Value, RpcError>;

type Handler = Arc<dyn Fn(Option<Value>) -> MethodResult + Send + Sync>;

const BUILTIN_METHODS: [&str; 3] = ["echo", "ping", "rpc_get_methods"];

/// Routes requests to handlers by method name.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    /// User-registered handlers; these shadow built-ins of the same name
    methods: HashMap<String, Handler>,
    /// Runtime whose blocking pool executes registered handlers
    runtime: Option<Handle>,
}

impl MethodRegistry {
    /// Creates a registry holding only the built-in methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs registered handlers on `runtime`'s blocking pool instead of the
    /// polling thread.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Adds or replaces the handler for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Option<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name) || BUILTIN_METHODS.contains(&name)
    }

    /// Every method name, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .methods
            .keys()
            .map(String::as_str)
            .chain(BUILTIN_METHODS)
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Invokes `method` synchronously on the calling thread.
    pub fn call(&self, method: &str, params: Option<Value>) -> MethodResult {
        if let Some(handler) = self.methods.get(method) {
            return handler(params);
        }

        match method {
            "ping" => self.method_ping(params),
            "echo" => self.method_echo(params),
            "rpc_get_methods" => self.method_get_methods(params),
            _ => Err(RpcError::new(ErrorCode::MethodNotFound)),
        }
    }

    /// ping
    fn method_ping(&self, _params: Option<Value>) -> MethodResult {
        Ok(Value::from("pong"))
    }

    /// echo [params]
    fn method_echo(&self, params: Option<Value>) -> MethodResult {
        Ok(params.unwrap_or(Value::Null))
    }

    /// rpc_get_methods
    fn method_get_methods(&self, params: Option<Value>) -> MethodResult {
        if params.is_some() {
            return Err(RpcError::invalid_params(
                "rpc_get_methods takes no parameters",
            ));
        }
        Ok(Value::from(self.method_names()))
    }
}

fn complete(request: Request, result: MethodResult) {
    match result {
        Ok(value) => request.respond(value),
        Err(error) => {
            debug!(
                conn = %request.connection(),
                method = %request.method(),
                code = error.code,
                "Method failed"
            );
            request.respond_error(error)
        }
    }
}

impl Dispatcher for MethodRegistry {
    fn dispatch(&mut self, mut request: Request) {
        let params = request.take_params();

        let handler = match (self.methods.get(request.method()), &self.runtime) {
            (Some(handler), Some(runtime)) => Some((Arc::clone(handler), runtime)),
            _ => None,
        };

        match handler {
            Some((handler, runtime)) => {
                trace!(method = %request.method(), "Offloading request to worker pool");
                // A panicking handler drops the request, which releases it.
                runtime.spawn_blocking(move || {
                    let result = handler(params);
                    complete(request, result);
                });
            }
            None => {
                let result = self.call(request.method(), params);
                complete(request, result);
            }
        }
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.method_names())
            .field("offloaded", &self.runtime.is_some())
            .finish()
    }
}

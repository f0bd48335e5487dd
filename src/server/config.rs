//! Server configuration.

use crate::server::ServerError;

/// Default number of connection slots.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default receive buffer per connection (32 KB). Also the largest request
/// frame a peer can send.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 512;

/// Sizing and socket options, fixed when the server is created.
///
/// # Example
///
/// ```
/// use pollrpc::ServerConfig;
///
/// let config = ServerConfig::default()
///     .max_connections(8)
///     .recv_buffer_size(4096);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Number of connection slots in the pool
    pub max_connections: usize,
    /// Receive buffer capacity per connection
    pub recv_buffer_size: usize,
    /// Listen backlog for TCP listeners
    pub backlog: u32,
    /// Set `TCP_NODELAY` on accepted TCP streams
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            backlog: DEFAULT_BACKLOG,
            nodelay: true,
        }
    }
}

impl ServerConfig {
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn recv_buffer_size(mut self, recv_buffer_size: usize) -> Self {
        self.recv_buffer_size = recv_buffer_size;
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Rejects configurations the pool cannot be built from.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.recv_buffer_size == 0 {
            return Err(ServerError::InvalidConfig(
                "recv_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_READ_BUFFER: usize = 64;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Line that makes either side of the chat shut down when typed on stdin.
pub const EXIT_COMMAND: &str = "exit";

/// True when an input line is exactly the exit command, ignoring only the
/// line terminator.
pub fn is_exit_command(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == EXIT_COMMAND
}

pub fn default_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// Settings for [`crate::server::ChatServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// Upper bound on a single broadcast write to one recipient.
    pub write_timeout: Duration,
    /// Capacity of each session's read buffer. Reads are forwarded per
    /// chunk, so this is also the largest message a broadcast carries.
    pub read_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_addr(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

/// Settings for [`crate::client::ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub username: String,
    pub server: SocketAddr,
    pub connect_timeout: Duration,
    pub read_buffer: usize,
}

impl ClientConfig {
    pub fn new(username: impl Into<String>, server: SocketAddr) -> Self {
        Self {
            username: username.into(),
            server,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

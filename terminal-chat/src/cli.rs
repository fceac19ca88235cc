use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_BUFFER, DEFAULT_WRITE_TIMEOUT,
    ServerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, relaying every message to all other clients.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// Seconds to wait on a single recipient before dropping a broadcast to it.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_secs())]
    pub write_timeout_secs: u64,

    /// Size in bytes of each connection's read buffer.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER)]
    pub read_buffer: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name prefixed to every message. Prompted for on stdin when omitted.
    #[arg(long)]
    pub username: Option<String>,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub server: SocketAddr,

    /// Seconds to wait for the connection before giving up.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,

    /// Size in bytes of the inbound read buffer.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER)]
    pub read_buffer: usize,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            read_buffer: args.read_buffer,
        }
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            username: args.username.unwrap_or_default(),
            server: args.server,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            read_buffer: args.read_buffer,
        }
    }
}

//! Terminal chat over plain TCP.
//!
//! A server accepts any number of clients and relays every chunk of bytes
//! it reads from one client to all the others. There is no framing and no
//! protocol beyond that: clients conventionally send `"<username>: <text>"`
//! but the server never looks inside.
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`config`] holds the plain settings structs and default constants.
//! - [`error`] names the ways starting a server can fail.
//! - [`registry`] is the shared set of connected peers.
//! - [`session`] runs one connection's receive loop.
//! - [`broadcast`] fans a message out to every peer but its sender, each
//!   write bounded by a timeout.
//! - [`server`] owns the accept loop and the start/stop lifecycle.
//! - [`client`] connects to a server and bridges it with stdin and stdout.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

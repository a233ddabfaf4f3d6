//! # brainHat Protocol Library
//!
//! Wire formats spoken by a brainHat node on the local network.
//!
//! ## Overview
//!
//! A node exposes two text protocols:
//!
//! - **Command protocol (TCP)**: one request line in, one response line out, then the
//!   connection is closed. Requests look like `<verb>?<key1>=<val1>&<key2>=<val2>`,
//!   responses start with `ACK?` or `NAK?`.
//! - **Status broadcast (UDP multicast)**: every node periodically sends
//!   `networkstatus?hostname=<host>&status=<json>` to a well-known group.
//!
//! ## Basic Usage
//!
//! ### Parsing a Request
//!
//! ```
//! use hat_protocol::{CommandRequest, Verb};
//!
//! let request = CommandRequest::parse("loglevel?dest=a&level=2\r\n");
//! assert_eq!(request.verb(), Verb::LogLevel);
//! assert_eq!(request.arguments().get("dest"), Some("a"));
//! assert_eq!(request.arguments().get_int("level"), Some(2));
//! ```
//!
//! ### Writing a Response
//!
//! ```
//! use hat_protocol::Response;
//!
//! let mut buffer = Vec::new();
//! Response::time(1234).write_to(&mut buffer).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, b"ACK?time=1234\n");
//! ```
//!
//! ### Reading a Status Datagram
//!
//! ```
//! use hat_protocol::{NodeStatus, StatusDatagram};
//!
//! let status = NodeStatus { host_name: "hat".to_string(), ..NodeStatus::default() };
//! let line = StatusDatagram::new(status).encode().expect("Status should serialize");
//! let datagram = StatusDatagram::parse(&line).expect("Datagram should parse");
//! assert_eq!(datagram.hostname, "hat");
//! ```
//!
//! ## Well-known Endpoints
//!
//! - Command server: TCP port [`COMMAND_PORT`]
//! - Status broadcast: UDP group [`MULTICAST_GROUP`], port [`STATUS_PORT`]
//!
//! ## Error Handling
//!
//! Parsing failures are reported through [`error::ParseError`]. Requests never fail to
//! parse: unknown verbs are represented as [`Verb::Unrecognized`] so that the server can
//! answer them with a `NAK`.
//!
//! ## Features
//!
//! - `tokio`: [`codec::RequestCodec`] and [`codec::ResponseCodec`] implementing the
//!   `tokio_util` codec traits.
use std::net::Ipv4Addr;

pub mod codec;
pub mod command;
pub mod error;
pub mod response;
pub mod status;

pub use command::{Arguments, CommandRequest, Verb};
pub use response::{Payload, Response};
pub use status::{NodeStatus, StatusDatagram};

/// TCP port of the command server
pub const COMMAND_PORT: u16 = 50090;
/// UDP port status datagrams are sent to
pub const STATUS_PORT: u16 = 50091;
/// Multicast group status datagrams are sent to
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(234, 5, 6, 7);

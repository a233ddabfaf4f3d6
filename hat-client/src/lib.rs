//! # brainHat Client
//!
//! An async client library for talking to brainHat nodes on the local network.
//!
//! ## Overview
//!
//! - [`CommandClient`] sends one command per TCP connection and returns the node's
//!   `ACK` or `NAK` response.
//! - [`StatusListener`] receives the `networkstatus` datagrams nodes broadcast.
//!
//! For the wire formats, see the [`hat_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ### Pinging a Node
//!
//! ```ignore
//! use hat_client::CommandClient;
//!
//! let client = CommandClient::new("192.168.1.20:50090".parse()?);
//! let node_time = client.ping().await?;
//! println!("Node clock: {} ms", node_time);
//! ```
//!
//! ### Discovering Nodes
//!
//! ```ignore
//! use hat_client::StatusListener;
//!
//! let mut listener = StatusListener::bind(StatusListener::default_addr()).await?;
//! let (datagram, from) = listener.next_status().await?;
//! println!("{} at {} is streaming: {}", datagram.hostname, from, datagram.status.is_streaming);
//! ```
//!
//! Nodes with several network interfaces send the same status once per interface;
//! deduplicate on [`StatusDatagram::hostname`].
use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use bytes::BytesMut;
use hat_protocol::{
    CommandRequest, MULTICAST_GROUP, Response, STATUS_PORT, StatusDatagram,
    codec::{RequestCodec, ResponseCodec},
    error::ParseError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time,
};
use tokio_util::codec::{Decoder, Encoder};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Issues commands to a node's command server.
#[derive(Clone, Debug)]
pub struct CommandClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(addr: SocketAddr) -> CommandClient {
        CommandClient {
            addr,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the time allowed for one complete request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Query the node's wall clock in milliseconds since the unix epoch.
    pub async fn ping(&self) -> Result<i64, ParseError> {
        let response = self.send(CommandRequest::ping()).await?;
        response.unix_millis().ok_or_else(|| {
            ParseError::InvalidFormat(format!("Expected a time, got {}", response))
        })
    }

    /// Relay a key press to the node's console.
    pub async fn keyboard(&self, key: &str, value: i32) -> Result<Response, ParseError> {
        self.send(CommandRequest::keyboard(key, value)).await
    }

    /// Change a log level of the node. `dest` is `a` for the application log.
    pub async fn log_level(&self, dest: &str, level: i32) -> Result<Response, ParseError> {
        self.send(CommandRequest::log_level(dest, level)).await
    }

    pub async fn send(&self, request: CommandRequest) -> Result<Response, ParseError> {
        log::debug!("Sending {} to {}", request, self.addr);
        time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| io::Error::new(ErrorKind::TimedOut, "No response from node"))?
    }

    async fn exchange(&self, request: CommandRequest) -> Result<Response, ParseError> {
        let mut tcp = TcpStream::connect(self.addr).await?;

        let mut out = BytesMut::new();
        RequestCodec::default().encode(request, &mut out)?;
        tcp.write_all(&out).await?;

        let mut codec = ResponseCodec::default();
        let mut buf = BytesMut::with_capacity(256);
        loop {
            if let Some(response) = codec.decode(&mut buf)? {
                log::trace!("Received {}", response);
                return Ok(response);
            }
            if tcp.read_buf(&mut buf).await? == 0 {
                return codec
                    .decode_eof(&mut buf)?
                    .ok_or_else(|| io::Error::from(ErrorKind::UnexpectedEof).into());
            }
        }
    }
}

/// Receives status datagrams.
pub struct StatusListener {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl StatusListener {
    /// The group and port nodes broadcast to.
    pub fn default_addr() -> SocketAddrV4 {
        SocketAddrV4::new(MULTICAST_GROUP, STATUS_PORT)
    }

    /// Listens on `addr`. A multicast address is joined on every interface,
    /// any other address is bound directly.
    pub async fn bind(addr: SocketAddrV4) -> io::Result<StatusListener> {
        let socket = if addr.ip().is_multicast() {
            let socket =
                UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port())).await?;
            socket.join_multicast_v4(*addr.ip(), Ipv4Addr::UNSPECIFIED)?;
            socket
        } else {
            UdpSocket::bind(addr).await?
        };
        log::debug!("Listening for status on {}", socket.local_addr()?);
        Ok(StatusListener {
            socket,
            buf: vec![0; MAX_DATAGRAM_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next well-formed status datagram. Other datagrams are skipped.
    pub async fn next_status(&mut self) -> io::Result<(StatusDatagram, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buf).await?;
            match StatusDatagram::from_bytes(&self.buf[..len]) {
                Ok(datagram) => return Ok((datagram, from)),
                Err(e) => log::warn!("Ignoring datagram from {}: {}", from, e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_listener_address() {
        let addr = StatusListener::default_addr();
        assert!(addr.ip().is_multicast());
        assert_eq!(addr.port(), STATUS_PORT);
    }

    #[test]
    fn client_keeps_address() {
        let addr: SocketAddr = "127.0.0.1:50090".parse().unwrap();
        let client = CommandClient::new(addr).with_timeout(Duration::from_millis(10));
        assert_eq!(client.addr(), addr);
        assert_eq!(client.timeout, Duration::from_millis(10));
    }
}

use std::{
    io::{self, BufReader, ErrorKind, Read},
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

use hat_protocol::{COMMAND_PORT, codec::read_line, error::ParseError};

use crate::error::Error;
use crate::worker::{CancelToken, Worker};

/// Handles the single request line received on an accepted connection.
pub trait RequestHandler: Send + 'static {
    /// Implementations write exactly one response line to `stream`.
    /// The connection is closed once this returns.
    fn handle(&mut self, line: &str, peer: SocketAddr, stream: &mut TcpStream) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to listen on. A specific interface address scopes the server to that interface.
    pub addr: SocketAddr,
    pub read_write_timeout: Duration,
    pub max_request_len: usize,
    /// How often a pending accept rechecks for cancellation.
    pub accept_poll_interval: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), COMMAND_PORT),
            read_write_timeout: Duration::from_secs(5),
            max_request_len: 4096,
            accept_poll_interval: Duration::from_millis(10),
        }
    }
}

/// Builder to create a [TcpRequestServer] and modify configuration options
///
/// # Example
///
/// ```ignore
/// use hat_server::tcp::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .addr("127.0.0.1:50090".parse()?)
///     .rw_timeout(Duration::from_secs(2))
///     .build("command-server", my_handler);
/// ```
#[derive(Default)]
pub struct Builder {
    config: TcpConfig,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    /// Set the TCP read and write timeout of accepted connections
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Set the longest request line the server accepts
    pub fn max_request_len(mut self, len: usize) -> Self {
        self.config.max_request_len = len;
        self
    }

    pub fn config(self) -> TcpConfig {
        self.config
    }

    pub fn build<H: RequestHandler>(self, name: &str, handler: H) -> TcpRequestServer<H> {
        TcpRequestServer::new(name, handler, self.config)
    }
}

/// Accepts one client at a time, reads one line, dispatches it and closes the connection.
pub struct TcpRequestServer<H: RequestHandler> {
    name: String,
    handler: H,
    config: TcpConfig,
    listener: Option<TcpListener>,
}

impl<H: RequestHandler> TcpRequestServer<H> {
    pub fn new(name: &str, handler: H, config: TcpConfig) -> TcpRequestServer<H> {
        TcpRequestServer {
            name: name.to_string(),
            handler,
            config,
            listener: None,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn serve(&mut self, mut stream: TcpStream, peer: SocketAddr, token: &CancelToken) {
        log::debug!("{}: client connection from {}", self.name, peer);
        if let Err(e) = self.handle_client(&mut stream, peer, token) {
            log::warn!("{}: client {} error: {}", self.name, peer, e);
        }
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn handle_client(
        &mut self,
        stream: &mut TcpStream,
        peer: SocketAddr,
        token: &CancelToken,
    ) -> Result<(), ParseError> {
        // Accepted sockets inherit the listener's non-blocking flag on some platforms.
        stream.set_nonblocking(false)?;
        // Short reads keep the cancel token in view while the client is silent.
        stream.set_read_timeout(Some(
            self.config.accept_poll_interval.max(Duration::from_millis(1)),
        ))?;
        stream.set_write_timeout(Some(self.config.read_write_timeout))?;

        let line = {
            let mut reader = BufReader::new(CancellableRead {
                stream: &*stream,
                token,
                deadline: Instant::now() + self.config.read_write_timeout,
            });
            read_line(&mut reader, self.config.max_request_len)?
        };
        log::trace!("{}: read from socket: {}", self.name, line);

        self.handler.handle(&line, peer, stream)?;
        Ok(())
    }
}

impl<H: RequestHandler> Worker for TcpRequestServer<H> {
    type Info = SocketAddr;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&mut self, _token: &CancelToken) -> Result<SocketAddr, Error> {
        let listener = TcpListener::bind(self.config.addr)?;
        // Non-blocking accept lets the run loop observe cancellation.
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        log::info!("{} listening on {}", self.name, local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    fn run(&mut self, token: &CancelToken) {
        log::debug!("{}: run loop started", self.name);
        while !token.is_cancelled() {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer)) => self.serve(stream, peer, token),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    token.sleep(self.config.accept_poll_interval);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("{}: accept failed, stopping: {}", self.name, e);
                    break;
                }
            }
        }
    }

    fn release(&mut self) {
        if self.listener.take().is_some() {
            log::debug!("{}: listener closed", self.name);
        }
    }
}

/// Reads from a client until data arrives, the read deadline passes or the token is cancelled.
struct CancellableRead<'a> {
    stream: &'a TcpStream,
    token: &'a CancelToken,
    deadline: Instant,
}

impl Read for CancellableRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.stream.read(buf) {
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self.token.is_cancelled() {
                        return Err(io::Error::new(
                            ErrorKind::ConnectionAborted,
                            "Server stopping",
                        ));
                    }
                    if Instant::now() >= self.deadline {
                        return Err(io::Error::new(ErrorKind::TimedOut, "No request received"));
                    }
                }
                result => return result,
            }
        }
    }
}

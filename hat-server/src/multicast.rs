use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
    time::{Duration, Instant},
};

use hat_protocol::{MULTICAST_GROUP, STATUS_PORT};

use crate::error::Error;
use crate::netif::NetworkInterfaceAddress;
use crate::worker::{CancelToken, Worker};

/// Content of a periodic broadcast.
pub trait Broadcast: Send + 'static {
    /// Re-resolves slowly changing inputs such as interface addresses.
    fn refresh(&mut self) {}

    /// Produces the datagram for the current tick.
    fn datagram(&mut self) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Where datagrams are sent. The group is joined only if this is a multicast address.
    pub destination: SocketAddrV4,
    /// Restricts the socket to one interface.
    pub interface: Option<NetworkInterfaceAddress>,
    pub period: Duration,
    pub refresh_period: Duration,
    pub ttl: u32,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            destination: SocketAddrV4::new(MULTICAST_GROUP, STATUS_PORT),
            interface: None,
            period: Duration::from_millis(2000),
            refresh_period: Duration::from_millis(60000),
            ttl: 1,
        }
    }
}

/// Builder to create a [UdpMulticastBroadcaster] and modify configuration options
#[derive(Default)]
pub struct Builder {
    config: MulticastConfig,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn destination(mut self, destination: SocketAddrV4) -> Self {
        self.config.destination = destination;
        self
    }

    pub fn interface(mut self, interface: NetworkInterfaceAddress) -> Self {
        self.config.interface = Some(interface);
        self
    }

    /// Set the time between two datagrams
    pub fn period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    /// Set the time between two calls to [Broadcast::refresh]
    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.config.refresh_period = period;
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn config(self) -> MulticastConfig {
        self.config
    }

    pub fn build<B: Broadcast>(self, name: &str, source: B) -> UdpMulticastBroadcaster<B> {
        UdpMulticastBroadcaster::new(name, source, self.config)
    }
}

/// Periodically sends one datagram produced by a [Broadcast] to a multicast group.
pub struct UdpMulticastBroadcaster<B: Broadcast> {
    name: String,
    source: B,
    config: MulticastConfig,
    socket: Option<UdpSocket>,
}

impl<B: Broadcast> UdpMulticastBroadcaster<B> {
    pub fn new(name: &str, source: B, config: MulticastConfig) -> UdpMulticastBroadcaster<B> {
        UdpMulticastBroadcaster {
            name: name.to_string(),
            source,
            config,
            socket: None,
        }
    }

    pub fn config(&self) -> &MulticastConfig {
        &self.config
    }

    fn joins_group(&self) -> bool {
        self.config.destination.ip().is_multicast()
    }

    fn interface_address(&self) -> Ipv4Addr {
        self.config
            .interface
            .as_ref()
            .map_or(Ipv4Addr::UNSPECIFIED, |iface| iface.address)
    }

    fn open_socket(&self) -> io::Result<UdpSocket> {
        let interface_address = self.interface_address();
        let socket = UdpSocket::bind(SocketAddrV4::new(interface_address, 0))?;
        if self.joins_group() {
            socket.set_multicast_ttl_v4(self.config.ttl)?;
            socket.set_multicast_loop_v4(true)?;
            socket.join_multicast_v4(self.config.destination.ip(), &interface_address)?;
        }
        if let Some(iface) = &self.config.interface {
            if let Err(e) = bind_to_device(&socket, &iface.name) {
                log::warn!(
                    "{}: unable to bind socket to device {}: {}",
                    self.name,
                    iface.name,
                    e
                );
            }
        }
        Ok(socket)
    }

    fn send(&mut self) {
        let Some(socket) = &self.socket else {
            return;
        };
        match self.source.datagram() {
            Ok(datagram) => {
                if let Err(e) = socket.send_to(&datagram, self.config.destination) {
                    log::warn!("{}: unable to send datagram: {}", self.name, e);
                } else {
                    log::trace!("{}: sent {} bytes", self.name, datagram.len());
                }
            }
            Err(e) => log::error!("{}: unable to build datagram: {}", self.name, e),
        }
    }
}

impl<B: Broadcast> Worker for UdpMulticastBroadcaster<B> {
    type Info = SocketAddr;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&mut self, _token: &CancelToken) -> Result<SocketAddr, Error> {
        let socket = self.open_socket()?;
        let local_addr = socket.local_addr()?;
        log::info!(
            "{} broadcasting to {} from {}",
            self.name,
            self.config.destination,
            local_addr
        );
        self.socket = Some(socket);
        self.source.refresh();
        Ok(local_addr)
    }

    fn run(&mut self, token: &CancelToken) {
        // Both timers are checked every tick and never delay one another.
        let tick = self.config.period.min(self.config.refresh_period) / 10;
        let mut last_refresh = Instant::now();
        let mut last_send: Option<Instant> = None;

        while !token.is_cancelled() {
            if last_refresh.elapsed() >= self.config.refresh_period {
                self.source.refresh();
                last_refresh = Instant::now();
            }
            if last_send.is_none_or(|sent| sent.elapsed() >= self.config.period) {
                self.send();
                last_send = Some(Instant::now());
            }
            let pause = tick.clamp(Duration::from_millis(1), Duration::from_millis(10));
            token.sleep(pause);
        }
    }

    fn release(&mut self) {
        if let Some(socket) = self.socket.take() {
            if self.joins_group() {
                let _ = socket.leave_multicast_v4(
                    self.config.destination.ip(),
                    &self.interface_address(),
                );
            }
            log::debug!("{}: socket closed", self.name);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_to_device(socket: &UdpSocket, interface: &str) -> nix::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt::BindToDevice};
    use std::ffi::OsString;

    setsockopt(socket, BindToDevice, &OsString::from(interface))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_to_device(_socket: &UdpSocket, _interface: &str) -> nix::Result<()> {
    Ok(())
}

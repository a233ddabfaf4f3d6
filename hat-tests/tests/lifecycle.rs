use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket},
    time::Duration,
};

use hat_server::{
    CancellableThread, Error, ThreadState,
    command::{CommandHandler, CommandServer},
    multicast::{Broadcast, UdpMulticastBroadcaster},
    tcp::TcpConfig,
};
use hat_tests::{loopback_status, loopback_tcp};

struct Ticks(u32);

impl Broadcast for Ticks {
    fn datagram(&mut self) -> io::Result<Vec<u8>> {
        self.0 += 1;
        Ok(self.0.to_string().into_bytes())
    }
}

fn receiver() -> UdpSocket {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    socket
}

fn drain(socket: &UdpSocket) -> usize {
    let mut buf = [0; 64];
    let mut count = 0;
    loop {
        match socket.recv(&mut buf) {
            Ok(_) => count += 1,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return count;
            }
            Err(e) => panic!("receive failed: {}", e),
        }
    }
}

#[test]
fn command_port_is_reusable_after_cancel() {
    let mut first = CommandServer::new(CommandHandler::default(), loopback_tcp());
    first.start().unwrap();
    let addr = first.local_addr().unwrap();

    let mut competing = CommandServer::new(
        CommandHandler::default(),
        TcpConfig {
            addr,
            ..TcpConfig::default()
        },
    );
    assert!(competing.start().is_err());
    assert_eq!(competing.state(), ThreadState::Idle);

    first.cancel();
    assert!(matches!(first.start(), Err(Error::Stopped(_))));

    competing.start().unwrap();
    assert_eq!(competing.local_addr(), Some(addr));
    competing.cancel();
    TcpListener::bind(addr).unwrap();
}

#[test]
fn cancelled_broadcaster_goes_quiet() {
    let socket = receiver();
    let dest: SocketAddr = socket.local_addr().unwrap();
    let mut thread = CancellableThread::new(UdpMulticastBroadcaster::new(
        "ticks",
        Ticks(0),
        loopback_status(dest, Duration::from_millis(5)),
    ));

    thread.start().unwrap();
    assert!(thread.is_running());
    let mut buf = [0; 64];
    let len = socket.recv(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"1");

    thread.cancel();
    thread.cancel();
    assert_eq!(thread.state(), ThreadState::Stopped);
    // Datagrams already in flight are drained; nothing arrives after that.
    drain(&socket);
    assert_eq!(drain(&socket), 0);
}

#[test]
fn broadcaster_cancelled_before_start_never_sends() {
    let socket = receiver();
    let mut thread = CancellableThread::new(UdpMulticastBroadcaster::new(
        "ticks",
        Ticks(0),
        loopback_status(socket.local_addr().unwrap(), Duration::from_millis(5)),
    ));
    thread.cancel();
    assert_eq!(thread.state(), ThreadState::Stopped);
    assert!(thread.start().is_err());
    assert_eq!(drain(&socket), 0);
}

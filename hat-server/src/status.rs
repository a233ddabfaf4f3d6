//! Status broadcast: one multicast broadcaster per usable network interface.
use std::{io, sync::Arc};

use hat_protocol::{NodeStatus, StatusDatagram};

use crate::multicast::{Broadcast, MulticastConfig, UdpMulticastBroadcaster};
use crate::netif::{self, InterfaceSource, NetworkInterfaceAddress, SystemInterfaces};
use crate::worker::CancellableThread;

/// Read-only view of the acquisition board.
///
/// Implementations must be safe to query from any thread.
pub trait DataSource: Send + Sync {
    fn board_id(&self) -> i32;
    fn sample_rate(&self) -> i32;
    /// SRB1 bias flag of a channel group: 0 is the Cyton board, 1 the Daisy board.
    fn srb1(&self, group: usize) -> bool;
    fn is_streaming(&self) -> bool;
}

/// Read-only view of the recording file writer.
pub trait FileWriter: Send + Sync {
    fn is_recording(&self) -> bool;
    fn file_name(&self) -> String;
    fn elapsed_recording_seconds(&self) -> f64;
}

pub type StatusThread = CancellableThread<UdpMulticastBroadcaster<StatusBroadcaster>>;

/// Collects the node's status and renders it as a `networkstatus` datagram.
#[derive(Clone)]
pub struct StatusBroadcaster {
    host_name: String,
    log_port: u16,
    wlan0_mode: String,
    eth0_address: String,
    wlan0_address: String,
    data_source: Option<Arc<dyn DataSource>>,
    file_writer: Option<Arc<dyn FileWriter>>,
    interfaces: Arc<dyn InterfaceSource>,
}

impl StatusBroadcaster {
    pub fn new(host_name: impl Into<String>) -> StatusBroadcaster {
        StatusBroadcaster {
            host_name: host_name.into(),
            log_port: 0,
            wlan0_mode: String::new(),
            eth0_address: String::new(),
            wlan0_address: String::new(),
            data_source: None,
            file_writer: None,
            interfaces: Arc::new(SystemInterfaces),
        }
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn with_file_writer(mut self, file_writer: Arc<dyn FileWriter>) -> Self {
        self.file_writer = Some(file_writer);
        self
    }

    pub fn with_interfaces(mut self, interfaces: Arc<dyn InterfaceSource>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_log_port(mut self, log_port: u16) -> Self {
        self.log_port = log_port;
        self
    }

    pub fn with_wlan0_mode(mut self, mode: impl Into<String>) -> Self {
        self.wlan0_mode = mode.into();
        self
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn interfaces(&self) -> &dyn InterfaceSource {
        self.interfaces.as_ref()
    }

    /// Re-reads the eth0 and wlan0 addresses. Missing interfaces keep their last address.
    pub fn set_ip_config(&mut self) {
        let addresses = self.interfaces.ipv4_addresses();
        if let Some(address) = netif::address_of(&addresses, "eth0") {
            self.eth0_address = address.to_string();
        }
        if let Some(address) = netif::address_of(&addresses, "wlan0") {
            self.wlan0_address = address.to_string();
        }
    }

    /// Builds a fresh status from the collaborators' current state.
    pub fn snapshot(&self) -> NodeStatus {
        let mut status = NodeStatus {
            host_name: self.host_name.clone(),
            eth0_address: self.eth0_address.clone(),
            wlan0_address: self.wlan0_address.clone(),
            wlan0_mode: self.wlan0_mode.clone(),
            log_port: self.log_port,
            ..NodeStatus::default()
        };

        if let Some(writer) = &self.file_writer {
            if writer.is_recording() {
                status.is_recording = true;
                status.recording_file_name = writer.file_name();
                status.recording_duration_seconds = writer.elapsed_recording_seconds();
            }
        }

        if let Some(source) = &self.data_source {
            status.board_id = source.board_id();
            status.sample_rate = source.sample_rate();
            status.srb1_cyton = source.srb1(0);
            status.srb1_daisy = source.srb1(1);
            status.is_streaming = source.is_streaming();
        }

        status.unix_time_millis = chrono::Utc::now().timestamp_millis();
        status
    }
}

impl Broadcast for StatusBroadcaster {
    fn refresh(&mut self) {
        self.set_ip_config();
    }

    fn datagram(&mut self) -> io::Result<Vec<u8>> {
        let line = StatusDatagram::new(self.snapshot())
            .encode()
            .map_err(io::Error::other)?;
        Ok(line.into_bytes())
    }
}

/// Starts one status broadcaster per interface with a non-zero address.
///
/// Broadcasters that fail to open their socket are logged and left out.
pub fn start_status_broadcast(
    template: &StatusBroadcaster,
    config: &MulticastConfig,
) -> Vec<StatusThread> {
    netif::broadcast_interfaces(template.interfaces())
        .into_iter()
        .filter_map(|iface| start_on_interface(template, config, iface))
        .collect()
}

fn start_on_interface(
    template: &StatusBroadcaster,
    config: &MulticastConfig,
    iface: NetworkInterfaceAddress,
) -> Option<StatusThread> {
    let name = format!("status-{}", iface.name);
    let config = MulticastConfig {
        interface: Some(iface),
        ..config.clone()
    };
    let mut thread = CancellableThread::new(UdpMulticastBroadcaster::new(
        &name,
        template.clone(),
        config,
    ));
    thread.start().ok()?;
    Some(thread)
}

pub fn stop_status_broadcast(broadcasters: &mut Vec<StatusThread>) {
    for broadcaster in broadcasters.iter_mut() {
        broadcaster.cancel();
    }
    broadcasters.clear();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::netif::StaticInterfaces;
    use std::net::Ipv4Addr;

    struct FixedBoard;

    impl DataSource for FixedBoard {
        fn board_id(&self) -> i32 {
            2
        }
        fn sample_rate(&self) -> i32 {
            125
        }
        fn srb1(&self, group: usize) -> bool {
            group == 1
        }
        fn is_streaming(&self) -> bool {
            true
        }
    }

    struct Recording;

    impl FileWriter for Recording {
        fn is_recording(&self) -> bool {
            true
        }
        fn file_name(&self) -> String {
            "eyes_closed_101500.txt".to_string()
        }
        fn elapsed_recording_seconds(&self) -> f64 {
            4.5
        }
    }

    fn interfaces() -> Arc<dyn InterfaceSource> {
        Arc::new(StaticInterfaces(vec![
            NetworkInterfaceAddress::new("lo", Ipv4Addr::LOCALHOST),
            NetworkInterfaceAddress::new("eth0", Ipv4Addr::new(192, 168, 1, 20)),
            NetworkInterfaceAddress::new("wlan0", Ipv4Addr::new(10, 0, 0, 7)),
        ]))
    }

    #[test]
    fn snapshot_without_collaborators() {
        let status = StatusBroadcaster::new("hat").snapshot();
        assert_eq!(status.host_name, "hat");
        assert!(!status.is_recording);
        assert_eq!(status.recording_file_name, "");
        assert_eq!(status.board_id, 0);
        assert!(!status.is_streaming);
        assert!(status.unix_time_millis > 0);
    }

    #[test]
    fn snapshot_reads_collaborators() {
        let mut broadcaster = StatusBroadcaster::new("hat")
            .with_data_source(Arc::new(FixedBoard))
            .with_file_writer(Arc::new(Recording))
            .with_interfaces(interfaces())
            .with_log_port(50092);
        broadcaster.set_ip_config();
        let status = broadcaster.snapshot();
        assert_eq!(status.eth0_address, "192.168.1.20");
        assert_eq!(status.wlan0_address, "10.0.0.7");
        assert_eq!(status.log_port, 50092);
        assert_eq!(status.board_id, 2);
        assert_eq!(status.sample_rate, 125);
        assert!(!status.srb1_cyton);
        assert!(status.srb1_daisy);
        assert!(status.is_recording);
        assert_eq!(status.recording_file_name, "eyes_closed_101500.txt");
        assert_eq!(status.recording_duration_seconds, 4.5);
    }

    #[test]
    fn datagram_parses_back() {
        let mut broadcaster = StatusBroadcaster::new("hat-7");
        let datagram = broadcaster.datagram().unwrap();
        let parsed = StatusDatagram::from_bytes(&datagram).unwrap();
        assert_eq!(parsed.hostname, "hat-7");
        assert_eq!(parsed.status.host_name, "hat-7");
    }
}

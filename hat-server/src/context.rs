//! Composition of the node's workers and the state they share.
use std::{net::SocketAddr, sync::Arc};

use crate::acquisition::{AcquisitionThread, BoardStatus};
use crate::command::{CommandHandler, CommandServer};
use crate::datalog::{DataLog, DataLogConfig};
use crate::indicator::{LightMode, StatusIndicator};
use crate::multicast::MulticastConfig;
use crate::netif::{self, InterfaceSource, SystemInterfaces};
use crate::status::{StatusBroadcaster, StatusThread, start_status_broadcast, stop_status_broadcast};
use crate::tcp::TcpConfig;
use crate::worker::{CancellableThread, ThreadState};

/// Process wide collaborators handed to the workers at construction.
#[derive(Clone)]
pub struct NodeContext {
    pub host_name: String,
    pub board: Arc<BoardStatus>,
    pub data_log: Arc<DataLog>,
    pub indicator: Arc<dyn StatusIndicator>,
    pub interfaces: Arc<dyn InterfaceSource>,
}

impl NodeContext {
    pub fn new(
        board_id: i32,
        data_log: DataLogConfig,
        indicator: Arc<dyn StatusIndicator>,
    ) -> NodeContext {
        NodeContext {
            host_name: netif::host_name(),
            board: Arc::new(BoardStatus::new(board_id)),
            data_log: Arc::new(DataLog::new(data_log)),
            indicator,
            interfaces: Arc::new(SystemInterfaces),
        }
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_interfaces(mut self, interfaces: Arc<dyn InterfaceSource>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// The status content every interface broadcaster starts from.
    pub fn status_broadcaster(&self, log_port: u16) -> StatusBroadcaster {
        StatusBroadcaster::new(&self.host_name)
            .with_data_source(self.board.clone())
            .with_file_writer(self.data_log.clone())
            .with_interfaces(self.interfaces.clone())
            .with_log_port(log_port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub command: TcpConfig,
    pub status: MulticastConfig,
    pub log_port: u16,
}

/// The running node. Workers that fail to start are logged and left out.
pub struct Node {
    context: NodeContext,
    acquisition: Option<CancellableThread<AcquisitionThread>>,
    broadcasters: Vec<StatusThread>,
    command_server: CommandServer,
}

impl Node {
    pub fn start(
        context: NodeContext,
        config: &NodeConfig,
        handler: CommandHandler,
        acquisition: Option<AcquisitionThread>,
    ) -> Node {
        let broadcasters = start_status_broadcast(
            &context.status_broadcaster(config.log_port),
            &config.status,
        );
        log::info!("Started {} status broadcasters", broadcasters.len());

        let mut command_server = CommandServer::new(handler, config.command.clone());
        if let Err(e) = command_server.start() {
            log::error!("Unable to start command server: {}", e);
        }

        let acquisition = acquisition.map(|worker| {
            let mut thread = CancellableThread::new(worker);
            if thread.start().is_err() {
                log::error!("Unable to start board");
            }
            thread
        });

        Node {
            context,
            acquisition,
            broadcasters,
            command_server,
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command_server.local_addr()
    }

    pub fn broadcaster_count(&self) -> usize {
        self.broadcasters.len()
    }

    pub fn acquisition_state(&self) -> Option<ThreadState> {
        self.acquisition.as_ref().map(CancellableThread::state)
    }

    /// Stops the data producer first, then the broadcasters, the command
    /// server and finally the data log and lights.
    pub fn shutdown(&mut self) {
        if let Some(acquisition) = self.acquisition.as_mut() {
            acquisition.cancel();
        }
        stop_status_broadcast(&mut self.broadcasters);
        self.command_server.cancel();
        if let Err(e) = self.context.data_log.stop_logging() {
            log::warn!("Unable to close data log: {}", e);
        }
        self.context.indicator.set_mode(LightMode::Off);
        log::info!("Node stopped");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.command_server.state() != ThreadState::Stopped {
            self.shutdown();
        }
    }
}

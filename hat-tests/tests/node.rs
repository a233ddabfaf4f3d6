use std::{
    fs,
    net::{Ipv4Addr, SocketAddrV4, TcpListener},
    sync::Arc,
    time::Duration,
};

use hat_client::{CommandClient, StatusListener};
use hat_server::{
    ThreadState,
    acquisition::{AcquisitionThread, ErrorCode, ReconnectPolicy},
    command::CommandHandler,
    context::{Node, NodeConfig, NodeContext},
    datalog::DataLogConfig,
    indicator::{LightMode, LogIndicator, StatusIndicator},
    netif::{NetworkInterfaceAddress, StaticInterfaces},
    tcp::TcpConfig,
};
use hat_tests::{ScriptedBoard, Step, loopback_status, loopback_tcp};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn idle_context() -> NodeContext {
    let indicator = Arc::new(LogIndicator::default());
    NodeContext::new(-1, DataLogConfig::default(), indicator)
        .with_interfaces(Arc::new(StaticInterfaces::default()))
}

fn fast_policy(threshold: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        threshold,
        poll_interval: Duration::from_millis(1),
        cooldown: Duration::from_millis(2),
        ..ReconnectPolicy::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_streams_records_and_shuts_down() {
    let mut listener = StatusListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let indicator = Arc::new(LogIndicator::default());
    let context = NodeContext::new(
        -1,
        DataLogConfig::default().directory(dir.path()),
        indicator.clone(),
    )
    .with_host_name("test-node")
    .with_interfaces(Arc::new(StaticInterfaces(vec![NetworkInterfaceAddress::new(
        "lo",
        Ipv4Addr::LOCALHOST,
    )])));
    let config = NodeConfig {
        command: loopback_tcp(),
        status: loopback_status(listener.local_addr().unwrap(), Duration::from_millis(20)),
        log_port: 50092,
    };

    let board = ScriptedBoard::new(&[]);
    let acquisition = AcquisitionThread::new(board.factory(), context.board.clone())
        .with_policy(fast_policy(u32::MAX))
        .with_data_log(context.data_log.clone())
        .with_observer(indicator.clone());

    let data_log = context.data_log.clone();
    let mut node = Node::start(
        context,
        &config,
        CommandHandler::default(),
        Some(acquisition),
    );
    assert_eq!(node.acquisition_state(), Some(ThreadState::Running));
    assert_eq!(node.broadcaster_count(), 1);
    assert_eq!(indicator.mode(), LightMode::Sequence);

    let path = data_log.start_logging("integration").unwrap();
    board.push(&[
        Step::Samples(3),
        Step::Empty,
        Step::Samples(2),
        Step::Samples(5),
    ]);
    assert!(board.wait_for(WAIT, |journal| journal.samples == 10));
    let logged = hat_tests::wait_until(WAIT, || data_log.record_count() == 10);
    assert!(logged);

    let streaming = loop {
        let (datagram, _) = timeout(WAIT, listener.next_status())
            .await
            .unwrap()
            .unwrap();
        if datagram.status.is_recording {
            break datagram.status;
        }
    };
    assert_eq!(streaming.host_name, "test-node");
    assert_eq!(streaming.log_port, 50092);
    assert!(streaming.is_streaming);
    assert_eq!(streaming.sample_rate, 250);

    let client = CommandClient::new(node.command_addr().unwrap());
    assert!(client.ping().await.unwrap() > 0);

    node.shutdown();
    assert_eq!(node.acquisition_state(), Some(ThreadState::Stopped));
    assert_eq!(indicator.mode(), LightMode::Off);
    assert!(!data_log.is_logging());
    assert!(client.ping().await.is_err());

    let journal = board.journal();
    assert_eq!(journal.created, 1);
    assert_eq!(journal.prepared, journal.released);

    let content = fs::read_to_string(path).unwrap();
    let rows: Vec<_> = content.lines().skip(6).collect();
    assert_eq!(rows.len(), 10);
    let first_row = "1.0,10.000000,-10.000000,1600000000.000000,";
    assert!(rows[0].starts_with(first_row));
}

#[test]
fn stalled_board_reconnects_and_releases_every_session() {
    let board = ScriptedBoard::new(&[Step::Samples(1)]);
    let context = idle_context();
    let acquisition = AcquisitionThread::new(board.factory(), context.board.clone())
        .with_policy(fast_policy(20));

    let config = NodeConfig {
        command: loopback_tcp(),
        ..NodeConfig::default()
    };
    let mut node = Node::start(
        context,
        &config,
        CommandHandler::default(),
        Some(acquisition),
    );
    assert_eq!(node.broadcaster_count(), 0);

    assert!(board.wait_for(WAIT, |journal| journal.created >= 3));
    node.shutdown();

    let journal = board.journal();
    assert_eq!(journal.prepared, journal.created);
    assert_eq!(journal.released, journal.prepared);
}

#[test]
fn power_loss_reconnects_sooner_than_a_stall() {
    let board = ScriptedBoard::new(&[Step::Fail(ErrorCode::BoardNotCreated)]);
    let context = idle_context();
    let acquisition = AcquisitionThread::new(board.factory(), context.board.clone())
        .with_policy(fast_policy(300));

    let config = NodeConfig {
        command: loopback_tcp(),
        ..NodeConfig::default()
    };
    let mut node = Node::start(
        context,
        &config,
        CommandHandler::default(),
        Some(acquisition),
    );

    assert!(board.wait_for(WAIT, |journal| journal.created == 2));
    node.shutdown();
    assert!(board.journal().created_after_polls.len() >= 2);
    // One failure stands in for 101 empty polls.
    assert_eq!(board.journal().created_after_polls[..2], [0, 200]);
}

#[test]
fn board_toggle_releases_and_restores_the_session() {
    let board = ScriptedBoard::new(&[]);
    let context = idle_context();
    let status = context.board.clone();
    let acquisition = AcquisitionThread::new(board.factory(), context.board.clone())
        .with_policy(fast_policy(u32::MAX));
    let config = NodeConfig {
        command: loopback_tcp(),
        ..NodeConfig::default()
    };
    let mut node = Node::start(
        context,
        &config,
        CommandHandler::default(),
        Some(acquisition),
    );

    status.enable_board(false);
    assert!(board.wait_for(WAIT, |journal| journal.released == 1));
    status.enable_board(true);
    assert!(board.wait_for(WAIT, |journal| journal.prepared == 2));

    node.shutdown();
    assert_eq!(board.journal().released, 2);
}

#[test]
fn occupied_command_port_leaves_the_rest_running() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let board = ScriptedBoard::new(&[]);
    let context = idle_context();
    let acquisition = AcquisitionThread::new(board.factory(), context.board.clone())
        .with_policy(fast_policy(u32::MAX));
    let config = NodeConfig {
        command: TcpConfig {
            addr: occupied.local_addr().unwrap(),
            ..loopback_tcp()
        },
        ..NodeConfig::default()
    };

    let mut node = Node::start(
        context,
        &config,
        CommandHandler::default(),
        Some(acquisition),
    );
    assert_eq!(node.command_addr(), None);
    assert_eq!(node.acquisition_state(), Some(ThreadState::Running));

    node.shutdown();
    assert_eq!(node.acquisition_state(), Some(ThreadState::Stopped));
    assert_eq!(board.journal().released, 1);
}

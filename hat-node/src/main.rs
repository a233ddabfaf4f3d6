//! # brainHat Node
//!
//! Runs a brainHat node: streams from the attached board (or a recording), records to
//! disk on request, announces the node's status on every network interface and accepts
//! remote commands.
//!
//! ## Usage
//!
//! ```text
//! brainhat                                  # Cyton board on /dev/ttyUSB0
//! brainhat --board-id -1                    # synthetic board
//! brainhat --demo-file recording.txt        # replay a recording
//! ```
//!
//! While running, the console accepts `Q` (quit), `S` (show progress), `0`-`3` (lights),
//! `b` (toggle the board), `L <name>` (start recording) and `X` (stop recording).
pub mod backends;

use std::error::Error;
use std::io::{self, BufRead};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use hat_protocol::COMMAND_PORT;
use hat_server::{
    acquisition::{AcquisitionThread, ReconnectPolicy},
    command::{CommandHandler, KeyboardInput},
    context::{Node, NodeConfig, NodeContext},
    datalog::DataLogConfig,
    indicator::{LightMode, LogIndicator, StatusIndicator},
    status::DataSource,
    tcp::Builder,
};

use crate::backends::{BoardParams, BoardSource, DEFAULT_SERIAL_PORT};

const DEFAULT_BOARD_TIMEOUT_S: u64 = 5;

#[derive(Parser, Debug)]
#[command(about = "brainHat biosignal node server", long_about = None)]
struct Args {
    /// 0 for a Cyton board, -1 for a synthetic board
    #[arg(long, allow_hyphen_values = true)]
    board_id: Option<i32>,

    /// Replay this OpenBCI recording instead of reading a board
    #[arg(long)]
    demo_file: Option<PathBuf>,

    #[arg(long)]
    ip_address: Option<String>,

    #[arg(long)]
    ip_port: Option<u16>,

    #[arg(long)]
    serial_port: Option<PathBuf>,

    #[arg(long)]
    ip_protocol: Option<i32>,

    /// Board handshake timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    other_info: Option<String>,

    #[arg(long)]
    mac_address: Option<String>,

    #[arg(long)]
    serial_number: Option<String>,

    #[arg(long, default_value_t = COMMAND_PORT)]
    command_port: u16,

    /// Directory for recordings
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Port advertised for the node's log stream
    #[arg(long, default_value_t = 0)]
    log_port: u16,
}

impl Args {
    fn board_params(&self) -> BoardParams {
        BoardParams {
            serial_port: self.serial_port.clone(),
            serial_number: self.serial_number.clone(),
            ip_address: self.ip_address.clone(),
            ip_port: self.ip_port,
            ip_protocol: self.ip_protocol,
            mac_address: self.mac_address.clone(),
            other_info: self.other_info.clone(),
            timeout: self.timeout,
        }
    }
}

/// Chooses the data source. A board id of -1 or above wins over a demo file.
fn board_source(
    board_id: Option<i32>,
    demo_file: Option<PathBuf>,
    params: &BoardParams,
) -> Result<BoardSource, String> {
    let cyton = || {
        if params.serial_number.is_some() {
            log::warn!("Boards are opened by serial port, ignoring serial number");
        }
        BoardSource::Cyton {
            serial_port: params
                .serial_port
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERIAL_PORT)),
            timeout: Duration::from_secs(params.timeout.unwrap_or(DEFAULT_BOARD_TIMEOUT_S)),
        }
    };

    match (board_id, demo_file) {
        (Some(backends::CYTON_BOARD_ID), _) => Ok(cyton()),
        (Some(backends::SYNTHETIC_BOARD_ID), _) => Ok(BoardSource::Synthetic),
        (Some(id), _) if id > backends::SYNTHETIC_BOARD_ID => Ok(BoardSource::Unsupported(id)),
        (_, Some(path)) => Ok(BoardSource::DemoFile(path)),
        (Some(_), None) => Err("Invalid startup parameters".to_string()),
        (None, None) => Ok(cyton()),
    }
}

/// A line of console input, typed locally or relayed by the command server.
#[derive(Clone, Debug, Eq, PartialEq)]
enum ConsoleCommand {
    Quit,
    ShowProgress,
    Lights(LightMode),
    ToggleBoard,
    StartLogging(String),
    StopLogging,
    Unknown(String),
}

impl ConsoleCommand {
    fn parse(input: &str) -> ConsoleCommand {
        let input = input.trim();
        if let Some(mode) = LightMode::from_digit(input) {
            return ConsoleCommand::Lights(mode);
        }
        let (command, argument) = input.split_once(' ').unwrap_or((input, ""));
        match command.to_ascii_uppercase().as_str() {
            "Q" => ConsoleCommand::Quit,
            "S" => ConsoleCommand::ShowProgress,
            "B" => ConsoleCommand::ToggleBoard,
            "L" if !argument.trim().is_empty() => {
                ConsoleCommand::StartLogging(argument.trim().to_string())
            }
            "X" => ConsoleCommand::StopLogging,
            _ => ConsoleCommand::Unknown(input.to_string()),
        }
    }
}

/// Forwards stdin lines to the console loop until stdin closes.
fn spawn_stdin_reader(console: mpsc::Sender<KeyboardInput>) -> io::Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if console.send(KeyboardInput::console(line)).is_err() {
                    break;
                }
            }
            log::debug!("Console input closed");
        })?;
    Ok(())
}

fn run_console(node: &Node, console: mpsc::Receiver<KeyboardInput>) {
    let context = node.context();
    for input in console {
        match ConsoleCommand::parse(&input.key) {
            ConsoleCommand::Quit => break,
            ConsoleCommand::ShowProgress => {
                context.data_log.reset_display();
                log::info!(
                    "Board {:?}, streaming: {}, recording: {}, records logged: {}",
                    context.board.state(),
                    context.board.is_streaming(),
                    context.data_log.is_logging(),
                    context.data_log.record_count()
                );
            }
            ConsoleCommand::Lights(mode) => context.indicator.set_mode(mode),
            ConsoleCommand::ToggleBoard => context.board.enable_board(!context.board.is_enabled()),
            ConsoleCommand::StartLogging(name) => {
                if let Err(e) = context.data_log.start_logging(&name) {
                    log::error!("Unable to start log file {}: {}", name, e);
                }
            }
            ConsoleCommand::StopLogging => {
                if let Err(e) = context.data_log.stop_logging() {
                    log::error!("Unable to close log file: {}", e);
                }
            }
            ConsoleCommand::Unknown(input) => log::warn!("Unknown console command: {}", input),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting brainHat node");

    let args = Args::parse();
    log::debug!("Parsed arguments: {:?}", args);

    let params = args.board_params();
    let source = match board_source(args.board_id, args.demo_file.clone(), &params) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}. Exiting program.", e);
            process::exit(1);
        }
    };
    log::info!("Using board source {:?}", source);

    let indicator = Arc::new(LogIndicator::default());
    indicator.set_mode(LightMode::Sequence);
    let context = NodeContext::new(
        source.board_id(),
        DataLogConfig::default().directory(&args.data_dir),
        indicator.clone(),
    );
    log::info!("Host name {}", context.host_name);

    let (console_tx, console_rx) = mpsc::channel();
    let handler = CommandHandler::default().with_keyboard(console_tx.clone());
    let command_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.command_port);
    let config = NodeConfig {
        command: Builder::new().addr(command_addr).config(),
        log_port: args.log_port,
        ..NodeConfig::default()
    };

    let acquisition = AcquisitionThread::new(source.session_factory(), context.board.clone())
        .with_policy(ReconnectPolicy {
            settle_delay: source.settle_delay(),
            ..ReconnectPolicy::default()
        })
        .with_data_log(context.data_log.clone())
        .with_observer(indicator);

    let mut node = Node::start(context, &config, handler, Some(acquisition));
    spawn_stdin_reader(console_tx)?;
    log::info!("Enter Q to quit");

    run_console(&node, console_rx);
    node.shutdown();
    Ok(())
}

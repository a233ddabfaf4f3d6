//! Board sessions the node can stream from.
pub mod cyton;
pub mod demo_file;
pub mod synthetic;

use std::{path::PathBuf, time::Duration};

use hat_server::acquisition::{BoardError, BoardResult, BoardSession, ErrorCode, SessionFactory};

pub const CYTON_BOARD_ID: i32 = 0;
pub const SYNTHETIC_BOARD_ID: i32 = -1;
/// Board id reported while replaying a recording.
pub const FILE_BOARD_ID: i32 = -99;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Number of rows in a sample: index, 8 EXG, 3 accel, 7 other, 3 analog, timestamp.
pub const CYTON_NUM_ROWS: usize = 23;
pub const TIMESTAMP_ROW: usize = 22;
pub const CYTON_SAMPLE_RATE: i32 = 250;

/// Connection parameters passed on from the command line.
#[derive(Clone, Debug, Default)]
pub struct BoardParams {
    pub serial_port: Option<PathBuf>,
    pub serial_number: Option<String>,
    pub ip_address: Option<String>,
    pub ip_port: Option<u16>,
    pub ip_protocol: Option<i32>,
    pub mac_address: Option<String>,
    pub other_info: Option<String>,
    /// Board handshake timeout in seconds.
    pub timeout: Option<u64>,
}

/// Where the acquisition thread gets its samples from.
#[derive(Clone, Debug, PartialEq)]
pub enum BoardSource {
    Cyton { serial_port: PathBuf, timeout: Duration },
    Synthetic,
    DemoFile(PathBuf),
    Unsupported(i32),
}

impl BoardSource {
    pub fn board_id(&self) -> i32 {
        match self {
            BoardSource::Cyton { .. } => CYTON_BOARD_ID,
            BoardSource::Synthetic => SYNTHETIC_BOARD_ID,
            BoardSource::DemoFile(_) => FILE_BOARD_ID,
            BoardSource::Unsupported(id) => *id,
        }
    }

    /// Time the board needs after starting its stream before data flows.
    pub fn settle_delay(&self) -> Duration {
        match self {
            BoardSource::Cyton { .. } => Duration::from_secs(7),
            _ => Duration::ZERO,
        }
    }

    pub fn session_factory(&self) -> impl SessionFactory + 'static {
        let source = self.clone();
        move || -> BoardResult<Box<dyn BoardSession>> {
            match &source {
                BoardSource::Cyton {
                    serial_port,
                    timeout,
                } => Ok(Box::new(cyton::CytonSession::new(serial_port, *timeout))),
                BoardSource::Synthetic => Ok(Box::new(synthetic::SyntheticSession::new())),
                BoardSource::DemoFile(path) => Ok(Box::new(demo_file::DemoFileSession::new(path))),
                BoardSource::Unsupported(id) => Err(BoardError::new(
                    ErrorCode::UnsupportedBoard,
                    format!("Board id {} is not supported", id),
                )),
            }
        }
    }
}

/// Current time as fractional unix seconds, the unit of the timestamp row.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

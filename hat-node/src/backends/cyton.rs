//! # OpenBCI Cyton Backend
//!
//! Streams from a Cyton board attached through its USB serial dongle.
//!
//! The board sends 33 byte packets at 250 Hz:
//!
//! | Byte  | Content                                   |
//! |-------|-------------------------------------------|
//! | 0     | Header `0xA0`                             |
//! | 1     | Sample number                             |
//! | 2-25  | 8 EXG channels, 24 bit big endian signed  |
//! | 26-31 | 3 accelerometer axes, 16 bit big endian   |
//! | 32    | Footer `0xC0` to `0xCF`                   |
use std::{
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use hat_server::acquisition::{BoardError, BoardResult, BoardSession, ErrorCode, SampleBlock};

use super::{CYTON_BOARD_ID, CYTON_NUM_ROWS, CYTON_SAMPLE_RATE, TIMESTAMP_ROW, unix_timestamp};

const BAUD_RATE: u32 = 115_200;
const PACKET_LEN: usize = 33;
const HEADER: u8 = 0xA0;
const FOOTER_MASK: u8 = 0xF0;
const FOOTER: u8 = 0xC0;

const CMD_SOFT_RESET: &[u8] = b"v";
const CMD_START_STREAM: &[u8] = b"b";
const CMD_STOP_STREAM: &[u8] = b"s";
const READY_MARKER: &[u8] = b"$$$";

/// Microvolts per count at the default gain of 24.
const EXG_SCALE: f64 = 4.5 / 24.0 / 8_388_607.0 * 1_000_000.0;
/// g per count of the accelerometer.
const ACCEL_SCALE: f64 = 0.002 / 16.0;

pub struct CytonSession {
    serial_port: PathBuf,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    buffer: Vec<u8>,
}

impl CytonSession {
    pub fn new(serial_port: impl AsRef<Path>, timeout: Duration) -> CytonSession {
        CytonSession {
            serial_port: serial_port.as_ref().to_path_buf(),
            timeout,
            port: None,
            buffer: Vec::with_capacity(PACKET_LEN * 64),
        }
    }

    fn open_port(&self) -> serialport::Result<Box<dyn SerialPort>> {
        let path = self.serial_port.to_string_lossy();
        let port = serialport::new(path.as_ref(), BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()?;
        port.clear(ClearBuffer::All)?;
        log::debug!("Opened serial port {} at {} baud", path, BAUD_RATE);
        Ok(port)
    }

    fn write_command(&mut self, command: &[u8]) -> BoardResult<()> {
        let port = self.port.as_mut().ok_or_else(not_prepared)?;
        port.write_all(command)
            .and_then(|_| port.flush())
            .map_err(|e| BoardError::new(ErrorCode::BoardWrite, e.to_string()))
    }

    /// Reads whatever the port has buffered without waiting for more.
    fn drain_port(&mut self) -> io::Result<usize> {
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };
        let available = port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(0);
        }
        let start = self.buffer.len();
        self.buffer.resize(start + available, 0);
        let read = match port.read(&mut self.buffer[start..]) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => 0,
            Err(e) => {
                self.buffer.truncate(start);
                return Err(e);
            }
        };
        self.buffer.truncate(start + read);
        Ok(read)
    }

    /// Resets the board and waits for its `$$$` prompt.
    fn handshake(&mut self) -> BoardResult<()> {
        self.write_command(CMD_SOFT_RESET)?;
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            self.drain_port()
                .map_err(|e| BoardError::new(ErrorCode::BoardNotReady, e.to_string()))?;
            if self
                .buffer
                .windows(READY_MARKER.len())
                .any(|window| window == READY_MARKER)
            {
                log::debug!("Cyton: {}", String::from_utf8_lossy(&self.buffer).trim());
                self.buffer.clear();
                return Ok(());
            }
            thread::sleep(Duration::from_millis(20));
        }
        Err(BoardError::new(
            ErrorCode::BoardNotReady,
            "Board did not answer the soft reset",
        ))
    }
}

fn not_prepared() -> BoardError {
    BoardError::new(ErrorCode::BoardNotCreated, "Serial port is not open")
}

fn signed_24(bytes: &[u8]) -> i32 {
    let raw = (i32::from(bytes[0]) << 16) | (i32::from(bytes[1]) << 8) | i32::from(bytes[2]);
    (raw << 8) >> 8
}

fn signed_16(bytes: &[u8]) -> i16 {
    i16::from_be_bytes([bytes[0], bytes[1]])
}

/// Converts every complete packet at the front of `buffer` into a sample.
/// Bytes before a packet header are discarded, a trailing partial packet is kept.
pub fn parse_packets(buffer: &mut Vec<u8>, block: &mut SampleBlock, timestamp: f64) -> usize {
    let mut parsed = 0;
    let mut start = 0;
    let mut values = [0.0; CYTON_NUM_ROWS];

    while buffer.len() - start >= PACKET_LEN {
        let packet = &buffer[start..start + PACKET_LEN];
        if packet[0] != HEADER || packet[PACKET_LEN - 1] & FOOTER_MASK != FOOTER {
            start += 1;
            continue;
        }

        values.fill(0.0);
        values[0] = f64::from(packet[1]);
        for channel in 0..8 {
            let offset = 2 + channel * 3;
            values[1 + channel] = f64::from(signed_24(&packet[offset..offset + 3])) * EXG_SCALE;
        }
        for axis in 0..3 {
            let offset = 26 + axis * 2;
            values[9 + axis] = f64::from(signed_16(&packet[offset..offset + 2])) * ACCEL_SCALE;
        }
        values[TIMESTAMP_ROW] = timestamp;
        block.push_sample(&values);

        parsed += 1;
        start += PACKET_LEN;
    }

    buffer.drain(..start);
    parsed
}

impl BoardSession for CytonSession {
    fn board_id(&self) -> i32 {
        CYTON_BOARD_ID
    }

    fn sample_rate(&self) -> i32 {
        CYTON_SAMPLE_RATE
    }

    fn num_rows(&self) -> usize {
        CYTON_NUM_ROWS
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        let port = self
            .open_port()
            .map_err(|e| BoardError::new(ErrorCode::UnableToOpenPort, e.to_string()))?;
        self.port = Some(port);
        self.buffer.clear();
        if let Err(e) = self.handshake() {
            self.port = None;
            return Err(e);
        }
        log::info!("Cyton board ready on {}", self.serial_port.display());
        Ok(())
    }

    fn start_stream(&mut self) -> BoardResult<()> {
        self.write_command(CMD_START_STREAM)
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        self.write_command(CMD_STOP_STREAM)
    }

    fn release_session(&mut self) -> BoardResult<()> {
        self.port.take().ok_or_else(not_prepared)?;
        self.buffer.clear();
        log::debug!("Closed serial port {}", self.serial_port.display());
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.port.is_some()
    }

    fn get_board_data(&mut self) -> BoardResult<SampleBlock> {
        if self.port.is_none() {
            return Err(not_prepared());
        }
        // A dongle without a powered board keeps the port open but reports errors on read.
        self.drain_port()
            .map_err(|e| BoardError::new(ErrorCode::BoardNotCreated, e.to_string()))?;
        let mut block = SampleBlock::with_rows(CYTON_NUM_ROWS);
        parse_packets(&mut self.buffer, &mut block, unix_timestamp());
        Ok(block)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn packet(sample: u8, first_channel: [u8; 3], accel_x: [u8; 2]) -> Vec<u8> {
        let mut packet = vec![0u8; PACKET_LEN];
        packet[0] = HEADER;
        packet[1] = sample;
        packet[2..5].copy_from_slice(&first_channel);
        packet[26..28].copy_from_slice(&accel_x);
        packet[32] = FOOTER;
        packet
    }

    #[test]
    fn sign_extension() {
        assert_eq!(signed_24(&[0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(signed_24(&[0x7F, 0xFF, 0xFF]), 8_388_607);
        assert_eq!(signed_24(&[0x80, 0x00, 0x00]), -8_388_608);
        assert_eq!(signed_16(&[0xFF, 0xFE]), -2);
    }

    #[test]
    fn parse_two_packets_after_garbage() {
        let mut buffer = vec![0x01, 0x02];
        buffer.extend(packet(7, [0x7F, 0xFF, 0xFF], [0x00, 0x10]));
        buffer.extend(packet(8, [0xFF, 0xFF, 0xFF], [0xFF, 0xF0]));
        buffer.extend(&[HEADER, 9, 0, 0]);

        let mut block = SampleBlock::with_rows(CYTON_NUM_ROWS);
        assert_eq!(parse_packets(&mut buffer, &mut block, 12.5), 2);
        assert_eq!(buffer, vec![HEADER, 9, 0, 0]);

        assert_eq!(block.row(0), &[7.0, 8.0]);
        assert!((block.row(1)[0] - 187_500.0).abs() < 0.1);
        assert!(block.row(1)[1] < 0.0);
        assert_eq!(block.row(9), &[16.0 * ACCEL_SCALE, -16.0 * ACCEL_SCALE]);
        assert_eq!(block.row(TIMESTAMP_ROW), &[12.5, 12.5]);
    }

    #[test]
    fn missing_port_fails_to_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CytonSession::new(dir.path().join("ttyUSB9"), Duration::from_millis(10));
        let err = session.prepare_session().unwrap_err();
        assert_eq!(err.code, ErrorCode::UnableToOpenPort);
        assert!(!session.is_prepared());
        let err = session.get_board_data().unwrap_err();
        assert_eq!(err.code, ErrorCode::BoardNotCreated);
    }
}

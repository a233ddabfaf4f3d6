//! A board without hardware: sine waves at the Cyton's rate and layout.
use std::{f64::consts::TAU, time::Instant};

use hat_server::acquisition::{BoardError, BoardResult, BoardSession, ErrorCode, SampleBlock};

use super::{CYTON_NUM_ROWS, CYTON_SAMPLE_RATE, SYNTHETIC_BOARD_ID, TIMESTAMP_ROW, unix_timestamp};

/// Largest block returned by one poll, so a stalled caller does not get a burst.
const MAX_SAMPLES_PER_POLL: u64 = CYTON_SAMPLE_RATE as u64;

pub struct SyntheticSession {
    prepared: bool,
    started: Option<Instant>,
    emitted: u64,
}

impl Default for SyntheticSession {
    fn default() -> Self {
        SyntheticSession::new()
    }
}

impl SyntheticSession {
    pub fn new() -> SyntheticSession {
        SyntheticSession {
            prepared: false,
            started: None,
            emitted: 0,
        }
    }

    fn sample(&self, index: u64, timestamp: f64) -> [f64; CYTON_NUM_ROWS] {
        let t = index as f64 / f64::from(CYTON_SAMPLE_RATE);
        let mut values = [0.0; CYTON_NUM_ROWS];
        values[0] = (index % 256) as f64;
        for channel in 0..8 {
            let frequency = 2.0 * (channel + 1) as f64;
            values[1 + channel] = 50.0 * (TAU * frequency * t).sin();
        }
        values[11] = 1.0;
        values[TIMESTAMP_ROW] = timestamp;
        values
    }
}

impl BoardSession for SyntheticSession {
    fn board_id(&self) -> i32 {
        SYNTHETIC_BOARD_ID
    }

    fn sample_rate(&self) -> i32 {
        CYTON_SAMPLE_RATE
    }

    fn num_rows(&self) -> usize {
        CYTON_NUM_ROWS
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        self.prepared = true;
        Ok(())
    }

    fn start_stream(&mut self) -> BoardResult<()> {
        if !self.prepared {
            return Err(BoardError::new(
                ErrorCode::BoardNotCreated,
                "Session not prepared",
            ));
        }
        self.started = Some(Instant::now());
        self.emitted = 0;
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        self.started.take().map(|_| ()).ok_or_else(|| {
            BoardError::new(ErrorCode::StreamThreadNotRunning, "Stream is not running")
        })
    }

    fn release_session(&mut self) -> BoardResult<()> {
        self.prepared = false;
        self.started = None;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn get_board_data(&mut self) -> BoardResult<SampleBlock> {
        let started = self.started.ok_or_else(|| {
            BoardError::new(ErrorCode::StreamThreadNotRunning, "Stream is not running")
        })?;
        let due = (started.elapsed().as_secs_f64() * f64::from(CYTON_SAMPLE_RATE)) as u64;
        let count = due.saturating_sub(self.emitted).min(MAX_SAMPLES_PER_POLL);

        let mut block = SampleBlock::with_rows(CYTON_NUM_ROWS);
        let timestamp = unix_timestamp();
        for index in self.emitted..self.emitted + count {
            block.push_sample(&self.sample(index, timestamp));
        }
        self.emitted = due.max(self.emitted + count);
        Ok(block)
    }
}

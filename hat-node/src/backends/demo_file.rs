//! Replays an OpenBCI raw text recording in real time, looping at the end.
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use hat_server::acquisition::{BoardError, BoardResult, BoardSession, ErrorCode, SampleBlock};

use super::{CYTON_SAMPLE_RATE, FILE_BOARD_ID, unix_timestamp};

const SAMPLE_RATE_PREFIX: &str = "%Sample Rate = ";
const TIMESTAMP_COLUMN: &str = "Timestamp";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Recording {
    pub sample_rate: i32,
    pub num_rows: usize,
    /// Column replaced with the replay time.
    pub timestamp_row: Option<usize>,
    pub samples: Vec<Vec<f64>>,
}

impl Recording {
    /// Parses the `%` header, the column names and the numeric part of every row.
    pub fn parse(content: &str) -> Result<Recording, String> {
        let mut recording = Recording {
            sample_rate: CYTON_SAMPLE_RATE,
            ..Recording::default()
        };

        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if let Some(header) = line.strip_prefix('%') {
                if let Some(rate) = line.strip_prefix(SAMPLE_RATE_PREFIX) {
                    recording.sample_rate = rate
                        .trim_end_matches("Hz")
                        .trim()
                        .parse()
                        .map_err(|_| format!("Invalid sample rate: {}", header))?;
                }
                continue;
            }
            if line.starts_with("Sample Index") {
                recording.timestamp_row = line
                    .split(',')
                    .position(|column| column.trim() == TIMESTAMP_COLUMN);
                continue;
            }

            let sample: Vec<f64> = line
                .split(',')
                .map_while(|field| field.trim().parse().ok())
                .collect();
            if sample.is_empty() {
                continue;
            }
            recording.num_rows = recording.num_rows.max(sample.len());
            recording.samples.push(sample);
        }

        if recording.samples.is_empty() {
            return Err("Recording contains no samples".to_string());
        }
        if recording.sample_rate <= 0 {
            return Err(format!("Invalid sample rate {}", recording.sample_rate));
        }
        Ok(recording)
    }
}

pub struct DemoFileSession {
    path: PathBuf,
    recording: Option<Recording>,
    started: Option<Instant>,
    emitted: u64,
}

impl DemoFileSession {
    pub fn new(path: impl AsRef<Path>) -> DemoFileSession {
        DemoFileSession {
            path: path.as_ref().to_path_buf(),
            recording: None,
            started: None,
            emitted: 0,
        }
    }
}

impl BoardSession for DemoFileSession {
    fn board_id(&self) -> i32 {
        FILE_BOARD_ID
    }

    fn sample_rate(&self) -> i32 {
        self.recording
            .as_ref()
            .map_or(CYTON_SAMPLE_RATE, |recording| recording.sample_rate)
    }

    fn num_rows(&self) -> usize {
        self.recording.as_ref().map_or(0, |recording| recording.num_rows)
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            BoardError::new(
                ErrorCode::InvalidArguments,
                format!("Unable to load {}: {}", self.path.display(), e),
            )
        })?;
        let recording = Recording::parse(&content)
            .map_err(|e| BoardError::new(ErrorCode::InvalidArguments, e))?;
        log::info!(
            "Loaded {} samples at {} Hz from {}",
            recording.samples.len(),
            recording.sample_rate,
            self.path.display()
        );
        self.recording = Some(recording);
        Ok(())
    }

    fn start_stream(&mut self) -> BoardResult<()> {
        if self.recording.is_none() {
            return Err(BoardError::new(
                ErrorCode::BoardNotCreated,
                "No recording loaded",
            ));
        }
        self.started = Some(Instant::now());
        self.emitted = 0;
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        self.started = None;
        Ok(())
    }

    fn release_session(&mut self) -> BoardResult<()> {
        self.started = None;
        self.recording = None;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.recording.is_some()
    }

    fn get_board_data(&mut self) -> BoardResult<SampleBlock> {
        let (Some(recording), Some(started)) = (&self.recording, self.started) else {
            return Err(BoardError::new(
                ErrorCode::StreamThreadNotRunning,
                "Replay is not running",
            ));
        };
        let due = (started.elapsed().as_secs_f64() * f64::from(recording.sample_rate)) as u64;
        let count = due
            .saturating_sub(self.emitted)
            .min(recording.sample_rate as u64);

        let mut block = SampleBlock::with_rows(recording.num_rows);
        let timestamp = unix_timestamp();
        for index in self.emitted..self.emitted + count {
            let position = (index % recording.samples.len() as u64) as usize;
            let mut sample = recording.samples[position].clone();
            if let Some(row) = recording.timestamp_row.filter(|row| *row < sample.len()) {
                sample[row] = timestamp;
            }
            block.push_sample(&sample);
        }
        self.emitted = due.max(self.emitted + count);
        Ok(block)
    }
}

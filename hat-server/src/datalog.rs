//! The recording file: an OpenBCI style raw text log shared between writers.
use std::{
    fmt::Write as _,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};

use crate::acquisition::SampleBlock;
use crate::status::FileWriter;

const COLUMN_HEADER: &str = "Sample Index, EXG Channel 0, EXG Channel 1, EXG Channel 2, \
EXG Channel 3, EXG Channel 4, EXG Channel 5, EXG Channel 6, EXG Channel 7, \
Accel Channel 0, Accel Channel 1, Accel Channel 2, Other, Other, Other, Other, Other, Other, \
Other, Analog Channel 0, Analog Channel 1, Analog Channel 2, Timestamp, Timestamp (Formatted)";

const DISPLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DataLogConfig {
    pub directory: PathBuf,
    pub num_channels: u32,
    pub sample_rate: u32,
    pub board: String,
    pub logger: String,
}

impl Default for DataLogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            num_channels: 8,
            sample_rate: 250,
            board: "OpenBCI_GUI$BoardCytonSerial".to_string(),
            logger: "brainHat".to_string(),
        }
    }
}

impl DataLogConfig {
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

#[derive(Default)]
struct LogFileHandle {
    file: Option<BufWriter<File>>,
    file_name: String,
    start_time: Option<Instant>,
    last_display_time: Option<Instant>,
    record_count: u64,
}

impl LogFileHandle {
    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Appends board samples to the current recording file.
///
/// Every operation holds the same lock, so rows are never interleaved with
/// each other or with a concurrent start or stop.
pub struct DataLog {
    config: DataLogConfig,
    handle: Mutex<LogFileHandle>,
}

impl DataLog {
    pub fn new(config: DataLogConfig) -> DataLog {
        DataLog {
            config,
            handle: Mutex::new(LogFileHandle::default()),
        }
    }

    pub fn config(&self) -> &DataLogConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LogFileHandle> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Closes the current file, if any, and starts `<test_name>_<HHMMSS>.txt`.
    pub fn start_logging(&self, test_name: &str) -> io::Result<PathBuf> {
        let mut handle = self.lock();
        handle.close()?;

        fs::create_dir_all(&self.config.directory)?;
        let stem = format!("{}_{}", test_name, Local::now().format("%H%M%S"));
        let (file, file_name) = create_log_file(&self.config.directory, &stem)?;
        let path = self.config.directory.join(&file_name);
        let mut file = BufWriter::new(file);
        self.write_header(&mut file)?;
        file.flush()?;

        log::info!("Starting log file {}", path.display());
        let now = Instant::now();
        *handle = LogFileHandle {
            file: Some(file),
            file_name,
            start_time: Some(now),
            last_display_time: Some(now),
            record_count: 0,
        };
        Ok(path)
    }

    pub fn stop_logging(&self) -> io::Result<()> {
        let mut handle = self.lock();
        if handle.file.is_some() {
            log::info!(
                "Stopped log file {} after {} records",
                handle.file_name,
                handle.record_count
            );
        }
        handle.close()
    }

    /// Appends one row per sample. Returns the number of rows written, zero when not logging.
    pub fn save(&self, block: &SampleBlock) -> io::Result<usize> {
        let mut handle = self.lock();
        let Some(file) = handle.file.as_mut() else {
            return Ok(0);
        };
        if block.is_empty() {
            return Ok(0);
        }

        let mut rows = String::new();
        for index in 0..block.num_samples() {
            format_row(block, index, &mut rows);
        }
        file.write_all(rows.as_bytes())?;
        file.flush()?;

        handle.record_count += block.num_samples() as u64;
        Ok(block.num_samples())
    }

    pub fn is_logging(&self) -> bool {
        self.lock().file.is_some()
    }

    pub fn record_count(&self) -> u64 {
        self.lock().record_count
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let handle = self.lock();
        handle.file.as_ref()?;
        handle.start_time.map(|start| start.elapsed())
    }

    /// Elapsed whole seconds and record count, at most once per second while logging.
    pub fn progress_due(&self) -> Option<(u64, u64)> {
        let mut handle = self.lock();
        handle.file.as_ref()?;
        let start = handle.start_time?;
        if handle
            .last_display_time
            .is_some_and(|shown| shown.elapsed() <= DISPLAY_INTERVAL)
        {
            return None;
        }
        handle.last_display_time = Some(Instant::now());
        Some((start.elapsed().as_secs(), handle.record_count))
    }

    /// Makes the next [DataLog::progress_due] report right away.
    pub fn reset_display(&self) {
        self.lock().last_display_time = None;
    }

    fn write_header(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "%OpenBCI Raw EEG Data")?;
        writeln!(out, "%Number of channels = {}", self.config.num_channels)?;
        writeln!(out, "%Sample Rate = {} Hz", self.config.sample_rate)?;
        writeln!(out, "%Board = {}", self.config.board)?;
        writeln!(out, "%Logger = {}", self.config.logger)?;
        writeln!(out, "{}", COLUMN_HEADER)
    }
}

impl FileWriter for DataLog {
    fn is_recording(&self) -> bool {
        self.is_logging()
    }

    fn file_name(&self) -> String {
        let handle = self.lock();
        if handle.file.is_some() {
            handle.file_name.clone()
        } else {
            String::new()
        }
    }

    fn elapsed_recording_seconds(&self) -> f64 {
        self.elapsed().map_or(0.0, |elapsed| elapsed.as_secs_f64())
    }
}

/// Creates `<stem>.txt` without touching an existing recording, counting up a suffix on collision.
fn create_log_file(directory: &Path, stem: &str) -> io::Result<(File, String)> {
    let mut suffix = 0u32;
    loop {
        let file_name = match suffix {
            0 => format!("{}.txt", stem),
            n => format!("{}_{}.txt", stem, n),
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(directory.join(&file_name))
        {
            Ok(file) => return Ok((file, file_name)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Decimal places of a column: sample index and auxiliary columns get one, channel data six.
fn precision(column: usize) -> usize {
    match column {
        0 => 1,
        1..=8 => 6,
        9..=21 => 1,
        _ => 6,
    }
}

/// Renders the last row of a sample, a unix timestamp in seconds, as local time.
fn format_timestamp(timestamp: f64) -> String {
    let seconds = timestamp.trunc();
    let fraction = ((timestamp - seconds) * 10000.0) as u32;
    match DateTime::from_timestamp(seconds as i64, 0) {
        Some(time) => format!(
            "{}.{:04}",
            time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            fraction.min(9999)
        ),
        None => String::new(),
    }
}

fn format_row(block: &SampleBlock, index: usize, out: &mut String) {
    let mut timestamp = 0.0;
    for (column, value) in block.sample(index).enumerate() {
        let _ = write!(out, "{:.*},", precision(column), value);
        timestamp = value;
    }
    out.push_str(&format_timestamp(timestamp));
    out.push('\n');
}

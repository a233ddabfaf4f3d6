//! Board acquisition: session lifecycle, polling and automatic reconnect.
use std::{
    error::Error as StdError,
    fmt::Display,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
    time::Duration,
};

use crate::datalog::DataLog;
use crate::error::Error;
use crate::status::DataSource;
use crate::worker::{CancelToken, Worker};

/// Failure codes reported by a board session.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    UnableToOpenPort,
    BoardWrite,
    BoardNotReady,
    StreamAlreadyRunning,
    StreamThreadNotRunning,
    InvalidArguments,
    UnsupportedBoard,
    /// The session has no live board behind it. Raised when the board loses power.
    BoardNotCreated,
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> ErrorCode {
        match code {
            2 => ErrorCode::UnableToOpenPort,
            4 => ErrorCode::BoardWrite,
            7 => ErrorCode::BoardNotReady,
            8 => ErrorCode::StreamAlreadyRunning,
            11 => ErrorCode::StreamThreadNotRunning,
            13 => ErrorCode::InvalidArguments,
            14 => ErrorCode::UnsupportedBoard,
            15 => ErrorCode::BoardNotCreated,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::UnableToOpenPort => 2,
            ErrorCode::BoardWrite => 4,
            ErrorCode::BoardNotReady => 7,
            ErrorCode::StreamAlreadyRunning => 8,
            ErrorCode::StreamThreadNotRunning => 11,
            ErrorCode::InvalidArguments => 13,
            ErrorCode::UnsupportedBoard => 14,
            ErrorCode::BoardNotCreated => 15,
            ErrorCode::Other(code) => *code,
        }
    }

    pub fn is_power_loss(&self) -> bool {
        *self == ErrorCode::BoardNotCreated
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoardError {
    pub code: ErrorCode,
    pub message: String,
}

impl BoardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> BoardError {
        BoardError {
            code,
            message: message.into(),
        }
    }
}

impl Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (board error code {})",
            self.message,
            self.code.code()
        )
    }
}

impl StdError for BoardError {}

pub type BoardResult<T> = Result<T, BoardError>;

/// Samples as delivered by a board: one row per channel, one column per sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBlock {
    rows: Vec<Vec<f64>>,
}

impl SampleBlock {
    pub fn with_rows(num_rows: usize) -> SampleBlock {
        SampleBlock {
            rows: vec![Vec::new(); num_rows],
        }
    }

    /// Appends one sample. Missing channels are filled with zero, extra values dropped.
    pub fn push_sample(&mut self, values: &[f64]) {
        for (index, row) in self.rows.iter_mut().enumerate() {
            row.push(values.get(index).copied().unwrap_or_default());
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_samples(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    /// Channel values of the sample at `index`, in row order.
    pub fn sample(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[index])
    }
}

/// A session with an acquisition board.
///
/// A session is created unprepared. `prepare_session` opens the board and
/// `release_session` closes it again; a released session is not reused.
pub trait BoardSession: Send {
    fn board_id(&self) -> i32;
    fn sample_rate(&self) -> i32;
    fn num_rows(&self) -> usize;
    fn prepare_session(&mut self) -> BoardResult<()>;
    fn start_stream(&mut self) -> BoardResult<()>;
    fn stop_stream(&mut self) -> BoardResult<()>;
    fn release_session(&mut self) -> BoardResult<()>;
    fn is_prepared(&self) -> bool;
    /// Returns and removes every sample received since the last call. Never blocks.
    fn get_board_data(&mut self) -> BoardResult<SampleBlock>;

    fn srb1(&self, _group: usize) -> bool {
        false
    }
}

/// Creates a fresh session for every (re)connect.
pub trait SessionFactory: Send {
    fn create(&mut self) -> BoardResult<Box<dyn BoardSession>>;
}

impl<F> SessionFactory for F
where
    F: FnMut() -> BoardResult<Box<dyn BoardSession>> + Send,
{
    fn create(&mut self) -> BoardResult<Box<dyn BoardSession>> {
        self()
    }
}

#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Invalid epochs tolerated before the session is rebuilt.
    pub threshold: u32,
    /// Invalid epochs charged for a single power loss failure.
    pub power_loss_penalty: u32,
    pub poll_interval: Duration,
    /// Pause after a failed poll.
    pub cooldown: Duration,
    /// Pause after the stream is started, before the first poll.
    pub settle_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            threshold: 300,
            power_loss_penalty: 101,
            poll_interval: Duration::from_millis(10),
            cooldown: Duration::from_secs(1),
            settle_delay: Duration::ZERO,
        }
    }
}

/// Result of one poll cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    Samples(usize),
    Empty,
    Failed(ErrorCode),
}

/// Counts polls without data. The only trigger for a reconnect.
#[derive(Clone, Debug)]
pub struct EpochCounter {
    invalid: u32,
    threshold: u32,
    power_loss_penalty: u32,
}

impl EpochCounter {
    pub fn new(policy: &ReconnectPolicy) -> EpochCounter {
        EpochCounter {
            invalid: 0,
            threshold: policy.threshold,
            power_loss_penalty: policy.power_loss_penalty,
        }
    }

    pub fn record(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Samples(0) | PollOutcome::Empty => {
                self.invalid = self.invalid.saturating_add(1)
            }
            PollOutcome::Samples(_) => self.invalid = 0,
            PollOutcome::Failed(code) if code.is_power_loss() => {
                self.invalid = self.invalid.saturating_add(self.power_loss_penalty)
            }
            PollOutcome::Failed(_) => {}
        }
    }

    pub fn needs_reconnect(&self) -> bool {
        self.invalid >= self.threshold
    }

    pub fn invalid_epochs(&self) -> u32 {
        self.invalid
    }

    pub fn reset(&mut self) {
        self.invalid = 0;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionState {
    Uninitialized,
    SessionActive,
    Polling,
    Reconnecting,
    Released,
}

/// Board connection events, as shown on the node's status lights.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    New,
    PowerOn,
    PowerOff,
    Connected,
    Disconnected,
}

pub trait ConnectionObserver: Send + Sync {
    fn connection_changed(&self, state: ConnectionState);
}

impl<F> ConnectionObserver for F
where
    F: Fn(ConnectionState) + Send + Sync,
{
    fn connection_changed(&self, state: ConnectionState) {
        self(state)
    }
}

/// Board state shared between the acquisition thread and its readers.
#[derive(Debug)]
pub struct BoardStatus {
    board_id: AtomicI32,
    sample_rate: AtomicI32,
    srb1: [AtomicBool; 2],
    streaming: AtomicBool,
    enabled: AtomicBool,
    state: Mutex<AcquisitionState>,
}

impl BoardStatus {
    pub fn new(board_id: i32) -> BoardStatus {
        BoardStatus {
            board_id: AtomicI32::new(board_id),
            sample_rate: AtomicI32::new(0),
            srb1: [AtomicBool::new(false), AtomicBool::new(false)],
            streaming: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            state: Mutex::new(AcquisitionState::Uninitialized),
        }
    }

    /// Disabling releases the session on the next poll cycle, enabling reconnects.
    pub fn enable_board(&self, enable: bool) {
        self.enabled.store(enable, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn session_started(&self, session: &dyn BoardSession) {
        self.board_id.store(session.board_id(), Ordering::SeqCst);
        self.sample_rate.store(session.sample_rate(), Ordering::SeqCst);
        for (group, flag) in self.srb1.iter().enumerate() {
            flag.store(session.srb1(group), Ordering::SeqCst);
        }
        self.streaming.store(true, Ordering::SeqCst);
    }

    fn session_stopped(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }
}

impl DataSource for BoardStatus {
    fn board_id(&self) -> i32 {
        self.board_id.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> i32 {
        self.sample_rate.load(Ordering::SeqCst)
    }

    fn srb1(&self, group: usize) -> bool {
        self.srb1
            .get(group)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

/// Owns the board session and polls it until cancelled.
pub struct AcquisitionThread {
    name: String,
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn BoardSession>>,
    policy: ReconnectPolicy,
    counter: EpochCounter,
    status: Arc<BoardStatus>,
    data_log: Option<Arc<DataLog>>,
    observer: Option<Arc<dyn ConnectionObserver>>,
    power_lost: bool,
    disabled: bool,
}

impl AcquisitionThread {
    pub fn new(
        factory: impl SessionFactory + 'static,
        status: Arc<BoardStatus>,
    ) -> AcquisitionThread {
        let policy = ReconnectPolicy::default();
        AcquisitionThread {
            name: "acquisition".to_string(),
            factory: Box::new(factory),
            session: None,
            counter: EpochCounter::new(&policy),
            policy,
            status,
            data_log: None,
            observer: None,
            power_lost: false,
            disabled: false,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.counter = EpochCounter::new(&policy);
        self.policy = policy;
        self
    }

    pub fn with_data_log(mut self, data_log: Arc<DataLog>) -> Self {
        self.data_log = Some(data_log);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn status(&self) -> &Arc<BoardStatus> {
        &self.status
    }

    fn notify(&self, state: ConnectionState) {
        log::debug!("{}: board {:?}", self.name, state);
        if let Some(observer) = &self.observer {
            observer.connection_changed(state);
        }
    }

    /// Replaces the current session with a new, streaming one.
    ///
    /// On failure no prepared session is left behind.
    pub fn initialize_board(&mut self, token: &CancelToken) -> BoardResult<()> {
        self.release_board();
        self.notify(ConnectionState::New);

        let mut session = self.factory.create()?;
        if let Err(e) = session
            .prepare_session()
            .and_then(|_| session.start_stream())
        {
            log::error!(
                "{}: unable to start board {}: {}",
                self.name,
                session.board_id(),
                e
            );
            if session.is_prepared() {
                if let Err(e) = session.release_session() {
                    log::warn!("{}: unable to release session: {}", self.name, e);
                }
            }
            return Err(e);
        }

        log::info!(
            "{}: streaming from board {} at {} Hz",
            self.name,
            session.board_id(),
            session.sample_rate()
        );
        self.status.session_started(session.as_ref());
        self.status.set_state(AcquisitionState::SessionActive);
        self.session = Some(session);
        self.counter.reset();
        self.power_lost = false;
        self.notify(ConnectionState::Connected);

        token.sleep(self.policy.settle_delay);
        Ok(())
    }

    /// Stops and releases the session if there is one. Safe to call repeatedly.
    pub fn release_board(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.is_prepared() {
                if let Err(e) = session.stop_stream() {
                    log::warn!("{}: unable to stop stream: {}", self.name, e);
                }
                if let Err(e) = session.release_session() {
                    log::warn!("{}: unable to release session: {}", self.name, e);
                }
            }
            log::debug!("{}: board session released", self.name);
            self.status.session_stopped();
            self.counter.reset();
        }
    }

    fn reconnect(&mut self, token: &CancelToken) {
        log::error!(
            "{}: lost connection to the board, attempting to reconnect",
            self.name
        );
        self.status.set_state(AcquisitionState::Reconnecting);
        self.notify(ConnectionState::Disconnected);
        self.release_board();
        if let Err(e) = self.initialize_board(token) {
            log::error!("{}: failed to reconnect to board: {}", self.name, e);
        }
    }

    fn poll(&mut self) -> BoardResult<PollOutcome> {
        let block = match self.session.as_mut() {
            Some(session) => session.get_board_data()?,
            None => {
                return Err(BoardError::new(
                    ErrorCode::BoardNotCreated,
                    "No board session",
                ));
            }
        };

        if let Some(data_log) = &self.data_log {
            if data_log.is_logging() {
                if let Err(e) = data_log.save(&block) {
                    log::warn!("{}: unable to write data log: {}", self.name, e);
                }
                if let Some((elapsed, records)) = data_log.progress_due() {
                    log::info!("Time Elapsed: {}s. Records logged: {}", elapsed, records);
                }
            }
        }

        if block.is_empty() {
            return Ok(PollOutcome::Empty);
        }
        if self.power_lost {
            self.power_lost = false;
            self.notify(ConnectionState::PowerOn);
        }
        self.status.set_state(AcquisitionState::Polling);
        Ok(PollOutcome::Samples(block.num_samples()))
    }

    /// Releases the board while disabled and reconnects once enabled again.
    /// Returns whether polling may go ahead.
    fn follow_enable_flag(&mut self, token: &CancelToken) -> bool {
        if !self.status.is_enabled() {
            if !self.disabled {
                log::info!("{}: board disabled", self.name);
                self.disabled = true;
                self.release_board();
                self.status.set_state(AcquisitionState::Released);
            }
            return false;
        }
        if self.disabled {
            log::info!("{}: board enabled", self.name);
            self.disabled = false;
            if let Err(e) = self.initialize_board(token) {
                log::error!("{}: unable to enable board: {}", self.name, e);
            }
        }
        true
    }
}

impl Worker for AcquisitionThread {
    type Info = ();

    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&mut self, token: &CancelToken) -> Result<(), Error> {
        self.initialize_board(token)?;
        Ok(())
    }

    fn run(&mut self, token: &CancelToken) {
        while !token.is_cancelled() {
            if !self.follow_enable_flag(token) {
                token.sleep(self.policy.poll_interval);
                continue;
            }

            if self.counter.needs_reconnect() {
                self.reconnect(token);
                continue;
            }

            match self.poll() {
                Ok(outcome) => {
                    self.counter.record(outcome);
                    token.sleep(self.policy.poll_interval);
                }
                Err(e) => {
                    log::error!("{}: {}", self.name, e);
                    self.counter.record(PollOutcome::Failed(e.code));
                    if e.code.is_power_loss() && !self.power_lost {
                        self.power_lost = true;
                        self.notify(ConnectionState::PowerOff);
                    }
                    token.sleep(self.policy.cooldown);
                }
            }
        }
    }

    fn release(&mut self) {
        self.release_board();
        self.status.set_state(AcquisitionState::Released);
    }
}

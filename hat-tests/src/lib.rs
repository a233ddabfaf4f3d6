//! Shared fixtures for the integration tests: a scripted board and loopback endpoints.
use std::{
    collections::VecDeque,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use hat_server::{
    acquisition::{BoardError, BoardResult, BoardSession, ErrorCode, SampleBlock, SessionFactory},
    multicast::MulticastConfig,
    tcp::TcpConfig,
};

pub const NUM_ROWS: usize = 4;

/// One poll answer of a [ScriptedBoard].
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Samples(usize),
    Empty,
    Fail(ErrorCode),
}

/// What happened to the sessions of a [ScriptedBoard].
#[derive(Debug, Default)]
pub struct Journal {
    pub created: usize,
    /// Poll count at the time each session was created.
    pub created_after_polls: Vec<usize>,
    pub prepared: usize,
    pub released: usize,
    pub polls: usize,
    pub samples: usize,
}

/// A board whose poll results are read from a script. An exhausted script polls empty.
#[derive(Clone, Default)]
pub struct ScriptedBoard {
    journal: Arc<Mutex<Journal>>,
    script: Arc<Mutex<VecDeque<Step>>>,
}

impl ScriptedBoard {
    pub fn new(steps: &[Step]) -> ScriptedBoard {
        let board = ScriptedBoard::default();
        board.push(steps);
        board
    }

    pub fn push(&self, steps: &[Step]) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(steps.iter().copied());
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn factory(&self) -> impl SessionFactory + 'static {
        let board = self.clone();
        move || -> BoardResult<Box<dyn BoardSession>> {
            let mut journal = board.journal();
            journal.created += 1;
            let polls = journal.polls;
            journal.created_after_polls.push(polls);
            drop(journal);
            Ok(Box::new(ScriptedSession {
                board: board.clone(),
                prepared: false,
                sample_index: 0,
            }))
        }
    }

    /// Polls `condition` on the journal until it holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, condition: impl Fn(&Journal) -> bool) -> bool {
        wait_until(timeout, || condition(&self.journal()))
    }
}

struct ScriptedSession {
    board: ScriptedBoard,
    prepared: bool,
    sample_index: usize,
}

impl BoardSession for ScriptedSession {
    fn board_id(&self) -> i32 {
        -1
    }

    fn sample_rate(&self) -> i32 {
        250
    }

    fn num_rows(&self) -> usize {
        NUM_ROWS
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        self.prepared = true;
        self.board.journal().prepared += 1;
        Ok(())
    }

    fn start_stream(&mut self) -> BoardResult<()> {
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        Ok(())
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if !self.prepared {
            return Err(BoardError::new(
                ErrorCode::BoardNotCreated,
                "released twice",
            ));
        }
        self.prepared = false;
        self.board.journal().released += 1;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn get_board_data(&mut self) -> BoardResult<SampleBlock> {
        let step = self
            .board
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Step::Empty);
        let mut journal = self.board.journal();
        journal.polls += 1;

        let mut block = SampleBlock::with_rows(NUM_ROWS);
        match step {
            Step::Samples(count) => {
                for _ in 0..count {
                    self.sample_index += 1;
                    block.push_sample(&[self.sample_index as f64, 10.0, -10.0, 1_600_000_000.0]);
                }
                journal.samples += count;
            }
            Step::Empty => {}
            Step::Fail(code) => return Err(BoardError::new(code, "scripted failure")),
        }
        Ok(block)
    }
}

pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// A command server configuration on an ephemeral loopback port.
pub fn loopback_tcp() -> TcpConfig {
    TcpConfig {
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        ..TcpConfig::default()
    }
}

/// Status broadcasts sent unicast to `destination` with a short period.
pub fn loopback_status(destination: SocketAddr, period: Duration) -> MulticastConfig {
    let SocketAddr::V4(destination) = destination else {
        panic!("loopback status destination must be IPv4");
    };
    MulticastConfig {
        destination,
        period,
        ..MulticastConfig::default()
    }
}

//! Start/cancel lifecycle shared by every long running part of the node.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::error::Error;

/// Upper bound on how long a sleeping run loop takes to notice a cancellation.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a [CancellableThread]. Transitions only move forward:
/// `Idle -> Running -> CancelRequested -> Stopped`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ThreadState {
    Idle,
    Running,
    CancelRequested,
    Stopped,
}

/// Cooperative cancellation flag handed to a worker's run loop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, waking up every [CANCEL_POLL_INTERVAL] to check the flag.
    ///
    /// Returns `false` if the token was cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
        }
    }
}

/// The unit of work driven by a [CancellableThread].
///
/// `prepare` runs on the caller's thread and acquires everything the run loop needs.
/// `run` runs on a dedicated thread and must return soon after the token is cancelled.
/// `release` runs on the cancelling thread once `run` has returned.
pub trait Worker: Send + 'static {
    /// What a successful `prepare` hands back to the owner, e.g. a bound address.
    type Info: Clone + Send + 'static;

    fn name(&self) -> String;

    fn prepare(&mut self, token: &CancelToken) -> Result<Self::Info, Error>;

    fn run(&mut self, token: &CancelToken);

    fn release(&mut self);
}

/// Owns a [Worker] and the thread that runs it.
///
/// `start` is idempotent while running and `cancel` is idempotent in every state.
/// When `cancel` returns, the run loop has exited and the worker's resources are released.
pub struct CancellableThread<W: Worker> {
    name: String,
    state: ThreadState,
    token: CancelToken,
    worker: Option<W>,
    handle: Option<JoinHandle<W>>,
    info: Option<W::Info>,
}

impl<W: Worker> CancellableThread<W> {
    pub fn new(worker: W) -> CancellableThread<W> {
        CancellableThread {
            name: worker.name(),
            state: ThreadState::Idle,
            token: CancelToken::new(),
            worker: Some(worker),
            handle: None,
            info: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Whether the run loop is still executing. A loop may end on its own,
    /// e.g. when its listener fails.
    pub fn is_running(&self) -> bool {
        self.state == ThreadState::Running
            && self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Information returned by the worker's `prepare`, available once started.
    pub fn info(&self) -> Option<&W::Info> {
        self.info.as_ref()
    }

    pub fn start(&mut self) -> Result<(), Error> {
        match self.state {
            ThreadState::Idle => {}
            ThreadState::Running => {
                log::debug!("{} is already running", self.name);
                return Ok(());
            }
            ThreadState::CancelRequested | ThreadState::Stopped => {
                return Err(Error::Stopped(self.name.clone()));
            }
        }

        let Some(mut worker) = self.worker.take() else {
            return Err(Error::Stopped(self.name.clone()));
        };

        let info = match worker.prepare(&self.token) {
            Ok(info) => info,
            Err(e) => {
                log::error!("{}: unable to start: {}", self.name, e);
                self.worker = Some(worker);
                return Err(e);
            }
        };

        let token = self.token.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                worker.run(&token);
                worker
            });

        match spawned {
            Ok(handle) => {
                log::debug!("{} started", self.name);
                self.handle = Some(handle);
                self.info = Some(info);
                self.state = ThreadState::Running;
                Ok(())
            }
            Err(e) => {
                // The worker was dropped together with the closure, releasing its resources.
                log::error!("{}: unable to spawn thread: {}", self.name, e);
                self.state = ThreadState::Stopped;
                Err(e.into())
            }
        }
    }

    pub fn cancel(&mut self) {
        match self.state {
            ThreadState::Idle => {
                if let Some(mut worker) = self.worker.take() {
                    worker.release();
                }
            }
            ThreadState::Running | ThreadState::CancelRequested => {
                self.state = ThreadState::CancelRequested;
                self.token.cancel();
                if let Some(handle) = self.handle.take() {
                    match handle.join() {
                        Ok(mut worker) => worker.release(),
                        Err(_) => log::error!("{} panicked", self.name),
                    }
                }
                log::debug!("{} stopped", self.name);
            }
            ThreadState::Stopped => return,
        }
        self.info = None;
        self.state = ThreadState::Stopped;
    }
}

impl<W: Worker> Drop for CancellableThread<W> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        prepared: AtomicUsize,
        iterations: AtomicUsize,
        released: AtomicUsize,
    }

    struct CountingWorker {
        counters: Arc<Counters>,
        fail_prepare: bool,
        holds_resource: bool,
    }

    impl CountingWorker {
        fn new(counters: &Arc<Counters>) -> CountingWorker {
            CountingWorker {
                counters: Arc::clone(counters),
                fail_prepare: false,
                holds_resource: false,
            }
        }
    }

    impl Worker for CountingWorker {
        type Info = u32;

        fn name(&self) -> String {
            "counting".to_string()
        }

        fn prepare(&mut self, _token: &CancelToken) -> Result<u32, Error> {
            if self.fail_prepare {
                return Err(Error::IoError(std::io::Error::other("no socket")));
            }
            self.counters.prepared.fetch_add(1, Ordering::SeqCst);
            self.holds_resource = true;
            Ok(7)
        }

        fn run(&mut self, token: &CancelToken) {
            while !token.is_cancelled() {
                self.counters.iterations.fetch_add(1, Ordering::SeqCst);
                token.sleep(Duration::from_millis(1));
            }
        }

        fn release(&mut self) {
            if self.holds_resource {
                self.holds_resource = false;
                self.counters.released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn start_then_cancel() {
        let counters = Arc::new(Counters::default());
        let mut thread = CancellableThread::new(CountingWorker::new(&counters));
        assert_eq!(thread.state(), ThreadState::Idle);

        thread.start().unwrap();
        assert_eq!(thread.state(), ThreadState::Running);
        assert_eq!(thread.info(), Some(&7));
        assert!(thread.is_running());

        thread.cancel();
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert!(thread.info().is_none());
    }

    #[test]
    fn start_is_idempotent() {
        let counters = Arc::new(Counters::default());
        let mut thread = CancellableThread::new(CountingWorker::new(&counters));
        thread.start().unwrap();
        thread.start().unwrap();
        assert_eq!(counters.prepared.load(Ordering::SeqCst), 1);
        thread.cancel();
    }

    #[test]
    fn cancel_is_idempotent_and_final() {
        let counters = Arc::new(Counters::default());
        let mut thread = CancellableThread::new(CountingWorker::new(&counters));
        thread.start().unwrap();
        thread.cancel();
        thread.cancel();
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert!(matches!(thread.start(), Err(Error::Stopped(_))));
        assert_eq!(thread.state(), ThreadState::Stopped);
    }

    #[test]
    fn cancel_without_start() {
        let counters = Arc::new(Counters::default());
        let mut thread = CancellableThread::new(CountingWorker::new(&counters));
        thread.cancel();
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert_eq!(counters.prepared.load(Ordering::SeqCst), 0);
        assert_eq!(counters.iterations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_prepare_stays_idle() {
        let counters = Arc::new(Counters::default());
        let mut worker = CountingWorker::new(&counters);
        worker.fail_prepare = true;
        let mut thread = CancellableThread::new(worker);
        assert!(thread.start().is_err());
        assert_eq!(thread.state(), ThreadState::Idle);
        assert!(!thread.is_running());
        thread.cancel();
        assert_eq!(counters.iterations.load(Ordering::SeqCst), 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_cancels() {
        let counters = Arc::new(Counters::default());
        {
            let mut thread = CancellableThread::new(CountingWorker::new(&counters));
            thread.start().unwrap();
        }
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}

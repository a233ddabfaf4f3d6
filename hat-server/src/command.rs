//! The command protocol served over [TcpRequestServer].
use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{Arc, mpsc::Sender},
};

use hat_protocol::{CommandRequest, Response, Verb};
use log::LevelFilter;

use crate::error::Error;
use crate::tcp::{RequestHandler, TcpConfig, TcpRequestServer};
use crate::worker::{CancellableThread, ThreadState};

/// Changes the level of the application log sink.
pub trait LogControl: Send + Sync {
    fn set_level(&self, level: LevelFilter);
}

/// Applies levels through [log::set_max_level].
#[derive(Copy, Clone, Debug, Default)]
pub struct MaxLevelControl;

impl LogControl for MaxLevelControl {
    fn set_level(&self, level: LevelFilter) {
        log::set_max_level(level);
    }
}

/// Maps the numeric wire level onto a filter. Values past `Error` switch logging off.
pub fn level_filter(level: i32) -> LevelFilter {
    match level {
        i32::MIN..=0 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        2 => LevelFilter::Info,
        3 => LevelFilter::Warn,
        4 => LevelFilter::Error,
        _ => LevelFilter::Off,
    }
}

/// A key press relayed to the node's console loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyboardInput {
    pub key: String,
    pub value: i32,
}

impl KeyboardInput {
    /// Input typed on the local console.
    pub fn console(line: impl Into<String>) -> KeyboardInput {
        KeyboardInput {
            key: line.into(),
            value: 0,
        }
    }
}

/// Destination of a `loglevel` request.
const APP_LOG: &str = "a";
const WORKER_LOG: &str = "w";

pub struct CommandHandler {
    log_control: Arc<dyn LogControl>,
    keyboard: Option<Sender<KeyboardInput>>,
    last_millis: i64,
}

impl Default for CommandHandler {
    fn default() -> Self {
        CommandHandler::new(Arc::new(MaxLevelControl))
    }
}

impl CommandHandler {
    pub fn new(log_control: Arc<dyn LogControl>) -> CommandHandler {
        CommandHandler {
            log_control,
            keyboard: None,
            last_millis: 0,
        }
    }

    /// Forwards accepted key presses to `keyboard`.
    pub fn with_keyboard(mut self, keyboard: Sender<KeyboardInput>) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn respond(&mut self, request: &CommandRequest) -> Response {
        match request.verb() {
            Verb::Keyboard => self.keyboard(request),
            Verb::LogLevel => self.log_level(request),
            Verb::Ping => Response::time(self.now_millis()),
            Verb::Unrecognized => {
                log::warn!("Unrecognized command: {}", request.command());
                Response::nak("Unrecognized command.")
            }
        }
    }

    fn keyboard(&mut self, request: &CommandRequest) -> Response {
        let args = request.arguments();
        let value = args.get_int("value").unwrap_or(0);
        if let (Some(key), Some(keyboard)) = (args.get("key"), &self.keyboard) {
            let input = KeyboardInput {
                key: key.to_string(),
                value,
            };
            if keyboard.send(input).is_err() {
                log::debug!("Console loop is gone, dropping key {}", key);
            }
        }
        Response::ack(format!("Key {} accepted.", value))
    }

    fn log_level(&mut self, request: &CommandRequest) -> Response {
        let args = request.arguments();
        let level = args.get_int("level").unwrap_or(0);
        match args.get("dest") {
            Some(dest @ (APP_LOG | WORKER_LOG)) => {
                if dest == APP_LOG {
                    self.log_control.set_level(level_filter(level));
                }
                log::info!("Log level for {} set to {}", dest, level);
                Response::ack(format!("Log level for {} set to {}.", dest, level))
            }
            _ => Response::nak(format!("Unrecognized command {}.", request.raw_args())),
        }
    }

    /// Wall clock in milliseconds, never smaller than a value returned before.
    fn now_millis(&mut self) -> i64 {
        self.last_millis = self.last_millis.max(chrono::Utc::now().timestamp_millis());
        self.last_millis
    }
}

impl RequestHandler for CommandHandler {
    fn handle(&mut self, line: &str, peer: SocketAddr, stream: &mut TcpStream) -> io::Result<()> {
        let request = CommandRequest::parse(line);
        let response = self.respond(&request);
        log::debug!("{} -> {}: {}", request, peer, response);
        response.write_to(stream)
    }
}

/// The node's command endpoint: a [TcpRequestServer] dispatching to a [CommandHandler].
pub struct CommandServer {
    thread: CancellableThread<TcpRequestServer<CommandHandler>>,
}

impl CommandServer {
    pub const NAME: &str = "command-server";

    pub fn new(handler: CommandHandler, config: TcpConfig) -> CommandServer {
        CommandServer {
            thread: CancellableThread::new(TcpRequestServer::new(Self::NAME, handler, config)),
        }
    }

    pub fn start(&mut self) -> Result<(), Error> {
        self.thread.start()
    }

    pub fn cancel(&mut self) {
        self.thread.cancel()
    }

    pub fn state(&self) -> ThreadState {
        self.thread.state()
    }

    /// The bound listening address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.thread.info().copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Mutex, mpsc};

    #[derive(Default)]
    struct RecordedLevels(Mutex<Vec<LevelFilter>>);

    impl LogControl for RecordedLevels {
        fn set_level(&self, level: LevelFilter) {
            self.0.lock().unwrap().push(level);
        }
    }

    fn respond(handler: &mut CommandHandler, line: &str) -> String {
        handler.respond(&CommandRequest::parse(line)).to_string()
    }

    #[test]
    fn keyboard_is_acknowledged_and_relayed() {
        let (tx, rx) = mpsc::channel();
        let mut handler = CommandHandler::default().with_keyboard(tx);
        assert_eq!(
            respond(&mut handler, "keyboard?key=b&value=3\r\n"),
            "ACK?response=Key 3 accepted."
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            KeyboardInput {
                key: "b".to_string(),
                value: 3
            }
        );
    }

    #[test]
    fn keyboard_without_value() {
        let mut handler = CommandHandler::default();
        assert_eq!(
            respond(&mut handler, "keyboard?key=S"),
            "ACK?response=Key 0 accepted."
        );
        assert_eq!(
            respond(&mut handler, "keyboard?key=S&value=x"),
            "ACK?response=Key 0 accepted."
        );
    }

    #[test]
    fn log_level_for_app_is_applied() {
        let levels = Arc::new(RecordedLevels::default());
        let mut handler = CommandHandler::new(levels.clone());
        assert_eq!(
            respond(&mut handler, "loglevel?dest=a&level=3"),
            "ACK?response=Log level for a set to 3."
        );
        assert_eq!(
            respond(&mut handler, "loglevel?dest=w&level=1"),
            "ACK?response=Log level for w set to 1."
        );
        assert_eq!(*levels.0.lock().unwrap(), vec![LevelFilter::Warn]);
    }

    #[test]
    fn log_level_with_unknown_dest_echoes_args() {
        let levels = Arc::new(RecordedLevels::default());
        let mut handler = CommandHandler::new(levels.clone());
        assert_eq!(
            respond(&mut handler, "loglevel?dest=x&level=3"),
            "NAK?response=Unrecognized command dest=x&level=3."
        );
        assert_eq!(
            respond(&mut handler, "loglevel"),
            "NAK?response=Unrecognized command ."
        );
        assert!(levels.0.lock().unwrap().is_empty());
    }

    #[test]
    fn ping_is_non_decreasing() {
        let mut handler = CommandHandler::default();
        handler.last_millis = i64::MAX - 1;
        let first = handler.respond(&CommandRequest::ping()).unix_millis().unwrap();
        let second = handler.respond(&CommandRequest::ping()).unix_millis().unwrap();
        assert_eq!(first, i64::MAX - 1);
        assert!(second >= first);
    }

    #[test]
    fn unknown_verb() {
        let mut handler = CommandHandler::default();
        assert_eq!(
            respond(&mut handler, "reboot?now=1"),
            "NAK?response=Unrecognized command."
        );
        assert_eq!(
            respond(&mut handler, ""),
            "NAK?response=Unrecognized command."
        );
    }

    #[test]
    fn level_mapping() {
        assert_eq!(level_filter(-4), LevelFilter::Trace);
        assert_eq!(level_filter(0), LevelFilter::Trace);
        assert_eq!(level_filter(2), LevelFilter::Info);
        assert_eq!(level_filter(4), LevelFilter::Error);
        assert_eq!(level_filter(5), LevelFilter::Off);
    }
}

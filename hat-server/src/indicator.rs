//! Status lights of the node.
use std::sync::Mutex;

use crate::acquisition::{ConnectionObserver, ConnectionState};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LightMode {
    Off,
    On,
    Flash,
    Sequence,
}

impl LightMode {
    /// Console digits `0` to `3`.
    pub fn from_digit(digit: &str) -> Option<LightMode> {
        match digit {
            "0" => Some(LightMode::Off),
            "1" => Some(LightMode::On),
            "2" => Some(LightMode::Flash),
            "3" => Some(LightMode::Sequence),
            _ => None,
        }
    }
}

pub fn mode_for_connection(state: ConnectionState) -> LightMode {
    match state {
        ConnectionState::New | ConnectionState::Connected => LightMode::Sequence,
        ConnectionState::PowerOn | ConnectionState::Disconnected => LightMode::Flash,
        ConnectionState::PowerOff => LightMode::Off,
    }
}

/// Drives the node's lights. Hardware drivers live outside this crate.
pub trait StatusIndicator: Send + Sync {
    fn set_mode(&self, mode: LightMode);
    fn mode(&self) -> LightMode;
}

/// An indicator without hardware that logs every mode change.
#[derive(Debug)]
pub struct LogIndicator {
    mode: Mutex<LightMode>,
}

impl Default for LogIndicator {
    fn default() -> Self {
        LogIndicator {
            mode: Mutex::new(LightMode::Off),
        }
    }
}

impl StatusIndicator for LogIndicator {
    fn set_mode(&self, mode: LightMode) {
        let mut current = self.mode.lock().unwrap_or_else(|e| e.into_inner());
        if *current != mode {
            log::info!("Lights {:?}", mode);
            *current = mode;
        }
    }

    fn mode(&self) -> LightMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConnectionObserver for LogIndicator {
    fn connection_changed(&self, state: ConnectionState) {
        self.set_mode(mode_for_connection(state));
    }
}

use std::{error::Error as StdError, fmt::Display, io};

use hat_protocol::error::ParseError;

use crate::acquisition::BoardError;

/// Errors raised while starting or running a worker.
#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Board(BoardError),
    Protocol(ParseError),
    /// The worker has been cancelled and cannot be started again.
    Stopped(String),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::IoError(value)
    }
}

impl From<BoardError> for Error {
    fn from(value: BoardError) -> Self {
        Error::Board(value)
    }
}

impl From<ParseError> for Error {
    fn from(value: ParseError) -> Self {
        Error::Protocol(value)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => write!(f, "{}", error),
            Error::Board(error) => write!(f, "{}", error),
            Error::Protocol(error) => write!(f, "{}", error),
            Error::Stopped(name) => write!(f, "Worker {} has already been stopped", name),
        }
    }
}

impl StdError for Error {}

use std::{
    error::Error,
    fmt::Display,
    io::{self},
    num::ParseIntError,
    str::Utf8Error,
};

/// Errors that may occur when reading a request, response or status datagram.
#[derive(Debug)]
pub enum ParseError {
    IoError(io::Error),
    /// The line did not follow the `<verb>?<key>=<value>&...` layout.
    InvalidFormat(String),
    /// The response did not start with `ACK?` or `NAK?`.
    InvalidResponsePrefix(String),
    /// A datagram carried a prefix other than `networkstatus`.
    UnexpectedDatagram(String),
    /// A required key was absent.
    MissingField(&'static str),
    InvalidStatus(serde_json::Error),
    LineTooLong { max: usize, got: usize },
}

impl From<io::Error> for ParseError {
    fn from(value: io::Error) -> Self {
        ParseError::IoError(value)
    }
}

impl From<Utf8Error> for ParseError {
    fn from(value: Utf8Error) -> Self {
        ParseError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl From<ParseIntError> for ParseError {
    fn from(value: ParseIntError) -> Self {
        ParseError::InvalidFormat(format!("Invalid integer: {}", value))
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        ParseError::InvalidStatus(value)
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::IoError(error) => write!(f, "{}", error),
            ParseError::InvalidFormat(format) => write!(f, "{}", format),
            ParseError::InvalidResponsePrefix(prefix) => {
                write!(f, "Received response with invalid prefix {}", prefix)
            }
            ParseError::UnexpectedDatagram(prefix) => {
                write!(f, "Received unexpected datagram {}", prefix)
            }
            ParseError::MissingField(field) => write!(f, "Missing field {}", field),
            ParseError::InvalidStatus(err) => write!(f, "Invalid status object: {}", err),
            ParseError::LineTooLong { max, got } => {
                write!(f, "Line too long! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ParseError {}

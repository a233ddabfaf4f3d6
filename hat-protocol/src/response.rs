use std::fmt::Display;
use std::io::{self, BufRead, Write};

use crate::codec::{read_line, strip_line_ending};
use crate::error::ParseError;

/// The body carried by an ACK or NAK line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// `response=<message>`. The message runs to the end of the line.
    Message(String),
    /// `time=<unix time in milliseconds>`
    Time(i64),
}

/// The single line a command server writes back for every request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Ack(Payload),
    Nak(Payload),
}

impl Response {
    const ACK: &str = "ACK";
    const NAK: &str = "NAK";
    const MESSAGE_KEY: &str = "response=";
    const TIME_KEY: &str = "time=";

    pub fn ack(message: impl Into<String>) -> Response {
        Response::Ack(Payload::Message(message.into()))
    }

    pub fn nak(message: impl Into<String>) -> Response {
        Response::Nak(Payload::Message(message.into()))
    }

    pub fn time(unix_millis: i64) -> Response {
        Response::Ack(Payload::Time(unix_millis))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack(_))
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Response::Ack(payload) | Response::Nak(payload) => payload,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self.payload() {
            Payload::Message(message) => Some(message),
            Payload::Time(_) => None,
        }
    }

    pub fn unix_millis(&self) -> Option<i64> {
        match self.payload() {
            Payload::Time(millis) => Some(*millis),
            Payload::Message(_) => None,
        }
    }

    pub fn parse(line: &str) -> Result<Response, ParseError> {
        let line = strip_line_ending(line);
        let (prefix, body) = line
            .split_once('?')
            .ok_or_else(|| ParseError::InvalidResponsePrefix(line.to_string()))?;

        let payload = if let Some(message) = body.strip_prefix(Self::MESSAGE_KEY) {
            Payload::Message(message.to_string())
        } else if let Some(time) = body.strip_prefix(Self::TIME_KEY) {
            Payload::Time(time.parse()?)
        } else {
            return Err(ParseError::InvalidFormat(format!(
                "Unknown response body {}",
                body
            )));
        };

        match prefix {
            Self::ACK => Ok(Response::Ack(payload)),
            Self::NAK => Ok(Response::Nak(payload)),
            other => Err(ParseError::InvalidResponsePrefix(other.to_string())),
        }
    }

    pub fn from_reader(reader: &mut impl BufRead, max_len: usize) -> Result<Response, ParseError> {
        let line = read_line(reader, max_len)?;
        Response::parse(&line)
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(writer, "{}", self)
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self {
            Response::Ack(_) => Self::ACK,
            Response::Nak(_) => Self::NAK,
        };
        match self.payload() {
            Payload::Message(message) => write!(f, "{}?{}{}", prefix, Self::MESSAGE_KEY, message),
            Payload::Time(millis) => write!(f, "{}?{}{}", prefix, Self::TIME_KEY, millis),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_ack() {
        let mut out = Vec::new();
        Response::ack("Key 3 accepted.").write_to(&mut out).unwrap();
        assert_eq!(out, b"ACK?response=Key 3 accepted.\n".to_vec());
    }

    #[test]
    fn write_time() {
        assert_eq!(
            Response::time(1700000000123).to_string(),
            "ACK?time=1700000000123"
        );
    }

    #[test]
    fn read_nak_with_delimiters_in_message() {
        let response =
            Response::parse("NAK?response=Unrecognized command dest=x&level=3.\r\n").unwrap();
        assert!(!response.is_ack());
        assert_eq!(
            response.message(),
            Some("Unrecognized command dest=x&level=3.")
        );
    }

    #[test]
    fn read_time() {
        let response = Response::parse("ACK?time=42\n").unwrap();
        assert!(response.is_ack());
        assert_eq!(response.unix_millis(), Some(42));
        assert_eq!(response.message(), None);
    }

    #[test]
    fn invalid_prefix() {
        match Response::parse("OK?response=fine") {
            Err(ParseError::InvalidResponsePrefix(p)) => assert_eq!(p, "OK"),
            other => panic!("expected InvalidResponsePrefix, got {:?}", other),
        }
        assert!(matches!(
            Response::parse("ACK"),
            Err(ParseError::InvalidResponsePrefix(_))
        ));
    }

    #[test]
    fn invalid_time() {
        assert!(matches!(
            Response::parse("ACK?time=soon"),
            Err(ParseError::InvalidFormat(_))
        ));
    }
}

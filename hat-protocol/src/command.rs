use std::fmt::Display;
use std::io::{self, BufRead, Write};

use crate::codec::{read_line, strip_line_ending};
use crate::error::ParseError;

/// Separates the verb from its argument string.
pub const COMMAND_DELIMITER: char = '?';
/// Separates a key from its value inside the argument string.
pub const VALUE_DELIMITER: char = '=';
/// Separates key-value pairs inside the argument string.
pub const PAIR_DELIMITER: char = '&';

/// The verbs understood by the command server.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verb {
    /// Relays a key press to the node's console.
    Keyboard,
    /// Changes the log level of one of the node's log sinks.
    LogLevel,
    /// Returns the node's wall clock in milliseconds.
    Ping,
    Unrecognized,
}

impl Verb {
    const KEYBOARD: &str = "keyboard";
    const LOG_LEVEL: &str = "loglevel";
    const PING: &str = "ping";

    pub fn from_command(command: &str) -> Verb {
        match command {
            Self::KEYBOARD => Verb::Keyboard,
            Self::LOG_LEVEL => Verb::LogLevel,
            Self::PING => Verb::Ping,
            _ => Verb::Unrecognized,
        }
    }
}

/// One line of command input: `<command>?<raw_args>`.
///
/// The argument string is kept verbatim so that rejections can echo it back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRequest {
    command: String,
    raw_args: String,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, raw_args: impl Into<String>) -> CommandRequest {
        CommandRequest {
            command: command.into(),
            raw_args: raw_args.into(),
        }
    }

    pub fn ping() -> CommandRequest {
        CommandRequest::new(Verb::PING, "")
    }

    pub fn keyboard(key: &str, value: i32) -> CommandRequest {
        CommandRequest::new(Verb::KEYBOARD, format!("key={}&value={}", key, value))
    }

    pub fn log_level(dest: &str, level: i32) -> CommandRequest {
        CommandRequest::new(Verb::LOG_LEVEL, format!("dest={}&level={}", dest, level))
    }

    /// Splits a line at the first `?`. Trailing CR/LF characters are ignored.
    pub fn parse(line: &str) -> CommandRequest {
        let line = strip_line_ending(line);
        match line.split_once(COMMAND_DELIMITER) {
            Some((command, args)) => CommandRequest::new(command, args),
            None => CommandRequest::new(line, ""),
        }
    }

    pub fn from_reader(
        reader: &mut impl BufRead,
        max_len: usize,
    ) -> Result<CommandRequest, ParseError> {
        let line = read_line(reader, max_len)?;
        Ok(CommandRequest::parse(&line))
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(writer, "{}", self)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn raw_args(&self) -> &str {
        &self.raw_args
    }

    pub fn verb(&self) -> Verb {
        Verb::from_command(&self.command)
    }

    pub fn arguments(&self) -> Arguments<'_> {
        Arguments::parse(&self.raw_args)
    }
}

impl Display for CommandRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.raw_args.is_empty() {
            write!(f, "{}", self.command)
        } else {
            write!(f, "{}{}{}", self.command, COMMAND_DELIMITER, self.raw_args)
        }
    }
}

/// Key-value view of an argument string `k1=v1&k2=v2`.
///
/// Pairs without a `=` are kept with an empty value. Lookups return the first match.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Arguments<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Arguments<'a> {
    pub fn parse(args: &'a str) -> Arguments<'a> {
        let pairs = strip_line_ending(args)
            .split(PAIR_DELIMITER)
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once(VALUE_DELIMITER).unwrap_or((pair, "")))
            .collect();
        Arguments { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

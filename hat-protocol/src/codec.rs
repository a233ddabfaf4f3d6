/// Line framing shared by requests and responses
use std::io::{self, BufRead, Read};

use crate::error::ParseError;

/// Removes any trailing `\r` and `\n` characters.
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Reads one `\n` terminated line of at most `max_len` bytes.
///
/// A final line without terminator is accepted at end of stream.
pub fn read_line(reader: &mut impl BufRead, max_len: usize) -> Result<String, ParseError> {
    let mut line = Vec::with_capacity(64);
    let read = reader
        .by_ref()
        .take(max_len as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if read == 0 {
        return Err(ParseError::IoError(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Stream closed before a line was received",
        )));
    }
    if line.last() != Some(&b'\n') && line.len() > max_len {
        return Err(ParseError::LineTooLong {
            max: max_len,
            got: line.len(),
        });
    }
    Ok(strip_line_ending(str::from_utf8(&line)?).to_string())
}

#[cfg(feature = "tokio")]
pub use framed::{RequestCodec, ResponseCodec};

#[cfg(feature = "tokio")]
mod framed {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::strip_line_ending;
    use crate::{CommandRequest, Response, error::ParseError};

    const DEFAULT_MAX_LINE_LEN: usize = 4096;

    fn decode_line(src: &mut BytesMut, max_len: usize) -> Result<Option<String>, ParseError> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) if pos > max_len => Err(ParseError::LineTooLong {
                max: max_len,
                got: pos,
            }),
            Some(pos) => {
                let line = src.split_to(pos + 1);
                Ok(Some(strip_line_ending(str::from_utf8(&line)?).to_string()))
            }
            None if src.len() > max_len => Err(ParseError::LineTooLong {
                max: max_len,
                got: src.len(),
            }),
            None => Ok(None),
        }
    }

    fn encode_line(line: String, dst: &mut BytesMut) {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
    }

    /// Frames [CommandRequest]s, one per line.
    #[derive(Clone, Debug)]
    pub struct RequestCodec {
        max_len: usize,
    }

    impl RequestCodec {
        pub fn new(max_len: usize) -> RequestCodec {
            RequestCodec { max_len }
        }
    }

    impl Default for RequestCodec {
        fn default() -> Self {
            RequestCodec::new(DEFAULT_MAX_LINE_LEN)
        }
    }

    impl Decoder for RequestCodec {
        type Item = CommandRequest;
        type Error = ParseError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<CommandRequest>, ParseError> {
            let line = decode_line(src, self.max_len)?;
            Ok(line.map(|line| CommandRequest::parse(&line)))
        }
    }

    impl Encoder<CommandRequest> for RequestCodec {
        type Error = ParseError;

        fn encode(&mut self, item: CommandRequest, dst: &mut BytesMut) -> Result<(), ParseError> {
            encode_line(item.to_string(), dst);
            Ok(())
        }
    }

    /// Frames [Response]s, one per line.
    #[derive(Clone, Debug)]
    pub struct ResponseCodec {
        max_len: usize,
    }

    impl ResponseCodec {
        pub fn new(max_len: usize) -> ResponseCodec {
            ResponseCodec { max_len }
        }
    }

    impl Default for ResponseCodec {
        fn default() -> Self {
            ResponseCodec::new(DEFAULT_MAX_LINE_LEN)
        }
    }

    impl Decoder for ResponseCodec {
        type Item = Response;
        type Error = ParseError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ParseError> {
            decode_line(src, self.max_len)?
                .map(|line| Response::parse(&line))
                .transpose()
        }

        fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ParseError> {
            match self.decode(src)? {
                Some(response) => Ok(Some(response)),
                None if src.is_empty() => Ok(None),
                None => {
                    let rest = src.split();
                    Response::parse(str::from_utf8(&rest)?).map(Some)
                }
            }
        }
    }

    impl Encoder<Response> for ResponseCodec {
        type Error = ParseError;

        fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), ParseError> {
            encode_line(item.to_string(), dst);
            Ok(())
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn decode_partial_then_complete() {
            let mut codec = ResponseCodec::default();
            let mut buf = BytesMut::from(&b"ACK?time="[..]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(b"17\r\nNAK?");
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(Response::time(17)));
            assert_eq!(&buf[..], b"NAK?");
        }

        #[test]
        fn decode_eof_without_newline() {
            let mut codec = ResponseCodec::default();
            let mut buf = BytesMut::from(&b"NAK?response=Unrecognized command."[..]);
            assert_eq!(
                codec.decode_eof(&mut buf).unwrap(),
                Some(Response::nak("Unrecognized command."))
            );
        }

        #[test]
        fn encode_request() {
            let mut codec = RequestCodec::default();
            let mut buf = BytesMut::new();
            codec.encode(CommandRequest::keyboard("b", 1), &mut buf).unwrap();
            assert_eq!(&buf[..], b"keyboard?key=b&value=1\n");
            assert_eq!(
                codec.decode(&mut buf).unwrap(),
                Some(CommandRequest::keyboard("b", 1))
            );
        }

        #[test]
        fn reject_long_lines() {
            let mut codec = RequestCodec::new(8);
            let mut buf = BytesMut::from(&b"keyboard?key=b"[..]);
            assert!(matches!(
                codec.decode(&mut buf),
                Err(ParseError::LineTooLong { max: 8, .. })
            ));
        }
    }
}

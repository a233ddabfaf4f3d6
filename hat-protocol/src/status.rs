use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::codec::strip_line_ending;
use crate::error::ParseError;

/// Snapshot of a node's identity and acquisition state.
///
/// A fresh snapshot is built for every broadcast tick. Keys on the wire are
/// fixed by the status clients, so every field is renamed explicitly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "hostName")]
    pub host_name: String,
    #[serde(rename = "eth0Address")]
    pub eth0_address: String,
    #[serde(rename = "wlan0Address")]
    pub wlan0_address: String,
    #[serde(rename = "wlan0Mode")]
    pub wlan0_mode: String,
    #[serde(rename = "logPort")]
    pub log_port: u16,
    #[serde(rename = "recordingDataBrainHat")]
    pub is_recording: bool,
    #[serde(rename = "recordingFileNameBrainHat")]
    pub recording_file_name: String,
    /// Elapsed recording time in seconds
    #[serde(rename = "recordingDurationBrainHat")]
    pub recording_duration_seconds: f64,
    #[serde(rename = "boardId")]
    pub board_id: i32,
    #[serde(rename = "sampleRate")]
    pub sample_rate: i32,
    #[serde(rename = "cytonSRB1")]
    pub srb1_cyton: bool,
    #[serde(rename = "daisySRB1")]
    pub srb1_daisy: bool,
    #[serde(rename = "isStreaming")]
    pub is_streaming: bool,
    #[serde(rename = "unixTimeMillis")]
    pub unix_time_millis: i64,
}

/// A status datagram: `networkstatus?hostname=<host>&status=<json>\n`
#[derive(Clone, Debug, PartialEq)]
pub struct StatusDatagram {
    pub hostname: String,
    pub status: NodeStatus,
}

impl StatusDatagram {
    const PREFIX: &str = "networkstatus";
    const HOSTNAME_KEY: &str = "hostname=";
    const STATUS_KEY: &str = "&status=";

    /// Wraps a status, using its host name as the datagram's `hostname` field.
    pub fn new(status: NodeStatus) -> StatusDatagram {
        StatusDatagram {
            hostname: status.host_name.clone(),
            status,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}?{}{}{}{}\n",
            Self::PREFIX,
            Self::HOSTNAME_KEY,
            self.hostname,
            Self::STATUS_KEY,
            serde_json::to_string(&self.status)?
        ))
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let line = self.encode().map_err(io::Error::other)?;
        writer.write_all(line.as_bytes())
    }

    pub fn parse(line: &str) -> Result<StatusDatagram, ParseError> {
        let line = strip_line_ending(line);
        let (prefix, body) = line
            .split_once('?')
            .ok_or_else(|| ParseError::UnexpectedDatagram(line.to_string()))?;
        if prefix != Self::PREFIX {
            return Err(ParseError::UnexpectedDatagram(prefix.to_string()));
        }

        let body = body
            .strip_prefix(Self::HOSTNAME_KEY)
            .ok_or(ParseError::MissingField("hostname"))?;
        let (hostname, json) = body
            .split_once(Self::STATUS_KEY)
            .ok_or(ParseError::MissingField("status"))?;

        Ok(StatusDatagram {
            hostname: hostname.to_string(),
            status: serde_json::from_str(json)?,
        })
    }

    pub fn from_bytes(datagram: &[u8]) -> Result<StatusDatagram, ParseError> {
        StatusDatagram::parse(str::from_utf8(datagram)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const REQUIRED_KEYS: [&str; 14] = [
        "hostName",
        "eth0Address",
        "wlan0Address",
        "wlan0Mode",
        "logPort",
        "recordingDataBrainHat",
        "recordingFileNameBrainHat",
        "recordingDurationBrainHat",
        "boardId",
        "sampleRate",
        "cytonSRB1",
        "daisySRB1",
        "isStreaming",
        "unixTimeMillis",
    ];

    fn recording_status() -> NodeStatus {
        NodeStatus {
            host_name: "brainhat-01".to_string(),
            eth0_address: "192.168.1.20".to_string(),
            is_recording: true,
            recording_file_name: "alpha_101512.txt".to_string(),
            recording_duration_seconds: 12.5,
            board_id: 0,
            sample_rate: 250,
            srb1_cyton: true,
            is_streaming: true,
            unix_time_millis: 1_700_000_000_000,
            ..NodeStatus::default()
        }
    }

    #[test]
    fn encoded_datagram_layout() {
        let line = StatusDatagram::new(recording_status()).encode().unwrap();
        let prefix = "networkstatus?hostname=brainhat-01&status={";
        assert!(line.starts_with(prefix));
        assert!(line.ends_with("}\n"));
    }

    #[test]
    fn default_status_has_all_keys() {
        let json = serde_json::to_value(NodeStatus::default()).unwrap();
        let object = json.as_object().unwrap();
        for key in REQUIRED_KEYS {
            assert!(object.contains_key(key), "missing key {}", key);
        }
        assert_eq!(object.len(), REQUIRED_KEYS.len());
    }

    #[test]
    fn parse_encoded_datagram() {
        let datagram = StatusDatagram::new(recording_status());
        let parsed = StatusDatagram::parse(&datagram.encode().unwrap()).unwrap();
        assert_eq!(parsed, datagram);
    }

    #[test]
    fn parse_rejects_missing_keys() {
        let line = r#"networkstatus?hostname=h&status={"hostName":"h"}"#;
        assert!(matches!(
            StatusDatagram::parse(line),
            Err(ParseError::InvalidStatus(_))
        ));
    }

    #[test]
    fn parse_rejects_other_datagrams() {
        match StatusDatagram::parse("networkdata?hostname=h&status={}") {
            Err(ParseError::UnexpectedDatagram(p)) => assert_eq!(p, "networkdata"),
            other => panic!("expected UnexpectedDatagram, got {:?}", other),
        }
        assert!(matches!(
            StatusDatagram::parse("networkstatus?status={}"),
            Err(ParseError::MissingField("hostname"))
        ));
    }
}

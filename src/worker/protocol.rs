//! Line framing of worker output.
//!
//! stdout lines start with a three-character tag and a space:
//!
//! | Tag   | Payload                                   |
//! |-------|-------------------------------------------|
//! | `STA` | free status text                          |
//! | `DAT` | `[time, voltage, current]`                |
//! | `POR` | port the device was found on              |
//! | `REL` | `{"relay": "stirrer", "state": true}`     |
//!
//! Any other stdout line is a final payload: the data-stripped document for
//! read/save/overwrite, a run summary for run, and one `[run_id, rep_id]`
//! success marker per exported replicate for export.
//!
//! A stderr line that parses as `[run_id, rep_id]` is a failed export task;
//! anything else is a fatal, user-facing message.

use std::io::{self, Stderr, Stdout, Write};

use serde::{Deserialize, Serialize};

use super::OperationKind;
use crate::error::{WorkerError, WorkerResult};
use crate::store::{DataPoint, Relay, TaskId};

const STATUS_TAG: &str = "STA";
const DATA_TAG: &str = "DAT";
const PORT_TAG: &str = "POR";
const RELAY_TAG: &str = "REL";

/// Output stream of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// One decoded worker line.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Progress or log text.
    Status(String),
    /// One telemetry sample.
    Telemetry(DataPoint),
    /// Port the device answered on.
    PortInfo(String),
    /// A relay was switched.
    RelayState { relay: Relay, state: bool },
    /// Outcome of one export task: `Ok` on stdout, `Err` on stderr.
    TaskResult(Result<TaskId, TaskId>),
    /// Serialized final payload.
    Final(String),
    /// The whole operation failed.
    Fatal(String),
}

#[derive(Serialize, Deserialize)]
struct RelayFrame {
    relay: Relay,
    state: bool,
}

impl WorkerMessage {
    /// Stream this message is written to.
    pub fn channel(&self) -> Channel {
        match self {
            WorkerMessage::TaskResult(Err(_)) | WorkerMessage::Fatal(_) => Channel::Stderr,
            _ => Channel::Stdout,
        }
    }

    /// Encode as a single line without the trailing newline.
    pub fn encode(&self) -> serde_json::Result<String> {
        let line = match self {
            WorkerMessage::Status(text) => format!("{} {}", STATUS_TAG, single_line(text)),
            WorkerMessage::Telemetry(point) => {
                format!("{} {}", DATA_TAG, serde_json::to_string(point)?)
            }
            WorkerMessage::PortInfo(port) => format!("{} {}", PORT_TAG, single_line(port)),
            WorkerMessage::RelayState { relay, state } => format!(
                "{} {}",
                RELAY_TAG,
                serde_json::to_string(&RelayFrame {
                    relay: *relay,
                    state: *state
                })?
            ),
            WorkerMessage::TaskResult(Ok(task)) | WorkerMessage::TaskResult(Err(task)) => {
                serde_json::to_string(task)?
            }
            WorkerMessage::Final(payload) => single_line(payload),
            WorkerMessage::Fatal(text) => single_line(text),
        };
        Ok(line)
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Decode one stdout line of a worker performing `kind`.
///
/// Unprefixed lines are export success markers for export workers and the
/// final payload for every other operation.
pub fn decode_stdout(kind: OperationKind, line: &str) -> WorkerResult<WorkerMessage> {
    let (tag, rest) = match (line.get(..3), line.get(3..)) {
        (Some(tag), Some(rest)) if rest.is_empty() || rest.starts_with(' ') => {
            (tag, rest.strip_prefix(' ').unwrap_or(rest))
        }
        _ => ("", line),
    };

    let message = match tag {
        STATUS_TAG => WorkerMessage::Status(rest.to_string()),
        DATA_TAG => WorkerMessage::Telemetry(
            serde_json::from_str(rest).map_err(|e| malformed(DATA_TAG, e))?,
        ),
        PORT_TAG => WorkerMessage::PortInfo(rest.to_string()),
        RELAY_TAG => {
            let frame: RelayFrame =
                serde_json::from_str(rest).map_err(|e| malformed(RELAY_TAG, e))?;
            WorkerMessage::RelayState {
                relay: frame.relay,
                state: frame.state,
            }
        }
        _ if kind == OperationKind::Export => WorkerMessage::TaskResult(Ok(
            serde_json::from_str(line).map_err(|e| malformed("export marker", e))?,
        )),
        _ => WorkerMessage::Final(line.to_string()),
    };
    Ok(message)
}

/// Decode one stderr line.
pub fn decode_stderr(line: &str) -> WorkerMessage {
    match serde_json::from_str::<TaskId>(line) {
        Ok(task) => WorkerMessage::TaskResult(Err(task)),
        Err(_) => WorkerMessage::Fatal(line.to_string()),
    }
}

fn malformed(what: &str, e: serde_json::Error) -> WorkerError {
    WorkerError::Protocol {
        message: format!("malformed {} line: {}", what, e),
    }
}

/// Destination for worker messages.
pub trait FrameSink {
    fn emit(&mut self, message: WorkerMessage) -> io::Result<()>;
}

impl FrameSink for Vec<WorkerMessage> {
    fn emit(&mut self, message: WorkerMessage) -> io::Result<()> {
        self.push(message);
        Ok(())
    }
}

/// Writes encoded messages to a pair of output streams, one line each.
pub struct FrameWriter<O, E> {
    out: O,
    err: E,
}

impl FrameWriter<Stdout, Stderr> {
    /// Frame writer over the process's own stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> FrameWriter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    /// Recover the underlying streams.
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

impl<O: Write, E: Write> FrameSink for FrameWriter<O, E> {
    fn emit(&mut self, message: WorkerMessage) -> io::Result<()> {
        let line = message.encode().map_err(io::Error::other)?;
        let stream: &mut dyn Write = match message.channel() {
            Channel::Stdout => &mut self.out,
            Channel::Stderr => &mut self.err,
        };
        writeln!(stream, "{}", line)?;
        stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prefixed_lines_decode() {
        assert_eq!(
            decode_stdout(OperationKind::Run, "STA Connecting").unwrap(),
            WorkerMessage::Status("Connecting".to_string())
        );
        assert_eq!(
            decode_stdout(OperationKind::Run, "DAT [0.1,-0.5,12.25]").unwrap(),
            WorkerMessage::Telemetry(DataPoint::new(0.1, -0.5, 12.25))
        );
        assert_eq!(
            decode_stdout(OperationKind::Run, "POR /dev/ttyACM0").unwrap(),
            WorkerMessage::PortInfo("/dev/ttyACM0".to_string())
        );
        assert_eq!(
            decode_stdout(
                OperationKind::Run,
                r#"REL {"relay":"vibrator","state":false}"#
            )
            .unwrap(),
            WorkerMessage::RelayState {
                relay: Relay::Vibrator,
                state: false
            }
        );
    }

    #[test]
    fn test_unprefixed_line_depends_on_operation() {
        let line = r#"["run-1","rep-0"]"#;
        assert_eq!(
            decode_stdout(OperationKind::Export, line).unwrap(),
            WorkerMessage::TaskResult(Ok(TaskId::new("run-1", "rep-0")))
        );
        assert_eq!(
            decode_stdout(OperationKind::Read, r#"{"name":"x"}"#).unwrap(),
            WorkerMessage::Final(r#"{"name":"x"}"#.to_string())
        );
    }

    #[test]
    fn test_tag_requires_separator() {
        // a document starting with a tag-like word is still a final payload
        assert_eq!(
            decode_stdout(OperationKind::Read, "STAR").unwrap(),
            WorkerMessage::Final("STAR".to_string())
        );
    }

    #[test]
    fn test_malformed_telemetry_is_protocol_error() {
        assert!(matches!(
            decode_stdout(OperationKind::Run, "DAT [1,2]"),
            Err(WorkerError::Protocol { .. })
        ));
    }

    #[test]
    fn test_stderr_classification() {
        assert_eq!(
            decode_stderr(r#"["run-2","rep-1"]"#),
            WorkerMessage::TaskResult(Err(TaskId::new("run-2", "rep-1")))
        );
        assert_eq!(
            decode_stderr("Corrupt sample file: missing key 'runs'"),
            WorkerMessage::Fatal("Corrupt sample file: missing key 'runs'".to_string())
        );
    }

    #[test]
    fn test_frame_writer_routes_channels() {
        let mut writer = FrameWriter::new(Vec::new(), Vec::new());
        writer
            .emit(WorkerMessage::Telemetry(DataPoint::new(0.5, 1.0, 2.0)))
            .unwrap();
        writer
            .emit(WorkerMessage::TaskResult(Ok(TaskId::new("run-1", "rep-0"))))
            .unwrap();
        writer
            .emit(WorkerMessage::TaskResult(Err(TaskId::new("run-1", "rep-1"))))
            .unwrap();
        writer
            .emit(WorkerMessage::Fatal("disk full\nretry".to_string()))
            .unwrap();

        let (out, err) = writer.into_inner();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "DAT [0.5,1.0,2.0]\n[\"run-1\",\"rep-0\"]\n"
        );
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "[\"run-1\",\"rep-1\"]\ndisk full retry\n"
        );
    }

    #[test]
    fn test_every_message_decodes_back() {
        let messages = vec![
            WorkerMessage::Status("Configured".to_string()),
            WorkerMessage::Telemetry(DataPoint::new(1.25, -0.3, 4.0e-3)),
            WorkerMessage::PortInfo("COM3".to_string()),
            WorkerMessage::RelayState {
                relay: Relay::Stirrer,
                state: true,
            },
        ];
        for message in messages {
            let line = message.encode().unwrap();
            assert_eq!(decode_stdout(OperationKind::Run, &line).unwrap(), message);
        }
    }
}

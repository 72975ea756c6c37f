//! Output streaming pipeline.
//!
//! One reader task per stream drains the child's stdout or stderr and
//! forwards each line to the supervisor's control task. A read error ends
//! that reader only; the sibling stream keeps flowing.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::supervisor::ProcessId;

/// Which standard stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Identifies one run of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTag {
    pub process_id: ProcessId,
    pub generation: u64,
}

impl RunTag {
    #[must_use]
    pub fn message(self, event: RunEvent) -> RunMessage {
        RunMessage { tag: self, event }
    }
}

/// Something that happened to a running child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Output { stream: StreamKind, chunk: String },
    StreamFailed { stream: StreamKind, error: String },
    /// The child is gone and both readers have finished.
    Exited {
        exit_code: Option<i32>,
        requested: bool,
    },
}

/// A [`RunEvent`] tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMessage {
    pub tag: RunTag,
    pub event: RunEvent,
}

/// Decode a raw line: lossy UTF-8, trailing `\n`/`\r\n` removed.
#[must_use]
pub fn decode_chunk(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Drain `reader` line by line until end-of-stream or a read error.
///
/// Returns early if the receiving side of `sink` has gone away.
pub async fn read_stream<R>(reader: R, stream: StreamKind, tag: RunTag, sink: UnboundedSender<RunMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let chunk = decode_chunk(&buf);
                if sink
                    .send(tag.message(RunEvent::Output { stream, chunk }))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    process_id = %tag.process_id,
                    %stream,
                    error = %e,
                    "Stream read failed"
                );
                let _ = sink.send(tag.message(RunEvent::StreamFailed {
                    stream,
                    error: e.to_string(),
                }));
                break;
            }
        }
    }

    tracing::trace!(process_id = %tag.process_id, %stream, "Stream reader finished");
}

/// Spawn a reader task for one stream.
pub fn spawn_reader<R>(
    reader: R,
    stream: StreamKind,
    tag: RunTag,
    sink: UnboundedSender<RunMessage>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_stream(reader, stream, tag, sink))
}

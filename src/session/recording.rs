use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ShellStream;
use crate::error::ConnectError;

/// Placeholder written to transcripts in place of a credential.
pub const REDACTED: &str = "<redacted>";

/// How much of a session is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    Off,
    /// Connection lifecycle and writes only.
    KeyEventsOnly,
    /// Everything, including every received chunk.
    #[default]
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected { device_addr: String },
    /// Text written to the device. Credentials are stored as [`REDACTED`].
    Sent { data: String },
    Received { data: String },
    Closed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// In-memory session recorder; clones share the same buffer.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self::with_entries(level, Vec::new())
    }

    fn with_entries(level: SessionRecordLevel, entries: Vec<SessionRecordEntry>) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn buffer(&self) -> Result<MutexGuard<'_, Vec<SessionRecordEntry>>, ConnectError> {
        self.entries
            .lock()
            .map_err(|_| ConnectError::InternalServerError("session recorder poisoned".to_string()))
    }

    /// Appends `event` unless the recording level filters it out.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        let wanted = match self.level {
            SessionRecordLevel::Off => false,
            SessionRecordLevel::KeyEventsOnly => !matches!(event, SessionEvent::Received { .. }),
            SessionRecordLevel::Full => true,
        };
        if wanted {
            self.buffer()?.push(SessionRecordEntry {
                ts_ms: now_ms(),
                event,
            });
        }
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        Ok(self.buffer()?.clone())
    }

    pub fn clear(&self) -> Result<(), ConnectError> {
        self.buffer()?.clear();
        Ok(())
    }

    /// One JSON object per line, oldest first.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let lines = self
            .buffer()?
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::InternalServerError(format!("transcript encode: {e}")))?;
        Ok(lines.join("\n"))
    }

    /// Loads a transcript written by [`Self::to_jsonl`]; blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let entries = jsonl
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    ConnectError::InternalServerError(format!("transcript line {}: {e}", n + 1))
                })
            })
            .collect::<Result<Vec<SessionRecordEntry>, _>>()?;
        Ok(Self::with_entries(SessionRecordLevel::Full, entries))
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// The most recent session recorded for each device.
///
/// Every session records into its own [`SessionRecorder`], so concurrent
/// devices never share a transcript. Storing a session replaces the
/// previous one for that address, which bounds the log by fleet size.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    level: SessionRecordLevel,
    latest: Arc<Mutex<BTreeMap<String, SessionRecorder>>>,
}

impl TranscriptLog {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            latest: Arc::default(),
        }
    }

    /// A fresh recorder for one session at this log's level.
    pub fn session(&self) -> SessionRecorder {
        SessionRecorder::new(self.level)
    }

    fn sessions(&self) -> Result<MutexGuard<'_, BTreeMap<String, SessionRecorder>>, ConnectError> {
        self.latest
            .lock()
            .map_err(|_| ConnectError::InternalServerError("transcript log poisoned".to_string()))
    }

    pub fn store(&self, device_addr: &str, recorder: SessionRecorder) -> Result<(), ConnectError> {
        trace!("{device_addr}: keeping latest transcript");
        self.sessions()?.insert(device_addr.to_string(), recorder);
        Ok(())
    }

    pub fn latest(&self, device_addr: &str) -> Result<Option<SessionRecorder>, ConnectError> {
        Ok(self.sessions()?.get(device_addr).cloned())
    }

    /// Addresses with a stored session, in sorted order.
    pub fn devices(&self) -> Result<Vec<String>, ConnectError> {
        Ok(self.sessions()?.keys().cloned().collect())
    }
}

/// A [`ShellStream`] that plays a recorded transcript back.
///
/// Every write must match the next recorded `sent` event; a recorded
/// [`REDACTED`] write matches any credential. Reads return the recorded
/// `received` chunks in order and end the stream at `closed` or at the end
/// of the transcript.
#[derive(Debug, Clone)]
pub struct TranscriptStream {
    events: VecDeque<SessionEvent>,
    writes: Vec<String>,
}

impl TranscriptStream {
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, ConnectError> {
        let events = recorder
            .entries()?
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| !matches!(event, SessionEvent::Connected { .. }))
            .collect();
        Ok(Self {
            events,
            writes: Vec::new(),
        })
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        Self::from_recorder(&SessionRecorder::from_jsonl(jsonl)?)
    }

    /// Writes accepted so far, as the automaton sent them.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Whether every recorded event was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.events
            .iter()
            .all(|event| matches!(event, SessionEvent::Closed { .. }))
    }
}

impl ShellStream for TranscriptStream {
    async fn send(&mut self, data: &str) -> Result<(), ConnectError> {
        match self.events.pop_front() {
            Some(SessionEvent::Sent { data: expected }) if expected == REDACTED || expected == data => {
                trace!("replay accepted write {data:?}");
                self.writes.push(data.to_string());
                Ok(())
            }
            Some(SessionEvent::Sent { data: expected }) => Err(ConnectError::ReplayMismatchError(
                format!("expected write {expected:?}, got {data:?}"),
            )),
            Some(other) => Err(ConnectError::ReplayMismatchError(format!(
                "unexpected write {data:?} while transcript holds {other:?}"
            ))),
            None => Err(ConnectError::ReplayMismatchError(format!(
                "write {data:?} after end of transcript"
            ))),
        }
    }

    async fn recv(&mut self) -> Result<Option<String>, ConnectError> {
        match self.events.front() {
            Some(SessionEvent::Received { .. }) => match self.events.pop_front() {
                Some(SessionEvent::Received { data }) => Ok(Some(data)),
                _ => Ok(None),
            },
            Some(SessionEvent::Sent { data }) => Err(ConnectError::ReplayMismatchError(format!(
                "transcript expected write {data:?} before more output"
            ))),
            Some(SessionEvent::Closed { .. }) | Some(SessionEvent::Connected { .. }) | None => {
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        Ok(())
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

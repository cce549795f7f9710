//! Error types for device sessions, fleet configuration and config commands.
//!
//! [`ConnectError`] covers everything that can go wrong while talking to one
//! device over either channel. [`CommandError`] is what the service boundary
//! hands back to callers; it wraps `ConnectError` and adds the step at which a
//! multi-step mutation stopped.

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while driving a CLI session or a REST session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The SSH channel was closed by the device before the script finished.
    #[error("channel disconnect while waiting for prompt")]
    ChannelDisconnectError,

    /// No output arrived within the idle ceiling.
    ///
    /// The error contains whatever output was received before the timeout.
    #[error("no response within {secs}s: {partial}")]
    ProtocolTimeout { secs: u64, partial: String },

    /// TCP/TLS level failure that is not an HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected or token missing.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The management API answered with a non-success status.
    #[error("api returned HTTP {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// The management API answered with a body this agent cannot read.
    #[error("unexpected api payload: {0}")]
    Payload(String),

    /// A recorded transcript did not match what the automaton wrote.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// Internal bookkeeping failure (poisoned lock, encode error, ...).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// An error occurred in the HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to hand data to the shell I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl ConnectError {
    /// Returns `true` for failures that mean "this path is not usable right now".
    ///
    /// Timeouts count as transport failures for reporting.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ChannelDisconnectError
                | Self::ProtocolTimeout { .. }
                | Self::Transport(_)
                | Self::Ssh2Error(_)
                | Self::RusshError(_)
                | Self::SendDataError(_)
        ) || matches!(self, Self::Http(e) if e.is_connect() || e.is_timeout())
    }

    /// Returns `true` if the device rejected our credentials or token.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::ApiStatus { status: 401 | 403, .. })
    }
}

/// Errors raised while loading or validating the fleet configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read fleet config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid fleet config: {0}")]
    Invalid(String),
}

/// One step of the REST VLAN transaction; reported when a mutation stops partway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStep {
    /// API id resolution and current PVID read.
    ReadCurrentPvid,
    /// Adding the port to the target VLAN's member list.
    AddMembership,
    /// Writing the new PVID.
    WritePvid,
    /// Removing the port from the previous VLAN's member list.
    RemoveOldMembership,
    /// Writing PoE disabled.
    PoeDisable,
    /// Writing PoE enabled.
    PoeEnable,
}

impl fmt::Display for MutationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCurrentPvid => "read current pvid",
            Self::AddMembership => "add vlan membership",
            Self::WritePvid => "write pvid",
            Self::RemoveOldMembership => "remove old vlan membership",
            Self::PoeDisable => "disable poe",
            Self::PoeEnable => "enable poe",
        };
        f.write_str(name)
    }
}

/// Error returned by a single mutation: the failed step plus its cause.
#[derive(Error, Debug)]
#[error("{step} failed: {source}")]
pub struct MutationError {
    pub step: MutationStep,
    #[source]
    pub source: ConnectError,
}

impl MutationError {
    pub fn new(step: MutationStep, source: ConnectError) -> Self {
        Self { step, source }
    }
}

/// Errors surfaced to callers of [`crate::service::FleetService`].
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("port {port} is outside 1..={max} on {device}")]
    InvalidPort { device: String, port: u32, max: u32 },

    #[error("vlan id {0} is outside 1..=4093")]
    InvalidVlan(u16),

    #[error("login to {0} failed")]
    LoginFailed(String),

    #[error("{0} is not supported on this channel")]
    Unsupported(&'static str),

    /// A multi-step change stopped partway; the device may be partially changed.
    #[error("partial mutation on {device}: {source}")]
    PartialMutation {
        device: String,
        #[source]
        source: MutationError,
    },

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl CommandError {
    /// The step a partial mutation stopped at, if this is one.
    pub fn failed_step(&self) -> Option<MutationStep> {
        match self {
            Self::PartialMutation { source, .. } => Some(source.step),
            _ => None,
        }
    }
}

//! Interactive CLI sessions.
//!
//! A session is one shell on one device, opened for one script and closed
//! afterwards. Nothing here is pooled or reused across poll cycles.
//!
//! # Main Components
//!
//! - [`ShellStream`] - duplex text channel to a device shell
//! - [`SshShell`] - the SSH implementation over `async-ssh2-tokio`
//! - [`drive`] - feeds an [`Automaton`] from a stream until it is done
//! - [`SessionRecorder`] / [`TranscriptStream`] - JSONL transcripts and their replay
//! - [`TranscriptLog`] - the latest transcript per device

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use secrecy::ExposeSecret;

use crate::automaton::{Automaton, CaptureSet, Outgoing, Script, SecretKind};
use crate::error::ConnectError;
use crate::fleet::Credentials;

pub use client::SshShell;
pub use recording::{
    REDACTED, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder, TranscriptLog,
    TranscriptStream,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};

mod client;
mod recording;
mod security;

/// Received text kept for a timeout error.
const TIMEOUT_TAIL_CHARS: usize = 512;

/// A duplex text channel to a device shell.
pub trait ShellStream: Send {
    /// Writes raw text; callers include the trailing newline.
    fn send(&mut self, data: &str) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Next output chunk, or `None` once the device closed the shell.
    fn recv(&mut self) -> impl Future<Output = Result<Option<String>, ConnectError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;
}

/// Runs `automaton` against `stream` until it reaches `done`.
///
/// Each read waits at most `idle`; the timeout error carries the tail of
/// what was received so far. The stream is closed on success and on error.
pub async fn drive<S: ShellStream>(
    stream: &mut S,
    mut automaton: Automaton,
    credentials: &Credentials,
    idle: Duration,
    recorder: Option<&SessionRecorder>,
) -> Result<Automaton, ConnectError> {
    let result = pump(stream, &mut automaton, credentials, idle, recorder).await;
    let reason = match &result {
        Ok(()) => "script complete".to_string(),
        Err(err) => err.to_string(),
    };
    if let Some(recorder) = recorder {
        let _ = recorder.record_event(SessionEvent::Closed { reason });
    }
    if let Err(err) = stream.close().await {
        debug!("closing shell failed: {err}");
    }
    result.map(|()| automaton)
}

async fn pump<S: ShellStream>(
    stream: &mut S,
    automaton: &mut Automaton,
    credentials: &Credentials,
    idle: Duration,
    recorder: Option<&SessionRecorder>,
) -> Result<(), ConnectError> {
    let mut received = String::new();
    while !automaton.is_done() {
        let chunk = match tokio::time::timeout(idle, stream.recv()).await {
            Err(_) => {
                warn!("no output for {}s in state {}", idle.as_secs(), automaton.state());
                return Err(ConnectError::ProtocolTimeout {
                    secs: idle.as_secs(),
                    partial: tail(&received, TIMEOUT_TAIL_CHARS),
                });
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(None)) => return Err(ConnectError::ChannelDisconnectError),
            Ok(Ok(Some(chunk))) => chunk,
        };
        received.push_str(&chunk);
        if let Some(recorder) = recorder {
            let _ = recorder.record_event(SessionEvent::Received {
                data: chunk.clone(),
            });
        }

        let Some(outgoing) = automaton.feed(&chunk) else {
            continue;
        };
        let (text, logged) = match outgoing {
            Outgoing::Line(text) => {
                let logged = text.clone();
                (text, logged)
            }
            Outgoing::Secret(kind) => {
                let secret = match kind {
                    SecretKind::Login => &credentials.password,
                    SecretKind::Enable => credentials.enable_secret(),
                };
                (format!("{}\n", secret.expose_secret()), REDACTED.to_string())
            }
        };
        debug!("-> {:?}", logged.trim_end());
        if let Some(recorder) = recorder {
            let _ = recorder.record_event(SessionEvent::Sent { data: logged });
        }
        stream.send(&text).await?;
    }
    Ok(())
}

/// Drives `script` from a fresh automaton and returns the captured slots.
pub async fn run_script<S: ShellStream>(
    stream: &mut S,
    script: Script,
    credentials: &Credentials,
    idle: Duration,
    recorder: Option<&SessionRecorder>,
) -> Result<CaptureSet, ConnectError> {
    let automaton = drive(stream, Automaton::new(script), credentials, idle, recorder).await?;
    Ok(automaton.into_captures())
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{CaptureStep, SessionState};
    use std::collections::VecDeque;

    /// Scripted fake shell: hands out chunks, then hangs or closes.
    struct FakeShell {
        chunks: VecDeque<String>,
        hang_when_empty: bool,
        sent: Vec<String>,
        closed: bool,
    }

    impl FakeShell {
        fn new(chunks: &[&str], hang_when_empty: bool) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                hang_when_empty,
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    impl ShellStream for FakeShell {
        async fn send(&mut self, data: &str) -> Result<(), ConnectError> {
            self.sent.push(data.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, ConnectError> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None if self.hang_when_empty => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn close(&mut self) -> Result<(), ConnectError> {
            self.closed = true;
            Ok(())
        }
    }

    fn one_step() -> Script {
        Script::Capture(vec![CaptureStep::new("sysinfo", "show sysinfo")])
    }

    #[tokio::test]
    async fn credentials_are_written_but_recorded_redacted() {
        let mut shell = FakeShell::new(
            &["Password:", "(sw) #", "(sw) #", "System Name.... a\r\n(sw) #"],
            false,
        );
        let creds = Credentials::new("admin", "s3cret");
        let recorder = SessionRecorder::default();

        let captures = run_script(
            &mut shell,
            one_step(),
            &creds,
            Duration::from_secs(5),
            Some(&recorder),
        )
        .await
        .expect("script should finish");

        assert_eq!(shell.sent[0], "s3cret\n");
        assert!(shell.closed);
        assert!(captures.get("sysinfo").contains("System Name"));
        let jsonl = recorder.to_jsonl().expect("jsonl");
        assert!(!jsonl.contains("s3cret"));
        assert!(jsonl.contains(REDACTED));
    }

    #[tokio::test]
    async fn repeated_sessions_keep_only_the_latest_transcript() {
        let creds = Credentials::new("admin", "pw");
        let log = TranscriptLog::default();
        let mut last_len = 0;
        for _ in 0..3 {
            let mut shell =
                FakeShell::new(&["(sw) #", "(sw) #", "System Name.... a\r\n(sw) #"], false);
            let recorder = log.session();
            run_script(
                &mut shell,
                one_step(),
                &creds,
                Duration::from_secs(5),
                Some(&recorder),
            )
            .await
            .expect("script should finish");
            last_len = recorder.entries().expect("entries").len();
            log.store("admin@10.0.0.1:22", recorder).expect("store");
        }

        let latest = log
            .latest("admin@10.0.0.1:22")
            .expect("lookup")
            .expect("stored session");
        assert_eq!(latest.entries().expect("entries").len(), last_len);

        let mut replay = TranscriptStream::from_recorder(&latest).expect("stream");
        let captures = run_script(&mut replay, one_step(), &creds, Duration::from_secs(5), None)
            .await
            .expect("stored transcript replays");
        assert!(captures.get("sysinfo").contains("System Name"));
    }

    #[tokio::test]
    async fn disconnect_mid_script_is_an_error() {
        let mut shell = FakeShell::new(&["(sw) #"], false);
        let creds = Credentials::new("admin", "pw");
        let err = drive(
            &mut shell,
            Automaton::new(one_step()),
            &creds,
            Duration::from_secs(5),
            None,
        )
        .await
        .err()
        .expect("disconnect should fail");
        assert!(matches!(err, ConnectError::ChannelDisconnectError));
        assert!(shell.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_with_partial_output() {
        let mut shell = FakeShell::new(&["(sw) #", "(sw) #", "System Na"], true);
        let creds = Credentials::new("admin", "pw");
        let err = run_script(&mut shell, one_step(), &creds, Duration::from_secs(60), None)
            .await
            .expect_err("silence should time out");
        match err {
            ConnectError::ProtocolTimeout { secs, partial } => {
                assert_eq!(secs, 60);
                assert!(partial.ends_with("System Na"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_block_completes_on_privileged_prompt() {
        let mut shell = FakeShell::new(
            &["(sw) #", "(sw) #", "(sw) (Config)#", "(sw) (Interface 0/2)#", "(sw) #"],
            false,
        );
        let creds = Credentials::new("admin", "pw");
        let automaton = drive(
            &mut shell,
            Automaton::new(Script::ConfigBlock("configure\nexit".to_string())),
            &creds,
            Duration::from_secs(30),
            None,
        )
        .await
        .expect("block should apply");
        assert_eq!(automaton.state(), SessionState::Done);
        assert_eq!(shell.sent.last().map(String::as_str), Some("configure\nexit\n"));
    }
}

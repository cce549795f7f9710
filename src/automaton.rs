//! Prompt-driven state machine for one interactive CLI session.
//!
//! The automaton performs no I/O. Each output chunk from the device goes into
//! [`Automaton::feed`], which classifies the chunk's trailing prompt, records
//! the chunk into the active capture slot and returns what should be written
//! back, if anything. [`crate::session::drive`] owns the read/write loop and
//! the idle timeout.
//!
//! The state sequence is linear:
//!
//! ```text
//! init -> awaiting_enable -> privileged -> term_len_set -> capture_1 .. capture_N -> done
//!                                                       \-> applying_block ---------> done
//! ```
//!
//! A device that lands straight in privileged mode skips `awaiting_enable`.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;

/// Strips carriage returns and backspaces the PTY leaves at the start of a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

/// `(host) (Config)#`, `(host) (Interface 1/0/2)#` and bare `(Config)#` style prompts.
static NESTED_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"(?i)(\([^)]*\)\s*\([^)]*\)\s*#$)|(\((config|interface|if|vlan|line|route-map)[^)]*\)\s*#$)",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid NESTED_CONTEXT regex: {err}"),
    }
});

pub const TERMINAL_LENGTH_COMMAND: &str = "terminal length 0";
pub const ENABLE_COMMAND: &str = "enable";

/// Slot name under which a configuration block's echo is kept.
pub const BLOCK_SLOT: &str = "block";

/// Named states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    AwaitingEnable,
    Privileged,
    TermLenSet,
    /// Waiting for the output of the i-th scripted command.
    Capture(usize),
    ApplyingBlock,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::AwaitingEnable => f.write_str("awaiting_enable"),
            Self::Privileged => f.write_str("privileged"),
            Self::TermLenSet => f.write_str("term_len_set"),
            Self::Capture(i) => write!(f, "capture_{}", i + 1),
            Self::ApplyingBlock => f.write_str("applying_block"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// What the tail of a chunk looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Password,
    /// `>` prompt.
    Unprivileged,
    /// `#` prompt with no nested context.
    Privileged,
    /// `#` prompt inside configuration or interface context.
    NestedContext,
    /// Anything else: command echo or table output.
    Output,
}

/// Classifies a chunk by its last non-empty line.
pub fn classify_chunk(chunk: &str) -> PromptKind {
    let Some(line) = chunk
        .lines()
        .map(|l| IGNORE_START_LINE.replace(l, ""))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .last()
    else {
        return PromptKind::Output;
    };
    if line.to_ascii_lowercase().contains("password:") {
        PromptKind::Password
    } else if line.ends_with('>') {
        PromptKind::Unprivileged
    } else if line.ends_with('#') {
        if NESTED_CONTEXT.is_match(&line) {
            PromptKind::NestedContext
        } else {
            PromptKind::Privileged
        }
    } else {
        PromptKind::Output
    }
}

/// Which credential a password prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Login,
    Enable,
}

/// Text the driver should write next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A command, already newline terminated.
    Line(String),
    /// A credential; the driver substitutes it so the automaton never holds one.
    Secret(SecretKind),
}

/// One scripted read command and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStep {
    pub slot: String,
    pub command: String,
}

impl CaptureStep {
    pub fn new(slot: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            command: command.into(),
        }
    }
}

/// What the session does once privileged with paging disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Capture(Vec<CaptureStep>),
    /// A multi-line command block written in one go.
    ConfigBlock(String),
}

/// Captured text per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSet {
    slots: BTreeMap<String, String>,
}

impl CaptureSet {
    /// Captured text for a slot; empty when the slot never received output.
    pub fn get(&self, slot: &str) -> &str {
        self.slots.get(slot).map(String::as_str).unwrap_or("")
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, &str)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct Automaton {
    state: SessionState,
    script: Script,
    buffers: Vec<String>,
    block_output: String,
    /// Unfinished last line of plain output, so a prompt split across
    /// chunks is classified whole.
    carry: String,
    history: Vec<SessionState>,
}

impl Automaton {
    pub fn new(script: Script) -> Self {
        let slots = match &script {
            Script::Capture(steps) => steps.len(),
            Script::ConfigBlock(_) => 0,
        };
        Self {
            state: SessionState::Init,
            script,
            buffers: vec![String::new(); slots],
            block_output: String::new(),
            carry: String::new(),
            history: vec![SessionState::Init],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Consumes one output chunk and returns what to write, if anything.
    pub fn feed(&mut self, chunk: &str) -> Option<Outgoing> {
        if self.is_done() {
            return None;
        }
        match self.state {
            SessionState::Capture(i) => {
                if let Some(buf) = self.buffers.get_mut(i) {
                    buf.push_str(chunk);
                }
            }
            SessionState::ApplyingBlock => self.block_output.push_str(chunk),
            _ => {}
        }

        self.carry.push_str(chunk);
        let kind = classify_chunk(&self.carry);
        trace!("state {} chunk classified as {:?}", self.state, kind);
        let reply = self.react(kind);
        if reply.is_some() || kind != PromptKind::Output {
            self.carry.clear();
        } else {
            let start = last_line_start(&self.carry);
            self.carry.drain(..start);
        }
        reply
    }

    fn react(&mut self, kind: PromptKind) -> Option<Outgoing> {
        match kind {
            PromptKind::Password => Some(Outgoing::Secret(match self.state {
                SessionState::Init => SecretKind::Login,
                _ => SecretKind::Enable,
            })),
            PromptKind::Unprivileged if self.state == SessionState::Init => {
                self.advance(SessionState::AwaitingEnable);
                Some(line(ENABLE_COMMAND))
            }
            PromptKind::Privileged => self.on_privileged_prompt(),
            _ => None,
        }
    }

    fn on_privileged_prompt(&mut self) -> Option<Outgoing> {
        match self.state {
            SessionState::Init | SessionState::AwaitingEnable => {
                self.advance(SessionState::Privileged);
                Some(line(TERMINAL_LENGTH_COMMAND))
            }
            SessionState::Privileged => {
                self.advance(SessionState::TermLenSet);
                self.start_script()
            }
            SessionState::Capture(i) => self.capture_step(i + 1),
            SessionState::ApplyingBlock => {
                self.advance(SessionState::Done);
                None
            }
            SessionState::TermLenSet | SessionState::Done => None,
        }
    }

    fn start_script(&mut self) -> Option<Outgoing> {
        match &self.script {
            Script::Capture(_) => self.capture_step(0),
            Script::ConfigBlock(block) => {
                let text = line(block);
                self.advance(SessionState::ApplyingBlock);
                Some(text)
            }
        }
    }

    fn capture_step(&mut self, index: usize) -> Option<Outgoing> {
        let command = match &self.script {
            Script::Capture(steps) => steps.get(index).map(|s| s.command.clone()),
            Script::ConfigBlock(_) => None,
        };
        match command {
            Some(command) => {
                self.advance(SessionState::Capture(index));
                Some(line(&command))
            }
            None => {
                self.advance(SessionState::Done);
                None
            }
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!("session state {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Output received so far in [`Script::ConfigBlock`] mode.
    pub fn block_output(&self) -> &str {
        &self.block_output
    }

    /// Hands back the captured slots.
    pub fn into_captures(self) -> CaptureSet {
        let mut slots = BTreeMap::new();
        match self.script {
            Script::Capture(steps) => {
                for (step, buf) in steps.into_iter().zip(self.buffers) {
                    slots.insert(step.slot, buf);
                }
            }
            Script::ConfigBlock(_) => {
                slots.insert(BLOCK_SLOT.to_string(), self.block_output);
            }
        }
        CaptureSet { slots }
    }
}

/// Byte offset where the last non-empty line of `text` begins.
fn last_line_start(text: &str) -> usize {
    text.trim_end().rfind('\n').map_or(0, |i| i + 1)
}

fn line(command: &str) -> Outgoing {
    let mut text = command.trim_end_matches('\n').to_string();
    text.push('\n');
    Outgoing::Line(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_script() -> Script {
        Script::Capture(vec![
            CaptureStep::new("sysinfo", "show sysinfo"),
            CaptureStep::new("poe", "show poe"),
        ])
    }

    fn written(out: Option<Outgoing>) -> String {
        match out {
            Some(Outgoing::Line(text)) => text,
            other => panic!("expected a command, got {other:?}"),
        }
    }

    #[test]
    fn prompts_are_classified_by_last_line() {
        assert_eq!(classify_chunk("User:admin\r\nPassword:"), PromptKind::Password);
        assert_eq!(classify_chunk("\r\n(M4300-28G) >"), PromptKind::Unprivileged);
        assert_eq!(classify_chunk("\r\n(M4300-28G) #"), PromptKind::Privileged);
        assert_eq!(classify_chunk("(M4300-28G) (Config)#"), PromptKind::NestedContext);
        assert_eq!(
            classify_chunk("(M4300-28G) (Interface 1/0/2)#"),
            PromptKind::NestedContext
        );
        assert_eq!(classify_chunk("(Config)#"), PromptKind::NestedContext);
        assert_eq!(classify_chunk("0/1  Enable  Up\r\n"), PromptKind::Output);
        assert_eq!(classify_chunk(""), PromptKind::Output);
    }

    #[test]
    fn full_login_walks_every_state() {
        let mut fsm = Automaton::new(two_step_script());

        assert_eq!(
            fsm.feed("Password:"),
            Some(Outgoing::Secret(SecretKind::Login))
        );
        assert_eq!(written(fsm.feed("(sw) >")), "enable\n");
        assert_eq!(
            fsm.feed("Password:"),
            Some(Outgoing::Secret(SecretKind::Enable))
        );
        assert_eq!(written(fsm.feed("(sw) #")), "terminal length 0\n");
        assert_eq!(written(fsm.feed("(sw) #")), "show sysinfo\n");
        assert_eq!(fsm.feed("System Name.... sw\r\n"), None);
        assert_eq!(written(fsm.feed("(sw) #")), "show poe\n");
        assert_eq!(fsm.feed("1/0/3 Enable On\r\n(sw) #"), None);
        assert!(fsm.is_done());

        assert_eq!(
            fsm.history(),
            &[
                SessionState::Init,
                SessionState::AwaitingEnable,
                SessionState::Privileged,
                SessionState::TermLenSet,
                SessionState::Capture(0),
                SessionState::Capture(1),
                SessionState::Done,
            ]
        );

        let captures = fsm.into_captures();
        assert!(captures.get("sysinfo").contains("System Name"));
        assert!(captures.get("poe").contains("1/0/3"));
    }

    #[test]
    fn privileged_landing_skips_awaiting_enable() {
        let mut fsm = Automaton::new(two_step_script());
        assert_eq!(written(fsm.feed("Welcome\r\n(sw) #")), "terminal length 0\n");
        assert!(!fsm.history().contains(&SessionState::AwaitingEnable));
    }

    #[test]
    fn config_block_waits_for_plain_privileged_prompt() {
        let block = "configure\ninterface 1/0/2\nvlan pvid 10\nexit\nexit".to_string();
        let mut fsm = Automaton::new(Script::ConfigBlock(block.clone()));
        fsm.feed("(sw) #");
        assert_eq!(written(fsm.feed("(sw) #")), format!("{block}\n"));
        assert_eq!(fsm.state(), SessionState::ApplyingBlock);

        assert_eq!(fsm.feed("(sw) (Config)#"), None);
        assert_eq!(fsm.feed("(sw) (Interface 1/0/2)#"), None);
        assert!(!fsm.is_done());
        fsm.feed("(sw) #");
        assert!(fsm.is_done());
        assert!(fsm.into_captures().get(BLOCK_SLOT).contains("(Interface 1/0/2)#"));
    }

    #[test]
    fn prompt_split_across_chunks_is_still_nested() {
        let mut fsm = Automaton::new(Script::ConfigBlock("configure\nexit".to_string()));
        fsm.feed("(sw) #");
        written(fsm.feed("(sw) #"));

        assert_eq!(fsm.feed("configure\r\n\r\n(sw) (Config)"), None);
        assert_eq!(fsm.feed("#"), None);
        assert_eq!(fsm.state(), SessionState::ApplyingBlock);
        assert_eq!(fsm.feed("exit\r\n\r\n(sw) "), None);
        assert!(!fsm.is_done());
        fsm.feed("#");
        assert!(fsm.is_done());
    }

    #[test]
    fn done_ignores_further_output() {
        let mut fsm = Automaton::new(Script::Capture(Vec::new()));
        fsm.feed("(sw) #");
        assert_eq!(fsm.feed("(sw) #"), None);
        assert!(fsm.is_done());
        assert_eq!(fsm.feed("(sw) #"), None);
    }
}

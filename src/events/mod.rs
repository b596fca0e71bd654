//! Unified kernel-activity event model.
//!
//! Every probe (exec, listen, open, readline) produces one variant of the
//! closed `Event` enum. Variants share an `EventMeta` header (wall-clock
//! time, pid, uid, syscall return value) and expose the same read-only
//! query surface, so the monitor never needs to know which probe an event
//! came from until it picks an analyzer.
//!
//! Events are immutable once built. The pipeline hands them around as
//! `Arc<Event>` so a `Detection` can keep one as an artifact without copying.
//!
//! ## Formats Supported
//! - `serde` JSON, tagged with `"type"`, used by the JSON-lines feed source

pub mod context;
pub mod sources;

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed kernel activity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Exec(ExecEvent),
    Listen(ListenEvent),
    Open(OpenEvent),
    Readline(ReadlineEvent),
}

/// Discriminant of `Event`, used as the analyzer lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Exec,
    Listen,
    Open,
    Readline,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Exec,
        EventKind::Listen,
        EventKind::Open,
        EventKind::Readline,
    ];

    /// Short lowercase header, also the token accepted by `--ignore`.
    pub fn header(self) -> &'static str {
        match self {
            EventKind::Exec => "exec",
            EventKind::Listen => "listen",
            EventKind::Open => "open",
            EventKind::Readline => "readline",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Fields every probe fills in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventMeta {
    pub time: DateTime<Utc>,
    pub pid: u32,
    pub uid: u32,
    #[serde(default)]
    pub ret_val: i64,
}

/// A successful or attempted `execve`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub ppid: u32,
    pub comm: String,
    pub argv: Vec<String>,
}

/// A socket moving to the LISTEN state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ListenEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub comm: String,
    pub addr: IpAddr,
    pub port: u16,
}

/// An `open`/`openat` call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpenEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub comm: String,
    pub path: String,
    #[serde(default)]
    pub flags: i32,
}

/// A line returned by an interactive shell's `readline`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReadlineEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub comm: String,
    pub line: String,
}

/// `O_WRONLY | O_RDWR | O_CREAT | O_TRUNC | O_APPEND` on Linux.
const WRITE_FLAGS: i32 = 0o1 | 0o2 | 0o100 | 0o1000 | 0o2000;

impl OpenEvent {
    /// True when the open could modify the file.
    pub fn is_write(&self) -> bool {
        self.flags & WRITE_FLAGS != 0
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Exec(_) => EventKind::Exec,
            Event::Listen(_) => EventKind::Listen,
            Event::Open(_) => EventKind::Open,
            Event::Readline(_) => EventKind::Readline,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Event::Exec(e) => &e.meta,
            Event::Listen(e) => &e.meta,
            Event::Open(e) => &e.meta,
            Event::Readline(e) => &e.meta,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.meta().time
    }

    pub fn pid(&self) -> u32 {
        self.meta().pid
    }

    pub fn uid(&self) -> u32 {
        self.meta().uid
    }

    pub fn ret_val(&self) -> i64 {
        self.meta().ret_val
    }

    pub fn comm(&self) -> &str {
        match self {
            Event::Exec(e) => &e.comm,
            Event::Listen(e) => &e.comm,
            Event::Open(e) => &e.comm,
            Event::Readline(e) => &e.comm,
        }
    }

    pub fn type_header(&self) -> &'static str {
        self.kind().header()
    }

    /// Variant-specific one-line summary.
    pub fn render(&self) -> String {
        match self {
            Event::Exec(e) => format!("{} -> {}", e.comm, e.argv.join(" ")),
            Event::Listen(e) => match e.addr {
                IpAddr::V6(addr) => format!("{} listening on [{}]:{}", e.comm, addr, e.port),
                IpAddr::V4(addr) => format!("{} listening on {}:{}", e.comm, addr, e.port),
            },
            Event::Open(e) => format!("{} opened {}", e.comm, e.path),
            Event::Readline(e) => format!("{}: {}", e.comm, e.line),
        }
    }

    /// Summary plus the common header fields, as printed by the monitor.
    pub fn render_line(&self) -> String {
        format!(
            "{} {{ret: {}}} (uid: {}) [pid: {}]",
            self.render(),
            self.ret_val(),
            self.uid(),
            self.pid()
        )
    }
}

impl From<ExecEvent> for Event {
    fn from(e: ExecEvent) -> Self {
        Event::Exec(e)
    }
}

impl From<ListenEvent> for Event {
    fn from(e: ListenEvent) -> Self {
        Event::Listen(e)
    }
}

impl From<OpenEvent> for Event {
    fn from(e: OpenEvent) -> Self {
        Event::Open(e)
    }
}

impl From<ReadlineEvent> for Event {
    fn from(e: ReadlineEvent) -> Self {
        Event::Readline(e)
    }
}

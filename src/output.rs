//! Operator-facing notifications.
//!
//! The monitor and the workflows only talk to a `Notifier`. Three sinks ship
//! with the crate:
//!
//!   • `ConsoleNotifier` – coloured terminal output, raw event lines only
//!     when verbose.
//!   • `LogNotifier` – everything through the `log` facade (and from there to
//!     syslog when the binary chains it).
//!   • `RecordingNotifier` – keeps every call, for tests and embedding.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};

use crate::analysis::Level;

/// Fire-and-forget notification sink. Implementations swallow their own
/// failures.
pub trait Notifier: Send + Sync {
    fn info(&self, msg: &str);
    fn positive(&self, msg: &str);
    fn negative(&self, msg: &str);
    fn err(&self, msg: &str);
    fn leveled(&self, level: Level, msg: &str);
    /// A raw event line.
    fn event(&self, header: &str, line: &str);
    /// One entry of an evidence trail.
    fn event_log(&self, time: DateTime<Utc>, header: &str, line: &str);
    /// Indentation depth for the lines that follow.
    fn tabber(&self, depth: usize);
}

// ============================================================================
// 1 ▸ ConsoleNotifier
// ============================================================================

pub struct ConsoleNotifier {
    out: Mutex<Box<dyn Write + Send>>,
    verbose: bool,
    depth: AtomicUsize,
}

impl ConsoleNotifier {
    pub fn stdout(verbose: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), verbose)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, verbose: bool) -> Self {
        Self { out: Mutex::new(out), verbose, depth: AtomicUsize::new(0) }
    }

    fn line(&self, tag: ColoredString, msg: &str) {
        let indent = "\t".repeat(self.depth.load(Ordering::Relaxed));
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{indent}{tag} {msg}");
            let _ = out.flush();
        }
    }
}

fn level_tag(level: Level) -> ColoredString {
    let tag = format!("[{level}]");
    let tag = tag.as_str();
    match level {
        Level::Low => tag.cyan(),
        Level::Medium => tag.yellow(),
        Level::High => tag.red(),
        Level::Critical => tag.red().bold(),
    }
}

impl Notifier for ConsoleNotifier {
    fn info(&self, msg: &str) {
        self.line("[*]".blue(), msg);
    }

    fn positive(&self, msg: &str) {
        self.line("[+]".green(), msg);
    }

    fn negative(&self, msg: &str) {
        self.line("[-]".yellow(), msg);
    }

    fn err(&self, msg: &str) {
        self.line("[!]".red().bold(), msg);
    }

    fn leveled(&self, level: Level, msg: &str) {
        self.line(level_tag(level), msg);
    }

    fn event(&self, header: &str, line: &str) {
        if self.verbose {
            self.line(format!("[{header}]").as_str().dimmed(), line);
        }
    }

    fn event_log(&self, time: DateTime<Utc>, header: &str, line: &str) {
        let stamp = time.with_timezone(&Local).format("%H:%M:%S%.3f");
        self.line(format!("{stamp} [{header}]").as_str().dimmed(), line);
    }

    fn tabber(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
    }
}

// ============================================================================
// 2 ▸ LogNotifier
// ============================================================================

const NOTIFY_TARGET: &str = "alertyx::notify";

/// Sends every notification through the `log` facade.
#[derive(Default)]
pub struct LogNotifier {
    depth: AtomicUsize,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth.load(Ordering::Relaxed))
    }
}

impl Notifier for LogNotifier {
    fn info(&self, msg: &str) {
        log::info!(target: NOTIFY_TARGET, "{}{msg}", self.indent());
    }

    fn positive(&self, msg: &str) {
        log::info!(target: NOTIFY_TARGET, "{}{msg}", self.indent());
    }

    fn negative(&self, msg: &str) {
        log::warn!(target: NOTIFY_TARGET, "{}{msg}", self.indent());
    }

    fn err(&self, msg: &str) {
        log::error!(target: NOTIFY_TARGET, "{}{msg}", self.indent());
    }

    fn leveled(&self, level: Level, msg: &str) {
        let lvl = match level {
            Level::Low | Level::Medium => log::Level::Warn,
            Level::High | Level::Critical => log::Level::Error,
        };
        log::log!(target: NOTIFY_TARGET, lvl, "{}[{level}] {msg}", self.indent());
    }

    fn event(&self, header: &str, line: &str) {
        log::debug!(target: NOTIFY_TARGET, "[{header}] {line}");
    }

    fn event_log(&self, time: DateTime<Utc>, header: &str, line: &str) {
        log::info!(target: NOTIFY_TARGET, "{}{} [{header}] {line}", self.indent(), time.to_rfc3339());
    }

    fn tabber(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
    }
}

// ============================================================================
// 3 ▸ RecordingNotifier
// ============================================================================

/// One captured notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    Info(String),
    Positive(String),
    Negative(String),
    Err(String),
    Leveled(Level, String),
    Event { header: String, line: String },
    EventLog { header: String, line: String },
    Tabber(usize),
}

impl Note {
    /// Message text, without the header for event notes.
    pub fn text(&self) -> &str {
        match self {
            Note::Info(m) | Note::Positive(m) | Note::Negative(m) | Note::Err(m) | Note::Leveled(_, m) => m,
            Note::Event { line, .. } | Note::EventLog { line, .. } => line,
            Note::Tabber(_) => "",
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<Note>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Drain everything captured so far.
    pub fn take(&self) -> Vec<Note> {
        self.notes.lock().map(|mut n| std::mem::take(&mut *n)).unwrap_or_default()
    }

    /// `true` if any note's text contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.notes().iter().any(|n| n.text().contains(needle))
    }

    fn push(&self, note: Note) {
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(note);
        }
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, msg: &str) {
        self.push(Note::Info(msg.into()));
    }

    fn positive(&self, msg: &str) {
        self.push(Note::Positive(msg.into()));
    }

    fn negative(&self, msg: &str) {
        self.push(Note::Negative(msg.into()));
    }

    fn err(&self, msg: &str) {
        self.push(Note::Err(msg.into()));
    }

    fn leveled(&self, level: Level, msg: &str) {
        self.push(Note::Leveled(level, msg.into()));
    }

    fn event(&self, header: &str, line: &str) {
        self.push(Note::Event { header: header.into(), line: line.into() });
    }

    fn event_log(&self, _time: DateTime<Utc>, header: &str, line: &str) {
        self.push(Note::EventLog { header: header.into(), line: line.into() });
    }

    fn tabber(&self, depth: usize) {
        self.push(Note::Tabber(depth));
    }
}

// ============================================================================
// 4 ▸ IgnoreList
// ============================================================================

/// Event type headers whose raw lines are not shown. Case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    headers: HashSet<String>,
}

impl IgnoreList {
    /// Parse a comma-separated list such as `"open,readline"`.
    pub fn parse(csv: &str) -> Self {
        csv.split(',').collect()
    }

    pub fn contains(&self, header: &str) -> bool {
        self.headers.contains(&header.to_lowercase())
    }

    pub fn extend<I, S>(&mut self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers.extend(
            headers
                .into_iter()
                .map(|h| h.as_ref().trim().to_lowercase())
                .filter(|h| !h.is_empty()),
        );
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for IgnoreList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = IgnoreList::default();
        list.extend(iter);
        list
    }
}

//! Live-event analysis.
//!
//! One `Analyzer` per `EventKind`, selected through an exhaustive match, so
//! adding an event variant fails to compile until it has an analyzer.
//! Analyzers turn an event into zero or more `Detection`s. They share an
//! `AnalysisState` owned by `Analyzers`: the dedup memory that decides
//! whether a match is novel or a repeat, and a short process table used to
//! build multi-event evidence trails.

pub mod dedup;
pub mod rules;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::events::{Event, EventKind};
use crate::techs::{Catalog, Technique};

pub use dedup::{DedupMemory, ProcessTable};

/// Severity attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Low => "LOW",
            Level::Medium => "MEDIUM",
            Level::High => "HIGH",
            Level::Critical => "CRITICAL",
        })
    }
}

/// One piece of evidence in a detection's trail.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub time: DateTime<Utc>,
    pub event: Arc<Event>,
}

impl Artifact {
    pub fn of(event: &Arc<Event>) -> Self {
        Self { time: event.time(), event: Arc::clone(event) }
    }
}

/// A technique match found in the live stream.
///
/// `artifacts` is kept in collection order, oldest first. `dupe` points at
/// the first detection reported for the same technique and match key; it is
/// `None` for a novel detection.
#[derive(Clone)]
pub struct Detection {
    pub tech: Arc<dyn Technique>,
    pub level: Level,
    pub brief: String,
    pub artifacts: Vec<Artifact>,
    pub dupe: Option<Arc<Detection>>,
}

impl Detection {
    pub fn new(tech: Arc<dyn Technique>, level: Level, brief: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self { tech, level, brief: brief.into(), artifacts, dupe: None }
    }

    pub fn is_dupe(&self) -> bool {
        self.dupe.is_some()
    }

    /// Most recent evidence, the one an active response acts on.
    pub fn latest_artifact(&self) -> Option<&Artifact> {
        self.artifacts.last()
    }

    /// Headline: technique plus the process behind the latest evidence.
    pub fn render(&self) -> String {
        match self.latest_artifact() {
            Some(a) => format!(
                "{} ({} pid {}, uid {})",
                self.tech.name(),
                a.event.comm(),
                a.event.pid(),
                a.event.uid()
            ),
            None => self.tech.name().to_owned(),
        }
    }
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("tech", &self.tech.name())
            .field("level", &self.level)
            .field("brief", &self.brief)
            .field("artifacts", &self.artifacts.len())
            .field("dupe", &self.dupe.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("malformed {kind} event from pid {pid}: {reason}")]
    MalformedEvent {
        kind: EventKind,
        pid: u32,
        reason: &'static str,
    },
}

impl AnalysisError {
    pub fn malformed(ev: &Event, reason: &'static str) -> Self {
        AnalysisError::MalformedEvent { kind: ev.kind(), pid: ev.pid(), reason }
    }
}

/// Cross-call memory shared by every analyzer.
pub struct AnalysisState {
    pub dedup: DedupMemory,
    pub procs: ProcessTable,
}

/// Maps one event to its detections.
///
/// Called sequentially from the monitor; implementations may keep private
/// state between calls. "No match" is `Ok(vec![])`, never an error.
pub trait Analyzer: Send {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError>;
}

/// Knobs the built-in rules and the dedup memory read.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub dedup_window: Duration,
    pub dedup_capacity: usize,
    pub shadow_path: PathBuf,
    pub cron_dirs: Vec<PathBuf>,
    pub bind_tools: Vec<String>,
}

impl From<&Config> for AnalysisConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            dedup_window: cfg.monitor.dedup_window,
            dedup_capacity: cfg.monitor.dedup_capacity,
            shadow_path: cfg.catalog.shadow_path.clone(),
            cron_dirs: cfg.catalog.cron_dirs.clone(),
            bind_tools: cfg.catalog.bind_tools.clone(),
        }
    }
}

/// Analyzer lookup table, one slot per event kind.
pub struct Analyzers {
    state: AnalysisState,
    exec: Box<dyn Analyzer>,
    listen: Box<dyn Analyzer>,
    open: Box<dyn Analyzer>,
    readline: Box<dyn Analyzer>,
}

impl Analyzers {
    /// Built-in rules wired to the techniques found in `catalog`.
    pub fn builtin(catalog: &Catalog, cfg: &AnalysisConfig) -> Self {
        Self {
            state: AnalysisState {
                dedup: DedupMemory::new(cfg.dedup_window, cfg.dedup_capacity),
                procs: ProcessTable::new(cfg.dedup_window, cfg.dedup_capacity),
            },
            exec: Box::new(rules::ExecAnalyzer::new(catalog, cfg)),
            listen: Box::new(rules::ListenAnalyzer::new(catalog, cfg)),
            open: Box::new(rules::OpenAnalyzer::new(catalog, cfg)),
            readline: Box::new(rules::ReadlineAnalyzer::new(catalog)),
        }
    }

    /// Swap the analyzer for one event kind.
    pub fn replace(&mut self, kind: EventKind, analyzer: Box<dyn Analyzer>) {
        *self.slot(kind) = analyzer;
    }

    fn slot(&mut self, kind: EventKind) -> &mut Box<dyn Analyzer> {
        match kind {
            EventKind::Exec => &mut self.exec,
            EventKind::Listen => &mut self.listen,
            EventKind::Open => &mut self.open,
            EventKind::Readline => &mut self.readline,
        }
    }

    pub fn analyze(&mut self, ev: &Arc<Event>) -> Result<Vec<Detection>, AnalysisError> {
        let analyzer = match ev.kind() {
            EventKind::Exec => &mut self.exec,
            EventKind::Listen => &mut self.listen,
            EventKind::Open => &mut self.open,
            EventKind::Readline => &mut self.readline,
        };
        analyzer.analyze(ev, &mut self.state)
    }
}

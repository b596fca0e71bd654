// tests/common/mod.rs
//
// Doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::mpsc;

use alertyx::analysis::{AnalysisError, AnalysisState, Analyzer, Artifact, Detection, Level};
use alertyx::events::context::{SourceError, SourceHandle};
use alertyx::events::sources::Source;
use alertyx::events::{Event, EventMeta, ReadlineEvent};
use alertyx::techs::{CheckResult, Finding, HuntResult, TechError, Technique};

pub fn readline(pid: u32, line: &str) -> Event {
    Event::Readline(ReadlineEvent {
        meta: EventMeta { time: Utc::now(), pid, uid: 1000, ret_val: 0 },
        comm: "bash".into(),
        line: line.into(),
    })
}

// ───── techniques ───────────────────────────────────────────────────────────

/// Technique whose outcomes are fixed up front and whose calls are counted.
pub struct ScriptedTechnique {
    pub name: &'static str,
    pub hunt: Option<Event>,
    pub hunt_found: bool,
    pub check_found: bool,
    pub check: Option<Event>,
    pub fail_hunt: bool,
    pub fail_clean: bool,
    pub fail_mitigate: bool,
    pub cleans: AtomicUsize,
    pub mitigations: AtomicUsize,
    pub cleaned_pids: Mutex<Vec<u32>>,
}

impl ScriptedTechnique {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hunt: None,
            hunt_found: false,
            check_found: false,
            check: None,
            fail_hunt: false,
            fail_clean: false,
            fail_mitigate: false,
            cleans: AtomicUsize::new(0),
            mitigations: AtomicUsize::new(0),
            cleaned_pids: Mutex::new(Vec::new()),
        }
    }

    pub fn cleans(&self) -> usize {
        self.cleans.load(Ordering::SeqCst)
    }

    pub fn mitigations(&self) -> usize {
        self.mitigations.load(Ordering::SeqCst)
    }
}

impl Technique for ScriptedTechnique {
    fn name(&self) -> &str {
        self.name
    }

    fn hunt(&self) -> Result<HuntResult, TechError> {
        if self.fail_hunt {
            return Err(TechError::Unsupported("hunt"));
        }
        Ok(match (&self.hunt, self.hunt_found) {
            (Some(ev), _) => Finding::found(ev.clone()),
            (None, true) => Finding::found_bare(),
            (None, false) => Finding::none(),
        })
    }

    fn check(&self) -> Result<CheckResult, TechError> {
        Ok(match (&self.check, self.check_found) {
            (Some(ev), _) => Finding::found(ev.clone()),
            (None, true) => Finding::found_bare(),
            (None, false) => Finding::none(),
        })
    }

    fn clean(&self, ev: &Event) -> Result<(), TechError> {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        if self.fail_clean {
            return Err(TechError::NothingToClean("already gone".into()));
        }
        self.cleaned_pids.lock().unwrap().push(ev.pid());
        Ok(())
    }

    fn mitigate(&self) -> Result<(), TechError> {
        self.mitigations.fetch_add(1, Ordering::SeqCst);
        if self.fail_mitigate {
            return Err(TechError::Unsupported("mitigate"));
        }
        Ok(())
    }
}

// ───── analyzers ────────────────────────────────────────────────────────────

/// Readline analyzer: every line is remembered, `fire` reports everything
/// remembered so far as one detection, deduplicated on the line text.
pub struct TrailAnalyzer {
    pub tech: Arc<dyn Technique>,
    trail: Vec<Arc<Event>>,
}

impl TrailAnalyzer {
    pub fn new(tech: Arc<dyn Technique>) -> Self {
        Self { tech, trail: Vec::new() }
    }
}

impl Analyzer for TrailAnalyzer {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError> {
        let Event::Readline(rl) = ev.as_ref() else {
            return Ok(vec![]);
        };
        self.trail.push(Arc::clone(ev));
        if !rl.line.starts_with("fire") {
            return Ok(vec![]);
        }
        // keep artifact times strictly increasing, oldest first
        let base = Utc::now();
        let artifacts = self
            .trail
            .drain(..)
            .enumerate()
            .map(|(i, event)| Artifact { time: base + TimeDelta::milliseconds(i as i64), event })
            .collect();
        let det = Detection::new(Arc::clone(&self.tech), Level::Medium, "scripted trail", artifacts);
        Ok(vec![state.dedup.observe(det, &rl.line, ev.time())])
    }
}

// ───── sources ──────────────────────────────────────────────────────────────

/// Source that loads (or fails to), emits a fixed list, then idles until quit.
pub struct ScriptedSource {
    pub name: &'static str,
    pub fail: bool,
    pub events: Vec<Event>,
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<Event>, handle: SourceHandle) {
        let SourceHandle { ticket, mut quit, .. } = handle;
        if self.fail {
            ticket.failed(SourceError::Load { name: self.name.into(), reason: "probe not attached".into() });
            return;
        }
        ticket.loaded(self.name);
        for ev in &self.events {
            if tx.send(ev.clone()).await.is_err() {
                return;
            }
        }
        quit.wait().await;
    }
}

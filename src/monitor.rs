//! Live monitoring: the orchestration loop and its driver.
//!
//! Key responsibilities:
//! - Multiplex load notifications, source errors, events and the quit signal
//!   in a single task, handling one branch at a time.
//! - Route every event to its analyzer and act on the detections under the
//!   operator `Policy` (report, clean, mitigate).
//! - Walk `Starting → Monitoring → Draining → Terminated` and return the
//!   session's `MonitorStats`.
//! - Bound shutdown: `run_monitor` signals quit, then gives the sources and
//!   then the draining loop `shutdown_timeout` each before giving up.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::Level as LogLevel;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::alertyx_log;
use crate::analysis::{Analyzers, Detection};
use crate::config::MonitorConfig;
use crate::events::Event;
use crate::events::context::{PipelineContext, PipelineReceivers, QuitListener, SourceError};
use crate::events::sources::{Source, spawn_sources};
use crate::output::Notifier;
use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Monitoring,
    Draining,
    Terminated,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters for one monitoring session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub events: u64,
    pub detections: u64,
    pub duplicates: u64,
    pub cleaned: u64,
    pub mitigated: u64,
    pub errors: u64,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("could not start sources: {0}")]
    Registration(#[from] SourceError),

    #[error("{part} still running {after:?} after quit")]
    ShutdownTimeout { part: &'static str, after: Duration },

    #[error("monitor loop panicked: {0}")]
    LoopPanicked(String),
}

fn outcome(ok: bool) -> &'static str {
    if ok { "ok" } else { "failed" }
}

// ============================================================================
// 1 ▸ Monitor – single consumer of the fan-in channel
// ============================================================================

pub struct Monitor {
    analyzers: Analyzers,
    policy: Arc<Policy>,
    notifier: Arc<dyn Notifier>,
    state: MonitorState,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(analyzers: Analyzers, policy: Arc<Policy>, notifier: Arc<dyn Notifier>) -> Self {
        Self { analyzers, policy, notifier, state: MonitorState::Starting, stats: MonitorStats::default() }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            alertyx_log!(LogLevel::Info, "monitor", "state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn source_error(&mut self, err: SourceError) {
        self.stats.errors += 1;
        counter!("alertyx_source_errors_total").increment(1);
        alertyx_log!(LogLevel::Warn, "monitor", "source error: {}", err);
        self.notifier.err(&format!("Error: {err}"));
    }

    /// Process one event and every detection it yields.
    pub fn handle_event(&mut self, ev: Event) {
        let ev = Arc::new(ev);
        self.stats.events += 1;
        counter!("alertyx_events_total", "kind" => ev.type_header()).increment(1);
        alertyx_log!(LogLevel::Trace, "monitor", "{}", ev.render_line());

        let analyzed = self.analyzers.analyze(&ev);

        if !self.policy.ignore.contains(ev.type_header()) {
            self.notifier.event(ev.type_header(), &ev.render_line());
        }

        let detections = match analyzed {
            Ok(d) => d,
            Err(e) => {
                self.stats.errors += 1;
                alertyx_log!(LogLevel::Warn, "monitor", "analysis failed: {}", e);
                self.notifier.err(&format!("Error: {e}"));
                return;
            }
        };
        for det in detections {
            self.handle_detection(det);
        }
    }

    fn handle_detection(&mut self, det: Detection) {
        let name = det.tech.name().to_owned();
        self.stats.detections += 1;
        counter!(
            "alertyx_detections_total",
            "technique" => name.clone(),
            "dupe" => if det.is_dupe() { "true" } else { "false" }
        )
        .increment(1);
        alertyx_log!(
            LogLevel::Warn,
            "monitor",
            "detection {} level={} dupe={} artifacts={}",
            det.render(),
            det.level,
            det.is_dupe(),
            det.artifacts.len()
        );

        if det.is_dupe() {
            self.stats.duplicates += 1;
            if self.policy.duplicates {
                self.notifier.leveled(det.level, &format!("DUPLICATE! {}", det.render()));
            }
        } else {
            self.notifier.leveled(det.level, &det.render());
            self.notifier.tabber(1);
            self.notifier.negative(&det.brief);
            for artifact in det.artifacts.iter().rev() {
                self.notifier.event_log(artifact.time, artifact.event.type_header(), &artifact.event.render_line());
            }
        }

        if self.policy.may_clean(&det) {
            if let Some(artifact) = det.latest_artifact() {
                self.notifier.info(&format!("Cleaning: {name}"));
                let res = det.tech.clean(&artifact.event);
                counter!("alertyx_actions_total", "action" => "clean", "outcome" => outcome(res.is_ok())).increment(1);
                match res {
                    Ok(()) => {
                        self.stats.cleaned += 1;
                        self.notifier.positive(&format!("Cleaned: {name}"));
                    }
                    Err(e) => {
                        self.stats.errors += 1;
                        self.notifier.err(&format!("Cleaning failed: {name}: {e}"));
                    }
                }
            }
        }

        if self.policy.may_mitigate_for(&det) {
            self.notifier.info(&format!("Mitigating: {name}"));
            let res = det.tech.mitigate();
            counter!("alertyx_actions_total", "action" => "mitigate", "outcome" => outcome(res.is_ok())).increment(1);
            match res {
                Ok(()) => {
                    self.stats.mitigated += 1;
                    self.notifier.positive(&format!("Mitigated: {name}"));
                }
                Err(e) => {
                    self.stats.errors += 1;
                    self.notifier.err(&format!("Mitigating {name} failed: {e}"));
                }
            }
        }

        if !det.is_dupe() {
            self.notifier.tabber(0);
        }
    }

    /// Drive the loop until quit is requested and every producer has dropped
    /// its sender.
    ///
    /// Quit moves the loop to `Draining`; events already queued are still
    /// processed. Running out of sources does not end the loop, only quit
    /// does. The all-loaded signal is observational only.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        mut rx: PipelineReceivers,
        mut all_loaded: oneshot::Receiver<()>,
        mut quit: QuitListener,
    ) -> MonitorStats {
        let mut loaded_seen = false;
        let mut feeding = true;

        loop {
            tokio::select! {
                Some(name) = rx.loaded.recv() => {
                    alertyx_log!(LogLevel::Info, "monitor", "source '{}' loaded", name);
                    self.notifier.info(&format!("Loaded module: {name}"));
                }
                res = &mut all_loaded, if !loaded_seen => {
                    loaded_seen = true;
                    if res.is_ok() {
                        self.notifier.positive("All modules loaded!");
                        if self.state == MonitorState::Starting {
                            self.transition(MonitorState::Monitoring);
                        }
                    }
                }
                Some(err) = rx.errors.recv() => self.source_error(err),
                ev = events.recv(), if feeding => match ev {
                    Some(ev) => self.handle_event(ev),
                    None if self.state == MonitorState::Draining => break,
                    None => {
                        feeding = false;
                        alertyx_log!(LogLevel::Warn, "monitor", "no event sources left, waiting for quit");
                        self.notifier.err("No event sources left, waiting for quit");
                    }
                },
                _ = quit.wait(), if self.state != MonitorState::Draining => {
                    self.transition(MonitorState::Draining);
                    if !feeding {
                        break;
                    }
                }
            }
        }

        // errors raced against the last event are still worth showing
        while let Ok(err) = rx.errors.try_recv() {
            self.source_error(err);
        }
        self.transition(MonitorState::Terminated);
        let s = self.stats;
        alertyx_log!(
            LogLevel::Info,
            "monitor",
            "events={} detections={} duplicates={} cleaned={} mitigated={} errors={}",
            s.events,
            s.detections,
            s.duplicates,
            s.cleaned,
            s.mitigated,
            s.errors
        );
        s
    }
}

// ============================================================================
// 2 ▸ Driver – sources + loop + bounded shutdown
// ============================================================================

/// Run one monitoring session until `shutdown` resolves (or every source
/// exits on its own), then stop everything within `settings.shutdown_timeout`.
pub async fn run_monitor<F>(
    sources: Vec<Arc<dyn Source>>,
    analyzers: Analyzers,
    policy: Arc<Policy>,
    notifier: Arc<dyn Notifier>,
    settings: &MonitorConfig,
    shutdown: F,
) -> Result<MonitorStats, MonitorError>
where
    F: Future<Output = ()>,
{
    let (mut ctx, receivers) = PipelineContext::new();
    let (tx, events) = mpsc::channel(settings.channel_capacity.max(1));

    if sources.is_empty() {
        alertyx_log!(LogLevel::Warn, "monitor", "no event sources configured");
    }
    let mut sources = spawn_sources(sources, &tx, &mut ctx)?;
    // only the sources may keep the fan-in channel open
    drop(tx);
    let all_loaded = ctx.watch_loaded()?;

    let monitor = Monitor::new(analyzers, policy, notifier);
    let mut main = tokio::spawn(monitor.run(events, receivers, all_loaded, ctx.quit_listener()));

    tokio::select! {
        _ = shutdown => alertyx_log!(LogLevel::Info, "monitor", "shutdown requested"),
        res = &mut main => {
            return res.map_err(|e| MonitorError::LoopPanicked(e.to_string()));
        }
    }

    ctx.request_quit();
    let after = settings.shutdown_timeout;

    if timeout(after, join_all(sources.iter_mut())).await.is_err() {
        let stuck = sources.iter().filter(|h| !h.is_finished()).count();
        alertyx_log!(LogLevel::Warn, "monitor", "{} source(s) still running {:?} after quit, aborting", stuck, after);
        sources.iter().for_each(|h| h.abort());
        // aborted tasks resolve at their next poll and drop their senders
        join_all(sources.iter_mut()).await;
    }

    match timeout(after, &mut main).await {
        Ok(Ok(stats)) => Ok(stats),
        Ok(Err(e)) => Err(MonitorError::LoopPanicked(e.to_string())),
        Err(_) => {
            main.abort();
            Err(MonitorError::ShutdownTimeout { part: "monitor loop", after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisConfig;
    use crate::config::CatalogConfig;
    use crate::events::sources::ChannelSource;
    use crate::events::{EventMeta, OpenEvent};
    use crate::output::{IgnoreList, Note, RecordingNotifier};
    use crate::techs::Catalog;
    use chrono::Utc;
    use crossbeam::channel::unbounded;

    fn analyzers() -> Analyzers {
        let catalog = Catalog::builtin(&CatalogConfig::default());
        let cfg = AnalysisConfig {
            dedup_window: Duration::from_secs(60),
            dedup_capacity: 16,
            shadow_path: "/etc/shadow".into(),
            cron_dirs: vec!["/etc/cron.d".into()],
            bind_tools: vec!["nc".into()],
        };
        Analyzers::builtin(&catalog, &cfg)
    }

    fn shadow_open(uid: u32) -> Event {
        Event::Open(OpenEvent {
            meta: EventMeta { time: Utc::now(), pid: 77, uid, ret_val: 3 },
            comm: "cat".into(),
            path: "/etc/shadow".into(),
            flags: 0,
        })
    }

    #[test]
    fn duplicate_is_silent_unless_asked() {
        let rec = Arc::new(RecordingNotifier::new());
        let mut m = Monitor::new(analyzers(), Arc::new(Policy::passive()), rec.clone());
        m.handle_event(shadow_open(1000));
        assert!(rec.notes().iter().any(|n| matches!(n, Note::Leveled(crate::analysis::Level::High, _))));
        rec.take();

        m.handle_event(shadow_open(1000));
        let notes = rec.take();
        assert_eq!(notes.len(), 1, "only the raw event line: {notes:?}");
        assert!(matches!(notes[0], Note::Event { .. }));
        assert_eq!(m.stats().duplicates, 1);

        let policy = Policy { duplicates: true, ..Policy::passive() };
        let mut m = Monitor::new(analyzers(), Arc::new(policy), rec.clone());
        m.handle_event(shadow_open(1000));
        rec.take();
        m.handle_event(shadow_open(1000));
        assert!(rec.saw("DUPLICATE!"));
        assert!(!rec.notes().iter().any(|n| matches!(n, Note::EventLog { .. })));
    }

    #[test]
    fn ignored_header_still_analyzed() {
        let rec = Arc::new(RecordingNotifier::new());
        let policy = Policy { ignore: IgnoreList::parse("open"), ..Policy::passive() };
        let mut m = Monitor::new(analyzers(), Arc::new(policy), rec.clone());
        m.handle_event(shadow_open(1000));
        let notes = rec.notes();
        assert!(!notes.iter().any(|n| matches!(n, Note::Event { .. })));
        assert_eq!(m.stats().detections, 1);
    }

    #[test]
    fn malformed_event_is_reported_and_skipped() {
        let rec = Arc::new(RecordingNotifier::new());
        let mut m = Monitor::new(analyzers(), Arc::new(Policy::passive()), rec.clone());
        m.handle_event(Event::Open(OpenEvent {
            meta: EventMeta { time: Utc::now(), pid: 1, uid: 0, ret_val: 0 },
            comm: "x".into(),
            path: String::new(),
            flags: 0,
        }));
        assert!(rec.saw("Error: malformed open event"));
        assert_eq!(m.stats().errors, 1);
        assert_eq!(m.stats().detections, 0);
    }

    #[tokio::test]
    async fn driver_drains_and_reports_stats() {
        let (cb_tx, cb_rx) = unbounded();
        let rec = Arc::new(RecordingNotifier::new());
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(ChannelSource::new("open", cb_rx))];
        let settings = MonitorConfig { shutdown_timeout: Duration::from_secs(2), ..MonitorConfig::default() };

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let driver = tokio::spawn({
            let notifier: Arc<dyn Notifier> = rec.clone();
            async move {
                run_monitor(sources, analyzers(), Arc::new(Policy::passive()), notifier, &settings, async {
                    let _ = stop_rx.await;
                })
                .await
            }
        });

        cb_tx.send(shadow_open(1000)).unwrap();
        cb_tx.send(shadow_open(0)).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while rec.notes().iter().filter(|n| matches!(n, Note::Event { .. })).count() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(3), driver).await.unwrap().unwrap().unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.detections, 1);
        assert!(rec.saw("Loaded module: open"));
    }
}

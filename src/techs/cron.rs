//! Persistence through cron tables.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{CheckResult, HuntResult, TechError, Technique};
use crate::events::{Event, EventMeta, OpenEvent};

pub const NAME: &str = "cron_persistence";

const OTHER_WRITE: u32 = 0o002;

/// Fragments that show up in reverse-shell one-liners.
const SHELL_MARKERS: &[&str] = &[
    "/dev/tcp/",
    "/dev/udp/",
    "nc -e",
    "ncat -e",
    "bash -i",
    "mkfifo",
    "socat exec:",
    "import socket",
];

pub struct CronPersistence {
    dirs: Vec<PathBuf>,
    quarantine: PathBuf,
}

impl CronPersistence {
    pub fn new(dirs: Vec<PathBuf>, quarantine: PathBuf) -> Self {
        Self { dirs, quarantine }
    }

    fn existing_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.dirs.iter().filter(|d| d.is_dir())
    }

    fn suspicious(path: &Path) -> bool {
        match fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim_start().starts_with('#'))
                .any(|l| SHELL_MARKERS.iter().any(|m| l.contains(m))),
            Err(e) => {
                log::debug!("{NAME}: skipping {}: {e}", path.display());
                false
            }
        }
    }

    fn writable_dirs(&self) -> Result<Vec<PathBuf>, TechError> {
        let mut out = Vec::new();
        for dir in self.existing_dirs() {
            let mode = fs::metadata(dir).map_err(TechError::io(dir))?.permissions().mode();
            if mode & OTHER_WRITE != 0 {
                out.push(dir.clone());
            }
        }
        Ok(out)
    }
}

/// Synthetic write-open pointing at a cron file found on disk.
fn evidence(path: &Path) -> Event {
    Event::Open(OpenEvent {
        meta: EventMeta { time: Utc::now(), pid: 0, uid: 0, ret_val: 0 },
        comm: "cron".into(),
        path: path.display().to_string(),
        flags: 0o1,
    })
}

impl Technique for CronPersistence {
    fn name(&self) -> &str {
        NAME
    }

    fn hunt(&self) -> Result<HuntResult, TechError> {
        for dir in self.existing_dirs() {
            let entries = fs::read_dir(dir).map_err(TechError::io(dir))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && Self::suspicious(&path) {
                    return Ok(HuntResult::found(evidence(&path)));
                }
            }
        }
        Ok(HuntResult::none())
    }

    fn check(&self) -> Result<CheckResult, TechError> {
        Ok(if self.writable_dirs()?.is_empty() { CheckResult::none() } else { CheckResult::found_bare() })
    }

    /// Move the written cron file into quarantine.
    fn clean(&self, ev: &Event) -> Result<(), TechError> {
        let Event::Open(open) = ev else {
            return Err(TechError::ForeignArtifact(ev.render()));
        };
        let path = Path::new(&open.path);
        if !self.dirs.iter().any(|d| path.starts_with(d) && path != d) {
            return Err(TechError::ForeignArtifact(open.path.clone()));
        }
        if !path.is_file() {
            return Err(TechError::NothingToClean(format!("{} is already gone", open.path)));
        }

        fs::create_dir_all(&self.quarantine).map_err(TechError::io(&self.quarantine))?;
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dest = self.quarantine.join(format!("{file_name}.{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()));

        // rename fails across filesystems, fall back to copy + remove
        if fs::rename(path, &dest).is_err() {
            fs::copy(path, &dest).map_err(TechError::io(&dest))?;
            fs::remove_file(path).map_err(TechError::io(path))?;
        }
        log::info!("{NAME}: quarantined {} as {}", path.display(), dest.display());
        Ok(())
    }

    fn mitigate(&self) -> Result<(), TechError> {
        for dir in self.writable_dirs()? {
            let meta = fs::metadata(&dir).map_err(TechError::io(&dir))?;
            let mode = meta.permissions().mode() & !OTHER_WRITE;
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode)).map_err(TechError::io(&dir))?;
            log::info!("{NAME}: removed other-write from {}", dir.display());
        }
        Ok(())
    }
}

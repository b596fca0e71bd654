//! Technique catalog.
//!
//! Key responsibilities:
//! - Define the `Technique` surface the monitor and the workflows drive
//!   (hunt, check, clean, mitigate, name).
//! - Hold the ordered catalog as an explicit value handed to callers.
//! - Ship the built-in entries, configured from `[catalog]`.

pub mod bind_shell;
pub mod cron;
pub mod history;
pub mod shadow;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use thiserror::Error;

use crate::config::CatalogConfig;
use crate::events::Event;

/// Outcome of a hunt or a check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Finding {
    pub found: bool,
    /// Evidence, when the technique can point at one.
    pub event: Option<Event>,
}

impl Finding {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn found(event: Event) -> Self {
        Self { found: true, event: Some(event) }
    }

    /// Found, but without an event to act on.
    pub fn found_bare() -> Self {
        Self { found: true, event: None }
    }
}

pub type HuntResult = Finding;
pub type CheckResult = Finding;

#[derive(Debug, Error)]
pub enum TechError {
    #[error("nothing to clean: {0}")]
    NothingToClean(String),

    #[error("{0} is not supported by this technique")]
    Unsupported(&'static str),

    #[error("evidence does not belong to this technique: {0}")]
    ForeignArtifact(String),

    #[error("{}: {err}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Command { command: String, status: ExitStatus },
}

impl TechError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |err| TechError::Io { path, err }
    }
}

/// One named attacker technique.
///
/// `clean` must fail with an error rather than touch anything when its
/// artifact is already gone. `mitigate` may be irreversible; callers only
/// reach it under an explicit policy flag.
pub trait Technique: Send + Sync {
    fn name(&self) -> &str;
    fn hunt(&self) -> Result<HuntResult, TechError>;
    fn check(&self) -> Result<CheckResult, TechError>;
    fn clean(&self, ev: &Event) -> Result<(), TechError>;
    fn mitigate(&self) -> Result<(), TechError>;
}

/// Ordered collection of techniques.
#[derive(Clone, Default)]
pub struct Catalog {
    techs: Vec<Arc<dyn Technique>>,
}

impl Catalog {
    pub fn new(techs: Vec<Arc<dyn Technique>>) -> Self {
        Self { techs }
    }

    pub fn builtin(cfg: &CatalogConfig) -> Self {
        Self::new(vec![
            Arc::new(shadow::ShadowRead::new(cfg.shadow_path.clone())),
            Arc::new(bind_shell::BindShell::new(cfg.proc_root.clone(), cfg.bind_tools.clone())),
            Arc::new(cron::CronPersistence::new(cfg.cron_dirs.clone(), cfg.quarantine_dir.clone())),
            Arc::new(history::HistoryEvasion::new(cfg.home_root.clone())),
        ])
    }

    pub fn all(&self) -> &[Arc<dyn Technique>] {
        &self.techs
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Technique>> {
        self.techs.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.techs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techs.is_empty()
    }
}

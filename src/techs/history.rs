//! Shell history disabled or wiped to hide activity.

use std::fs;
use std::path::{Path, PathBuf};

use super::{CheckResult, HuntResult, TechError, Technique};
use crate::events::Event;

pub const NAME: &str = "history_evasion";

const HISTORY_FILES: &[&str] = &[".bash_history", ".zsh_history"];

pub struct HistoryEvasion {
    home_root: PathBuf,
}

impl HistoryEvasion {
    pub fn new(home_root: PathBuf) -> Self {
        Self { home_root }
    }
}

fn points_at_null(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
        && fs::read_link(path).is_ok_and(|target| target == Path::new("/dev/null"))
}

impl Technique for HistoryEvasion {
    fn name(&self) -> &str {
        NAME
    }

    fn hunt(&self) -> Result<HuntResult, TechError> {
        let homes = match fs::read_dir(&self.home_root) {
            Ok(h) => h,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HuntResult::none()),
            Err(e) => return Err(TechError::io(&self.home_root)(e)),
        };
        for home in homes.flatten() {
            if let Some(file) = HISTORY_FILES.iter().map(|f| home.path().join(f)).find(|p| points_at_null(p)) {
                log::debug!("{NAME}: {} is linked to /dev/null", file.display());
                return Ok(HuntResult::found_bare());
            }
        }
        Ok(HuntResult::none())
    }

    fn check(&self) -> Result<CheckResult, TechError> {
        Ok(CheckResult::none())
    }

    fn clean(&self, _ev: &Event) -> Result<(), TechError> {
        Err(TechError::NothingToClean("lost history cannot be restored".into()))
    }

    fn mitigate(&self) -> Result<(), TechError> {
        Err(TechError::Unsupported("mitigate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn history_linked_to_dev_null_is_found() {
        let root = tempfile::tempdir().unwrap();
        let alice = root.path().join("alice");
        let bob = root.path().join("bob");
        fs::create_dir(&alice).unwrap();
        fs::create_dir(&bob).unwrap();
        fs::write(alice.join(".bash_history"), "ls\n").unwrap();

        let tech = HistoryEvasion::new(root.path().to_path_buf());
        assert!(!tech.hunt().unwrap().found);

        symlink("/dev/null", bob.join(".bash_history")).unwrap();
        assert!(tech.hunt().unwrap().found);
    }

    #[test]
    fn missing_home_root_is_not_an_error() {
        let tech = HistoryEvasion::new("/nonexistent/home".into());
        assert!(!tech.hunt().unwrap().found);
        assert!(matches!(tech.mitigate(), Err(TechError::Unsupported(_))));
    }
}

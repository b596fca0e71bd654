//! Password-hash database exposed to, or read by, unprivileged users.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use super::{CheckResult, HuntResult, TechError, Technique};
use crate::events::Event;

pub const NAME: &str = "shadow_read";

const OTHER_READ: u32 = 0o004;
const OTHER_ALL: u32 = 0o007;

pub struct ShadowRead {
    path: PathBuf,
}

impl ShadowRead {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn world_readable(&self) -> Result<bool, TechError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.permissions().mode() & OTHER_READ != 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TechError::io(&self.path)(e)),
        }
    }
}

impl Technique for ShadowRead {
    fn name(&self) -> &str {
        NAME
    }

    fn hunt(&self) -> Result<HuntResult, TechError> {
        Ok(if self.world_readable()? { HuntResult::found_bare() } else { HuntResult::none() })
    }

    fn check(&self) -> Result<CheckResult, TechError> {
        self.hunt()
    }

    fn clean(&self, _ev: &Event) -> Result<(), TechError> {
        Err(TechError::NothingToClean(format!("a read of {} cannot be undone", self.path.display())))
    }

    fn mitigate(&self) -> Result<(), TechError> {
        let mode = fs::metadata(&self.path).map_err(TechError::io(&self.path))?.permissions().mode();
        let safe = mode & !OTHER_ALL;
        if safe != mode {
            fs::set_permissions(&self.path, fs::Permissions::from_mode(safe)).map_err(TechError::io(&self.path))?;
            log::info!("{NAME}: reset {} from {:o} to {:o}", self.path.display(), mode & 0o7777, safe & 0o7777);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow(mode: u32) -> (tempfile::TempDir, ShadowRead) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow");
        fs::write(&path, "root:*:19000:0:99999:7:::\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        (dir, ShadowRead::new(path))
    }

    #[test]
    fn world_readable_shadow_is_found_and_mitigated() {
        let (_dir, tech) = shadow(0o644);
        assert!(tech.hunt().unwrap().found);
        assert!(tech.check().unwrap().found);

        tech.mitigate().unwrap();
        assert!(!tech.check().unwrap().found);
        let mode = fs::metadata(&tech.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn mitigate_only_clears_other_bits() {
        let (_dir, tech) = shadow(0o604);
        tech.mitigate().unwrap();
        let mode = fs::metadata(&tech.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let (_dir, tech) = shadow(0o000);
        tech.mitigate().unwrap();
        let mode = fs::metadata(&tech.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o000);
    }

    #[test]
    fn missing_or_private_shadow_is_not_found() {
        let (_dir, tech) = shadow(0o600);
        assert!(!tech.hunt().unwrap().found);
        let missing = ShadowRead::new("/nonexistent/shadow".into());
        assert_eq!(missing.check().unwrap(), CheckResult::none());
    }
}

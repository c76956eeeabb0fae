//! Startup checks. These are the only failures allowed to abort an install.

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::plan::InstallationPlan;
use crate::Result;

/// Effective user id of this process, read from `/proc/self/status`.
/// `None` when procfs is unavailable.
pub fn effective_uid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_effective_uid(&status)
}

// Uid:	<real>	<effective>	<saved>	<fs>
fn parse_effective_uid(status: &str) -> Option<u32> {
    let line = status.lines().find(|l| l.starts_with("Uid:"))?;
    line.split_whitespace().nth(2)?.parse().ok()
}

/// Verify the install may start.
///
/// Dry runs skip the root requirement since nothing is executed.
pub fn check(config: &ProvisionConfig, plan: &InstallationPlan, dry_run: bool) -> Result<()> {
    if !dry_run {
        match effective_uid() {
            Some(0) => {}
            Some(uid) => {
                return Err(ProvisionError::Precondition(format!(
                    "must run as root (effective uid {})",
                    uid
                )))
            }
            None => {
                return Err(ProvisionError::Precondition(
                    "cannot determine effective uid".to_string(),
                ))
            }
        }
    }

    let backend = config.source_backend();
    if !backend.is_dir() {
        return Err(ProvisionError::MissingPath(backend));
    }

    plan.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Phase;
    use crate::step::{Directive, Step};
    use tempfile::tempdir;

    #[test]
    fn test_parse_effective_uid() {
        let status = "Name:\tsnoknas-install\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(parse_effective_uid(status), Some(0));
        assert_eq!(parse_effective_uid("Name:\tx\n"), None);
    }

    #[test]
    fn test_missing_backend_is_fatal() {
        let src = tempdir().unwrap();
        let mut config = ProvisionConfig::default();
        config.source_dir = src.path().to_path_buf();

        let err = check(&config, &InstallationPlan::default(), true).unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPath(ref p) if p.ends_with("backend")));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_dry_run_validates_plan() {
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("backend")).unwrap();
        let mut config = ProvisionConfig::default();
        config.source_dir = src.path().to_path_buf();

        let good = InstallationPlan::new(vec![
            Phase::new("p").step(Step::generic("ok", Directive::exec(["true"])))
        ]);
        assert!(check(&config, &good, true).is_ok());

        let bad = InstallationPlan::new(vec![
            Phase::new("p").step(Step::generic("empty", Directive::exec(Vec::<String>::new())))
        ]);
        let err = check(&config, &bad, true).unwrap_err();
        assert!(matches!(err, ProvisionError::EmptyCommand { .. }));
    }
}

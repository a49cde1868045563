//! Shared state for one CLI invocation.

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::ArchiveService;
use crate::cli::progress::ProgressMode;
use crate::config::ArchiveAppConfig;
use crate::env::EnvSnapshot;
use crate::error::{ArchiveError, Result};
use crate::evidence::EvidenceLog;
use crate::retry::retry_with_backoff_when;
use crate::storage::{ArchiveDal, open_dal};
use crate::utils::git::head_commit;

pub struct AppContext {
    pub config: ArchiveAppConfig,
    pub env: EnvSnapshot,
    /// Emit JSON on stdout instead of human output.
    pub json: bool,
    pub quiet: bool,
    /// Directory the command runs in; plan roots default to it.
    pub cwd: PathBuf,
}

impl AppContext {
    #[must_use]
    pub fn new(config: ArchiveAppConfig, env: EnvSnapshot, json: bool, quiet: bool) -> Self {
        Self {
            config,
            env,
            json,
            quiet,
            cwd: PathBuf::from("."),
        }
    }

    /// `explicit`, else the configured default actor.
    #[must_use]
    pub fn actor(&self, explicit: Option<&str>) -> String {
        explicit
            .filter(|actor| !actor.trim().is_empty())
            .map_or_else(|| self.config.evidence.actor.clone(), ToString::to_string)
    }

    /// Evidence log in the configured directory, stamped with the current HEAD.
    #[must_use]
    pub fn evidence(&self) -> EvidenceLog {
        let dir = if self.config.evidence.dir.is_absolute() {
            self.config.evidence.dir.clone()
        } else {
            self.cwd.join(&self.config.evidence.dir)
        };
        EvidenceLog::new(dir).with_commit(head_commit(&self.cwd).ok().flatten())
    }

    /// Open the configured backend. Connection failures are retried per `[retry]`.
    pub fn open_dal(&self) -> Result<Arc<dyn ArchiveDal>> {
        let dal = retry_with_backoff_when(&self.config.retry, ArchiveError::is_retryable, || {
            open_dal(&self.config.backend)
        })?;
        Ok(Arc::from(dal))
    }

    pub fn service(&self) -> Result<ArchiveService> {
        Ok(ArchiveService::new(self.open_dal()?, self.evidence())
            .with_performance(self.config.performance.clone())
            .with_default_actor(self.config.evidence.actor.clone()))
    }

    #[must_use]
    pub fn progress_mode(&self) -> ProgressMode {
        ProgressMode::detect(self.json, self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> AppContext {
        let mut config = ArchiveAppConfig::default();
        config.backend.url = format!(
            "sqlite:///{}",
            dir.path().join("archive.sqlite").display()
        );
        config.evidence.dir = dir.path().join("evidence");
        config.evidence.actor = "configured".to_string();
        AppContext::new(config, EnvSnapshot::default(), false, true)
    }

    #[test]
    fn actor_falls_back_to_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert_eq!(ctx.actor(Some("alice")), "alice");
        assert_eq!(ctx.actor(Some("  ")), "configured");
        assert_eq!(ctx.actor(None), "configured");
    }

    #[test]
    fn service_opens_sqlite_backend() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let service = ctx.service().unwrap();
        assert_eq!(service.default_actor(), "configured");
        assert_eq!(service.summary().unwrap().tombstones, 0);
        assert_eq!(ctx.evidence().dir(), dir.path().join("evidence"));
    }
}

use crate::infrastructure::config::{Settings, ensure_default_configs, load_settings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "tutor_schedule.sqlite";

/// Directory layout of one engine workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl WorkspaceLayout {
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            config_dir: root.join("config"),
            state_dir: root.join("state"),
            logs_dir: root.join("logs"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }

    fn create_dirs(&self) -> Result<(), InfraError> {
        for dir in [&self.config_dir, &self.state_dir, &self.logs_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub settings: Settings,
}

/// Creates the workspace directories, writes missing default configs, loads
/// settings and applies the database schema. Safe to call on every start.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let layout = WorkspaceLayout::under(workspace_root);
    layout.create_dirs()?;

    ensure_default_configs(&layout.config_dir)?;
    let settings = load_settings(&layout.config_dir)?;
    let database_path = layout.database_path();
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: layout.root,
        config_dir: layout.config_dir,
        logs_dir: layout.logs_dir,
        database_path,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_ROOT: AtomicUsize = AtomicUsize::new(0);

    fn temp_root() -> PathBuf {
        let sequence = NEXT_TEMP_ROOT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "tutor-schedule-bootstrap-tests-{}-{}",
            std::process::id(),
            sequence
        ))
    }

    #[test]
    fn bootstrap_is_idempotent_and_keeps_edited_configs() {
        let root = temp_root();
        let first = bootstrap_workspace(&root).expect("first bootstrap");
        assert!(first.database_path.exists());
        assert_eq!(first.settings.default_break_minutes, 60);

        fs::write(
            first.config_dir.join("scheduling.json"),
            r#"{"schema":1,"defaultBreakMinutes":45,"enforceAvailabilityOnRequest":false}"#,
        )
        .expect("edit scheduling config");
        let second = bootstrap_workspace(&root).expect("second bootstrap");
        assert_eq!(second.settings.default_break_minutes, 45);
        assert!(!second.settings.enforce_availability_on_request);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn invalid_config_fails_bootstrap() {
        let root = temp_root();
        let layout = WorkspaceLayout::under(&root);
        layout.create_dirs().expect("dirs");
        fs::write(
            layout.config_dir.join("app.json"),
            r#"{"schema":1,"appName":"Tutor Schedule","timezone":"Mars/Olympus"}"#,
        )
        .expect("write app config");

        let result = bootstrap_workspace(&root);
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));

        let _ = fs::remove_dir_all(&root);
    }
}

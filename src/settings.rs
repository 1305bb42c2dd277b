use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

// App settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // Last journal directory, restored at startup
    pub journal_folder: Option<String>,
}

/// Settings file plus the in-memory copy it was loaded into.
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_settings(&path);
        Self {
            path,
            settings: RwLock::new(settings),
        }
    }

    #[cfg(test)]
    fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    fn settings(&self) -> Settings {
        self.settings.read().expect("settings read lock").clone()
    }

    pub fn journal_folder(&self) -> Option<String> {
        self.settings
            .read()
            .expect("settings read lock")
            .journal_folder
            .clone()
    }

    pub fn set_journal_folder(&self, folder: &str) -> Result<()> {
        let snapshot = {
            let mut settings = self.settings.write().expect("settings write lock");
            settings.journal_folder = Some(folder.to_string());
            settings.clone()
        };
        save_settings(&self.path, &snapshot)
    }
}

// Load settings from disk
fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return Settings::default();
    }

    match std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
    {
        Ok(settings) => settings,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable settings, using defaults");
            Settings::default()
        }
    }
}

// Save settings to disk
fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating settings directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)
        .with_context(|| format!("writing settings to {}", path.display()))?;
    Ok(())
}

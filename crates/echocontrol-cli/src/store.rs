//! Config loading and session file persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use echocontrol_core::{EchoConfig, Identity};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "echocontrol.toml";

/// Load config from `path`, else `echocontrol.toml` if present, else
/// defaults. Environment variables override file values.
pub fn load_config(path: Option<&Path>) -> Result<EchoConfig> {
    let config = match path {
        Some(path) => read_config(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_config(default_path)?
            } else {
                EchoConfig::default()
            }
        }
    };
    Ok(config.with_env_overrides())
}

fn read_config(path: &Path) -> Result<EchoConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Identity of a login that was started but not yet registered.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingLogin {
    pub identity: Identity,
    pub site: String,
}

/// Files kept for one account.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session_file: PathBuf,
}

impl SessionStore {
    pub fn new(session_file: impl Into<PathBuf>) -> Self {
        Self {
            session_file: session_file.into(),
        }
    }

    pub fn session_file(&self) -> &Path {
        &self.session_file
    }

    fn pending_file(&self) -> PathBuf {
        let mut name = self.session_file.as_os_str().to_owned();
        name.push(".pending");
        PathBuf::from(name)
    }

    /// Persisted session text, `None` when there is no session file.
    pub fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.session_file) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read {}", self.session_file.display())),
        }
    }

    /// Write session text. Empty text removes the file instead.
    pub fn save(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.remove_session();
        }
        std::fs::write(&self.session_file, text)
            .with_context(|| format!("Failed to write {}", self.session_file.display()))
    }

    pub fn save_pending(&self, pending: &PendingLogin) -> Result<()> {
        let path = self.pending_file();
        std::fs::write(&path, serde_json::to_string_pretty(pending)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load_pending(&self) -> Result<Option<PendingLogin>> {
        let path = self.pending_file();
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn clear_pending(&self) -> Result<()> {
        remove_if_exists(&self.pending_file())
    }

    /// Remove the session file and any pending login.
    pub fn remove_session(&self) -> Result<()> {
        remove_if_exists(&self.session_file)?;
        self.clear_pending()
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use which::which;

use crate::{JournalError, Result};

const APP_NAME: &str = "moodnotes";
const CONFIG_FILE: &str = "config.json";

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Directory holding the per-user local note cache
    pub cache_dir: PathBuf,

    /// Synchronized folder holding the remote note documents
    pub remote_dir: PathBuf,

    /// User signed in through `login`
    pub default_user: Option<String>,

    /// Quiet period before an edit is written remotely (milliseconds)
    pub save_debounce_ms: u64,

    /// How long the "saved" status stays visible (milliseconds)
    pub saved_display_ms: u64,

    /// Default editor command
    pub editor_command: Option<String>,

    /// Insight service settings
    pub ai: AiConfig,
}

/// Settings for the OpenAI-compatible insight endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "MOODNOTES_AI_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    /// The API key, if the configured variable is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".moodnotes"));

        Self {
            cache_dir: data_dir.join("cache"),
            remote_dir: data_dir.join("remote"),
            default_user: None,
            save_debounce_ms: 500,
            saved_display_ms: 2000,
            editor_command: None,
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Location of the config file when none is given on the command line
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Loads the config at `path`, writing defaults when the file is missing
    pub fn load_or_init(path: &Path) -> Result<Config> {
        if !path.exists() {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        debug!("Loading config from {}", path.display());
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| JournalError::ConfigError {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    warn!("Failed to create config directory: {}", e);
                    JournalError::DirectoryError {
                        path: parent.to_path_buf(),
                    }
                })?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    // This method provides smart fallbacks when no editor is configured
    pub fn get_editor_command(&self) -> String {
        if let Some(editor) = &self.editor_command {
            return editor.clone();
        }

        if let Ok(editor) = std::env::var("EDITOR") {
            return editor;
        }

        if cfg!(windows) {
            "notepad".to_string()
        } else if cfg!(target_os = "macos") {
            "open -t".to_string()
        } else {
            for editor in &["nano", "vim", "vi", "emacs"] {
                if which(editor).is_ok() {
                    return editor.to_string();
                }
            }
            "nano".to_string()
        }
    }
}

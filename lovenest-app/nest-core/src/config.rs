use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{NestError, Result};

/// How chat payloads are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretMode {
    /// One static passphrase shared by every nest. Offers no confidentiality
    /// between different pairs; kept for compatibility with existing messages.
    SharedStatic,
    /// Per-nest key agreed by X25519 between the two partners' devices.
    PerNest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub lock_timeout_secs: u64,
    pub lock_on_background: bool,
    pub pin_length: usize,
    pub pairing_code_length: usize,
    pub secret_mode: SecretMode,
    pub keyring_service: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 60,
            lock_on_background: false,
            pin_length: 4,
            pairing_code_length: 6,
            secret_mode: SecretMode::SharedStatic,
            keyring_service: "com.lovenest.app".to_string(),
        }
    }
}

impl CoreSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_secs == 0 {
            return Err(NestError::Config("lock_timeout_secs must be positive".into()));
        }
        if !(4..=8).contains(&self.pin_length) {
            return Err(NestError::Config(format!(
                "pin_length must be between 4 and 8, got {}",
                self.pin_length
            )));
        }
        if !(4..=12).contains(&self.pairing_code_length) {
            return Err(NestError::Config(format!(
                "pairing_code_length must be between 4 and 12, got {}",
                self.pairing_code_length
            )));
        }
        if self.keyring_service.trim().is_empty() {
            return Err(NestError::Config("keyring_service must not be empty".into()));
        }
        Ok(())
    }
}

fn get_settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings(data_dir: &Path) -> Result<CoreSettings> {
    let path = get_settings_path(data_dir);

    if !path.exists() {
        return Ok(CoreSettings::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: CoreSettings = serde_json::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(data_dir: &Path, settings: &CoreSettings) -> Result<()> {
    settings.validate()?;
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(get_settings_path(data_dir), content)?;
    Ok(())
}

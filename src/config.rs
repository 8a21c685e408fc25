//! User preferences that fill in window options left as `None`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backends::WindowBackendKind;
use crate::errors::Result;
use crate::gamma::GammaErrorPolicy;
use crate::visual::units::Units;

/// Environment variable naming a JSON preferences file.
pub const PREFS_ENV_VAR: &str = "PSYWIN_PREFS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub fullscr: bool,
    pub allow_gui: bool,
    pub win_type: WindowBackendKind,
    pub units: Units,
    pub gamma_error_policy: GammaErrorPolicy,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            fullscr: false,
            allow_gui: true,
            win_type: WindowBackendKind::Winit,
            units: Units::Norm,
            gamma_error_policy: GammaErrorPolicy::Raise,
        }
    }
}

impl Preferences {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let prefs = serde_json::from_reader(std::io::BufReader::new(file))?;
        log::debug!("Loaded preferences from {}", path.as_ref().display());
        Ok(prefs)
    }

    /// Load from the file named by `PSYWIN_PREFS`, or fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(PREFS_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

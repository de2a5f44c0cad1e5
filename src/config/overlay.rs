// Overlay configuration file
// A secondary key-value source merged on top of the host property map. The
// file's mtime is checked on every message; an advance reloads the keys and
// forces a rebuild through the fingerprint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use super::ConfigError;

#[derive(Debug, Default)]
struct OverlayState {
    mtime: Option<SystemTime>,
    values: HashMap<String, String>,
}

/// Mtime-gated TOML overlay. The file is a flat table of string values.
#[derive(Debug)]
pub struct OverlaySource {
    path: PathBuf,
    state: Mutex<OverlayState>,
}

impl OverlaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(OverlayState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current overlay values, re-read when the file's mtime has advanced.
    /// A missing file yields an empty overlay; a malformed file is an error.
    pub fn snapshot(&self) -> Result<HashMap<String, String>, ConfigError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mtime = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.modified().ok(),
            Err(_) => {
                state.mtime = None;
                state.values.clear();
                return Ok(HashMap::new());
            }
        };

        if mtime != state.mtime || state.mtime.is_none() {
            let text = std::fs::read_to_string(&self.path)
                .map_err(|e| ConfigError::Overlay(format!("{}: {e}", self.path.display())))?;
            let values: HashMap<String, String> = toml::from_str(&text)
                .map_err(|e| ConfigError::Overlay(format!("{}: {e}", self.path.display())))?;
            tracing::info!(
                path = %self.path.display(),
                keys = values.len(),
                "overlay configuration reloaded"
            );
            state.mtime = mtime;
            state.values = values;
        }

        Ok(state.values.clone())
    }
}

/// Merge overlay values over the host property map. Overlay wins.
pub fn merge_properties(
    base: &HashMap<String, String>,
    overlay: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overlay);
    merged
}

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

/// Identifies one physical frame so several frames can share a catalog
/// without sharing repeat-avoidance state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Reads the identifier at `path`, generating and persisting a fresh one
    /// the first time.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => return Ok(Self(raw.trim().to_string())),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read device id at {}", path.display()));
            }
        }

        let id = Uuid::new_v4().to_string();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, format!("{id}\n"))
            .with_context(|| format!("failed to persist device id at {}", path.display()))?;
        info!(device_id = %id, path = %path.display(), "generated new device id");
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

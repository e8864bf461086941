use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// File holding this frame's persistent device identifier.
    pub device_id_path: PathBuf,
    /// Timezone that defines "today" and the midnight rollover.
    pub timezone: Tz,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub display: DisplayConfig,
    pub selection: SelectionOptions,
    pub rotation: RotationOptions,
    pub overlay: OverlayOptions,
    pub retry: RetryPolicy,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.device_id_path.as_os_str().is_empty(),
            "device-id-path must not be empty"
        );
        self.catalog.validate().context("invalid catalog section")?;
        self.storage.validate().context("invalid storage section")?;
        self.display.validate().context("invalid display section")?;
        self.selection.validate()?;
        self.rotation.validate()?;
        self.overlay.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            device_id_path: PathBuf::from("/var/lib/memory-frame/device-id"),
            timezone: Tz::UTC,
            catalog: CatalogConfig::default(),
            storage: StorageConfig::default(),
            display: DisplayConfig::default(),
            selection: SelectionOptions::default(),
            rotation: RotationOptions::default(),
            overlay: OverlayOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CatalogConfig {
    /// Inline connection string. Prefer `database-url-env` on shared machines.
    pub database_url: Option<String>,
    /// Environment variable consulted when `database-url` is unset.
    pub database_url_env: String,
    /// Catalog table (read-only): uuid, name, image_proxy_name, creation_date.
    pub assets_table: String,
    /// Display log table owned by the frame; created on startup when missing.
    pub display_log_table: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub max_connections: u32,
}

impl CatalogConfig {
    pub fn resolve_database_url(&self) -> Result<String> {
        if let Some(url) = self.database_url.as_ref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.clone());
        }
        std::env::var(&self.database_url_env)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "catalog.database-url is unset and ${} is empty",
                    self.database_url_env
                )
            })
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            is_sql_identifier(&self.assets_table),
            "assets-table '{}' is not a valid table name",
            self.assets_table
        );
        ensure!(
            is_sql_identifier(&self.display_log_table),
            "display-log-table '{}' is not a valid table name",
            self.display_log_table
        );
        ensure!(self.max_connections > 0, "max-connections must be > 0");
        ensure!(
            self.database_url.is_some() || !self.database_url_env.trim().is_empty(),
            "either database-url or database-url-env must be set"
        );
        Ok(())
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_url_env: "DATABASE_URL".to_string(),
            assets_table: "assets".to_string(),
            display_log_table: "displayed_images".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_connections: 2,
        }
    }
}

/// Table names are spliced into SQL, so only `[A-Za-z0-9_]` segments with an
/// optional schema qualifier are accepted.
fn is_sql_identifier(raw: &str) -> bool {
    let segments: Vec<&str> = raw.split('.').collect();
    segments.len() <= 2
        && segments.iter().all(|seg| {
            !seg.is_empty()
                && !seg.starts_with(|c: char| c.is_ascii_digit())
                && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Private S3 bucket (or an S3-compatible endpoint). Credentials come
    /// from the standard AWS environment variables or profile.
    S3 {
        bucket: String,
        /// Falls back to `AWS_REGION` / the profile when unset.
        #[serde(default)]
        region: Option<String>,
        #[serde(default, rename = "endpoint-url")]
        endpoint_url: Option<String>,
        #[serde(default, rename = "force-path-style")]
        force_path_style: bool,
        #[serde(
            default = "StorageConfig::default_timeout",
            rename = "timeout",
            with = "humantime_serde"
        )]
        timeout: Duration,
    },
    /// Objects fetched with `GET {base-url}/{key}`.
    Http {
        #[serde(rename = "base-url")]
        base_url: String,
        /// Environment variable holding a bearer token, if the bucket needs one.
        #[serde(default, rename = "bearer-token-env")]
        bearer_token_env: Option<String>,
        #[serde(
            default = "StorageConfig::default_timeout",
            rename = "timeout",
            with = "humantime_serde"
        )]
        timeout: Duration,
    },
    /// Objects read from `{root}/{key}` on local disk.
    Directory { root: PathBuf },
}

impl StorageConfig {
    const fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn validate(&self) -> Result<()> {
        match self {
            StorageConfig::S3 {
                bucket,
                region,
                endpoint_url,
                ..
            } => {
                ensure!(!bucket.trim().is_empty(), "storage.bucket must not be empty");
                if let Some(region) = region {
                    ensure!(!region.trim().is_empty(), "storage.region must not be blank");
                }
                if let Some(url) = endpoint_url {
                    ensure!(
                        url.starts_with("http://") || url.starts_with("https://"),
                        "storage.endpoint-url must be an http(s) URL"
                    );
                }
            }
            StorageConfig::Http { base_url, .. } => {
                ensure!(
                    base_url.starts_with("http://") || base_url.starts_with("https://"),
                    "storage.base-url must be an http(s) URL"
                );
            }
            StorageConfig::Directory { root } => {
                ensure!(
                    !root.as_os_str().is_empty(),
                    "storage.root must not be empty"
                );
            }
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Directory {
            root: PathBuf::from("photos"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Where the composed frame is written as PNG.
    pub output: PathBuf,
    /// Optional shell command that pushes the written frame to the panel.
    /// `FRAME_PATH` is exported to it.
    pub command: Option<String>,
}

impl DisplayConfig {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.width > 0 && self.height > 0,
            "display width and height must be positive"
        );
        ensure!(
            !self.output.as_os_str().is_empty(),
            "display.output must not be empty"
        );
        if let Some(cmd) = &self.command {
            ensure!(!cmd.trim().is_empty(), "display.command must not be blank");
        }
        Ok(())
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            output: PathBuf::from("/run/memory-frame/frame.png"),
            command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SelectionOptions {
    /// Days before a fallback image may be shown again on this device.
    pub repeat_window_days: u32,
    /// How many days back the fallback search walks.
    pub fallback_horizon_days: u32,
    /// Maximum eligible fallback images taken from one day.
    pub fallback_cap: usize,
    /// Fixes the fallback shuffle order (useful for tests and previews).
    pub shuffle_seed: Option<u64>,
}

impl SelectionOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.fallback_cap >= 1,
            "selection.fallback-cap must be >= 1"
        );
        Ok(())
    }
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            repeat_window_days: 10,
            fallback_horizon_days: 30,
            fallback_cap: 5,
            shuffle_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RotationOptions {
    /// Time each image stays up before advancing.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Back-off before reselecting when there is nothing to show.
    #[serde(with = "humantime_serde")]
    pub idle_retry: Duration,
}

impl RotationOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.interval.is_zero(),
            "rotation.interval must be positive"
        );
        ensure!(
            !self.idle_retry.is_zero(),
            "rotation.idle-retry must be positive"
        );
        Ok(())
    }
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            idle_retry: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OverlayOptions {
    pub enabled: bool,
    /// Font file; takes precedence over `font-family`.
    pub font_path: Option<PathBuf>,
    /// System font family looked up through fontdb.
    pub font_family: Option<String>,
    pub font_size_px: f32,
    /// Inset of the labels from the photo's corners.
    pub margin_px: u32,
    /// Thickness of the edge strip sampled for letterbox colors.
    pub edge_sample_px: u32,
    /// Prefix on the date label when a prior day's images are shown.
    pub fallback_marker: String,
}

impl OverlayOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.font_size_px.is_finite() && self.font_size_px > 0.0,
            "overlay.font-size-px must be positive"
        );
        ensure!(
            (1..=10).contains(&self.edge_sample_px),
            "overlay.edge-sample-px must be between 1 and 10"
        );
        if let Some(family) = &self.font_family {
            ensure!(
                !family.trim().is_empty(),
                "overlay.font-family must not be blank when provided"
            );
        }
        Ok(())
    }
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            font_path: None,
            font_family: None,
            font_size_px: 28.0,
            margin_px: 12,
            edge_sample_px: 10,
            fallback_marker: "*".to_string(),
        }
    }
}

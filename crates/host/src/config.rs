//! Link configuration management

use crate::usb::ReaderSettings;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SYSTEM_CONFIG_PATH: &str = "/etc/usb-link/link.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "LinkSettings::default_log_level")]
    pub log_level: String,
    /// Device to connect to when none is given on the command line
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            vendor_id: None,
            product_id: None,
        }
    }
}

impl LinkSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Bound on a single IN poll
    #[serde(default = "ReaderConfig::default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Pause between polls
    #[serde(default = "ReaderConfig::default_read_interval")]
    pub read_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout(),
            read_interval_ms: Self::default_read_interval(),
        }
    }
}

impl ReaderConfig {
    fn default_read_timeout() -> u64 {
        50
    }

    fn default_read_interval() -> u64 {
        50
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Bound on one queued OUT transfer (libusb backend)
    #[serde(default = "WriterConfig::default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: Self::default_write_timeout(),
        }
    }
}

impl WriterConfig {
    fn default_write_timeout() -> u64 {
        1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Events buffered before the reader starts dropping them
    #[serde(default = "EventSettings::default_capacity")]
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

impl EventSettings {
    fn default_capacity() -> usize {
        256
    }
}

impl LinkConfig {
    /// Read `path`, or the first existing file on [`Self::search_paths`]
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::search_paths()
                .into_iter()
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| anyhow!("no link.toml on the search path"))?,
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("Cannot parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        tracing::info!("Using configuration {}", path.display());
        Ok(config)
    }

    /// [`Self::load`] from the search path, falling back to built-in defaults
    pub fn load_or_default() -> Self {
        Self::load(None).unwrap_or_else(|e| {
            tracing::debug!("{:#}; using built-in defaults", e);
            Self::default()
        })
    }

    /// Write pretty TOML to `path`, creating missing parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("Cannot serialize configuration")?;

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))?;

        tracing::info!("Wrote configuration {}", path.display());
        Ok(())
    }

    /// Per-user config file, `<config dir>/usb-link/link.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("usb-link").join("link.toml"))
            .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH))
    }

    /// Files tried by [`Self::load`] when no path is given, in order
    pub fn search_paths() -> Vec<PathBuf> {
        vec![Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)]
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.reader.read_timeout_ms == 0 {
            bail!("reader.read_timeout_ms must be greater than zero");
        }
        if self.reader.read_interval_ms == 0 {
            bail!("reader.read_interval_ms must be greater than zero");
        }
        if self.writer.write_timeout_ms == 0 {
            bail!("writer.write_timeout_ms must be greater than zero");
        }
        if self.events.capacity == 0 {
            bail!("events.capacity must be greater than zero");
        }
        if self.link.vendor_id.is_some() != self.link.product_id.is_some() {
            bail!("link.vendor_id and link.product_id must be set together");
        }
        Ok(())
    }

    /// Reader timing derived from the config
    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            read_timeout: Duration::from_millis(self.reader.read_timeout_ms),
            read_interval: Duration::from_millis(self.reader.read_interval_ms),
        }
    }

    /// Bound on one queued OUT transfer
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.writer.write_timeout_ms)
    }

    /// Configured target device, if any
    pub fn target(&self) -> Option<(u16, u16)> {
        self.link.vendor_id.zip(self.link.product_id)
    }
}

/// Parse a USB ID given as hex (`0x04D8`, `04d8`) or decimal with a `#` prefix (`#1240`)
pub fn parse_usb_id(s: &str) -> Result<u16> {
    let s = s.trim();
    let parsed = if let Some(decimal) = s.strip_prefix('#') {
        decimal.parse::<u16>().ok()
    } else {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u16::from_str_radix(hex, 16).ok()
    };

    parsed.ok_or_else(|| anyhow!("Invalid USB ID: {}", s))
}

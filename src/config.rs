//! Persisted device configuration.
//!
//! The file is written once a color has been sent successfully and read back on every later
//! invocation, so `rgbset set <color>` works without repeating the USB ids.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "rgbset";
pub const CONFIG_FILE: &str = "config.json";

// Lian Li controller layout: 9 byte header, RGB, 52 byte footer (64 bytes total).
pub const DEFAULT_ENDPOINT: u8 = 0x02;
pub const DEFAULT_PACKET_HEADER: &str = "018500000014030400";
pub const DEFAULT_PACKET_FOOTER: &str = "00000000000000000000000000180000000000000000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(serialize_with = "usb_id::serialize", deserialize_with = "usb_id::deserialize")]
    pub vid: u16,
    #[serde(serialize_with = "usb_id::serialize", deserialize_with = "usb_id::deserialize")]
    pub pid: u16,
    pub endpoint: u8,
    #[serde(serialize_with = "hex_bytes::serialize", deserialize_with = "hex_bytes::deserialize")]
    pub packet_header: Vec<u8>,
    #[serde(serialize_with = "hex_bytes::serialize", deserialize_with = "hex_bytes::deserialize")]
    pub packet_footer: Vec<u8>,
}

impl DeviceConfig {
    /// Config for a new device using the built-in endpoint and packet layout.
    pub fn with_defaults(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            endpoint: DEFAULT_ENDPOINT,
            // The defaults are compile-time hex literals covered by tests.
            packet_header: hex::decode(DEFAULT_PACKET_HEADER).unwrap_or_default(),
            packet_footer: hex::decode(DEFAULT_PACKET_FOOTER).unwrap_or_default(),
        }
    }

    /// Combine a stored config with `--vid`/`--pid` overrides. Flags win over the file; the
    /// endpoint and packet layout always come from the file (or the defaults without one).
    pub fn resolve(
        stored: Option<DeviceConfig>,
        vid: Option<u16>,
        pid: Option<u16>,
    ) -> Result<Self> {
        match stored {
            Some(mut config) => {
                if let Some(vid) = vid {
                    config.vid = vid;
                }
                if let Some(pid) = pid {
                    config.pid = pid;
                }
                Ok(config)
            }
            None => match (vid, pid) {
                (Some(vid), Some(pid)) => Ok(Self::with_defaults(vid, pid)),
                _ => bail!(
                    "VID and PID are missing and no saved configuration was found.\n\
                     First use: rgbset set <RRGGBB> --vid <VID> --pid <PID>\n\
                     Run 'rgbset scan' to find your device ids."
                ),
            },
        }
    }
}

/// Parse a USB vendor/product id written in hex, with or without a `0x` prefix.
pub fn parse_usb_id(s: &str) -> Result<u16> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!(
            "Invalid USB id '{}' (expected up to 4 hex digits, e.g. 0x0416)",
            s
        );
    }
    u16::from_str_radix(digits, 16).map_err(|e| anyhow!("Invalid USB id '{}': {}", s, e))
}

pub fn format_usb_id(id: u16) -> String {
    format!("0x{:04x}", id)
}

/// Reads and writes the single config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/rgbset/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine the user configuration directory"))?;
        Ok(base.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no file exists yet. A file that exists but cannot be parsed is an error.
    pub fn load(&self) -> Result<Option<DeviceConfig>> {
        if !self.path.exists() {
            log::debug!("no config at {}", self.path.display());
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file {}", self.path.display()))?;
        let config: DeviceConfig = serde_json::from_str(&text).with_context(|| {
            format!(
                "Config file {} is corrupt or incomplete (delete it and pass --vid/--pid again)",
                self.path.display()
            )
        })?;
        log::debug!(
            "loaded config from {}: vid={} pid={} endpoint=0x{:02x}",
            self.path.display(),
            format_usb_id(config.vid),
            format_usb_id(config.pid),
            config.endpoint
        );
        Ok(Some(config))
    }

    /// Write the config atomically: serialize to a sibling temp file, then rename over the target.
    pub fn save(&self, config: &DeviceConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }

        let mut text = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        text.push('\n');

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .with_context(|| format!("Failed to write config file {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(anyhow!(e).context(format!(
                "Failed to replace config file {}",
                self.path.display()
            )));
        }
        log::info!("saved config to {}", self.path.display());
        Ok(())
    }
}

mod usb_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_usb_id(*id))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        match RawId::deserialize(deserializer)? {
            RawId::Text(s) => parse_usb_id(&s).map_err(serde::de::Error::custom),
            RawId::Number(n) => u16::try_from(n)
                .map_err(|_| serde::de::Error::custom(format!("USB id {} out of range", n))),
        }
    }
}

mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

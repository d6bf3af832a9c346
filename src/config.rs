use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::base::{REC_HDR_SIZE, REC_TAIL_SIZE, TARGET_LEN};
use crate::error::{Error, Result};
use crate::llog::header;

/// Geometry and durability settings shared by a catalog and its plain logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Fixed chunk size: one header, or one framed record
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bits in the header bitmap; also the number of index slots per log
    #[serde(default = "default_bitmap_bits")]
    pub bitmap_bits: u32,

    /// Owning-target identity stamped into every header
    #[serde(default = "default_target")]
    pub target: String,

    /// Credits requested from the store for each transactional write
    #[serde(default = "default_write_credits")]
    pub write_credits: u32,

    /// Flush file data after each write (directory store only)
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

/// Top-level configuration file for the control tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatlogConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one file per log object
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_chunk_size() -> usize {
    8192
}

fn default_bitmap_bits() -> u32 {
    32768
}

fn default_target() -> String {
    "catlog".to_string()
}

fn default_write_credits() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./catlog-data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            chunk_size: default_chunk_size(),
            bitmap_bits: default_bitmap_bits(),
            target: default_target(),
            write_credits: default_write_credits(),
            sync_writes: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// Config with an explicit geometry and defaults for everything else
    pub fn with_geometry(chunk_size: usize, bitmap_bits: u32) -> Self {
        LogConfig {
            chunk_size,
            bitmap_bits,
            ..LogConfig::default()
        }
    }

    /// Largest payload one framed record can carry
    pub fn max_payload(&self) -> usize {
        self.chunk_size.saturating_sub(REC_HDR_SIZE + REC_TAIL_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bitmap_bits < 64 || self.bitmap_bits % 64 != 0 {
            return Err(Error::Config(format!(
                "log.bitmap_bits must be a non-zero multiple of 64, got {}",
                self.bitmap_bits
            )));
        }
        if self.max_payload() == 0 {
            return Err(Error::Config(format!(
                "log.chunk_size {} leaves no room for a payload",
                self.chunk_size
            )));
        }
        let header_len = header::encoded_len(self.bitmap_bits);
        if header_len > self.chunk_size {
            return Err(Error::Config(format!(
                "log header needs {} bytes for {} bitmap bits but chunk_size is {}",
                header_len, self.bitmap_bits, self.chunk_size
            )));
        }
        if self.target.len() > TARGET_LEN {
            return Err(Error::Config(format!(
                "log.target must be at most {} bytes",
                TARGET_LEN
            )));
        }
        if self.write_credits == 0 {
            return Err(Error::Config("log.write_credits cannot be 0".into()));
        }
        Ok(())
    }
}

impl CatlogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: CatlogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("store.data_dir cannot be empty".into()));
        }
        self.log.validate()
    }
}

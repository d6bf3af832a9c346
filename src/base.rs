use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Record type of the header chunk at index 0 of every log
pub const LLOG_HDR_MAGIC: u32 = 0x1064_5539;
/// Record type of catalog entries referencing a plain log
pub const LLOG_LOGID_MAGIC: u32 = 0x1064_553b;

/// Destroy the log once its last live record is canceled
pub const LLOG_F_ZAP_WHEN_EMPTY: u32 = 0x1;
pub const LLOG_F_IS_CAT: u32 = 0x2;
pub const LLOG_F_IS_PLAIN: u32 = 0x4;

/// Record header: length, index, type (all u32)
pub const REC_HDR_SIZE: usize = 12;
/// Record tail: length, index (all u32)
pub const REC_TAIL_SIZE: usize = 8;

/// Size of the owning-target identity field in a log header
pub const TARGET_LEN: usize = 40;

/// Stable identity of a backing object: object id + generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct LogId {
    pub oid: u64,
    pub ogen: u32,
}

impl LogId {
    pub fn new(oid: u64, ogen: u32) -> Self {
        LogId { oid, ogen }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:x}", self.oid, self.ogen)
    }
}

impl FromStr for LogId {
    type Err = String;

    /// Parses `<oid hex>:<gen hex>`, with or without a `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (oid, ogen) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid log id '{}', expected oid:gen", s))?;
        let oid = u64::from_str_radix(oid.trim_start_matches("0x"), 16)
            .map_err(|e| format!("invalid object id '{}': {}", oid, e))?;
        let ogen = u32::from_str_radix(ogen, 16)
            .map_err(|e| format!("invalid generation '{}': {}", ogen, e))?;
        Ok(LogId::new(oid, ogen))
    }
}

/// Reference to one record: the log holding it and its index there.
/// For a plain log's slot in the catalog this is `(catalog id, catalog index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie {
    pub log: LogId,
    pub index: u32,
}

impl Cookie {
    pub fn new(log: LogId, index: u32) -> Self {
        Cookie { log, index }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}:{}", self.log.oid, self.log.ogen, self.index)
    }
}

impl FromStr for Cookie {
    type Err = String;

    /// Parses `<oid hex>:<gen hex>:<index>`, the form `Display` prints
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(format!("invalid cookie '{}', expected oid:gen:index", s));
        }
        let oid = u64::from_str_radix(parts[0].trim_start_matches("0x"), 16)
            .map_err(|e| format!("invalid object id '{}': {}", parts[0], e))?;
        let ogen = u32::from_str_radix(parts[1], 16)
            .map_err(|e| format!("invalid generation '{}': {}", parts[1], e))?;
        let index = parts[2]
            .parse::<u32>()
            .map_err(|e| format!("invalid index '{}': {}", parts[2], e))?;
        Ok(Cookie::new(LogId::new(oid, ogen), index))
    }
}

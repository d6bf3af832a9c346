//! Catalog-structured recovery log.
//!
//! A [`Catalog`] is a log whose records name plain logs. Appends land in the
//! current [`PlainLog`]; when it fills, the catalog allocates a new one in
//! the next slot of its circular bitmap. Canceling the last live record of a
//! plain log destroys it and frees its slot. [`Catalog::replay`] walks every
//! live record in catalog order for crash recovery.

pub mod base;
pub mod config;
pub mod ctl;
pub mod env;
pub mod error;
pub mod llog;
pub mod storage;

pub use base::{Cookie, LogId};
pub use config::{CatlogConfig, LogConfig};
pub use env::Env;
pub use error::{Error, Result};
pub use llog::{Catalog, CatalogStat, PlainLog, Process, Record};
pub use storage::{DirStore, MemStore, ObjectStore, StoreObject};

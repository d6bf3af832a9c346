//! Object store collaborator.
//!
//! Logs never touch files directly: each catalog or plain log exclusively owns
//! one store object and persists fixed-size byte ranges through it, one
//! transactional write at a time.

pub mod files;
pub mod mem;

pub use files::DirStore;
pub use mem::MemStore;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::base::LogId;
use crate::error::{Error, Result};

/// Upper bound on credits a single transactional write may request
pub const DEFAULT_CREDIT_BUDGET: u32 = 1024;

/// Handle to one backing object. At most one handle per object is live at a time.
pub trait StoreObject: Send + Sync {
    fn id(&self) -> LogId;

    /// Read up to `buf.len()` bytes at `offset`; returns bytes read (short at EOF)
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `bytes` at `offset` inside one store transaction bounded by
    /// `credits`. Either the whole range is persisted or nothing is.
    fn write_in_transaction(&self, offset: u64, bytes: &[u8], credits: u32) -> Result<()>;

    /// Current object size in bytes
    fn size(&self) -> Result<u64>;
}

impl std::fmt::Debug for dyn StoreObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreObject").field("id", &self.id()).finish()
    }
}

/// Durable store of fixed-size byte ranges keyed by `(object id, generation)`
pub trait ObjectStore: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    fn create_object(&self) -> Result<Box<dyn StoreObject>>;

    /// Open an existing object. Fails `NotFound` when the id or generation is
    /// unknown and `InvalidHandle` when another handle already holds it.
    fn open_object(&self, id: LogId) -> Result<Box<dyn StoreObject>>;

    /// Release the handle and delete the object
    fn destroy_object(&self, obj: Box<dyn StoreObject>) -> Result<()>;
}

/// Tracks which objects currently have a live handle
#[derive(Debug, Clone, Default)]
pub(crate) struct Residency {
    open: Arc<Mutex<HashSet<u64>>>,
}

impl Residency {
    pub(crate) fn claim(&self, id: LogId) -> Result<ResidencyGuard> {
        let mut open = self.open.lock();
        if !open.insert(id.oid) {
            return Err(Error::InvalidHandle(format!("object {} is already open", id)));
        }
        Ok(ResidencyGuard {
            open: Arc::clone(&self.open),
            oid: id.oid,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self, oid: u64) -> bool {
        self.open.lock().contains(&oid)
    }
}

/// Releases the object's residency when its handle is dropped
#[derive(Debug)]
pub(crate) struct ResidencyGuard {
    open: Arc<Mutex<HashSet<u64>>>,
    oid: u64,
}

impl Drop for ResidencyGuard {
    fn drop(&mut self) {
        self.open.lock().remove(&self.oid);
    }
}

pub(crate) fn check_credits(id: LogId, credits: u32, budget: u32) -> Result<()> {
    if credits == 0 || credits > budget {
        return Err(Error::InvalidHandle(format!(
            "write to {} requested {} credits, budget is 1..={}",
            id, credits, budget
        )));
    }
    Ok(())
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::base::LogId;
use crate::error::{Error, Result};
use crate::storage::{
    DEFAULT_CREDIT_BUDGET, ObjectStore, Residency, ResidencyGuard, StoreObject, check_credits,
};

/// Generation stamped on every object this store creates
const MEM_GENERATION: u32 = 1;

struct MemEntry {
    ogen: u32,
    data: Arc<RwLock<Vec<u8>>>,
}

/// Volatile object store, with fault injection for exercising rollback paths
pub struct MemStore {
    objects: RwLock<HashMap<u64, MemEntry>>,
    next_oid: AtomicU64,
    residency: Residency,
    credit_budget: u32,
    write_faults: Arc<Mutex<WriteFaults>>,
    fail_creates: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_credit_budget(DEFAULT_CREDIT_BUDGET)
    }

    pub fn with_credit_budget(credit_budget: u32) -> Self {
        MemStore {
            objects: RwLock::new(HashMap::new()),
            next_oid: AtomicU64::new(1),
            residency: Residency::default(),
            credit_budget,
            write_faults: Arc::new(Mutex::new(WriteFaults::default())),
            fail_creates: AtomicU32::new(0),
        }
    }

    /// Make the next `n` transactional writes (on any object) fail with `Io`
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes_after(0, n);
    }

    /// Let `skip` writes through, then fail the following `n`
    pub fn fail_writes_after(&self, skip: u32, n: u32) {
        *self.write_faults.lock() = WriteFaults { skip, fail: n };
    }

    /// Make the next `n` object creations fail with `Io`
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Whether an object with this id and generation still exists
    pub fn contains(&self, id: LogId) -> bool {
        self.objects
            .read()
            .get(&id.oid)
            .is_some_and(|entry| entry.ogen == id.ogen)
    }

    /// Number of objects currently stored
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Overwrite raw bytes, bypassing transactions; used to simulate media damage
    pub fn corrupt(&self, id: LogId, offset: u64, bytes: &[u8]) -> Result<()> {
        let objects = self.objects.read();
        let entry = objects.get(&id.oid).ok_or(Error::NotFound(id))?;
        let mut data = entry.data.write();
        let start = offset as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct WriteFaults {
    skip: u32,
    fail: u32,
}

impl WriteFaults {
    fn take(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            false
        } else if self.fail > 0 {
            self.fail -= 1;
            true
        } else {
            false
        }
    }
}

/// Consume one pending fault, if any
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ObjectStore for MemStore {
    fn name(&self) -> &str {
        "mem"
    }

    fn create_object(&self) -> Result<Box<dyn StoreObject>> {
        if take_fault(&self.fail_creates) {
            return Err(Error::Io(std::io::Error::other("injected create failure")));
        }
        let id = LogId::new(self.next_oid.fetch_add(1, Ordering::SeqCst), MEM_GENERATION);
        let data = Arc::new(RwLock::new(Vec::new()));
        let guard = self.residency.claim(id)?;
        self.objects.write().insert(
            id.oid,
            MemEntry {
                ogen: id.ogen,
                data: Arc::clone(&data),
            },
        );
        Ok(Box::new(MemObject {
            id,
            data,
            faults: Arc::clone(&self.write_faults),
            credit_budget: self.credit_budget,
            _guard: guard,
        }))
    }

    fn open_object(&self, id: LogId) -> Result<Box<dyn StoreObject>> {
        let data = {
            let objects = self.objects.read();
            match objects.get(&id.oid) {
                Some(entry) if entry.ogen == id.ogen => Arc::clone(&entry.data),
                _ => return Err(Error::NotFound(id)),
            }
        };
        let guard = self.residency.claim(id)?;
        Ok(Box::new(MemObject {
            id,
            data,
            faults: Arc::clone(&self.write_faults),
            credit_budget: self.credit_budget,
            _guard: guard,
        }))
    }

    fn destroy_object(&self, obj: Box<dyn StoreObject>) -> Result<()> {
        let id = obj.id();
        drop(obj);
        match self.objects.write().remove(&id.oid) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(id)),
        }
    }
}

struct MemObject {
    id: LogId,
    data: Arc<RwLock<Vec<u8>>>,
    faults: Arc<Mutex<WriteFaults>>,
    credit_budget: u32,
    _guard: ResidencyGuard,
}

impl StoreObject for MemObject {
    fn id(&self) -> LogId {
        self.id
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.read();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_in_transaction(&self, offset: u64, bytes: &[u8], credits: u32) -> Result<()> {
        check_credits(self.id, credits, self.credit_budget)?;
        if self.faults.lock().take() {
            return Err(Error::Io(std::io::Error::other("injected write failure")));
        }
        let mut data = self.data.write();
        let start = offset as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}

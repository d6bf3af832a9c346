use std::sync::{Arc, Weak};

use parking_lot::{ArcRwLockWriteGuard, RawRwLock, RwLock};
use tracing::{debug, error, info, warn};

use crate::base::{Cookie, LLOG_F_IS_CAT, LLOG_LOGID_MAGIC, LogId};
use crate::config::LogConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::llog::handle::LogHandle;
use crate::llog::header::{LogHeader, disk_config};
use crate::llog::plain::{CancelOutcome, PlainLog};
use crate::llog::record::Record;
use crate::llog::replay::{self, Process};
use crate::storage::ObjectStore;

/// Shared, individually locked plain log
pub type ChildRef = Arc<RwLock<PlainLog>>;

type ChildWriteGuard = ArcRwLockWriteGuard<RawRwLock, PlainLog>;

/// Slot following `index` in the ring of usable slots `1..capacity`
pub(crate) fn next_slot(index: u32, capacity: u32) -> u32 {
    if index + 1 >= capacity { 1 } else { index + 1 }
}

/// Point-in-time view of a catalog's slot accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStat {
    pub id: LogId,
    pub capacity: u32,
    pub count: u32,
    pub first_live_index: u32,
    pub tail_index: u32,
    pub resident_children: usize,
}

struct Resident {
    id: LogId,
    log: ChildRef,
}

struct CatalogState {
    /// None once closed
    handle: Option<LogHandle>,
    /// Plain logs currently open in memory
    children: Vec<Resident>,
    /// Plain log accepting appends
    current: Weak<RwLock<PlainLog>>,
}

impl CatalogState {
    fn live(&self, id: LogId) -> Result<&LogHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::InvalidHandle(format!("catalog {} is closed", id)))
    }

    fn live_mut(&mut self, id: LogId) -> Result<&mut LogHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::InvalidHandle(format!("catalog {} is closed", id)))
    }

    fn forget(&mut self, child: &ChildRef) {
        self.children.retain(|r| !Arc::ptr_eq(&r.log, child));
        if self.current.upgrade().is_some_and(|c| Arc::ptr_eq(&c, child)) {
            self.current = Weak::new();
        }
    }
}

/// Slot bookkeeping saved before a mutation so a failed write can undo it
#[derive(Clone, Copy)]
struct SlotSnapshot {
    count: u32,
    last_index: u32,
    last_len: u32,
    cat_idx: u32,
}

impl SlotSnapshot {
    fn take(hdr: &LogHeader) -> Self {
        SlotSnapshot {
            count: hdr.count,
            last_index: hdr.last_index,
            last_len: hdr.last_len,
            cat_idx: hdr.cat_idx,
        }
    }

    fn restore(self, hdr: &mut LogHeader) {
        hdr.count = self.count;
        hdr.last_index = self.last_index;
        hdr.last_len = self.last_len;
        hdr.cat_idx = self.cat_idx;
    }
}

/// A log whose records reference plain logs.
///
/// Each live slot of the catalog bitmap holds one "logid" record naming a
/// plain log. Appends go to the current plain log; when it fills up a new one
/// is allocated in the slot after `tail_index`. Slot 0 is never used and one
/// slot always stays free, so at most `capacity - 2` plain logs are live.
///
/// Lock order is catalog before plain log.
pub struct Catalog {
    id: LogId,
    store: Arc<dyn ObjectStore>,
    config: LogConfig,
    state: RwLock<CatalogState>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Catalog {
    /// Create a new, empty catalog object
    pub fn create(store: Arc<dyn ObjectStore>, config: &LogConfig, env: &mut Env) -> Result<Self> {
        config.validate()?;
        let obj = store.create_object()?;
        let id = obj.id();
        let hdr = LogHeader::new(LLOG_F_IS_CAT, config.bitmap_bits, &config.target);
        let handle = LogHandle::new(obj, hdr, config);
        if let Err(e) = handle.write_header(env) {
            if let Err(destroy_err) = store.destroy_object(handle.into_object()) {
                warn!(catalog = %id, error = %destroy_err, "failed to destroy half-created catalog");
            }
            return Err(e);
        }
        info!(catalog = %id, store = store.name(), capacity = config.bitmap_bits, "created catalog");
        Ok(Self::from_handle(store, config, handle))
    }

    /// Open an existing catalog, loading its header
    pub fn open(store: Arc<dyn ObjectStore>, id: LogId, config: &LogConfig, env: &mut Env) -> Result<Self> {
        config.validate()?;
        let obj = store.open_object(id)?;
        let handle = LogHandle::open(obj, config, env)?;
        if !handle.hdr.has_flag(LLOG_F_IS_CAT) {
            return Err(Error::corrupt(
                id,
                format!("flags {:#x} do not mark a catalog", handle.hdr.flags),
            ));
        }
        info!(
            catalog = %id,
            count = handle.hdr.count,
            first = handle.hdr.cat_idx,
            tail = handle.hdr.last_index,
            "opened catalog"
        );
        Ok(Self::from_handle(store, config, handle))
    }

    fn from_handle(store: Arc<dyn ObjectStore>, config: &LogConfig, handle: LogHandle) -> Self {
        Catalog {
            id: handle.id(),
            store,
            config: config.clone(),
            state: RwLock::new(CatalogState {
                handle: Some(handle),
                children: Vec::new(),
                current: Weak::new(),
            }),
        }
    }

    pub fn id(&self) -> LogId {
        self.id
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn stat(&self) -> Result<CatalogStat> {
        let state = self.state.read();
        let hdr = &state.live(self.id)?.hdr;
        Ok(CatalogStat {
            id: self.id,
            capacity: hdr.capacity(),
            count: hdr.count,
            first_live_index: hdr.cat_idx,
            tail_index: hdr.last_index,
            resident_children: state.children.len(),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.stat().map_or(0, |s| s.capacity)
    }

    /// Number of live plain logs
    pub fn count(&self) -> u32 {
        self.stat().map_or(0, |s| s.count)
    }

    /// Slot most recently allocated
    pub fn tail_index(&self) -> u32 {
        self.stat().map_or(0, |s| s.tail_index)
    }

    /// Lowest slot, in ring order, still referencing a live plain log
    pub fn first_live_index(&self) -> u32 {
        self.stat().map_or(0, |s| s.first_live_index)
    }

    pub fn resident_children(&self) -> usize {
        self.stat().map_or(0, |s| s.resident_children)
    }

    pub fn is_slot_live(&self, index: u32) -> bool {
        let state = self.state.read();
        state
            .handle
            .as_ref()
            .is_some_and(|h| h.hdr.bitmap.test(index))
    }

    /// Append one record to the current plain log, rotating to a new plain
    /// log when the current one is full or absent.
    pub fn append(&self, env: &mut Env, rec_type: u32, payload: &[u8]) -> Result<Cookie> {
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(Error::RecordTooLarge {
                size: payload.len(),
                max,
            });
        }
        let mut log = self.current_log(env)?;
        let index = log.append(env, rec_type, payload)?;
        Ok(Cookie::new(log.id(), index))
    }

    /// Write-locked plain log with room for one more record
    fn current_log(&self, env: &mut Env) -> Result<ChildWriteGuard> {
        {
            let state = self.state.read();
            state.live(self.id)?;
            if let Some(child) = state.current.upgrade() {
                let log = child.write_arc();
                if !log.is_full() {
                    return Ok(log);
                }
            }
        }

        // Rotation: another writer may have rotated while we waited
        let mut state = self.state.write();
        state.live(self.id)?;
        if let Some(child) = state.current.upgrade() {
            let log = child.write_arc();
            if !log.is_full() {
                return Ok(log);
            }
        }

        debug!(catalog = %self.id, "creating new plain log");
        let child = self.new_log(&mut state, env)?;
        let log = child.write_arc();
        Ok(log)
    }

    /// Start a new plain log in the next free slot and make it current,
    /// whether or not the current one is full
    pub fn rotate(&self, env: &mut Env) -> Result<ChildRef> {
        let mut state = self.state.write();
        self.new_log(&mut state, env)
    }

    /// Allocate the next slot, create a plain log for it and record it in
    /// the catalog. Any failure after the bit is set rolls the slot back.
    fn new_log(&self, state: &mut CatalogState, env: &mut Env) -> Result<ChildRef> {
        let handle = state.live_mut(self.id)?;
        let capacity = handle.capacity();
        let hdr = &mut handle.hdr;

        if hdr.count >= capacity - 2 {
            error!(catalog = %self.id, count = hdr.count, "no free catalog slots for log");
            return Err(Error::NoSpace(self.id));
        }
        let mut index = next_slot(hdr.last_index, capacity);
        if hdr.count > 0 && index == hdr.cat_idx {
            error!(catalog = %self.id, index, "catalog wrapped into its live range");
            return Err(Error::NoSpace(self.id));
        }
        while hdr.bitmap.test(index) {
            index = next_slot(index, capacity);
            if index == hdr.cat_idx {
                error!(catalog = %self.id, "no free catalog slots for log");
                return Err(Error::NoSpace(self.id));
            }
        }

        let saved = SlotSnapshot::take(hdr);
        hdr.bitmap.set(index);
        if hdr.count == 0 {
            hdr.cat_idx = index;
        }
        hdr.count += 1;
        hdr.last_index = index;

        let mut log = match PlainLog::create(&*self.store, env, &self.config, Cookie::new(self.id, index)) {
            Ok(log) => log,
            Err(e) => {
                let hdr = &mut handle.hdr;
                hdr.bitmap.clear(index);
                saved.restore(hdr);
                return Err(e);
            }
        };

        let written = bincode::encode_to_vec(log.id(), disk_config())
            .map_err(|e| Error::corrupt(self.id, format!("logid encode: {}", e)))
            .and_then(|payload| handle.write_record(env, index, LLOG_LOGID_MAGIC, &payload))
            .and_then(|len| {
                handle.hdr.last_len = len;
                handle.write_header(env)
            });
        if let Err(e) = written {
            let hdr = &mut handle.hdr;
            hdr.bitmap.clear(index);
            saved.restore(hdr);
            if let Err(destroy_err) = log.destroy(&*self.store) {
                warn!(log = %log.id(), error = %destroy_err, "failed to destroy orphaned plain log");
            }
            return Err(e);
        }

        debug!(
            catalog = %self.id,
            log = %log.id(),
            index,
            "new recovery log for catalog slot"
        );
        let id = log.id();
        let child = Arc::new(RwLock::new(log));
        state.children.push(Resident {
            id,
            log: Arc::clone(&child),
        });
        state.current = Arc::downgrade(&child);
        Ok(child)
    }

    /// Cancel a batch of records. The catalog stays write-locked for the
    /// whole batch; cookies naming logs that no longer exist are skipped.
    pub fn cancel(&self, env: &mut Env, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.state.write();
        state.live(self.id)?;

        for cookie in cookies {
            if cookie.log == self.id {
                return Err(Error::InvalidHandle(format!(
                    "cookie {} names the catalog itself",
                    cookie
                )));
            }
            let child = match self.resolve_locked(&mut state, env, cookie.log) {
                Ok(child) => child,
                Err(e) if e.is_not_found() => {
                    warn!(catalog = %self.id, %cookie, "cancel of unknown log ignored");
                    continue;
                }
                Err(e) => return Err(e),
            };

            // A log emptied by an earlier cancel whose reclaim failed is
            // reclaimed again here, so retrying the batch converges.
            let (outcome, reclaimable) = {
                let mut log = child.write();
                let outcome = log.cancel(env, cookie.index)?;
                let emptied = log.live_count() == 0 && log.last_index() > 0;
                (outcome, emptied && log.auto_destroy())
            };
            if reclaimable {
                if outcome == CancelOutcome::StillLive {
                    debug!(catalog = %self.id, log = %cookie.log, "retrying reclaim of emptied log");
                }
                self.reclaim(&mut state, env, &child)?;
            }
        }
        Ok(())
    }

    /// Free the catalog slot of an emptied plain log, then destroy the log.
    /// The slot goes first: if the header write fails the log is untouched.
    fn reclaim(&self, state: &mut CatalogState, env: &mut Env, child: &ChildRef) -> Result<()> {
        let (log_id, slot) = {
            let log = child.read();
            (log.id(), log.cookie())
        };
        let slot = slot.ok_or_else(|| Error::InvalidHandle(format!("plain log {} is closed", log_id)))?;

        self.release_slot(state, env, slot.index)?;
        state.forget(child);
        if let Err(e) = child.write().destroy(&*self.store) {
            error!(log = %log_id, error = %e, "failed to destroy emptied plain log");
        }
        debug!(catalog = %self.id, log = %log_id, index = slot.index, "reclaimed plain log");
        Ok(())
    }

    /// Clear catalog slot `index` and persist the header, undoing the change
    /// in memory if the write fails
    fn release_slot(&self, state: &mut CatalogState, env: &mut Env, index: u32) -> Result<()> {
        let handle = state.live_mut(self.id)?;
        let capacity = handle.capacity();
        if !handle.hdr.bitmap.test(index) {
            warn!(catalog = %self.id, index, "catalog slot was already free");
            return Ok(());
        }

        let saved = SlotSnapshot::take(&handle.hdr);
        handle.hdr.bitmap.clear(index);
        handle.hdr.count -= 1;
        advance_first_live(&mut handle.hdr, index, capacity);
        if let Err(e) = handle.write_header(env) {
            handle.hdr.bitmap.set(index);
            saved.restore(&mut handle.hdr);
            return Err(e);
        }

        debug!(
            catalog = %self.id,
            index,
            first = handle.hdr.cat_idx,
            "released catalog slot"
        );
        Ok(())
    }

    /// Find or open the plain log `id`, which must belong to this catalog
    pub fn resolve(&self, env: &mut Env, id: LogId) -> Result<ChildRef> {
        let mut state = self.state.write();
        state.live(self.id)?;
        self.resolve_locked(&mut state, env, id)
    }

    fn resolve_locked(&self, state: &mut CatalogState, env: &mut Env, id: LogId) -> Result<ChildRef> {
        for resident in &state.children {
            if resident.id.oid != id.oid {
                continue;
            }
            if resident.id.ogen != id.ogen {
                warn!(
                    log = id.oid,
                    resident = resident.id.ogen,
                    wanted = id.ogen,
                    "log generation mismatch"
                );
                continue;
            }
            return Ok(Arc::clone(&resident.log));
        }

        let log = PlainLog::open(&*self.store, env, &self.config, id)?;
        let slot = log
            .cookie()
            .ok_or_else(|| Error::InvalidHandle(format!("plain log {} is closed", id)))?;
        if slot.log != self.id {
            return Err(Error::corrupt(
                id,
                format!("belongs to catalog {}, not {}", slot.log, self.id),
            ));
        }
        let handle = state.live(self.id)?;
        if !handle.hdr.bitmap.test(slot.index) {
            return Err(Error::corrupt(
                id,
                format!("catalog slot {} is not live", slot.index),
            ));
        }

        debug!(catalog = %self.id, log = %id, index = slot.index, "opened plain log");
        let child = Arc::new(RwLock::new(log));
        state.children.push(Resident {
            id,
            log: Arc::clone(&child),
        });
        Ok(child)
    }

    /// Plain log referenced by live catalog slot `index`, or None if the slot
    /// is free. A live slot naming a log the store no longer has is freed.
    pub(crate) fn child_at(&self, env: &mut Env, index: u32) -> Result<Option<ChildRef>> {
        let mut state = self.state.write();
        let handle = state.live(self.id)?;
        if !handle.hdr.bitmap.test(index) {
            return Ok(None);
        }
        let rec = handle.read_record(env, index)?;
        let logid = self.decode_logid(&rec)?;
        debug!(catalog = %self.id, log = %logid, index, "processing log");

        let child = match self.resolve_locked(&mut state, env, logid) {
            Ok(child) => child,
            Err(e) if e.is_not_found() => {
                warn!(catalog = %self.id, log = %logid, index, "live slot names a missing log, freeing it");
                self.release_slot(&mut state, env, index)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let claimed = child.read().cookie().map(|slot| slot.index);
        if claimed != Some(index) {
            return Err(Error::corrupt(
                logid,
                format!("found at catalog index {} but claims {:?}", index, claimed),
            ));
        }
        Ok(Some(child))
    }

    fn decode_logid(&self, rec: &Record) -> Result<LogId> {
        if rec.rec_type() != LLOG_LOGID_MAGIC {
            return Err(Error::corrupt(
                self.id,
                format!("invalid record type {:#x} in catalog", rec.rec_type()),
            ));
        }
        let (logid, _): (LogId, usize) = bincode::decode_from_slice(&rec.payload, disk_config())
            .map_err(|e| Error::corrupt(self.id, format!("logid decode: {}", e)))?;
        Ok(logid)
    }

    /// Replay every live record of every live plain log in catalog order.
    /// See [`replay::process`].
    pub fn replay<F>(&self, env: &mut Env, callback: F) -> Result<Process>
    where
        F: FnMut(Cookie, &Record) -> Result<Process>,
    {
        replay::process(self, env, callback)
    }

    /// `(first_live_index, tail_index, capacity, count)` at this instant
    pub(crate) fn bounds(&self) -> Result<(u32, u32, u32, u32)> {
        let state = self.state.read();
        let hdr = &state.live(self.id)?.hdr;
        Ok((hdr.cat_idx, hdr.last_index, hdr.capacity(), hdr.count))
    }

    /// Close every resident plain log, then release the catalog object.
    /// Plain logs are closed, never destroyed, whatever their live count.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        let handle = state
            .handle
            .take()
            .ok_or_else(|| Error::InvalidHandle(format!("catalog {} already closed", self.id)))?;

        for resident in state.children.drain(..) {
            if let Err(e) = resident.log.write().close() {
                error!(catalog = %self.id, log = %resident.id, error = %e, "error closing plain log");
            }
        }
        state.current = Weak::new();
        drop(handle);
        info!(catalog = %self.id, "closed catalog");
        Ok(())
    }
}

/// After clearing slot `index`, move the first live index past any
/// contiguous free slots, stopping at the next live slot or the tail.
fn advance_first_live(hdr: &mut LogHeader, index: u32, capacity: u32) {
    if index != hdr.cat_idx {
        return;
    }
    let mut idx = index;
    while idx != hdr.last_index && !hdr.bitmap.test(idx) {
        idx = next_slot(idx, capacity);
    }
    hdr.cat_idx = idx;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn setup() -> (Arc<MemStore>, Catalog, Env) {
        let store = Arc::new(MemStore::new());
        let mut env = Env::new();
        let config = LogConfig::with_geometry(256, 64);
        let catalog = Catalog::create(store.clone(), &config, &mut env).unwrap();
        (store, catalog, env)
    }

    /// Append until the current plain log is full so the next append rotates
    fn fill_current(catalog: &Catalog, env: &mut Env) -> Vec<Cookie> {
        let mut cookies = vec![catalog.append(env, 1, b"r").unwrap()];
        while cookies.last().unwrap().index < 63 {
            cookies.push(catalog.append(env, 1, b"r").unwrap());
        }
        cookies
    }

    #[test]
    fn test_next_slot_skips_zero() {
        assert_eq!(next_slot(0, 64), 1);
        assert_eq!(next_slot(5, 64), 6);
        assert_eq!(next_slot(63, 64), 1);
    }

    #[test]
    fn test_first_append_allocates_slot_one() {
        let (_store, catalog, mut env) = setup();
        assert_eq!(catalog.count(), 0);

        let cookie = catalog.append(&mut env, 1, b"hello").unwrap();
        assert_eq!(cookie.index, 1);
        assert_eq!(catalog.count(), 1);
        assert_eq!(catalog.tail_index(), 1);
        assert_eq!(catalog.first_live_index(), 1);
        assert!(catalog.is_slot_live(1));
        assert!(!catalog.is_slot_live(0));
    }

    #[test]
    fn test_rotation_on_full_child() {
        let (_store, catalog, mut env) = setup();
        let first = fill_current(&catalog, &mut env);
        let next = catalog.append(&mut env, 1, b"r").unwrap();
        assert_ne!(next.log, first[0].log);
        assert_eq!(next.index, 1);
        assert_eq!(catalog.tail_index(), 2);
        assert_eq!(catalog.count(), 2);
    }

    #[test]
    fn test_child_creation_failure_rolls_back_slot() {
        let (store, catalog, mut env) = setup();
        store.fail_next_creates(1);
        assert!(matches!(catalog.append(&mut env, 1, b"r"), Err(Error::Io(_))));
        assert_eq!(catalog.count(), 0);
        assert_eq!(catalog.tail_index(), 0);
        assert!(!catalog.is_slot_live(1));

        let cookie = catalog.append(&mut env, 1, b"r").unwrap();
        assert_eq!(catalog.tail_index(), 1);
        assert_eq!(cookie.index, 1);
    }

    #[test]
    fn test_logid_write_failure_rolls_back_slot() {
        let (store, catalog, mut env) = setup();
        // the child header write succeeds, the catalog's logid record fails
        store.fail_writes_after(1, 1);
        assert!(matches!(catalog.append(&mut env, 1, b"r"), Err(Error::Io(_))));
        assert_eq!(catalog.count(), 0);
        assert!(!catalog.is_slot_live(1));
        assert_eq!(catalog.resident_children(), 0);
        // only the catalog object remains
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn test_payload_too_large_creates_nothing() {
        let (_store, catalog, mut env) = setup();
        let err = catalog.append(&mut env, 1, &[0u8; 300]).unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { .. }));
        assert_eq!(catalog.count(), 0);
    }

    #[test]
    fn test_cancel_destroys_empty_child() {
        let (store, catalog, mut env) = setup();
        let a = catalog.append(&mut env, 1, b"a").unwrap();
        let b = catalog.append(&mut env, 1, b"b").unwrap();

        catalog.cancel(&mut env, &[a]).unwrap();
        assert_eq!(catalog.count(), 1);
        catalog.cancel(&mut env, &[b]).unwrap();
        assert_eq!(catalog.count(), 0);
        assert!(!catalog.is_slot_live(1));
        assert!(!store.contains(a.log));
        assert_eq!(catalog.resident_children(), 0);

        // the next append starts a fresh child in the next slot
        let c = catalog.append(&mut env, 1, b"c").unwrap();
        assert_ne!(c.log, a.log);
        assert_eq!(catalog.tail_index(), 2);
        assert_eq!(catalog.first_live_index(), 2);
    }

    #[test]
    fn test_failed_reclaim_keeps_log_and_retries() {
        let (store, catalog, mut env) = setup();
        let a = catalog.append(&mut env, 1, b"a").unwrap();

        // the catalog header write freeing slot 1 fails
        store.fail_next_writes(1);
        assert!(matches!(catalog.cancel(&mut env, &[a]), Err(Error::Io(_))));
        assert!(store.contains(a.log));
        assert_eq!(catalog.count(), 1);
        assert!(catalog.is_slot_live(1));

        catalog.cancel(&mut env, &[a]).unwrap();
        assert_eq!(catalog.count(), 0);
        assert!(!catalog.is_slot_live(1));
        assert!(!store.contains(a.log));
        assert_eq!(catalog.resident_children(), 0);
    }

    #[test]
    fn test_replay_frees_slot_of_missing_log() {
        let (store, catalog, mut env) = setup();
        let config = catalog.config().clone();
        let a = catalog.append(&mut env, 1, b"a").unwrap();
        catalog.rotate(&mut env).unwrap();
        let b = catalog.append(&mut env, 1, b"b").unwrap();
        let id = catalog.id();
        catalog.close().unwrap();

        // as if a crash hit between destroying the log and freeing its slot
        store.destroy_object(store.open_object(a.log).unwrap()).unwrap();

        let catalog = Catalog::open(store, id, &config, &mut env).unwrap();
        assert_eq!(catalog.count(), 2);
        let mut seen = Vec::new();
        catalog
            .replay(&mut env, |cookie, _| {
                seen.push(cookie);
                Ok(Process::Continue)
            })
            .unwrap();
        assert_eq!(seen, vec![b]);
        assert_eq!(catalog.count(), 1);
        assert!(!catalog.is_slot_live(1));
        assert_eq!(catalog.first_live_index(), 2);
    }

    #[test]
    fn test_open_rejects_tail_outside_bitmap() {
        let (store, catalog, mut env) = setup();
        let config = catalog.config().clone();
        catalog.append(&mut env, 1, b"a").unwrap();
        let id = catalog.id();
        catalog.close().unwrap();

        // last_index sits after the 12 byte frame and four u32 fields
        store.corrupt(id, 28, &1000u32.to_le_bytes()).unwrap();
        let err = Catalog::open(store, id, &config, &mut env).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn test_cancel_unknown_cookie_is_noop() {
        let (_store, catalog, mut env) = setup();
        let a = catalog.append(&mut env, 1, b"a").unwrap();
        let ghost = Cookie::new(LogId::new(999, 1), 1);
        catalog.cancel(&mut env, &[ghost]).unwrap();
        let stale = Cookie::new(LogId::new(a.log.oid, a.log.ogen + 1), a.index);
        catalog.cancel(&mut env, &[stale]).unwrap();
        assert_eq!(catalog.count(), 1);
    }

    #[test]
    fn test_cancel_of_catalog_cookie_rejected() {
        let (_store, catalog, mut env) = setup();
        let cookie = Cookie::new(catalog.id(), 1);
        assert!(matches!(
            catalog.cancel(&mut env, &[cookie]),
            Err(Error::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_advance_first_live_stops_at_tail() {
        let mut hdr = LogHeader::new(LLOG_F_IS_CAT, 64, "t");
        for i in [3, 4, 6] {
            hdr.bitmap.set(i);
        }
        hdr.count = 3;
        hdr.cat_idx = 3;
        hdr.last_index = 6;

        hdr.bitmap.clear(4);
        advance_first_live(&mut hdr, 4, 64);
        assert_eq!(hdr.cat_idx, 3);

        hdr.bitmap.clear(3);
        advance_first_live(&mut hdr, 3, 64);
        assert_eq!(hdr.cat_idx, 6);

        hdr.bitmap.clear(6);
        advance_first_live(&mut hdr, 6, 64);
        assert_eq!(hdr.cat_idx, 6);
    }

    #[test]
    fn test_closed_catalog_rejects_operations() {
        let (_store, catalog, mut env) = setup();
        catalog.append(&mut env, 1, b"a").unwrap();
        catalog.close().unwrap();
        assert!(matches!(catalog.append(&mut env, 1, b"b"), Err(Error::InvalidHandle(_))));
        assert!(matches!(catalog.cancel(&mut env, &[]), Err(Error::InvalidHandle(_))));
        assert!(matches!(catalog.close(), Err(Error::InvalidHandle(_))));
        assert!(catalog.stat().is_err());
    }

    #[test]
    fn test_reopen_restores_slots() {
        let (store, catalog, mut env) = setup();
        let config = catalog.config().clone();
        fill_current(&catalog, &mut env);
        catalog.append(&mut env, 1, b"tail").unwrap();
        let id = catalog.id();
        let before = catalog.stat().unwrap();
        catalog.close().unwrap();

        let catalog = Catalog::open(store, id, &config, &mut env).unwrap();
        let after = catalog.stat().unwrap();
        assert_eq!(after.count, before.count);
        assert_eq!(after.tail_index, before.tail_index);
        assert_eq!(after.first_live_index, before.first_live_index);
        assert_eq!(after.resident_children, 0);

        // appends resume in a fresh child, since nothing is current yet
        let cookie = catalog.append(&mut env, 1, b"again").unwrap();
        assert_eq!(cookie.index, 1);
        assert_eq!(catalog.tail_index(), 3);
    }

    #[test]
    fn test_open_plain_log_as_catalog_is_corrupt() {
        let (store, catalog, mut env) = setup();
        let cookie = catalog.append(&mut env, 1, b"a").unwrap();
        let config = catalog.config().clone();
        catalog.close().unwrap();
        let err = Catalog::open(store, cookie.log, &config, &mut env).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }
}

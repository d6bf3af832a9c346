use tracing::{debug, warn};

use crate::base::{Cookie, LLOG_F_IS_PLAIN, LLOG_F_ZAP_WHEN_EMPTY, LogId};
use crate::config::LogConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::llog::handle::LogHandle;
use crate::llog::header::LogHeader;
use crate::llog::record::Record;
use crate::storage::ObjectStore;

/// Result of canceling one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    StillLive,
    /// The last live record is gone
    NowEmpty,
}

/// A bounded, append-only sequence of records occupying one catalog slot.
///
/// Records get indices `1..capacity`; once `last_index` reaches
/// `capacity - 1` the log is full and the catalog rotates to a new one.
pub struct PlainLog {
    id: LogId,
    /// None once the log is destroyed or closed
    handle: Option<LogHandle>,
}

impl std::fmt::Debug for PlainLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainLog")
            .field("id", &self.id)
            .field("open", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl PlainLog {
    /// Create a new plain log occupying slot `slot.index` of catalog `slot.log`
    pub(crate) fn create(
        store: &dyn ObjectStore,
        env: &mut Env,
        config: &LogConfig,
        slot: Cookie,
    ) -> Result<Self> {
        let obj = store.create_object()?;
        let id = obj.id();

        let mut hdr = LogHeader::new(
            LLOG_F_IS_PLAIN | LLOG_F_ZAP_WHEN_EMPTY,
            config.bitmap_bits,
            &config.target,
        );
        hdr.parent = slot.log;
        hdr.cat_idx = slot.index;

        let handle = LogHandle::new(obj, hdr, config);
        if let Err(e) = handle.write_header(env) {
            if let Err(destroy_err) = store.destroy_object(handle.into_object()) {
                warn!(log = %id, error = %destroy_err, "failed to destroy half-created log");
            }
            return Err(e);
        }
        debug!(log = %id, catalog = %slot.log, index = slot.index, "created plain log");
        Ok(PlainLog {
            id,
            handle: Some(handle),
        })
    }

    /// Open an existing plain log
    pub(crate) fn open(store: &dyn ObjectStore, env: &mut Env, config: &LogConfig, id: LogId) -> Result<Self> {
        let obj = store.open_object(id)?;
        let handle = LogHandle::open(obj, config, env)?;
        if !handle.hdr.has_flag(LLOG_F_IS_PLAIN) {
            return Err(Error::corrupt(
                id,
                format!("flags {:#x} do not mark a plain log", handle.hdr.flags),
            ));
        }
        Ok(PlainLog {
            id,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> LogId {
        self.id
    }

    fn live(&self) -> Result<&LogHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::InvalidHandle(format!("plain log {} is closed", self.id)))
    }

    fn live_mut(&mut self) -> Result<&mut LogHandle> {
        let id = self.id;
        self.handle
            .as_mut()
            .ok_or_else(|| Error::InvalidHandle(format!("plain log {} is closed", id)))
    }

    /// The slot this log occupies in its catalog: `(catalog id, catalog index)`.
    /// None once the log is closed or destroyed.
    pub fn cookie(&self) -> Option<Cookie> {
        self.handle
            .as_ref()
            .map(|h| Cookie::new(h.hdr.parent, h.hdr.cat_idx))
    }

    pub fn last_index(&self) -> u32 {
        self.handle.as_ref().map_or(0, |h| h.hdr.last_index)
    }

    /// Records appended and not yet canceled
    pub fn live_count(&self) -> u32 {
        self.handle.as_ref().map_or(0, |h| h.hdr.count)
    }

    pub fn auto_destroy(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.hdr.has_flag(LLOG_F_ZAP_WHEN_EMPTY))
    }

    pub fn capacity(&self) -> u32 {
        self.handle.as_ref().map_or(0, |h| h.capacity())
    }

    /// No index left for another append
    pub fn is_full(&self) -> bool {
        match &self.handle {
            Some(h) => h.hdr.last_index >= h.capacity() - 1,
            None => true,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn is_live(&self, index: u32) -> bool {
        self.handle.as_ref().is_some_and(|h| h.hdr.bitmap.test(index))
    }

    /// Append one record, returning its index.
    ///
    /// The record chunk is written before the header; the record only counts
    /// as written once the header carrying its bit is persisted.
    pub fn append(&mut self, env: &mut Env, rec_type: u32, payload: &[u8]) -> Result<u32> {
        let id = self.id;
        let handle = self.live_mut()?;
        if payload.len() > handle.max_payload() {
            return Err(Error::RecordTooLarge {
                size: payload.len(),
                max: handle.max_payload(),
            });
        }
        let index = handle.hdr.last_index + 1;
        if index >= handle.capacity() {
            return Err(Error::NoSpace(id));
        }

        let len = handle.write_record(env, index, rec_type, payload)?;

        let (prev_last, prev_len) = (handle.hdr.last_index, handle.hdr.last_len);
        handle.hdr.bitmap.set(index);
        handle.hdr.count += 1;
        handle.hdr.last_index = index;
        handle.hdr.last_len = len;
        if let Err(e) = handle.write_header(env) {
            handle.hdr.bitmap.clear(index);
            handle.hdr.count -= 1;
            handle.hdr.last_index = prev_last;
            handle.hdr.last_len = prev_len;
            return Err(e);
        }
        Ok(index)
    }

    /// Cancel the record at `index`. Unknown or already canceled indices are a no-op.
    ///
    /// When the last record of an auto-destroy log goes away the header is
    /// left alone: the catalog destroys the whole object next.
    pub fn cancel(&mut self, env: &mut Env, index: u32) -> Result<CancelOutcome> {
        let id = self.id;
        let handle = self.live_mut()?;
        if index == 0 || !handle.hdr.bitmap.test(index) {
            warn!(log = %id, index, "record already canceled");
            return Ok(CancelOutcome::StillLive);
        }

        handle.hdr.bitmap.clear(index);
        handle.hdr.count -= 1;
        if handle.hdr.count == 0 && handle.hdr.has_flag(LLOG_F_ZAP_WHEN_EMPTY) {
            return Ok(CancelOutcome::NowEmpty);
        }
        if let Err(e) = handle.write_header(env) {
            handle.hdr.bitmap.set(index);
            handle.hdr.count += 1;
            return Err(e);
        }

        if handle.hdr.count == 0 {
            Ok(CancelOutcome::NowEmpty)
        } else {
            Ok(CancelOutcome::StillLive)
        }
    }

    /// Next live record with an index greater than `after`, if any.
    /// A destroyed log has no more records.
    pub fn read_next(&self, env: &mut Env, after: u32) -> Result<Option<Record>> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(None);
        };
        let mut index = after + 1;
        while index <= handle.hdr.last_index {
            if handle.hdr.bitmap.test(index) {
                return handle.read_record(env, index).map(Some);
            }
            index += 1;
        }
        Ok(None)
    }

    /// Lazily read every live record in append order
    pub fn stream<'a>(&'a self, env: &'a mut Env) -> RecordStream<'a> {
        RecordStream {
            log: self,
            env,
            cursor: 0,
            done: false,
        }
    }

    /// Release and delete the backing object
    pub(crate) fn destroy(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidHandle(format!("plain log {} already destroyed", self.id)))?;
        store.destroy_object(handle.into_object())?;
        debug!(log = %self.id, "destroyed plain log");
        Ok(())
    }

    /// Release the backing object without deleting it
    pub(crate) fn close(&mut self) -> Result<()> {
        self.live()?;
        self.handle = None;
        Ok(())
    }
}

/// Iterator over the live records of one plain log.
/// Stops after the first error.
pub struct RecordStream<'a> {
    log: &'a PlainLog,
    env: &'a mut Env,
    cursor: u32,
    done: bool,
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.log.read_next(self.env, self.cursor) {
            Ok(Some(rec)) => {
                self.cursor = rec.index();
                Some(Ok(rec))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    const CATALOG: LogId = LogId { oid: 1000, ogen: 1 };

    fn config() -> LogConfig {
        LogConfig::with_geometry(256, 64)
    }

    fn new_log(store: &MemStore, env: &mut Env) -> PlainLog {
        PlainLog::create(store, env, &config(), Cookie::new(CATALOG, 5)).unwrap()
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);

        assert_eq!(log.cookie(), Some(Cookie::new(CATALOG, 5)));
        assert!(log.auto_destroy());
        for i in 1..=3u32 {
            assert_eq!(log.append(&mut env, 7, &[i as u8]).unwrap(), i);
        }
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.live_count(), 3);
    }

    #[test]
    fn test_stream_in_append_order_skipping_canceled() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        for i in 0..5u8 {
            log.append(&mut env, 7, &[i]).unwrap();
        }
        log.cancel(&mut env, 2).unwrap();

        let payloads: Vec<u8> = log
            .stream(&mut env)
            .map(|r| r.unwrap().payload[0])
            .collect();
        assert_eq!(payloads, vec![0, 2, 3, 4]);

        // restartable
        assert_eq!(log.stream(&mut env).count(), 4);
    }

    #[test]
    fn test_full_log_refuses_append() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        for _ in 1..64 {
            log.append(&mut env, 7, b"r").unwrap();
        }
        assert!(log.is_full());
        assert!(matches!(log.append(&mut env, 7, b"r"), Err(Error::NoSpace(_))));
    }

    #[test]
    fn test_record_too_large() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        let max = config().max_payload();
        log.append(&mut env, 7, &vec![1u8; max]).unwrap();
        let err = log.append(&mut env, 7, &vec![1u8; max + 1]).unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { size, .. } if size == max + 1));
        assert_eq!(log.live_count(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        log.append(&mut env, 7, b"a").unwrap();
        log.append(&mut env, 7, b"b").unwrap();

        assert_eq!(log.cancel(&mut env, 1).unwrap(), CancelOutcome::StillLive);
        assert_eq!(log.cancel(&mut env, 1).unwrap(), CancelOutcome::StillLive);
        assert_eq!(log.cancel(&mut env, 42).unwrap(), CancelOutcome::StillLive);
        assert_eq!(log.live_count(), 1);
        assert_eq!(log.cancel(&mut env, 2).unwrap(), CancelOutcome::NowEmpty);
        assert_eq!(log.live_count(), 0);
        assert_eq!(log.cancel(&mut env, 2).unwrap(), CancelOutcome::StillLive);
    }

    #[test]
    fn test_failed_write_leaves_no_record() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        log.append(&mut env, 7, b"a").unwrap();

        // record chunk lands, header write fails
        store.fail_writes_after(1, 1);
        assert!(matches!(log.append(&mut env, 7, b"b"), Err(Error::Io(_))));
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.live_count(), 1);
        assert!(!log.is_live(2));

        // record write itself fails
        store.fail_next_writes(1);
        assert!(matches!(log.append(&mut env, 7, b"b"), Err(Error::Io(_))));
        assert_eq!(log.append(&mut env, 7, b"c").unwrap(), 2);

        let payloads: Vec<Vec<u8>> = log.stream(&mut env).map(|r| r.unwrap().payload).collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_failed_header_destroys_new_object() {
        let store = MemStore::new();
        let mut env = Env::new();
        store.fail_next_writes(1);
        let err = PlainLog::create(&store, &mut env, &config(), Cookie::new(CATALOG, 1));
        assert!(matches!(err, Err(Error::Io(_))));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_reopen_sees_persisted_state() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        log.append(&mut env, 7, b"a").unwrap();
        log.append(&mut env, 7, b"b").unwrap();
        log.cancel(&mut env, 1).unwrap();
        let id = log.id();
        log.close().unwrap();
        assert!(matches!(log.append(&mut env, 7, b"c"), Err(Error::InvalidHandle(_))));

        let log = PlainLog::open(&store, &mut env, &config(), id).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.live_count(), 1);
        assert_eq!(log.cookie(), Some(Cookie::new(CATALOG, 5)));
        let recs: Vec<Record> = log.stream(&mut env).map(|r| r.unwrap()).collect();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].payload, b"b");
    }

    #[test]
    fn test_stream_surfaces_corruption() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        log.append(&mut env, 7, b"a").unwrap();
        log.append(&mut env, 7, b"b").unwrap();
        log.append(&mut env, 7, b"c").unwrap();

        // break the tail index of record 2 (chunk 2, framed length 21)
        store.corrupt(log.id(), 2 * 256 + 17, &9u32.to_le_bytes()).unwrap();

        let results: Vec<Result<Record>> = log.stream(&mut env).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_open_short_object_is_corrupt() {
        let store = MemStore::new();
        let mut env = Env::new();
        let obj = store.create_object().unwrap();
        let id = obj.id();
        obj.write_in_transaction(0, &[0u8; 100], 1).unwrap();
        drop(obj);

        let err = PlainLog::open(&store, &mut env, &config(), id).err().unwrap();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn test_destroy_releases_object() {
        let store = MemStore::new();
        let mut env = Env::new();
        let mut log = new_log(&store, &mut env);
        let id = log.id();
        log.destroy(&store).unwrap();
        assert!(log.is_destroyed());
        assert_eq!(log.cookie(), None);
        assert!(!store.contains(id));
        assert_eq!(log.stream(&mut env).count(), 0);
        assert!(log.destroy(&store).is_err());
    }
}

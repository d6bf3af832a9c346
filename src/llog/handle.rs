use crate::base::LogId;
use crate::config::LogConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::llog::header::LogHeader;
use crate::llog::record::{self, Record};
use crate::storage::StoreObject;

/// A store object opened as a log: its header plus chunk-addressed I/O.
/// Record `i` lives in chunk `i`; chunk 0 is the header.
pub(crate) struct LogHandle {
    obj: Box<dyn StoreObject>,
    pub(crate) hdr: LogHeader,
    chunk_size: usize,
    credits: u32,
}

impl LogHandle {
    /// Wrap a freshly created object; the caller persists `hdr` with `write_header`
    pub(crate) fn new(obj: Box<dyn StoreObject>, hdr: LogHeader, config: &LogConfig) -> Self {
        LogHandle {
            obj,
            hdr,
            chunk_size: config.chunk_size,
            credits: config.write_credits,
        }
    }

    /// Load the header of an existing object
    pub(crate) fn open(obj: Box<dyn StoreObject>, config: &LogConfig, env: &mut Env) -> Result<Self> {
        let id = obj.id();
        let size = obj.size()?;
        if size < config.chunk_size as u64 {
            return Err(Error::corrupt(
                id,
                format!("object holds {} bytes, header needs {}", size, config.chunk_size),
            ));
        }
        let buf = env.chunk(config.chunk_size);
        let n = obj.read_at(0, buf)?;
        if n != config.chunk_size {
            return Err(Error::corrupt(
                id,
                format!("short header read: {} of {} bytes", n, config.chunk_size),
            ));
        }
        let hdr = LogHeader::decode(id, buf)?;
        Ok(LogHandle {
            obj,
            hdr,
            chunk_size: config.chunk_size,
            credits: config.write_credits,
        })
    }

    pub(crate) fn id(&self) -> LogId {
        self.obj.id()
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.hdr.capacity()
    }

    pub(crate) fn max_payload(&self) -> usize {
        self.chunk_size - record::framed_len(0)
    }

    fn chunk_offset(&self, index: u32) -> u64 {
        index as u64 * self.chunk_size as u64
    }

    pub(crate) fn write_header(&self, env: &mut Env) -> Result<()> {
        let buf = env.chunk(self.chunk_size);
        self.hdr.encode(self.id(), buf)?;
        self.obj.write_in_transaction(0, buf, self.credits)
    }

    /// Frame and write one record into chunk `index`; returns the framed length
    pub(crate) fn write_record(
        &self,
        env: &mut Env,
        index: u32,
        rec_type: u32,
        payload: &[u8],
    ) -> Result<u32> {
        let len = record::framed_len(payload.len());
        if len > self.chunk_size {
            return Err(Error::RecordTooLarge {
                size: payload.len(),
                max: self.max_payload(),
            });
        }
        let buf = env.chunk(len);
        record::encode_into(rec_type, index, payload, buf);
        self.obj
            .write_in_transaction(self.chunk_offset(index), buf, self.credits)?;
        Ok(len as u32)
    }

    /// Read and validate the record in chunk `index`
    pub(crate) fn read_record(&self, env: &mut Env, index: u32) -> Result<Record> {
        let id = self.id();
        let buf = env.chunk(self.chunk_size);
        let n = self.obj.read_at(self.chunk_offset(index), buf)?;
        let rec = record::decode(id, &buf[..n])?;
        if rec.index() != index {
            return Err(Error::corrupt(
                id,
                format!("chunk {} holds record index {}", index, rec.index()),
            ));
        }
        Ok(rec)
    }

    pub(crate) fn into_object(self) -> Box<dyn StoreObject> {
        self.obj
    }
}

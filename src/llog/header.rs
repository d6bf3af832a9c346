//! Log header chunk.
//!
//! Index 0 of every log holds one chunk framed like a record of type
//! `LLOG_HDR_MAGIC` whose length is the full chunk size. Between the framing
//! sits a fixed little-endian body followed by the slot bitmap:
//!
//! ```text
//! | rec hdr (12) | version flags bits count last_idx last_len cat_idx |
//! | parent (oid u64, gen u32) | target [u8; 40] | bitmap words (u64 LE) |
//! | zero padding ... | rec tail (8) |
//! ```

use bincode::{Decode, Encode};

use crate::base::{LLOG_F_IS_CAT, LLOG_HDR_MAGIC, LogId, REC_HDR_SIZE, REC_TAIL_SIZE, TARGET_LEN};
use crate::error::{Error, Result};
use crate::llog::record;

const HEADER_VERSION: u32 = 1;

/// Encoded size of `HeaderFixed`: seven u32 fields, a LogId, the target
const FIXED_LEN: usize = 7 * 4 + 12 + TARGET_LEN;

/// Bytes a header with `bitmap_bits` bits occupies, framing included
pub fn encoded_len(bitmap_bits: u32) -> usize {
    REC_HDR_SIZE + FIXED_LEN + (bitmap_bits as usize).div_ceil(64) * 8 + REC_TAIL_SIZE
}

/// Fixed-int little-endian layout used for everything bincode writes to disk
pub(crate) fn disk_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

#[derive(Debug, Encode, Decode)]
struct HeaderFixed {
    version: u32,
    flags: u32,
    bitmap_bits: u32,
    count: u32,
    last_index: u32,
    last_len: u32,
    cat_idx: u32,
    parent: LogId,
    target: [u8; TARGET_LEN],
}

/// Fixed-size bit vector, one bit per index slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    bits: u32,
}

impl Bitmap {
    pub fn new(bits: u32) -> Self {
        Bitmap {
            words: vec![0; (bits as usize).div_ceil(64)],
            bits,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn test(&self, bit: u32) -> bool {
        bit < self.bits && self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    /// Set a bit, returning its previous value
    pub fn set(&mut self, bit: u32) -> bool {
        assert!(bit < self.bits, "bit {} out of range {}", bit, self.bits);
        let was = self.test(bit);
        self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        was
    }

    /// Clear a bit, returning its previous value
    pub fn clear(&mut self, bit: u32) -> bool {
        if bit >= self.bits {
            return false;
        }
        let was = self.test(bit);
        self.words[(bit / 64) as usize] &= !(1 << (bit % 64));
        was
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// In-memory copy of a log header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    pub flags: u32,
    /// Live records (plain log) or live children (catalog)
    pub count: u32,
    /// Highest index allocated so far
    pub last_index: u32,
    /// Framed length of the record at `last_index`
    pub last_len: u32,
    /// Catalog: first live slot. Plain log: this log's slot in its catalog.
    pub cat_idx: u32,
    /// Plain log: the catalog it belongs to
    pub parent: LogId,
    /// Owning-target identity
    pub target: String,
    pub bitmap: Bitmap,
}

impl LogHeader {
    pub fn new(flags: u32, bitmap_bits: u32, target: &str) -> Self {
        LogHeader {
            flags,
            count: 0,
            last_index: 0,
            last_len: 0,
            cat_idx: 0,
            parent: LogId::new(0, 0),
            target: target.to_string(),
            bitmap: Bitmap::new(bitmap_bits),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.bitmap.bits()
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Serialize into a zeroed buffer of exactly one chunk
    pub fn encode(&self, id: LogId, buf: &mut [u8]) -> Result<()> {
        let chunk_size = buf.len();
        if encoded_len(self.bitmap.bits) > chunk_size {
            return Err(Error::corrupt(
                id,
                format!("header does not fit a {} byte chunk", chunk_size),
            ));
        }

        let mut target = [0u8; TARGET_LEN];
        let name = self.target.as_bytes();
        let n = name.len().min(TARGET_LEN);
        target[..n].copy_from_slice(&name[..n]);

        let fixed = HeaderFixed {
            version: HEADER_VERSION,
            flags: self.flags,
            bitmap_bits: self.bitmap.bits,
            count: self.count,
            last_index: self.last_index,
            last_len: self.last_len,
            cat_idx: self.cat_idx,
            parent: self.parent,
            target,
        };

        // Frame the whole chunk as record 0, then fill in the body
        let body_len = chunk_size - REC_HDR_SIZE - REC_TAIL_SIZE;
        let body = vec![0u8; body_len];
        record::encode_into(LLOG_HDR_MAGIC, 0, &body, buf);

        let body = &mut buf[REC_HDR_SIZE..REC_HDR_SIZE + body_len];
        let written = bincode::encode_into_slice(&fixed, body, disk_config())
            .map_err(|e| Error::corrupt(id, format!("header encode: {}", e)))?;
        for (i, word) in self.bitmap.words.iter().enumerate() {
            let at = written + i * 8;
            body[at..at + 8].copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    /// Parse a header chunk; `buf.len()` is the expected chunk size
    pub fn decode(id: LogId, buf: &[u8]) -> Result<LogHeader> {
        let hdr = record::decode_header(id, buf)?;
        if hdr.rec_type != LLOG_HDR_MAGIC {
            return Err(Error::corrupt(
                id,
                format!("bad header magic {:#x}", hdr.rec_type),
            ));
        }
        if hdr.len as usize != buf.len() {
            return Err(Error::corrupt(
                id,
                format!(
                    "stored header size {} != expected {}",
                    hdr.len,
                    buf.len()
                ),
            ));
        }
        let framed = record::decode(id, buf)?;
        if framed.index() != 0 {
            return Err(Error::corrupt(
                id,
                format!("header chunk carries index {}", framed.index()),
            ));
        }

        let body = &framed.payload;
        let (fixed, read): (HeaderFixed, usize) =
            bincode::decode_from_slice(body, disk_config())
                .map_err(|e| Error::corrupt(id, format!("header decode: {}", e)))?;
        if fixed.version != HEADER_VERSION {
            return Err(Error::corrupt(
                id,
                format!("unsupported header version {}", fixed.version),
            ));
        }
        if fixed.bitmap_bits == 0
            || fixed.bitmap_bits % 64 != 0
            || encoded_len(fixed.bitmap_bits) > buf.len()
        {
            return Err(Error::corrupt(
                id,
                format!("bitmap of {} bits does not fit the chunk", fixed.bitmap_bits),
            ));
        }

        if fixed.last_index >= fixed.bitmap_bits {
            return Err(Error::corrupt(
                id,
                format!(
                    "last index {} outside {} slots",
                    fixed.last_index, fixed.bitmap_bits
                ),
            ));
        }
        if fixed.flags & LLOG_F_IS_CAT != 0 && fixed.cat_idx >= fixed.bitmap_bits {
            return Err(Error::corrupt(
                id,
                format!(
                    "first live index {} outside {} slots",
                    fixed.cat_idx, fixed.bitmap_bits
                ),
            ));
        }

        let mut bitmap = Bitmap::new(fixed.bitmap_bits);
        for (i, word) in bitmap.words.iter_mut().enumerate() {
            let at = read + i * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&body[at..at + 8]);
            *word = u64::from_le_bytes(raw);
        }
        if bitmap.count_ones() != fixed.count {
            return Err(Error::corrupt(
                id,
                format!(
                    "header count {} but {} bitmap bits set",
                    fixed.count,
                    bitmap.count_ones()
                ),
            ));
        }

        let target_len = fixed
            .target
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TARGET_LEN);

        Ok(LogHeader {
            flags: fixed.flags,
            count: fixed.count,
            last_index: fixed.last_index,
            last_len: fixed.last_len,
            cat_idx: fixed.cat_idx,
            parent: fixed.parent,
            target: String::from_utf8_lossy(&fixed.target[..target_len]).into_owned(),
            bitmap,
        })
    }
}

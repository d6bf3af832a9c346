//! Record framing: `header{len, index, type}` + payload + `tail{len, index}`,
//! little-endian on disk. The length and index appear in both header and
//! tail; any disagreement on read means the chunk is damaged.

use crate::base::{LogId, REC_HDR_SIZE, REC_TAIL_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Framed length: header + payload + tail
    pub len: u32,
    pub index: u32,
    pub rec_type: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTail {
    pub len: u32,
    pub index: u32,
}

/// One decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
    pub tail: RecordTail,
}

impl Record {
    pub fn new(rec_type: u32, index: u32, payload: Vec<u8>) -> Self {
        let len = framed_len(payload.len()) as u32;
        Record {
            header: RecordHeader {
                len,
                index,
                rec_type,
            },
            payload,
            tail: RecordTail { len, index },
        }
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn rec_type(&self) -> u32 {
        self.header.rec_type
    }
}

/// Bytes needed to frame a payload of `payload_len` bytes
pub fn framed_len(payload_len: usize) -> usize {
    REC_HDR_SIZE + payload_len + REC_TAIL_SIZE
}

/// Frame a record into `buf`, returning the framed length.
/// `buf` must hold at least `framed_len(payload.len())` bytes.
pub fn encode_into(rec_type: u32, index: u32, payload: &[u8], buf: &mut [u8]) -> usize {
    let len = framed_len(payload.len());
    let len32 = len as u32;
    buf[0..4].copy_from_slice(&len32.to_le_bytes());
    buf[4..8].copy_from_slice(&index.to_le_bytes());
    buf[8..12].copy_from_slice(&rec_type.to_le_bytes());
    buf[REC_HDR_SIZE..REC_HDR_SIZE + payload.len()].copy_from_slice(payload);
    let tail = REC_HDR_SIZE + payload.len();
    buf[tail..tail + 4].copy_from_slice(&len32.to_le_bytes());
    buf[tail + 4..tail + 8].copy_from_slice(&index.to_le_bytes());
    len
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Decode the record header only, without validating the tail
pub fn decode_header(id: LogId, buf: &[u8]) -> Result<RecordHeader> {
    if buf.len() < REC_HDR_SIZE {
        return Err(Error::corrupt(
            id,
            format!("{} bytes cannot hold a record header", buf.len()),
        ));
    }
    Ok(RecordHeader {
        len: read_u32(buf, 0),
        index: read_u32(buf, 4),
        rec_type: read_u32(buf, 8),
    })
}

/// Decode and validate one framed record at the start of `buf`
pub fn decode(id: LogId, buf: &[u8]) -> Result<Record> {
    let header = decode_header(id, buf)?;
    let len = header.len as usize;
    if len < REC_HDR_SIZE + REC_TAIL_SIZE || len > buf.len() {
        return Err(Error::corrupt(
            id,
            format!(
                "record {} claims length {} in a {} byte chunk",
                header.index,
                len,
                buf.len()
            ),
        ));
    }

    let tail_at = len - REC_TAIL_SIZE;
    let tail = RecordTail {
        len: read_u32(buf, tail_at),
        index: read_u32(buf, tail_at + 4),
    };
    if tail.len != header.len {
        return Err(Error::corrupt(
            id,
            format!(
                "record {} header length {} != tail length {}",
                header.index, header.len, tail.len
            ),
        ));
    }
    if tail.index != header.index {
        return Err(Error::corrupt(
            id,
            format!(
                "record header index {} != tail index {}",
                header.index, tail.index
            ),
        ));
    }

    Ok(Record {
        header,
        payload: buf[REC_HDR_SIZE..tail_at].to_vec(),
        tail,
    })
}

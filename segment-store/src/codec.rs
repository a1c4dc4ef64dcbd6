use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use core_types::{Record, RecordKind};
use crc32fast::Hasher as Crc32;

use crate::error::{Result, SegmentError};

const SEGMENT_MAGIC: &[u8; 8] = b"TVLTSEG1";
pub(crate) const SEGMENT_HEADER_SIZE: usize = 32;
const SCHEMA_VERSION: u32 = 1;

/// Frame layout: `[body_len: u32][crc32(body): u32][body]` where body is
/// `ts_ns: i64 | kind: u8 | payload bytes`.
const FRAME_PREFIX: usize = 8;
const BODY_FIXED: usize = 9;

pub(crate) fn write_header(file: &mut File) -> io::Result<()> {
    let created_at_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mut buf = [0u8; SEGMENT_HEADER_SIZE];
    buf[..SEGMENT_MAGIC.len()].copy_from_slice(SEGMENT_MAGIC);
    buf[8..12].copy_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf[12..20].copy_from_slice(&created_at_s.to_le_bytes());
    file.write_all(&buf)
}

fn validate_header(buf: &[u8; SEGMENT_HEADER_SIZE], segment: &str) -> Result<()> {
    if &buf[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
        return Err(SegmentError::Corrupt {
            segment: segment.to_string(),
            detail: "missing magic header".to_string(),
        });
    }
    let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if version != SCHEMA_VERSION {
        return Err(SegmentError::Corrupt {
            segment: segment.to_string(),
            detail: format!("schema version {version}, expected {SCHEMA_VERSION}"),
        });
    }
    Ok(())
}

pub(crate) fn encode_record(record: &Record) -> Vec<u8> {
    let payload = record.payload.as_bytes();
    let body_len = BODY_FIXED + payload.len();
    let mut frame = Vec::with_capacity(FRAME_PREFIX + body_len);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&[0u8; 4]); // crc placeholder
    frame.extend_from_slice(&record.ts_ns.to_le_bytes());
    frame.push(record.kind.code());
    frame.extend_from_slice(payload);
    let mut hasher = Crc32::new();
    hasher.update(&frame[FRAME_PREFIX..]);
    let crc = hasher.finalize();
    frame[4..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Read every record in the file, validating the header and each frame
/// crc. A torn trailing frame is reported as corruption rather than
/// being silently skipped.
pub(crate) fn read_all(file: &mut File, segment: &str) -> Result<Vec<Record>> {
    file.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    file.read_exact(&mut header).map_err(|_| SegmentError::Corrupt {
        segment: segment.to_string(),
        detail: "truncated header".to_string(),
    })?;
    validate_header(&header, segment)?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < FRAME_PREFIX {
            return Err(torn_frame(segment, records.len()));
        }
        let body_len =
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        let stored_crc = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap());
        let body_start = offset + FRAME_PREFIX;
        if body_len < BODY_FIXED || bytes.len() - body_start < body_len {
            return Err(torn_frame(segment, records.len()));
        }
        let body = &bytes[body_start..body_start + body_len];
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(SegmentError::Corrupt {
                segment: segment.to_string(),
                detail: format!("crc mismatch at record {}", records.len()),
            });
        }
        let ts_ns = i64::from_le_bytes(body[..8].try_into().unwrap());
        let kind = RecordKind::from_code(body[8]);
        let payload = String::from_utf8_lossy(&body[BODY_FIXED..]).into_owned();
        records.push(Record { ts_ns, kind, payload });
        offset = body_start + body_len;
    }
    Ok(records)
}

fn torn_frame(segment: &str, index: usize) -> SegmentError {
    SegmentError::Corrupt {
        segment: segment.to_string(),
        detail: format!("torn frame after record {index}"),
    }
}

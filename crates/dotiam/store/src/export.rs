// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Export stream codec
//!
//! Layout:
//!
//! ```text
//! magic (8 bytes) | header frame | record frame * count
//! frame = payload length (u32 LE) | crc32 of payload (u32 LE) | bincode payload
//! ```
//!
//! Decoding verifies every frame before handing records back, so an importer
//! can refuse a truncated or corrupted stream without touching its state.

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Stream magic bytes
pub const EXPORT_MAGIC: &[u8; 8] = b"DIAMEXP1";

/// Upper bound for a single frame payload
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    /// Lower bound (exclusive) of exported record versions
    pub since: u64,
    /// Source store version when the export started
    pub version: u64,
    /// Number of record frames following the header
    pub count: u64,
}

/// One exported record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub table: String,
    pub key: String,
    pub record: Record,
}

/// Write a complete export stream
pub fn write_stream<'a, I>(writer: &mut dyn Write, header: &ExportHeader, records: I) -> StoreResult<()>
where
    I: IntoIterator<Item = &'a ExportRecord>,
{
    writer.write_all(EXPORT_MAGIC)?;
    write_frame(writer, header)?;

    let mut written = 0u64;
    for record in records {
        write_frame(writer, record)?;
        written += 1;
    }

    if written != header.count {
        return Err(StoreError::Serialization {
            message: format!("header announced {} records, wrote {}", header.count, written),
        });
    }

    writer.flush()?;
    Ok(())
}

/// Read and verify a complete export stream
pub fn read_stream(reader: &mut dyn Read) -> StoreResult<(ExportHeader, Vec<ExportRecord>)> {
    let mut magic = [0u8; 8];
    read_exact_or_corrupt(reader, &mut magic, "magic")?;
    if &magic != EXPORT_MAGIC {
        return Err(StoreError::Corrupt {
            message: "bad magic bytes".to_string(),
        });
    }

    let header: ExportHeader = read_frame(reader)?.ok_or_else(|| StoreError::Corrupt {
        message: "missing header frame".to_string(),
    })?;

    let mut records = Vec::with_capacity(header.count.min(1 << 16) as usize);
    for index in 0..header.count {
        let record: ExportRecord = read_frame(reader)?.ok_or_else(|| StoreError::Corrupt {
            message: format!("stream ended after {} of {} records", index, header.count),
        })?;
        records.push(record);
    }

    Ok((header, records))
}

fn write_frame<T: Serialize>(writer: &mut dyn Write, value: &T) -> StoreResult<()> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    let len = u32::try_from(payload.len()).ok().filter(|len| *len <= MAX_FRAME_LEN).ok_or_else(|| StoreError::Serialization {
        message: format!("frame of {} bytes exceeds limit", payload.len()),
    })?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);

    writer.write_u32::<LittleEndian>(len)?;
    writer.write_u32::<LittleEndian>(hasher.finalize())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read one frame, `None` on a clean end of stream
fn read_frame<T: DeserializeOwned>(reader: &mut dyn Read) -> StoreResult<Option<T>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(StoreError::Corrupt {
            message: format!("frame length {} exceeds limit", len),
        });
    }

    let mut checksum = [0u8; 4];
    read_exact_or_corrupt(reader, &mut checksum, "frame checksum")?;
    let checksum = u32::from_le_bytes(checksum);

    let mut payload = vec![0u8; len as usize];
    read_exact_or_corrupt(reader, &mut payload, "frame payload")?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != checksum {
        return Err(StoreError::Corrupt {
            message: "frame checksum mismatch".to_string(),
        });
    }

    let (value, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())?;
    Ok(Some(value))
}

fn read_exact_or_corrupt(reader: &mut dyn Read, buf: &mut [u8], what: &str) -> StoreResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => StoreError::Corrupt {
            message: format!("truncated {}", what),
        },
        _ => StoreError::Io(e),
    })
}

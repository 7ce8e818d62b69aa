//! On-disk snapshot format for the partition store.
//!
//! Layout:
//! - magic: 4 bytes ("BRTR")
//! - version: 4 bytes
//! - partition_count: 4 bytes
//! - per partition:
//!   - name_len: 4 bytes, name bytes
//!   - entry_count: 8 bytes
//!   - per entry: key_len: 4 bytes, key, value_len: 4 bytes, value
//! - checksum: 4 bytes (CRC32 of everything preceding it)
//!
//! All integers are little-endian.

use crate::tree::PartitionMap;
use burrow_common::{BurrowError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::BTreeMap;
use std::path::Path;

/// Magic bytes identifying a partition store file.
pub const MAGIC: [u8; 4] = *b"BRTR";

/// Current format version.
pub const VERSION: u32 = 1;

/// Encodes the partition set to its snapshot representation.
pub fn encode(partitions: &BTreeMap<Vec<u8>, PartitionMap>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(&MAGIC);
    buf.put_u32_le(VERSION);
    buf.put_u32_le(partitions.len() as u32);

    for (name, entries) in partitions {
        buf.put_u32_le(name.len() as u32);
        buf.put_slice(name);
        buf.put_u64_le(entries.len() as u64);
        for (key, value) in entries {
            buf.put_u32_le(key.len() as u32);
            buf.put_slice(key);
            buf.put_u32_le(value.len() as u32);
            buf.put_slice(value);
        }
    }

    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf.to_vec()
}

fn corrupted(path: &Path, reason: impl Into<String>) -> BurrowError {
    BurrowError::TreeCorrupted {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn take_bytes<'a>(data: &mut &'a [u8], len: usize, path: &Path, what: &str) -> Result<&'a [u8]> {
    if data.remaining() < len {
        return Err(corrupted(path, format!("truncated {}", what)));
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

/// Decodes a snapshot, verifying the trailing checksum.
pub fn decode(path: &Path, data: &[u8]) -> Result<BTreeMap<Vec<u8>, PartitionMap>> {
    if data.len() < MAGIC.len() + 4 + 4 + 4 {
        return Err(corrupted(path, "file too short"));
    }

    let (body, checksum_bytes) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([
        checksum_bytes[0],
        checksum_bytes[1],
        checksum_bytes[2],
        checksum_bytes[3],
    ]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(corrupted(
            path,
            format!("checksum mismatch: stored={}, computed={}", stored, computed),
        ));
    }

    let mut cursor = body;
    let magic = take_bytes(&mut cursor, 4, path, "magic")?;
    if magic != MAGIC {
        return Err(corrupted(path, "invalid magic bytes"));
    }
    let version = cursor.get_u32_le();
    if version != VERSION {
        return Err(corrupted(path, format!("unsupported version: {}", version)));
    }
    let partition_count = cursor.get_u32_le() as usize;

    let mut partitions = BTreeMap::new();
    for _ in 0..partition_count {
        if cursor.remaining() < 4 {
            return Err(corrupted(path, "truncated partition header"));
        }
        let name_len = cursor.get_u32_le() as usize;
        let name = take_bytes(&mut cursor, name_len, path, "partition name")?.to_vec();
        if cursor.remaining() < 8 {
            return Err(corrupted(path, "truncated entry count"));
        }
        let entry_count = cursor.get_u64_le() as usize;

        let mut entries = PartitionMap::new();
        for _ in 0..entry_count {
            if cursor.remaining() < 4 {
                return Err(corrupted(path, "truncated entry key length"));
            }
            let key_len = cursor.get_u32_le() as usize;
            let key = take_bytes(&mut cursor, key_len, path, "entry key")?.to_vec();
            if cursor.remaining() < 4 {
                return Err(corrupted(path, "truncated entry value length"));
            }
            let value_len = cursor.get_u32_le() as usize;
            let value = take_bytes(&mut cursor, value_len, path, "entry value")?.to_vec();
            entries.insert(key, value);
        }
        partitions.insert(name, entries);
    }

    if cursor.has_remaining() {
        return Err(corrupted(path, "trailing bytes after partition data"));
    }

    Ok(partitions)
}

/// Writes a snapshot atomically: encode, write to a temporary file alongside
/// the target, rename over it.
pub fn persist(path: &Path, partitions: &BTreeMap<Vec<u8>, PartitionMap>) -> Result<()> {
    let encoded = encode(partitions);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, &encoded).map_err(|e| BurrowError::FileSystem {
        path: tmp.clone(),
        operation: "write",
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| BurrowError::FileSystem {
        path: path.to_path_buf(),
        operation: "rename",
        source: e,
    })?;
    Ok(())
}

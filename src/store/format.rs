// prolly-seq/src/store/format.rs

//! On-disk layout of sequence snapshots: a header, raw chunk data, a
//! CRC-checked chunk index block, a CRC-checked JSON metadata block, and an
//! EOF block repeating the offsets under a whole-file Blake3 checksum.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::common::{ChunkConfig, Hash, HASH_SIZE};

pub const SNAPSHOT_SIGNATURE: &[u8; 8] = b"PSEQSNP1";
pub const SNAPSHOT_VERSION: u8 = 0x01;

pub const TAG_CHUNK_INDEX_BLOCK: u8 = 0x20;
pub const TAG_METADATA_BLOCK: u8 = 0x01;
pub const TAG_EOF_BLOCK: u8 = 0xFF;

pub const FILE_CHECKSUM_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHeader {
    pub signature: [u8; 8],
    pub version: u8,
    pub flags: u8,
    pub offset_metadata: u64,
    pub offset_chunk_index: u64,
    pub offset_eof: u64,
}

impl SnapshotHeader {
    pub fn new(offset_metadata: u64, offset_chunk_index: u64, offset_eof: u64) -> Self {
        SnapshotHeader {
            signature: *SNAPSHOT_SIGNATURE,
            version: SNAPSHOT_VERSION,
            flags: 0,
            offset_metadata,
            offset_chunk_index,
            offset_eof,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.signature)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.flags)?;
        writer.write_u64::<BigEndian>(self.offset_metadata)?;
        writer.write_u64::<BigEndian>(self.offset_chunk_index)?;
        writer.write_u64::<BigEndian>(self.offset_eof)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut signature = [0u8; 8];
        reader.read_exact(&mut signature)?;
        let version = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let offset_metadata = reader.read_u64::<BigEndian>()?;
        let offset_chunk_index = reader.read_u64::<BigEndian>()?;
        let offset_eof = reader.read_u64::<BigEndian>()?;
        Ok(SnapshotHeader {
            signature,
            version,
            flags,
            offset_metadata,
            offset_chunk_index,
            offset_eof,
        })
    }

    pub const fn size() -> usize {
        8 + 1 + 1 + 8 + 8 + 8
    }
}

/// Index entry locating one chunk's bytes within the file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkIndexEntry {
    pub hash: Hash,
    pub offset: u64,
    pub length: u32,
}

impl ChunkIndexEntry {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.hash)?;
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.length)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut hash: Hash = [0u8; HASH_SIZE];
        reader.read_exact(&mut hash)?;
        let offset = reader.read_u64::<BigEndian>()?;
        let length = reader.read_u32::<BigEndian>()?;
        Ok(ChunkIndexEntry {
            hash,
            offset,
            length,
        })
    }
}

/// Metadata block payload, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub root_hash: Option<Hash>,
    pub chunk_config: ChunkConfig,
    pub created_at: String,
    pub description: Option<String>,
    pub total_chunk_data_bytes: u64,
}

/// Trailer: repeats the block offsets, carries the reversed signature and
/// the checksum of everything before it.
#[derive(Debug, Clone, PartialEq)]
pub struct EofBlock {
    pub tag: u8,
    pub offset_metadata: u64,
    pub offset_chunk_index: u64,
    pub signature_reversed: [u8; 8],
    pub file_checksum: [u8; FILE_CHECKSUM_SIZE],
}

impl EofBlock {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u8(self.tag)?;
        writer.write_u64::<BigEndian>(self.offset_metadata)?;
        writer.write_u64::<BigEndian>(self.offset_chunk_index)?;
        writer.write_all(&self.signature_reversed)?;
        writer.write_all(&self.file_checksum)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let tag = reader.read_u8()?;
        let offset_metadata = reader.read_u64::<BigEndian>()?;
        let offset_chunk_index = reader.read_u64::<BigEndian>()?;
        let mut signature_reversed = [0u8; 8];
        reader.read_exact(&mut signature_reversed)?;
        let mut file_checksum = [0u8; FILE_CHECKSUM_SIZE];
        reader.read_exact(&mut file_checksum)?;
        Ok(EofBlock {
            tag,
            offset_metadata,
            offset_chunk_index,
            signature_reversed,
            file_checksum,
        })
    }
}

/// Envelope framing a content block: tag, content length, CRC32 of content.
pub struct BlockEnvelope {
    pub tag: u8,
    pub content_length: u32,
    pub content_checksum: u32,
}

impl BlockEnvelope {
    pub fn new(tag: u8, content_length: u32, content_checksum: u32) -> Self {
        BlockEnvelope {
            tag,
            content_length,
            content_checksum,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u8(self.tag)?;
        writer.write_u32::<BigEndian>(self.content_length)?;
        writer.write_u32::<BigEndian>(self.content_checksum)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let tag = reader.read_u8()?;
        let content_length = reader.read_u32::<BigEndian>()?;
        let content_checksum = reader.read_u32::<BigEndian>()?;
        Ok(BlockEnvelope {
            tag,
            content_length,
            content_checksum,
        })
    }
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn file_checksum(data: &[u8]) -> [u8; FILE_CHECKSUM_SIZE] {
    *blake3::hash(data).as_bytes()
}

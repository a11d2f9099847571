// prolly-seq/src/store/file_io.rs

//! Snapshot write/read: one self-describing blob holding a root hash, its
//! chunk configuration and every chunk, verifiable without the store.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;

use super::format::{
    crc32, file_checksum, BlockEnvelope, ChunkIndexEntry, EofBlock, SnapshotHeader,
    SnapshotMetadata, SNAPSHOT_SIGNATURE, SNAPSHOT_VERSION, TAG_CHUNK_INDEX_BLOCK,
    TAG_EOF_BLOCK, TAG_METADATA_BLOCK,
};
use crate::common::{ChunkConfig, Hash};
use crate::error::{ProllyError, Result};

/// Serializes a root hash, its configuration and a chunk set into a
/// snapshot blob.
pub fn write_snapshot(
    root_hash: Option<Hash>,
    chunk_config: &ChunkConfig,
    chunks: &HashMap<Hash, Vec<u8>>,
    description: Option<String>,
) -> Result<Vec<u8>> {
    let mut file = vec![0u8; SnapshotHeader::size()];

    let offset_chunk_index: u64;
    let offset_metadata: u64;
    let offset_eof: u64;

    {
        let mut writer = Cursor::new(&mut file);
        writer.seek(SeekFrom::Start(SnapshotHeader::size() as u64))?;

        // Chunk data, with index entries sorted by hash for determinism.
        let mut index_entries = Vec::with_capacity(chunks.len());
        let mut offset = SnapshotHeader::size() as u64;
        let mut total_chunk_data_bytes = 0u64;
        let mut sorted: Vec<_> = chunks.iter().collect();
        sorted.sort_by_key(|(hash, _)| **hash);
        for (hash, data) in sorted {
            writer.write_all(data)?;
            index_entries.push(ChunkIndexEntry {
                hash: *hash,
                offset,
                length: data.len() as u32,
            });
            offset += data.len() as u64;
            total_chunk_data_bytes += data.len() as u64;
        }

        // Chunk index block.
        let mut index_content = Vec::new();
        index_content.write_u32::<BigEndian>(index_entries.len() as u32)?;
        for entry in &index_entries {
            entry.write_to(&mut index_content)?;
        }
        offset_chunk_index = writer.position();
        BlockEnvelope::new(
            TAG_CHUNK_INDEX_BLOCK,
            index_content.len() as u32,
            crc32(&index_content),
        )
        .write_to(&mut writer)?;
        writer.write_all(&index_content)?;

        // Metadata block.
        let metadata = SnapshotMetadata {
            root_hash,
            chunk_config: chunk_config.clone(),
            created_at: Utc::now().to_rfc3339(),
            description,
            total_chunk_data_bytes,
        };
        let metadata_json = serde_json::to_vec(&metadata)
            .map_err(|e| ProllyError::Serialization(e.to_string()))?;
        offset_metadata = writer.position();
        BlockEnvelope::new(
            TAG_METADATA_BLOCK,
            metadata_json.len() as u32,
            crc32(&metadata_json),
        )
        .write_to(&mut writer)?;
        writer.write_all(&metadata_json)?;

        offset_eof = writer.position();

        // Back-fill the finalized header.
        writer.seek(SeekFrom::Start(0))?;
        SnapshotHeader::new(offset_metadata, offset_chunk_index, offset_eof)
            .write_to(&mut writer)?;
    }

    // Whole-file checksum covers everything before the EOF block.
    let checksum = file_checksum(&file[..offset_eof as usize]);
    let mut signature_reversed = *SNAPSHOT_SIGNATURE;
    signature_reversed.reverse();
    let eof = EofBlock {
        tag: TAG_EOF_BLOCK,
        offset_metadata,
        offset_chunk_index,
        signature_reversed,
        file_checksum: checksum,
    };
    let mut trailer = Vec::new();
    eof.write_to(&mut trailer)?;
    file.extend_from_slice(&trailer);

    Ok(file)
}

/// Parses and verifies a snapshot blob, returning the root hash, the chunk
/// configuration, the chunk set and the stored description.
pub fn read_snapshot(
    file: &[u8],
) -> Result<(Option<Hash>, ChunkConfig, HashMap<Hash, Vec<u8>>, Option<String>)> {
    let mut reader = Cursor::new(file);

    let header = SnapshotHeader::read_from(&mut reader)
        .map_err(|e| ProllyError::InvalidFileFormat(format!("failed to read header: {e}")))?;
    if &header.signature != SNAPSHOT_SIGNATURE {
        return Err(ProllyError::InvalidFileFormat("invalid signature".into()));
    }
    if header.version != SNAPSHOT_VERSION {
        return Err(ProllyError::InvalidFileFormat(format!(
            "unsupported version: {}",
            header.version
        )));
    }
    if header.offset_eof as usize > file.len() {
        return Err(ProllyError::InvalidFileFormat(
            "EOF offset out of bounds".into(),
        ));
    }

    // Chunk index block.
    reader.seek(SeekFrom::Start(header.offset_chunk_index))?;
    let index_envelope = BlockEnvelope::read_from(&mut reader)?;
    if index_envelope.tag != TAG_CHUNK_INDEX_BLOCK {
        return Err(ProllyError::InvalidFileFormat(
            "chunk index block tag mismatch".into(),
        ));
    }
    let mut index_content = vec![0u8; index_envelope.content_length as usize];
    reader.read_exact(&mut index_content)?;
    if crc32(&index_content) != index_envelope.content_checksum {
        return Err(ProllyError::ChecksumMismatch {
            context: "chunk index block".into(),
        });
    }
    let mut index_reader = Cursor::new(index_content);
    let entry_count = index_reader.read_u32::<BigEndian>()?;
    let mut index_entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        index_entries.push(ChunkIndexEntry::read_from(&mut index_reader)?);
    }

    // Metadata block.
    reader.seek(SeekFrom::Start(header.offset_metadata))?;
    let metadata_envelope = BlockEnvelope::read_from(&mut reader)?;
    if metadata_envelope.tag != TAG_METADATA_BLOCK {
        return Err(ProllyError::InvalidFileFormat(
            "metadata block tag mismatch".into(),
        ));
    }
    let mut metadata_json = vec![0u8; metadata_envelope.content_length as usize];
    reader.read_exact(&mut metadata_json)?;
    if crc32(&metadata_json) != metadata_envelope.content_checksum {
        return Err(ProllyError::ChecksumMismatch {
            context: "metadata block".into(),
        });
    }
    let metadata: SnapshotMetadata = serde_json::from_slice(&metadata_json)
        .map_err(|e| ProllyError::Deserialization(e.to_string()))?;

    // Chunk data.
    let mut chunks = HashMap::with_capacity(index_entries.len());
    for entry in &index_entries {
        let end = entry.offset + entry.length as u64;
        if end > file.len() as u64 {
            return Err(ProllyError::InvalidFileFormat(format!(
                "chunk bounds out of range for hash {}",
                crate::common::fmt_hash(&entry.hash)
            )));
        }
        chunks.insert(
            entry.hash,
            file[entry.offset as usize..end as usize].to_vec(),
        );
    }

    // EOF block and whole-file checksum.
    reader.seek(SeekFrom::Start(header.offset_eof))?;
    let eof = EofBlock::read_from(&mut reader)?;
    if eof.tag != TAG_EOF_BLOCK {
        return Err(ProllyError::InvalidFileFormat("EOF block tag mismatch".into()));
    }
    let mut expected_reversed = *SNAPSHOT_SIGNATURE;
    expected_reversed.reverse();
    if eof.signature_reversed != expected_reversed {
        return Err(ProllyError::InvalidFileFormat(
            "EOF reversed signature mismatch".into(),
        ));
    }
    if file_checksum(&file[..header.offset_eof as usize]) != eof.file_checksum {
        return Err(ProllyError::ChecksumMismatch {
            context: "overall file content".into(),
        });
    }

    Ok((
        metadata.root_hash,
        metadata.chunk_config,
        chunks,
        metadata.description,
    ))
}

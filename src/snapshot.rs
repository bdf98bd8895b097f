//! Memory snapshots
//!
//! Captures the module's linear memory for offline inspection. Only pages that
//! hold something are stored: fresh memory is zero-filled, so a page of zeros
//! can be rebuilt from the page count alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::memory::LinearMemory;
use crate::store::{BridgeStats, Store};

/// Granularity of the dirty-page scan (4KB)
pub const CHUNK_SIZE: usize = 4096;

#[derive(Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Version for compatibility checking
    pub version: u32,

    /// Memory size in 64 KiB pages at capture time
    pub pages: u32,

    /// Buffer generation at capture time
    pub generation: u64,

    /// Resource counters at capture time
    pub stats: BridgeStats,

    /// Non-zero chunks (chunk_addr -> chunk_data)
    pub dirty_chunks: BTreeMap<u32, Vec<u8>>,
}

impl MemorySnapshot {
    /// Current snapshot version
    pub const VERSION: u32 = 1;

    pub fn capture(cx: &Store) -> Self {
        let memory = cx.memory();
        let dirty_chunks = memory
            .as_bytes()
            .chunks(CHUNK_SIZE)
            .enumerate()
            .filter(|(_, chunk)| chunk.iter().any(|&b| b != 0))
            .map(|(i, chunk)| ((i * CHUNK_SIZE) as u32, chunk.to_vec()))
            .collect();

        MemorySnapshot {
            version: Self::VERSION,
            pages: memory.pages(),
            generation: memory.generation(),
            stats: cx.stats(),
            dirty_chunks,
        }
    }

    /// Rebuild the captured memory contents
    pub fn restore(&self) -> Result<LinearMemory, BridgeError> {
        if self.version != Self::VERSION {
            return Err(BridgeError::Config(format!(
                "snapshot version {} is not supported (expected {})",
                self.version,
                Self::VERSION
            )));
        }
        let mut memory = LinearMemory::new(self.pages, self.pages);
        for (&addr, chunk) in &self.dirty_chunks {
            memory.write_bytes(addr, chunk)?;
        }
        Ok(memory)
    }

    /// Bytes held in dirty chunks
    pub fn dirty_bytes(&self) -> usize {
        self.dirty_chunks.values().map(Vec::len).sum()
    }

    /// Serialize to bytes (compressed with zstd)
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        let serialized = bincode::serialize(self).map_err(|e| format!("Serialization error: {}", e))?;

        zstd::stream::encode_all(&serialized[..], 3).map_err(|e| format!("Compression error: {}", e))
    }

    /// Deserialize from bytes (compressed with zstd)
    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        let decompressed = zstd::stream::decode_all(data).map_err(|e| format!("Decompression error: {}", e))?;

        bincode::deserialize(&decompressed).map_err(|e| format!("Deserialization error: {}", e))
    }
}

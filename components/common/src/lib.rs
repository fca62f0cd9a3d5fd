pub const CUMULO: &str = "cumulo";

/// Size of one write record in the header region of a stored object.
pub const WRITE_RECORD_SIZE: usize = 32;

/// The kernel block layer always speaks in 512-byte sectors on the wire,
/// no matter how big the device blocks are.
pub const SECTOR_UNIT: u64 = 512;

/// Reserved key of the object holding the serialized extent map.
pub const CHECKPOINT_KEY: i64 = -1;

/// Sentinel key for sectors that have never been written.
pub const NOT_MAPPED_KEY: i64 = -1;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
// 4 MiB stored objects by default.
pub const DEFAULT_CHUNK_SIZE: usize = 4 << 20;

pub const DEFAULT_UPLOADERS: usize = 16;
pub const DEFAULT_DOWNLOADERS: usize = 16;

/// Identifier of one immutable object on the backend. Monotonically
/// increasing and non-negative, except for the reserved [CHECKPOINT_KEY]
/// and [NOT_MAPPED_KEY] sentinels.
pub type ObjectKey = i64;

/// Index of a device block. All core structures are block granular; the
/// 512-byte wire unit only appears at parse time.
pub type SectorIndex = u64;
pub type SectorCount = u64;
pub type SeqNo = u64;

pub type BlockSize = usize;
pub type ChunkSize = usize;

/// Number of blocks the device presents for a given capacity.
pub fn device_sectors(device_size: u64, block_size: BlockSize) -> SectorCount {
    device_size / block_size as u64
}

/// Byte size of the header region of a stored object. The header is always
/// fully present so the data region starts at a constant offset.
pub fn header_bytes(chunk_size: ChunkSize, block_size: BlockSize) -> usize {
    chunk_size / block_size * WRITE_RECORD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_region_is_constant_size() {
        // 16 KiB chunk of 4 KiB blocks holds at most 4 writes.
        assert_eq!(header_bytes(16 << 10, 4096), 4 * WRITE_RECORD_SIZE);
        // The default layout: 4 MiB chunk, 4 KiB blocks.
        assert_eq!(header_bytes(DEFAULT_CHUNK_SIZE, DEFAULT_BLOCK_SIZE), 32 << 10);
    }

    #[test]
    fn sectors_follow_block_size() {
        assert_eq!(device_sectors(8 << 30, 4096), 2 << 20);
        assert_eq!(device_sectors(8 << 30, 512), 16 << 20);
    }
}

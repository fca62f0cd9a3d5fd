use cumulo_common::{ObjectKey, SectorCount, SectorIndex, SeqNo, NOT_MAPPED_KEY};
use serde::{Deserialize, Serialize};

/// One contiguous logical write as seen by the device: `length` blocks
/// starting at `sector`, stamped with the ordering tag of the write command
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub sector: SectorIndex,
    pub length: SectorCount,
    pub seq_no: SeqNo,
    // Reserved by the shim wire format.
    pub flag: u64,
}

/// A contiguous slice of one stored object: `length` blocks starting at
/// block `sector` inside the object identified by `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPart {
    pub sector: SectorIndex,
    pub length: SectorCount,
    pub key: ObjectKey,
}

impl ObjectPart {
    pub fn is_mapped(&self) -> bool { self.key != NOT_MAPPED_KEY }
}

/// Pairs a live extent with the place it currently resides. Produced by the
/// keyed-extent scan that feeds compaction: `extent.sector` is the source
/// position inside the owning object, while `part.sector` is the logical
/// device sector the run starts at (`part.length` is zero, it is only a
/// position marker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentWithPart {
    pub extent: Extent,
    pub part: ObjectPart,
}

/// Per-sector row of the extent map: where the current value of the sector
/// lives (`key` + block position inside that object) and the sequence number
/// of the write that put it there. 32 bytes, kept dense in a flat array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorEntry {
    pub sector: SectorIndex,
    pub key: ObjectKey,
    pub seq_no: SeqNo,
    pub flag: u64,
}

impl Default for SectorEntry {
    fn default() -> Self {
        Self {
            sector: 0,
            key: NOT_MAPPED_KEY,
            seq_no: 0,
            flag: 0,
        }
    }
}

impl SectorEntry {
    pub fn is_mapped(&self) -> bool { self.key != NOT_MAPPED_KEY }
}

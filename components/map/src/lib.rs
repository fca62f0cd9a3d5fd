pub mod err;
pub mod proxy;
pub mod sector_map;

use std::collections::{HashMap, HashSet};

use cumulo_common::{ObjectKey, SectorCount, SectorIndex};
use cumulo_types::{Extent, ExtentWithPart, ObjectPart};

pub use proxy::MapProxy;
pub use sector_map::SectorMap;

/// Capability set of the extent map: mapping logical device sectors to
/// positions inside stored objects, plus the bookkeeping the garbage
/// collector and recovery need. The flat-array [SectorMap] is the default
/// implementation; the engine is written against this trait so a tree-backed
/// variant can be swapped in.
///
/// Implementations are not required to be thread safe; all access goes
/// through the [MapProxy] worker.
pub trait ExtentMap: Send + 'static {
    /// Apply the write records of one uploaded object. `data_start` is the
    /// first data block inside the object (the header occupies the blocks
    /// before it), `key` the object's key. An entry is replaced only when
    /// its stored sequence number is `<=` the incoming one; the equality
    /// lets compaction rewrite live data in place without ever shadowing a
    /// newer client write.
    fn update(&mut self, extents: &[Extent], data_start: SectorIndex, key: ObjectKey);

    /// Decompose the logical range into the shortest list of object parts
    /// covering it, preserving runs of never-written sectors as parts with
    /// the not-mapped key so the caller can zero-fill.
    fn lookup(&self, sector: SectorIndex, length: SectorCount) -> Vec<ObjectPart>;

    /// Scan the range for maximal contiguous extents living in any of
    /// `keys`. The result pairs each live extent (source position inside its
    /// object) with the logical sector it starts at; used by compaction to
    /// relocate live data.
    fn find_extents_with_keys(
        &self,
        sector: SectorIndex,
        length: SectorCount,
        keys: &HashSet<ObjectKey>,
    ) -> Vec<ExtentWithPart>;

    /// Keys whose objects hold no live sector anymore.
    fn dead_objects(&self) -> HashSet<ObjectKey>;

    /// Live-sector count per object that still holds live data.
    fn objects_utilization(&self) -> HashMap<ObjectKey, u64>;

    /// Largest key currently carrying live data, or 0 when nothing does.
    fn max_key(&self) -> ObjectKey;

    fn delete_from_utilization(&mut self, keys: &HashSet<ObjectKey>);

    fn delete_from_dead_objects(&mut self, keys: &HashSet<ObjectKey>);

    /// Checkpoint codec. Deserialization adapts a snapshot taken with a
    /// different device size, zeroes all sequence numbers (the shim restarts
    /// numbering after a reboot) and returns the next unused object key.
    fn serialize(&self) -> err::Result<Vec<u8>>;

    fn deserialize_and_return_next_key(&mut self, buf: &[u8]) -> err::Result<ObjectKey>;
}

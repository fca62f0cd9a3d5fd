use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cumulo_common::{ObjectKey, SectorCount, SectorIndex, WRITE_RECORD_SIZE};
use cumulo_map::{MapProxy, SectorMap};
use cumulo_store::{KeyCounter, ObjectStore, Priority, StoreProxy};
use cumulo_types::{ObjectPart, WriteRecord};
use cumulo_utils::object_storage::{new_s3_object_storage, ObjectStorage};
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::err::{CreateBackendSnafu, Result};
use crate::BlockReadWriter;

/// The block-storage engine: packs write batches into immutable objects,
/// keeps the sector-to-object mapping, reconstructs reads and garbage
/// collects overwritten data. One instance serves one device.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) cfg: Config,
    pub(crate) keys: KeyCounter,
    pub(crate) store: StoreProxy,
    pub(crate) map: MapProxy,

    /// Objects pinned by in-flight reads; the dead reaper skips them. Held
    /// across the map lookup so a pin can never race the reaper, but never
    /// across store I/O.
    pub(crate) refcount: Mutex<HashMap<ObjectKey, i64>>,

    pub(crate) header_bytes: usize,
    /// First data block inside an object.
    pub(crate) header_blocks: u64,
    /// Sub-block remainder of the header region; zero whenever the header
    /// occupies whole blocks.
    header_skew: u64,

    /// Stops the background loops on shutdown.
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub device_size: u64,
    pub block_size: usize,
    pub sectors: u64,
    pub next_key: ObjectKey,
    pub live_objects: usize,
    pub live_sectors: u64,
    pub dead_objects: usize,
}

impl Engine {
    /// Build an engine on top of an already constructed object backend. The
    /// backend is probed once; unreachable or misconfigured storage is fatal.
    pub async fn new(mut cfg: Config, storage: ObjectStorage) -> Result<Engine> {
        cfg.validate()?;

        let store = ObjectStore::new(storage);
        store.bootstrap().await?;
        let store = StoreProxy::new(store, cfg.s3.uploaders, cfg.s3.downloaders);
        let map = MapProxy::new(SectorMap::new(cfg.sectors()));

        let header_bytes = cfg.header_bytes();
        let block = cfg.block_size;
        info!(
            size = %cfg.size,
            block_size = block,
            sectors = cfg.sectors(),
            "engine ready"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                keys: KeyCounter::new(),
                store,
                map,
                refcount: Mutex::new(HashMap::new()),
                header_bytes,
                header_blocks: (header_bytes / block) as u64,
                header_skew: (header_bytes % block) as u64,
                cancel: CancellationToken::new(),
                cfg,
            }),
        })
    }

    /// Default wiring: S3 backend from the configuration.
    pub async fn with_defaults(cfg: Config) -> Result<Engine> {
        let storage = new_s3_object_storage(
            &cfg.s3.bucket,
            &cfg.s3.remote,
            &cfg.s3.region,
            &cfg.s3.access_key,
            &cfg.s3.secret_key,
        )
        .context(CreateBackendSnafu)?;
        Engine::new(cfg, storage).await
    }

    /// Rebuild the map from the last checkpoint plus roll-forward, without
    /// deleting anything from the backend. Maintenance entry point; the boot
    /// path ([BlockReadWriter::pre_run]) additionally truncates the tail
    /// beyond the recovered frontier.
    pub async fn recover(&self) -> Result<()> {
        self.inner.restore_from_checkpoint().await?;
        self.inner.restore_from_objects().await
    }

    /// Serialize the map and park it under the reserved checkpoint key.
    pub async fn checkpoint(&self) -> Result<()> { self.inner.checkpoint().await }

    /// One threshold-compaction pass: rewrite every object whose live
    /// fraction is below `live_data` and hand the freed ones to the reaper.
    pub async fn gc_threshold(&self, step: u64, live_data: f64) -> Result<()> {
        self.inner.gc_threshold(step, live_data).await
    }

    /// One dead-reaper round: replace unreferenced dead objects with empty
    /// placeholders on the backend.
    pub async fn reap_dead(&self) -> Result<()> { self.inner.reap_dead().await }

    pub async fn stats(&self) -> Result<EngineStats> {
        let utilization = self.inner.map.objects_utilization().await?;
        let dead = self.inner.map.dead_objects().await?;
        Ok(EngineStats {
            device_size: self.inner.cfg.size.as_bytes(),
            block_size: self.inner.cfg.block_size,
            sectors: self.inner.cfg.sectors(),
            next_key: self.inner.keys.current(),
            live_objects: utilization.len(),
            live_sectors: utilization.values().sum(),
            dead_objects: dead.len(),
        })
    }
}

#[async_trait]
impl BlockReadWriter for Engine {
    async fn pre_run(&self) -> Result<()> {
        if !self.inner.cfg.skip_checkpoint {
            self.inner.restore_from_checkpoint().await?;
            self.inner.restore_from_objects().await?;
            // Anything beyond the recovered frontier is an orphan of a
            // previous run and would break prefix consistency next time.
            self.inner
                .store
                .store()
                .delete_from(self.inner.keys.current())
                .await?;
        }
        self.inner.spawn_gc_loops();
        Ok(())
    }

    async fn write(&self, writes: i64, chunk: &mut [u8]) -> Result<()> {
        self.inner.handle_write(writes, chunk).await
    }

    async fn read(&self, sector: i64, length: i64, buf: &mut [u8]) -> Result<()> {
        self.inner.handle_read(sector, length, buf).await
    }

    async fn post_remove(&self) -> Result<()> {
        self.inner.cancel.cancel();
        if !self.inner.cfg.skip_checkpoint {
            self.inner.checkpoint().await?;
        }
        Ok(())
    }
}

impl EngineInner {
    /// Byte offset of an in-object block position. Positions count absolute
    /// blocks of the object, with the data region beginning right after the
    /// header bytes; the skew is only non-zero for sub-block headers.
    pub(crate) fn object_offset(&self, sector_in_object: SectorIndex) -> u64 {
        sector_in_object * self.cfg.block_size as u64 + self.header_skew
    }

    /// Pack one shim chunk into an object and publish the mapping. The
    /// upload must be durable before the map update: a reader that observes
    /// the new mapping must find the object fetchable.
    pub(crate) async fn handle_write(&self, writes: i64, chunk: &mut [u8]) -> Result<()> {
        let key = self.keys.next();
        let block = self.cfg.block_size;
        let writes = writes as usize;
        debug_assert!(writes * WRITE_RECORD_SIZE <= self.header_bytes);

        let mut extents = Vec::with_capacity(writes);
        let mut data_blocks: u64 = 0;
        for i in 0..writes {
            let record = WriteRecord::parse(&chunk[i * WRITE_RECORD_SIZE..]);
            let extent = record.to_extent(block);
            data_blocks += extent.length;
            extents.push(extent);
        }

        // Zero the rest of the header region: recovery has no record count
        // and relies on the zero-length terminator.
        chunk[writes * WRITE_RECORD_SIZE..self.header_bytes].fill(0);

        let object_len = self.header_bytes + data_blocks as usize * block;
        let body = Bytes::copy_from_slice(&chunk[..object_len]);

        // A failed upload fails the write; the mapping must not point at an
        // object that never made it to the backend. The consumed key still
        // needs a placeholder or recovery would stop at the hole.
        if let Err(e) = self.store.upload(key, body, Priority::Foreground).await {
            warn!(key, "chunk upload failed: {}", e);
            if let Err(e) = self.store.upload(key, Bytes::new(), Priority::Foreground).await {
                warn!(key, "failed to park a placeholder: {}", e);
            }
            return Err(e.into());
        }
        self.map.update(extents, self.header_blocks, key).await?;

        debug!(key, writes, blocks = data_blocks, "chunk persisted");
        Ok(())
    }

    /// Reconstruct a logical extent from object parts fetched in parallel.
    /// Unmapped runs read as zeroes; a failed download leaves its slice
    /// untouched and the read still succeeds, the block layer retries.
    pub(crate) async fn handle_read(&self, sector: i64, length: i64, buf: &mut [u8]) -> Result<()> {
        let block = self.cfg.block_size;
        debug_assert_eq!(buf.len(), length as usize * block);

        let parts = self.lookup_and_pin(sector as u64, length as u64).await?;

        let mut jobs = Vec::new();
        let mut offset = 0usize;
        for part in &parts {
            let len_bytes = part.length as usize * block;
            if part.is_mapped() {
                jobs.push((offset, *part));
            } else {
                buf[offset..offset + len_bytes].fill(0);
            }
            offset += len_bytes;
        }

        let downloads = jobs.iter().map(|(_, part)| {
            let store = &self.store;
            async move {
                store
                    .download(
                        part.key,
                        self.object_offset(part.sector),
                        part.length as usize * block,
                        Priority::Foreground,
                    )
                    .await
            }
        });
        let results = futures::future::join_all(downloads).await;

        for ((offset, part), result) in jobs.iter().zip(results) {
            match result {
                Ok(bytes) => buf[*offset..*offset + bytes.len()].copy_from_slice(&bytes),
                Err(e) if e.is_not_found() => {
                    // The map never points at a deleted object; this is a bug
                    // or an operator deleting from under us.
                    error!(key = part.key, "mapped object missing from the backend");
                }
                Err(e) => warn!(key = part.key, "download failed: {}", e),
            }
        }

        self.unpin(&parts).await;
        Ok(())
    }

    /// Consult the map and pin every returned object against reaping before
    /// the lock is released.
    async fn lookup_and_pin(
        &self,
        sector: SectorIndex,
        length: SectorCount,
    ) -> Result<Vec<ObjectPart>> {
        let mut refcount = self.refcount.lock().await;
        let parts = self.map.lookup(sector, length).await?;
        for part in parts.iter().filter(|p| p.is_mapped()) {
            *refcount.entry(part.key).or_insert(0) += 1;
        }
        Ok(parts)
    }

    async fn unpin(&self, parts: &[ObjectPart]) {
        let mut refcount = self.refcount.lock().await;
        for part in parts.iter().filter(|p| p.is_mapped()) {
            if let Some(count) = refcount.get_mut(&part.key) {
                *count -= 1;
            }
        }
    }

    pub(crate) async fn checkpoint(&self) -> Result<()> {
        let dump = self.map.serialize().await?;
        self.store
            .upload(
                cumulo_common::CHECKPOINT_KEY,
                Bytes::from(dump),
                Priority::Background,
            )
            .await?;
        info!(next_key = self.keys.current(), "extent map checkpointed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cumulo_common::{NOT_MAPPED_KEY, SECTOR_UNIT};
    use cumulo_utils::object_storage::new_mem_object_storage;
    use cumulo_utils::readable_size::ReadableSize;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// The literal scenario geometry: 16 sectors of 4 KiB, 16 KiB objects.
    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.size = ReadableSize(16 * 4096);
        cfg.write.chunk_size = ReadableSize(16 << 10);
        cfg.s3.uploaders = 2;
        cfg.s3.downloaders = 2;
        cfg.skip_checkpoint = true;
        // Keep the periodic reaper out of the way; tests drive it directly.
        cfg.gc.wait = 3600;
        cfg
    }

    async fn new_engine(storage: &ObjectStorage, cfg: Config) -> Engine {
        Engine::new(cfg, storage.clone()).await.unwrap()
    }

    /// Build a shim chunk: header records in wire units, payloads in record
    /// order. Writes are `(sector, seq_no, payload)` with block-aligned
    /// payloads.
    fn make_chunk(cfg: &Config, writes: &[(u64, u64, Vec<u8>)]) -> Vec<u8> {
        let block = cfg.block_size;
        let header_bytes = cfg.header_bytes();
        let data: usize = writes.iter().map(|w| w.2.len()).sum();
        let mut chunk = vec![0u8; header_bytes + data];

        let mut offset = header_bytes;
        for (i, (sector, seq_no, payload)) in writes.iter().enumerate() {
            assert_eq!(payload.len() % block, 0);
            let blocks = (payload.len() / block) as u64;
            WriteRecord {
                sector: sector * block as u64 / SECTOR_UNIT,
                length: blocks * block as u64 / SECTOR_UNIT,
                seq_no: *seq_no,
                flag: 0,
            }
            .write_to(&mut chunk[i * WRITE_RECORD_SIZE..]);
            chunk[offset..offset + payload.len()].copy_from_slice(payload);
            offset += payload.len();
        }
        chunk
    }

    async fn write(engine: &Engine, writes: &[(u64, u64, Vec<u8>)]) {
        let mut chunk = make_chunk(&engine.inner.cfg, writes);
        engine.write(writes.len() as i64, &mut chunk).await.unwrap();
    }

    async fn read(engine: &Engine, sector: u64, length: u64) -> Vec<u8> {
        // Poisoned so zero-filling is observable.
        let mut buf = vec![0xAAu8; length as usize * engine.inner.cfg.block_size];
        engine
            .read(sector as i64, length as i64, &mut buf)
            .await
            .unwrap();
        buf
    }

    fn payload(byte: u8, blocks: usize) -> Vec<u8> { vec![byte; blocks * 4096] }

    #[tokio::test]
    async fn single_write_reads_back() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(0, 1, payload(b'A', 4))]).await;

        assert_eq!(read(&engine, 0, 4).await, payload(b'A', 4));
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.live_sectors, 4);
        assert_eq!(stats.next_key, 1);
    }

    #[tokio::test]
    async fn overwrite_composes_from_two_objects() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(0, 1, payload(b'A', 4))]).await;
        write(&engine, &[(2, 2, payload(b'B', 2))]).await;

        let mut want = payload(b'A', 2);
        want.extend_from_slice(&payload(b'B', 2));
        assert_eq!(read(&engine, 0, 4).await, want);

        let utilization = engine.inner.map.objects_utilization().await.unwrap();
        assert_eq!(utilization, HashMap::from([(0, 2), (1, 2)]));
    }

    #[tokio::test]
    async fn threshold_gc_compacts_and_reaps() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;
        let raw = ObjectStore::new(storage.clone());

        write(&engine, &[(0, 1, payload(b'A', 4))]).await;
        write(&engine, &[(2, 2, payload(b'B', 2))]).await;

        // Both objects sit exactly at fraction 0.5: object 0 is not strictly
        // below the threshold and object 1 is the newest key, so nothing
        // moves.
        engine.gc_threshold(1024, 0.5).await.unwrap();
        assert_eq!(engine.inner.keys.current(), 2);

        // At 0.6 the old object is compacted into a fresh one and dies.
        engine.gc_threshold(1024, 0.6).await.unwrap();
        let utilization = engine.inner.map.objects_utilization().await.unwrap();
        assert_eq!(utilization, HashMap::from([(1, 2), (2, 2)]));
        assert_eq!(
            engine.inner.map.dead_objects().await.unwrap(),
            [0].into_iter().collect()
        );

        // The reaper replaces the dead object with an empty placeholder.
        engine.reap_dead().await.unwrap();
        assert_eq!(raw.object_size(0).await.unwrap(), 0);
        assert!(engine.inner.map.dead_objects().await.unwrap().is_empty());

        let mut want = payload(b'A', 2);
        want.extend_from_slice(&payload(b'B', 2));
        assert_eq!(read(&engine, 0, 4).await, want);
    }

    #[tokio::test]
    async fn read_of_unwritten_sectors_returns_zeroes() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        assert_eq!(read(&engine, 8, 2).await, vec![0u8; 2 * 4096]);
    }

    #[tokio::test]
    async fn read_mixes_objects_and_holes() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(1, 1, payload(b'A', 2))]).await;
        write(&engine, &[(5, 2, payload(b'B', 1))]).await;

        let got = read(&engine, 0, 8).await;
        let mut want = vec![0u8; 4096];
        want.extend_from_slice(&payload(b'A', 2));
        want.extend_from_slice(&vec![0u8; 2 * 4096]);
        want.extend_from_slice(&payload(b'B', 1));
        want.extend_from_slice(&vec![0u8; 2 * 4096]);
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn checkpoint_survives_device_growth() {
        let storage = new_mem_object_storage("/");
        let mut cfg = test_config();
        cfg.skip_checkpoint = false;

        let engine = new_engine(&storage, cfg.clone()).await;
        engine.pre_run().await.unwrap();
        write(&engine, &[(0, 1, payload(b'A', 4))]).await;
        engine.post_remove().await.unwrap();
        drop(engine);

        // Restart with the device doubled; the new tail is unmapped.
        cfg.size = ReadableSize(32 * 4096);
        let engine = new_engine(&storage, cfg).await;
        engine.pre_run().await.unwrap();

        assert_eq!(engine.stats().await.unwrap().sectors, 32);
        assert_eq!(read(&engine, 0, 4).await, payload(b'A', 4));
        assert_eq!(read(&engine, 16, 4).await, vec![0u8; 4 * 4096]);
    }

    #[tokio::test]
    async fn recovery_replays_objects_without_checkpoint() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(0, 1, payload(b'A', 4))]).await;
        write(&engine, &[(2, 2, payload(b'B', 2))]).await;
        write(&engine, &[(8, 3, payload(b'C', 1))]).await;
        let want_util = engine.inner.map.objects_utilization().await.unwrap();
        drop(engine); // crash: no checkpoint was ever written

        let engine = new_engine(&storage, test_config()).await;
        engine.pre_run().await.unwrap();

        assert_eq!(
            engine.inner.map.objects_utilization().await.unwrap(),
            want_util
        );
        assert_eq!(engine.inner.keys.current(), 3);
        let mut want = payload(b'A', 2);
        want.extend_from_slice(&payload(b'B', 2));
        assert_eq!(read(&engine, 0, 4).await, want);
        assert_eq!(read(&engine, 8, 1).await, payload(b'C', 1));
    }

    #[tokio::test]
    async fn recovery_truncates_beyond_broken_prefix() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;
        let raw = ObjectStore::new(storage.clone());

        write(&engine, &[(0, 1, payload(b'A', 1))]).await;
        write(&engine, &[(1, 2, payload(b'B', 1))]).await;
        drop(engine);

        // An orphan beyond a hole: keys 2 and 3 never made it, 4 did.
        let cfg = test_config();
        let orphan = make_chunk(&cfg, &[(2, 3, payload(b'X', 1))]);
        raw.upload(4, Bytes::from(orphan)).await.unwrap();

        let engine = new_engine(&storage, cfg).await;
        engine.pre_run().await.unwrap();

        // Roll-forward stopped at the hole and the orphan is gone.
        assert_eq!(engine.inner.keys.current(), 2);
        assert!(raw.object_size(4).await.unwrap_err().is_not_found());
        assert_eq!(read(&engine, 2, 1).await, vec![0u8; 4096]);
    }

    #[tokio::test]
    async fn recovery_skips_dead_placeholders() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(0, 1, payload(b'A', 2))]).await;
        write(&engine, &[(0, 2, payload(b'B', 2))]).await;
        engine.reap_dead().await.unwrap();
        drop(engine);

        let engine = new_engine(&storage, test_config()).await;
        engine.pre_run().await.unwrap();

        // Key 0 is an empty placeholder; the frontier still ends up at 2.
        assert_eq!(engine.inner.keys.current(), 2);
        assert_eq!(read(&engine, 0, 2).await, payload(b'B', 2));
    }

    #[tokio::test]
    async fn newer_write_beats_concurrent_compaction() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(&engine, &[(0, 5, payload(b'D', 1))]).await;
        // Make the object collectable.
        write(&engine, &[(4, 6, payload(b'E', 3))]).await;

        // The compactor rewrites the old copy with its original sequence
        // number while a newer client write lands; whichever order the map
        // sees them in, sequence 10 must win.
        let gc = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.gc_threshold(1024, 0.9).await })
        };
        write(&engine, &[(0, 10, payload(b'C', 1))]).await;
        gc.await.unwrap().unwrap();

        assert_eq!(read(&engine, 0, 1).await, payload(b'C', 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn random_writes_always_dominate() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let mut model = vec![0u8; 16 * 4096];
        let mut written = vec![false; 16];
        for seq in 1..=60u64 {
            let sector = rng.gen_range(0..16u64);
            let blocks = rng.gen_range(1..=((16 - sector) as usize).min(3));
            let byte = rng.gen::<u8>();
            write(&engine, &[(sector, seq, payload(byte, blocks))]).await;
            let start = sector as usize * 4096;
            model[start..start + blocks * 4096].fill(byte);
            written[sector as usize..sector as usize + blocks]
                .iter_mut()
                .for_each(|w| *w = true);

            // Every so often, compact aggressively and reap.
            if seq % 20 == 0 {
                engine.gc_threshold(4, 0.95).await.unwrap();
                engine.reap_dead().await.unwrap();
            }
        }

        for sector in 0..16u64 {
            let got = read(&engine, sector, 1).await;
            if written[sector as usize] {
                let start = sector as usize * 4096;
                assert_eq!(got, model[start..start + 4096], "sector {}", sector);
            } else {
                assert_eq!(got, vec![0u8; 4096], "sector {}", sector);
            }
        }
    }

    #[tokio::test]
    async fn compaction_packs_into_multiple_objects() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        // Five one-block objects; the newest key is spared, leaving four
        // extents for a data region that fits three blocks.
        for (i, byte) in [b'a', b'b', b'c', b'd', b'e'].into_iter().enumerate() {
            write(&engine, &[(i as u64, i as u64 + 1, payload(byte, 1))]).await;
        }
        engine.gc_threshold(16, 0.9).await.unwrap();

        let utilization = engine.inner.map.objects_utilization().await.unwrap();
        assert_eq!(utilization, HashMap::from([(4, 1), (5, 3), (6, 1)]));

        for (i, byte) in [b'a', b'b', b'c', b'd', b'e'].into_iter().enumerate() {
            assert_eq!(read(&engine, i as u64, 1).await, payload(byte, 1));
        }
    }

    #[tokio::test]
    async fn pinned_objects_survive_the_reaper() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;
        let raw = ObjectStore::new(storage.clone());

        write(&engine, &[(0, 1, payload(b'A', 2))]).await;
        let before = raw.object_size(0).await.unwrap();

        // Pin object 0 the way an in-flight read would, then kill it.
        engine.inner.refcount.lock().await.insert(0, 1);
        write(&engine, &[(0, 2, payload(b'B', 2))]).await;

        engine.reap_dead().await.unwrap();
        assert_eq!(raw.object_size(0).await.unwrap(), before);
        assert!(engine.inner.map.dead_objects().await.unwrap().contains(&0));

        // The read finishes; the next round collects it.
        engine.inner.refcount.lock().await.insert(0, 0);
        engine.reap_dead().await.unwrap();
        assert_eq!(raw.object_size(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lookup_parts_reconstruct_reads() {
        let storage = new_mem_object_storage("/");
        let engine = new_engine(&storage, test_config()).await;

        write(
            &engine,
            &[(0, 1, payload(b'A', 2)), (6, 1, payload(b'B', 2))],
        )
        .await;
        write(&engine, &[(1, 2, payload(b'C', 3))]).await;

        // Fetch each part separately and splice; must equal one big read.
        let parts = engine.inner.map.lookup(0, 8).await.unwrap();
        let mut spliced = Vec::new();
        for part in parts {
            let len = part.length as usize * 4096;
            if part.key == NOT_MAPPED_KEY {
                spliced.extend_from_slice(&vec![0u8; len]);
            } else {
                let bytes = engine
                    .inner
                    .store
                    .download(
                        part.key,
                        engine.inner.object_offset(part.sector),
                        len,
                        Priority::Foreground,
                    )
                    .await
                    .unwrap();
                spliced.extend_from_slice(&bytes);
            }
        }
        assert_eq!(spliced, read(&engine, 0, 8).await);
    }
}

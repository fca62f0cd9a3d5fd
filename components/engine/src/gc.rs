use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use cumulo_common::{ObjectKey, WRITE_RECORD_SIZE};
use cumulo_store::Priority;
use cumulo_types::{Extent, ExtentWithPart, WriteRecord};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, trace, warn};

use crate::engine::EngineInner;
use crate::err::Result;

impl EngineInner {
    /// Background loops: the periodic dead reaper, and the signal listener
    /// that turns SIGUSR1 into one threshold-compaction pass. Both observe
    /// the shutdown token between iterations.
    pub(crate) fn spawn_gc_loops(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.cfg.gc.wait_interval()) => {}
                }
                trace!("dead reap round starts");
                if let Err(e) = inner.reap_dead().await {
                    warn!("dead reap round failed: {}", e);
                }
                trace!("dead reap round finished");
            }
        });

        let inner = self.clone();
        tokio::spawn(async move {
            let mut gc_signal = match signal(SignalKind::user_defined1()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("cannot listen for the compaction signal: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    received = gc_signal.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!(
                            "threshold compaction triggered, live-data threshold {:.2}",
                            inner.cfg.gc.live_data
                        );
                        match inner.gc_threshold(inner.cfg.gc.step, inner.cfg.gc.live_data).await {
                            Ok(()) => info!("threshold compaction finished"),
                            Err(e) => warn!("threshold compaction failed: {}", e),
                        }
                    }
                }
            }
        });
    }

    /// One compaction pass: pick the under-utilized objects, relocate their
    /// live extents into fresh objects and publish the rewrites. The
    /// rewrites reuse the original sequence numbers, so a concurrent client
    /// write always wins and an undisturbed live copy replaces its old
    /// location in place.
    pub(crate) async fn gc_threshold(&self, step: u64, live_data: f64) -> Result<()> {
        let utilization = self.map.objects_utilization().await?;
        let collect = self.filter_keys_to_collect(&utilization, live_data);
        if collect.is_empty() {
            debug!("no object below the live-data threshold");
            return Ok(());
        }
        info!(objects = collect.len(), "compacting under-utilized objects");

        let write_list = self.complete_write_list(&collect, step).await?;
        let (objects, extents) = self.compose_objects(write_list).await?;

        for (object, object_extents) in objects.into_iter().zip(extents) {
            let key = self.keys.next();
            if let Err(e) = self
                .store
                .upload(key, Bytes::from(object), Priority::Background)
                .await
            {
                warn!(
                    key,
                    "compaction upload failed, dropping the rest of the batch: {}", e
                );
                // The key was already taken; park a placeholder under it so
                // the key space stays dense for recovery.
                if let Err(e) = self.store.upload(key, Bytes::new(), Priority::Background).await {
                    warn!(key, "failed to park a placeholder: {}", e);
                }
                return Err(e.into());
            }
            self.map
                .update(object_extents, self.header_blocks, key)
                .await?;
        }
        Ok(())
    }

    /// Objects whose live fraction is below `ratio`, except the one with the
    /// highest key: the most recent object would oscillate in and out of
    /// collection forever.
    fn filter_keys_to_collect(
        &self,
        utilization: &HashMap<ObjectKey, u64>,
        ratio: f64,
    ) -> HashSet<ObjectKey> {
        let block = self.cfg.block_size as u64;
        let chunk_size = self.cfg.chunk_size() as f64;

        let mut max_key = 0;
        let mut collect = HashSet::new();
        for (&key, &live_sectors) in utilization {
            let used = live_sectors * block;
            if (used as f64) / chunk_size < ratio {
                collect.insert(key);
            }
            if key > max_key {
                max_key = key;
            }
        }
        collect.remove(&max_key);
        collect
    }

    /// Walk the whole logical address space in strides and gather every live
    /// extent still owned by one of the collected objects.
    async fn complete_write_list(
        &self,
        keys: &HashSet<ObjectKey>,
        step: u64,
    ) -> Result<Vec<ExtentWithPart>> {
        let sectors = self.cfg.sectors();
        let mut write_list = Vec::new();
        let mut sector = 0;
        while sector < sectors {
            let found = self
                .map
                .extents_in_objects(sector, step, keys.clone())
                .await?;
            write_list.extend(found);
            sector += step;
        }
        Ok(write_list)
    }

    /// Pack the gathered extents into fresh objects: header records up
    /// front, payloads in record order behind them, sealing an object
    /// whenever the next payload would overflow it. Payloads are fetched
    /// from the old objects in parallel on the background queue; any failed
    /// fetch aborts the batch (the sources are still live and the next pass
    /// retries).
    async fn compose_objects(
        &self,
        write_list: Vec<ExtentWithPart>,
    ) -> Result<(Vec<Vec<u8>>, Vec<Vec<Extent>>)> {
        let block = self.cfg.block_size;
        let chunk_size = self.cfg.chunk_size();
        let data_capacity = ((chunk_size - self.header_bytes) / block) as u64;

        let mut objects: Vec<Vec<u8>> = Vec::new();
        let mut extents: Vec<Vec<Extent>> = Vec::new();

        let mut object = vec![0u8; chunk_size];
        let mut object_extents: Vec<Extent> = Vec::new();
        let mut record_offset = 0usize;
        let mut blocks_placed: u64 = 0;
        // (object index, destination offset, source)
        let mut copies: Vec<(usize, usize, ExtentWithPart)> = Vec::new();

        for g in write_list {
            if blocks_placed + g.extent.length > data_capacity {
                object.truncate(self.header_bytes + blocks_placed as usize * block);
                objects.push(std::mem::replace(&mut object, vec![0u8; chunk_size]));
                extents.push(std::mem::take(&mut object_extents));
                record_offset = 0;
                blocks_placed = 0;
            }

            // Records go back to the wire format so recovery parses a
            // compacted object exactly like a client-written one.
            WriteRecord::from_extent(g.part.sector, &g.extent, block)
                .write_to(&mut object[record_offset..]);
            record_offset += WRITE_RECORD_SIZE;

            let dest = self.header_bytes + blocks_placed as usize * block;
            copies.push((objects.len(), dest, g));

            object_extents.push(Extent {
                sector: g.part.sector,
                length: g.extent.length,
                seq_no: g.extent.seq_no,
                flag: g.extent.flag,
            });
            blocks_placed += g.extent.length;
        }

        if !object_extents.is_empty() {
            object.truncate(self.header_bytes + blocks_placed as usize * block);
            objects.push(object);
            extents.push(object_extents);
        }

        let downloads = copies.iter().map(|(_, _, g)| {
            let store = &self.store;
            async move {
                store
                    .download(
                        g.part.key,
                        self.object_offset(g.extent.sector),
                        g.extent.length as usize * block,
                        Priority::Background,
                    )
                    .await
            }
        });
        let results = futures::future::join_all(downloads).await;
        for ((object_idx, dest, _), result) in copies.iter().zip(results) {
            let bytes = result?;
            objects[*object_idx][*dest..*dest + bytes.len()].copy_from_slice(&bytes);
        }

        Ok((objects, extents))
    }

    /// Empty every dead object that no in-flight read still pins. The key
    /// must survive as a zero-byte placeholder: recovery depends on a dense
    /// key prefix.
    pub(crate) async fn reap_dead(&self) -> Result<()> {
        let mut dead = self.map.dead_objects().await?;
        {
            let mut refcount = self.refcount.lock().await;
            refcount.retain(|key, count| {
                if *count == 0 {
                    false
                } else {
                    // Still being downloaded; spare it this round.
                    dead.remove(key);
                    true
                }
            });
        }
        if dead.is_empty() {
            return Ok(());
        }

        let mut reaped = HashSet::new();
        for &key in &dead {
            match self.store.upload(key, Bytes::new(), Priority::Background).await {
                Ok(()) => {
                    reaped.insert(key);
                }
                // Kept in the dead set, retried next round.
                Err(e) => warn!(key, "failed to empty dead object: {}", e),
            }
        }
        if !reaped.is_empty() {
            info!(objects = reaped.len(), "emptied dead objects");
            self.map.delete_from_dead_objects(reaped).await?;
        }
        Ok(())
    }
}

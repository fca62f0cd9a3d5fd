use std::collections::{HashMap, HashSet};

use cumulo_common::{ObjectKey, SectorCount, SectorIndex};
use cumulo_types::{Extent, ExtentWithPart, ObjectPart};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::err::{Result, WorkerStoppedSnafu};
use crate::ExtentMap;

const CHANNEL_SIZE: usize = 128;

struct UpdateRequest {
    extents: Vec<Extent>,
    data_start: SectorIndex,
    key: ObjectKey,
    done: oneshot::Sender<()>,
}

struct LookupRequest {
    sector: SectorIndex,
    length: SectorCount,
    reply: oneshot::Sender<Vec<ObjectPart>>,
}

struct KeyedExtentsRequest {
    sector: SectorIndex,
    length: SectorCount,
    keys: HashSet<ObjectKey>,
    reply: oneshot::Sender<Vec<ExtentWithPart>>,
}

/// Bulk operations and snapshots, all low priority.
enum ControlRequest {
    DeadObjects {
        reply: oneshot::Sender<HashSet<ObjectKey>>,
    },
    ObjectsUtilization {
        reply: oneshot::Sender<HashMap<ObjectKey, u64>>,
    },
    MaxKey {
        reply: oneshot::Sender<ObjectKey>,
    },
    DeleteFromUtilization {
        keys: HashSet<ObjectKey>,
        done: oneshot::Sender<()>,
    },
    DeleteFromDeadObjects {
        keys: HashSet<ObjectKey>,
        done: oneshot::Sender<()>,
    },
    Serialize {
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Deserialize {
        buf: Vec<u8>,
        reply: oneshot::Sender<Result<ObjectKey>>,
    },
}

/// Serializing front of an [ExtentMap]. Exactly one task owns the map and
/// drains four queues; updates and lookups are taken with strict priority
/// over the garbage-collection queries, which only run when the foreground
/// queues are empty. Single ownership doubles as a cache-locality win: the
/// flat array is only ever walked by one core.
#[derive(Clone)]
pub struct MapProxy {
    update_tx: mpsc::Sender<UpdateRequest>,
    lookup_tx: mpsc::Sender<LookupRequest>,
    keyed_tx: mpsc::Sender<KeyedExtentsRequest>,
    control_tx: mpsc::Sender<ControlRequest>,
}

impl MapProxy {
    /// Wrap `map` and spawn its worker task. The worker exits when the last
    /// proxy clone is dropped.
    pub fn new<M: ExtentMap>(map: M) -> Self {
        let (update_tx, update_rx) = mpsc::channel(CHANNEL_SIZE);
        let (lookup_tx, lookup_rx) = mpsc::channel(CHANNEL_SIZE);
        let (keyed_tx, keyed_rx) = mpsc::channel(CHANNEL_SIZE);
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_SIZE);

        let mut worker = Worker {
            map,
            update_rx,
            lookup_rx,
            keyed_rx,
            control_rx,
        };
        tokio::spawn(async move {
            worker.run().await;
        });

        Self {
            update_tx,
            lookup_tx,
            keyed_tx,
            control_tx,
        }
    }

    pub async fn update(
        &self,
        extents: Vec<Extent>,
        data_start: SectorIndex,
        key: ObjectKey,
    ) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let req = UpdateRequest {
            extents,
            data_start,
            key,
            done: done_tx,
        };
        if self.update_tx.send(req).await.is_err() {
            return WorkerStoppedSnafu.fail();
        }
        done_rx.await.map_err(|_| WorkerStoppedSnafu.build())
    }

    pub async fn lookup(&self, sector: SectorIndex, length: SectorCount) -> Result<Vec<ObjectPart>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = LookupRequest {
            sector,
            length,
            reply: reply_tx,
        };
        if self.lookup_tx.send(req).await.is_err() {
            return WorkerStoppedSnafu.fail();
        }
        reply_rx.await.map_err(|_| WorkerStoppedSnafu.build())
    }

    /// Live extents of the given objects within the range, for compaction.
    pub async fn extents_in_objects(
        &self,
        sector: SectorIndex,
        length: SectorCount,
        keys: HashSet<ObjectKey>,
    ) -> Result<Vec<ExtentWithPart>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = KeyedExtentsRequest {
            sector,
            length,
            keys,
            reply: reply_tx,
        };
        if self.keyed_tx.send(req).await.is_err() {
            return WorkerStoppedSnafu.fail();
        }
        reply_rx.await.map_err(|_| WorkerStoppedSnafu.build())
    }

    pub async fn dead_objects(&self) -> Result<HashSet<ObjectKey>> {
        self.control(|reply| ControlRequest::DeadObjects { reply }).await
    }

    pub async fn objects_utilization(&self) -> Result<HashMap<ObjectKey, u64>> {
        self.control(|reply| ControlRequest::ObjectsUtilization { reply })
            .await
    }

    pub async fn max_key(&self) -> Result<ObjectKey> {
        self.control(|reply| ControlRequest::MaxKey { reply }).await
    }

    pub async fn delete_from_utilization(&self, keys: HashSet<ObjectKey>) -> Result<()> {
        self.control(|done| ControlRequest::DeleteFromUtilization { keys, done })
            .await
    }

    pub async fn delete_from_dead_objects(&self, keys: HashSet<ObjectKey>) -> Result<()> {
        self.control(|done| ControlRequest::DeleteFromDeadObjects { keys, done })
            .await
    }

    pub async fn serialize(&self) -> Result<Vec<u8>> {
        self.control(|reply| ControlRequest::Serialize { reply }).await?
    }

    /// Feed a checkpoint into the map; returns the next unused object key.
    pub async fn deserialize_and_return_next_key(&self, buf: Vec<u8>) -> Result<ObjectKey> {
        self.control(|reply| ControlRequest::Deserialize { buf, reply })
            .await?
    }

    async fn control<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control_tx.send(make(reply_tx)).await.is_err() {
            return WorkerStoppedSnafu.fail();
        }
        reply_rx.await.map_err(|_| WorkerStoppedSnafu.build())
    }
}

struct Worker<M: ExtentMap> {
    map: M,
    update_rx: mpsc::Receiver<UpdateRequest>,
    lookup_rx: mpsc::Receiver<LookupRequest>,
    keyed_rx: mpsc::Receiver<KeyedExtentsRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
}

impl<M: ExtentMap> Worker<M> {
    async fn run(&mut self) {
        loop {
            // Drain the foreground queues before even glancing at the
            // garbage-collection ones.
            if let Ok(req) = self.update_rx.try_recv() {
                self.on_update(req);
                continue;
            }
            if let Ok(req) = self.lookup_rx.try_recv() {
                self.on_lookup(req);
                continue;
            }

            tokio::select! {
                biased;
                Some(req) = self.update_rx.recv() => self.on_update(req),
                Some(req) = self.lookup_rx.recv() => self.on_lookup(req),
                Some(req) = self.keyed_rx.recv() => self.on_keyed(req),
                Some(req) = self.control_rx.recv() => self.on_control(req),
                else => break,
            }
        }
        debug!("extent map worker exits");
    }

    fn on_update(&mut self, req: UpdateRequest) {
        self.map.update(&req.extents, req.data_start, req.key);
        let _ = req.done.send(());
    }

    fn on_lookup(&mut self, req: LookupRequest) {
        let parts = self.map.lookup(req.sector, req.length);
        let _ = req.reply.send(parts);
    }

    fn on_keyed(&mut self, req: KeyedExtentsRequest) {
        let found = self
            .map
            .find_extents_with_keys(req.sector, req.length, &req.keys);
        let _ = req.reply.send(found);
    }

    fn on_control(&mut self, req: ControlRequest) {
        match req {
            ControlRequest::DeadObjects { reply } => {
                let _ = reply.send(self.map.dead_objects());
            }
            ControlRequest::ObjectsUtilization { reply } => {
                let _ = reply.send(self.map.objects_utilization());
            }
            ControlRequest::MaxKey { reply } => {
                let _ = reply.send(self.map.max_key());
            }
            ControlRequest::DeleteFromUtilization { keys, done } => {
                self.map.delete_from_utilization(&keys);
                let _ = done.send(());
            }
            ControlRequest::DeleteFromDeadObjects { keys, done } => {
                self.map.delete_from_dead_objects(&keys);
                let _ = done.send(());
            }
            ControlRequest::Serialize { reply } => {
                let _ = reply.send(self.map.serialize());
            }
            ControlRequest::Deserialize { buf, reply } => {
                let _ = reply.send(self.map.deserialize_and_return_next_key(&buf));
            }
        }
    }
}

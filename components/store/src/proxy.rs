use std::sync::Arc;

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use cumulo_common::ObjectKey;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::err::{ProxyClosedSnafu, Result};
use crate::store::ObjectStore;

/// Request priority. Foreground traffic (client writes and reads) is always
/// served before background traffic (compaction, reaping, checkpoints), so
/// garbage collection cannot starve the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Foreground,
    Background,
}

struct UploadRequest {
    key: ObjectKey,
    body: Bytes,
    done: oneshot::Sender<Result<()>>,
}

struct DownloadRequest {
    key: ObjectKey,
    offset: u64,
    len: usize,
    done: oneshot::Sender<Result<Vec<u8>>>,
}

/// Worker-pool front of the [ObjectStore]. Four queues (uploads and
/// downloads, each in a foreground and a background flavor) are drained by
/// fixed pools of tasks; each worker takes a foreground request whenever one
/// is pending and otherwise waits on both queues.
pub struct StoreProxy {
    store: Arc<ObjectStore>,

    uploads: Sender<UploadRequest>,
    uploads_prio: Sender<UploadRequest>,
    downloads: Sender<DownloadRequest>,
    downloads_prio: Sender<DownloadRequest>,

    cancel: CancellationToken,
}

impl StoreProxy {
    /// Spawn `uploaders` + `downloaders` worker tasks immediately.
    pub fn new(store: ObjectStore, uploaders: usize, downloaders: usize) -> Self {
        let store = Arc::new(store);
        let (uploads_tx, uploads_rx) = async_channel::unbounded::<UploadRequest>();
        let (uploads_prio_tx, uploads_prio_rx) = async_channel::unbounded::<UploadRequest>();
        let (downloads_tx, downloads_rx) = async_channel::unbounded::<DownloadRequest>();
        let (downloads_prio_tx, downloads_prio_rx) = async_channel::unbounded::<DownloadRequest>();
        let cancel = CancellationToken::new();

        for _ in 0..uploaders {
            let store = store.clone();
            let prio = uploads_prio_rx.clone();
            let normal = uploads_rx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                while let Some(req) = next_request(&prio, &normal, &cancel).await {
                    let result = store.upload(req.key, req.body).await;
                    let _ = req.done.send(result);
                }
            });
        }

        for _ in 0..downloaders {
            let store = store.clone();
            let prio = downloads_prio_rx.clone();
            let normal = downloads_rx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                while let Some(req) = next_request(&prio, &normal, &cancel).await {
                    let result = store.download_at(req.key, req.offset, req.len).await;
                    let _ = req.done.send(result);
                }
            });
        }

        Self {
            store,
            uploads: uploads_tx,
            uploads_prio: uploads_prio_tx,
            downloads: downloads_tx,
            downloads_prio: downloads_prio_tx,
            cancel,
        }
    }

    /// Direct access to the driver, for paths that must bypass the queues
    /// (recovery runs before any competing traffic exists).
    pub fn store(&self) -> &ObjectStore { &self.store }

    pub async fn upload(&self, key: ObjectKey, body: Bytes, prio: Priority) -> Result<()> {
        let queue = match prio {
            Priority::Foreground => &self.uploads_prio,
            Priority::Background => &self.uploads,
        };
        let (done_tx, done_rx) = oneshot::channel();
        let req = UploadRequest {
            key,
            body,
            done: done_tx,
        };
        if queue.send(req).await.is_err() {
            return ProxyClosedSnafu.fail();
        }
        done_rx.await.map_err(|_| ProxyClosedSnafu.build())?
    }

    pub async fn download(
        &self,
        key: ObjectKey,
        offset: u64,
        len: usize,
        prio: Priority,
    ) -> Result<Vec<u8>> {
        let queue = match prio {
            Priority::Foreground => &self.downloads_prio,
            Priority::Background => &self.downloads,
        };
        let (done_tx, done_rx) = oneshot::channel();
        let req = DownloadRequest {
            key,
            offset,
            len,
            done: done_tx,
        };
        if queue.send(req).await.is_err() {
            return ProxyClosedSnafu.fail();
        }
        done_rx.await.map_err(|_| ProxyClosedSnafu.build())?
    }

    /// Stop the workers. In-flight requests finish; queued ones are dropped
    /// and their callers see [crate::err::Error::ProxyClosed].
    pub fn shutdown(&self) {
        info!("stopping object store workers");
        self.cancel.cancel();
    }
}

impl Drop for StoreProxy {
    fn drop(&mut self) { self.cancel.cancel(); }
}

/// Strict two-level priority: take a pending foreground request first, else
/// wait for whichever queue delivers. The select is biased so a foreground
/// request that arrives while both queues are hot always wins.
async fn next_request<T>(
    prio: &Receiver<T>,
    normal: &Receiver<T>,
    cancel: &CancellationToken,
) -> Option<T> {
    if let Ok(req) = prio.try_recv() {
        return Some(req);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        req = prio.recv() => req.ok(),
        req = normal.recv() => req.ok(),
    }
}

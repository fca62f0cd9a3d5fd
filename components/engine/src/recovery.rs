use cumulo_common::CHECKPOINT_KEY;
use cumulo_types::record::parse_header;
use tracing::{debug, info};

use crate::engine::EngineInner;
use crate::err::Result;

impl EngineInner {
    /// Load the checkpointed map, if one exists, and resume key allocation
    /// after the highest key it references. A decode failure is fatal: the
    /// operator has to decide between wiping and repairing.
    pub(crate) async fn restore_from_checkpoint(&self) -> Result<()> {
        match self.store.store().download(CHECKPOINT_KEY).await {
            Ok(dump) => {
                let next_key = self.map.deserialize_and_return_next_key(dump).await?;
                self.keys.replace(next_key);
                info!(next_key, "restored extent map from checkpoint");
            }
            Err(e) if e.is_not_found() => {
                debug!("no checkpoint on the backend, starting from an empty map");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Roll the map forward over the objects written after the checkpoint by
    /// replaying their headers in key order. The walk ends at the first
    /// missing key: that is where prefix consistency ends and nothing beyond
    /// it can be trusted. Zero-sized objects are placeholders left by the
    /// reaper and only advance the cursor.
    pub(crate) async fn restore_from_objects(&self) -> Result<()> {
        loop {
            let key = self.keys.current();
            let size = match self.store.store().object_size(key).await {
                Ok(size) => size,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e.into()),
            };
            if size == 0 {
                self.keys.next();
                continue;
            }

            let header = self
                .store
                .store()
                .download_at(key, 0, self.header_bytes)
                .await?;
            let extents = parse_header(&header, self.cfg.block_size);
            self.map.update(extents, self.header_blocks, key).await?;
            self.keys.next();
        }
        info!(next_key = self.keys.current(), "roll-forward finished");
        Ok(())
    }
}

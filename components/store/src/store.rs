use bytes::Bytes;
use cumulo_common::ObjectKey;
use cumulo_utils::object_storage::ObjectStorage;
use snafu::ResultExt;
use tracing::debug;

use crate::err::{OpenDalSnafu, Result, ShortReadSnafu};

/// Driver for the object backend. Objects are named by encoded keys; all
/// requests address whole objects or byte ranges of them. Concurrency is
/// obtained by issuing many requests in parallel (see the proxy), never by
/// multipart transfers of a single object.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    op: ObjectStorage,
}

/// The 64-bit key is split into 32-bit halves and stored as
/// `"{low:08x}/{high:08x}"`. The fast-changing bits land in the name prefix,
/// spreading successive keys across backend shards so sequential uploads do
/// not hammer a single rate-limit partition.
pub fn encode_key(key: ObjectKey) -> String {
    let low = key as u64 & 0xffff_ffff;
    let high = (key as u64 >> 32) & 0xffff_ffff;
    format!("{:08x}/{:08x}", low, high)
}

/// Exact inverse of [encode_key]. Names that do not match the layout (e.g.
/// directory placeholders reported by a listing) decode to `None`.
pub fn decode_key(name: &str) -> Option<ObjectKey> {
    let (low, high) = name.split_once('/')?;
    if low.len() != 8 || high.len() != 8 {
        return None;
    }
    let low = u64::from_str_radix(low, 16).ok()?;
    let high = u64::from_str_radix(high, 16).ok()?;
    Some((high << 32 | low) as ObjectKey)
}

impl ObjectStore {
    pub fn new(op: ObjectStorage) -> Self { Self { op } }

    /// Verify the bucket is reachable with the configured credentials. A
    /// failure here is a fatal configuration error for the caller.
    pub async fn bootstrap(&self) -> Result<()> {
        self.op.check().await.context(OpenDalSnafu)?;
        debug!("object backend reachable");
        Ok(())
    }

    /// Store `body` under `key`. An empty body is the placeholder for a
    /// collected dead object.
    pub async fn upload(&self, key: ObjectKey, body: Bytes) -> Result<()> {
        self.op
            .write(&encode_key(key), body)
            .await
            .context(OpenDalSnafu)
    }

    /// Fetch exactly `len` bytes starting at `offset`.
    pub async fn download_at(&self, key: ObjectKey, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self
            .op
            .read_with(&encode_key(key))
            .range(offset..offset + len as u64)
            .await
            .context(OpenDalSnafu)?;
        snafu::ensure!(
            buf.len() == len,
            ShortReadSnafu {
                want: len,
                got: buf.len()
            }
        );
        Ok(buf)
    }

    /// Fetch the whole object.
    pub async fn download(&self, key: ObjectKey) -> Result<Vec<u8>> {
        self.op.read(&encode_key(key)).await.context(OpenDalSnafu)
    }

    /// Byte size of the object under `key`. Absence surfaces as an error for
    /// which [crate::err::Error::is_not_found] holds.
    pub async fn object_size(&self, key: ObjectKey) -> Result<u64> {
        let meta = self.op.stat(&encode_key(key)).await.context(OpenDalSnafu)?;
        Ok(meta.content_length())
    }

    pub async fn delete(&self, key: ObjectKey) -> Result<()> {
        self.op.delete(&encode_key(key)).await.context(OpenDalSnafu)
    }

    /// Remove every object whose decoded key is `>= from_key`. Used by
    /// recovery to truncate the tail beyond the consistent prefix.
    pub async fn delete_from(&self, from_key: ObjectKey) -> Result<()> {
        let entries = self
            .op
            .list_with("")
            .recursive(true)
            .await
            .context(OpenDalSnafu)?;
        for entry in entries {
            let Some(key) = decode_key(entry.path()) else {
                continue;
            };
            if key >= from_key {
                debug!(key, "deleting object beyond recovered frontier");
                self.delete(key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cumulo_common::CHECKPOINT_KEY;
    use cumulo_utils::object_storage::new_mem_object_storage;

    use super::*;

    #[test]
    fn key_encoding_shards_by_low_bits() {
        assert_eq!(encode_key(0), "00000000/00000000");
        assert_eq!(encode_key(1), "00000001/00000000");
        assert_eq!(encode_key(0x1_0000_0001), "00000001/00000001");
        // The reserved checkpoint key.
        assert_eq!(encode_key(CHECKPOINT_KEY), "ffffffff/ffffffff");
    }

    #[test]
    fn decode_inverts_encode() {
        for key in [0, 1, 255, 0x1_0000_0001, i64::MAX, CHECKPOINT_KEY] {
            assert_eq!(decode_key(&encode_key(key)), Some(key));
        }
        assert_eq!(decode_key("not-a-key"), None);
        assert_eq!(decode_key("0000000/00000000"), None);
    }

    #[tokio::test]
    async fn upload_then_ranged_download() {
        let store = ObjectStore::new(new_mem_object_storage("/"));
        store
            .upload(3, Bytes::from(vec![7u8; 1024]))
            .await
            .unwrap();

        assert_eq!(store.object_size(3).await.unwrap(), 1024);
        let buf = store.download_at(3, 512, 256).await.unwrap();
        assert_eq!(buf, vec![7u8; 256]);

        let missing = store.object_size(4).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn delete_from_keeps_the_checkpoint() {
        let store = ObjectStore::new(new_mem_object_storage("/"));
        for key in 0..4 {
            store.upload(key, Bytes::from(vec![0u8; 8])).await.unwrap();
        }
        store
            .upload(CHECKPOINT_KEY, Bytes::from(vec![1u8; 8]))
            .await
            .unwrap();

        store.delete_from(2).await.unwrap();

        assert_eq!(store.object_size(0).await.unwrap(), 8);
        assert_eq!(store.object_size(1).await.unwrap(), 8);
        assert!(store.object_size(2).await.unwrap_err().is_not_found());
        assert!(store.object_size(3).await.unwrap_err().is_not_found());
        assert_eq!(store.object_size(CHECKPOINT_KEY).await.unwrap(), 8);
    }
}

use std::time::Duration;

use cumulo_common::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_DOWNLOADERS, DEFAULT_UPLOADERS,
};
use cumulo_utils::readable_size::ReadableSize;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::err::{InvalidConfigSnafu, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serve the device from the no-op backend instead of the engine, for
    /// benchmarking the raw shim path. Consumed by the embedder when it
    /// picks a [crate::BlockReadWriter].
    pub null: bool,
    /// Device capacity.
    pub size: ReadableSize,
    /// 512 or 4096; anything else is coerced to 4096.
    pub block_size: usize,
    /// Disable checkpoint restore on startup and the final checkpoint on
    /// shutdown.
    pub skip_checkpoint: bool,

    // Shim-facing knobs, forwarded to the kernel side untouched.
    pub durable: bool,
    pub scheduler: bool,
    pub threads: usize,
    pub major: u32,
    pub queue_depth: usize,

    pub write: WriteOptions,
    pub read: ReadOptions,
    pub s3: S3Options,
    pub gc: GcOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Size of one stored object; also the size of the write batch the shim
    /// delivers.
    pub chunk_size: ReadableSize,
    /// Shim-side collision-area hint, not consumed by the engine.
    pub collision_size: ReadableSize,
    /// Shim shared-memory buffer size.
    pub buf_size: ReadableSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Shim shared-memory buffer size.
    pub buf_size: ReadableSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Options {
    pub bucket: String,
    /// Endpoint override; empty means the AWS default.
    pub remote: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Worker-pool sizes of the object-store proxy.
    pub uploaders: usize,
    pub downloaders: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcOptions {
    /// Stride, in sectors, of the live-extent walk during compaction.
    pub step: u64,
    /// Live-data fraction below which an object is compacted.
    pub live_data: f64,
    /// Idle budget for serving low-priority requests, carried for the
    /// proxies.
    pub idle_timeout_ms: u64,
    /// Sleep between dead-reaper rounds, in seconds.
    pub wait: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            null: false,
            size: ReadableSize::gb(8),
            block_size: DEFAULT_BLOCK_SIZE,
            skip_checkpoint: false,
            durable: false,
            scheduler: false,
            threads: 0,
            major: 0,
            queue_depth: 128,
            write: Default::default(),
            read: Default::default(),
            s3: Default::default(),
            gc: Default::default(),
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_size: ReadableSize(DEFAULT_CHUNK_SIZE as u64),
            collision_size: ReadableSize::mb(1),
            buf_size: ReadableSize::mb(32),
        }
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            buf_size: ReadableSize::mb(32),
        }
    }
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            bucket: "cumulo".to_string(),
            remote: String::new(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            uploaders: DEFAULT_UPLOADERS,
            downloaders: DEFAULT_DOWNLOADERS,
        }
    }
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            step: 1024,
            live_data: 0.3,
            idle_timeout_ms: 200,
            wait: 600,
        }
    }
}

impl GcOptions {
    pub fn wait_interval(&self) -> Duration { Duration::from_secs(self.wait) }
}

impl Config {
    /// Coerce and check the knobs the engine depends on. Called once before
    /// the engine is built; failures are fatal at startup.
    pub fn validate(&mut self) -> Result<()> {
        if self.block_size != 512 && self.block_size != DEFAULT_BLOCK_SIZE {
            warn!(
                "unsupported block size {}, falling back to {}",
                self.block_size, DEFAULT_BLOCK_SIZE
            );
            self.block_size = DEFAULT_BLOCK_SIZE;
        }

        let block = self.block_size as u64;
        let size = self.size.as_bytes();
        if size == 0 || size % block != 0 {
            return InvalidConfigSnafu {
                reason: format!(
                    "device size {} is not a positive multiple of the block size {}",
                    self.size, self.block_size
                ),
            }
            .fail();
        }

        let chunk = self.write.chunk_size.as_bytes();
        if chunk < block || chunk % block != 0 {
            return InvalidConfigSnafu {
                reason: format!(
                    "chunk size {} is not a positive multiple of the block size {}",
                    self.write.chunk_size, self.block_size
                ),
            }
            .fail();
        }
        // One header record plus one payload block must fit.
        let header = cumulo_common::header_bytes(chunk as usize, self.block_size);
        if header as u64 + block > chunk {
            return InvalidConfigSnafu {
                reason: format!(
                    "chunk size {} cannot hold its header and a single block",
                    self.write.chunk_size
                ),
            }
            .fail();
        }

        if !(0.0..1.0).contains(&self.gc.live_data) {
            return InvalidConfigSnafu {
                reason: format!("gc live-data threshold {} is not in [0, 1)", self.gc.live_data),
            }
            .fail();
        }

        if self.s3.uploaders == 0 || self.s3.downloaders == 0 {
            return InvalidConfigSnafu {
                reason: "uploader and downloader pools must not be empty".to_string(),
            }
            .fail();
        }

        Ok(())
    }

    pub fn sectors(&self) -> u64 { self.size.as_bytes() / self.block_size as u64 }

    pub fn chunk_size(&self) -> usize { self.write.chunk_size.as_bytes_usize() }

    pub fn header_bytes(&self) -> usize {
        cumulo_common::header_bytes(self.chunk_size(), self.block_size)
    }
}

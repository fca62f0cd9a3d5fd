pub mod config;
pub mod err;

mod engine;
mod gc;
mod null;
mod recovery;

pub use config::Config;
pub use engine::{Engine, EngineStats};
pub use null::NullEngine;

use async_trait::async_trait;

/// The four callbacks the kernel block shim drives. `pre_run` happens before
/// the first request, `post_remove` after the last one; writes arrive as
/// batched chunks and are acknowledged when the callback returns; reads fill
/// the provided buffer.
#[async_trait]
pub trait BlockReadWriter: Send + Sync {
    async fn pre_run(&self) -> err::Result<()>;

    /// One batched write: `writes` commands packed into `chunk` as a header
    /// of 32-byte records followed by the payloads in record order.
    async fn write(&self, writes: i64, chunk: &mut [u8]) -> err::Result<()>;

    /// One read of `length` blocks starting at `sector`; `buf` is
    /// `length * BlockSize` bytes.
    async fn read(&self, sector: i64, length: i64, buf: &mut [u8]) -> err::Result<()>;

    async fn post_remove(&self) -> err::Result<()>;
}

use async_trait::async_trait;

use crate::err::Result;
use crate::BlockReadWriter;

/// Does nothing, but correctly. Acknowledges every request immediately so
/// the raw shim and kernel path can be benchmarked without touching any
/// backend. Also the smallest possible template for a new backend.
#[derive(Debug, Default)]
pub struct NullEngine;

impl NullEngine {
    pub fn new() -> Self { Self }
}

#[async_trait]
impl BlockReadWriter for NullEngine {
    async fn pre_run(&self) -> Result<()> { Ok(()) }

    async fn write(&self, _writes: i64, _chunk: &mut [u8]) -> Result<()> { Ok(()) }

    async fn read(&self, _sector: i64, _length: i64, _buf: &mut [u8]) -> Result<()> { Ok(()) }

    async fn post_remove(&self) -> Result<()> { Ok(()) }
}

use clap::Args;
use cumulo_common::CUMULO;
use cumulo_utils::logger::init_global_logging;
use cumulo_utils::readable_size::ReadableSize;
use cumulo_utils::runtime;
use snafu::{ResultExt, Whatever};

use crate::cmd::EngineArgs;

#[derive(Debug, Clone, Args)]
#[command(long_about = r"

Recover the extent map from the backend and print device statistics.
Run only while the device is detached; maintenance commands are the
single writer for the bucket.
")]
pub struct StatusArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

impl StatusArgs {
    pub fn run(self) -> Result<(), Whatever> {
        let _guards = init_global_logging(CUMULO, &self.engine.logging_options());

        runtime::block_on(async move {
            let engine = self.engine.recovered_engine().await?;
            let stats = engine
                .stats()
                .await
                .whatever_context("could not snapshot the extent map")?;

            println!("device size:    {}", ReadableSize(stats.device_size));
            println!("block size:     {}", stats.block_size);
            println!("sectors:        {}", stats.sectors);
            println!("next key:       {}", stats.next_key);
            println!("live objects:   {}", stats.live_objects);
            println!(
                "live data:      {} ({} sectors)",
                ReadableSize(stats.live_sectors * stats.block_size as u64),
                stats.live_sectors
            );
            println!("dead objects:   {}", stats.dead_objects);
            Ok(())
        })
    }
}

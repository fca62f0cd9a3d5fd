use clap::Args;
use cumulo_common::CUMULO;
use cumulo_utils::logger::init_global_logging;
use cumulo_utils::runtime;
use snafu::{ResultExt, Whatever};

use crate::cmd::EngineArgs;

#[derive(Debug, Clone, Args)]
#[command(long_about = r"

Run one threshold-compaction pass followed by a dead-object reap, then
checkpoint the result. Equivalent to signalling a running daemon with
SIGUSR1, for buckets whose device is currently detached.
")]
pub struct GcArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

impl GcArgs {
    pub fn run(self) -> Result<(), Whatever> {
        let _guards = init_global_logging(CUMULO, &self.engine.logging_options());

        runtime::block_on(async move {
            let engine = self.engine.recovered_engine().await?;
            engine
                .gc_threshold(self.engine.gc_step, self.engine.gc_live_data)
                .await
                .whatever_context("threshold compaction failed")?;
            engine
                .reap_dead()
                .await
                .whatever_context("dead reap failed")?;
            if !self.engine.skip_checkpoint {
                engine
                    .checkpoint()
                    .await
                    .whatever_context("could not write the checkpoint")?;
            }

            let stats = engine
                .stats()
                .await
                .whatever_context("could not snapshot the extent map")?;
            println!(
                "collected; {} live objects remain, next key {}",
                stats.live_objects, stats.next_key
            );
            Ok(())
        })
    }
}

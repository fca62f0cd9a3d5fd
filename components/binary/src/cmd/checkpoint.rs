use clap::Args;
use cumulo_common::CUMULO;
use cumulo_utils::logger::init_global_logging;
use cumulo_utils::runtime;
use snafu::{ResultExt, Whatever};

use crate::cmd::EngineArgs;

#[derive(Debug, Clone, Args)]
#[command(long_about = r"

Recover the extent map and write a fresh checkpoint under the reserved
key. Shortens the next roll-forward after an unclean shutdown.
")]
pub struct CheckpointArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

impl CheckpointArgs {
    pub fn run(self) -> Result<(), Whatever> {
        let _guards = init_global_logging(CUMULO, &self.engine.logging_options());

        runtime::block_on(async move {
            let engine = self.engine.recovered_engine().await?;
            engine
                .checkpoint()
                .await
                .whatever_context("could not write the checkpoint")?;
            println!("checkpoint written");
            Ok(())
        })
    }
}

pub mod checkpoint;
pub mod gc;
pub mod status;

use clap::Args;
use cumulo_engine::{Config, Engine};
use cumulo_utils::logger::{LoggingOptions, DEFAULT_LOG_DIR};
use cumulo_utils::readable_size::ReadableSize;
use snafu::{ResultExt, Whatever};

const DEVICE_OPTIONS_HEADER: &str = "Device options";
const STORE_OPTIONS_HEADER: &str = "Object store options";
const GC_OPTIONS_HEADER: &str = "Garbage collection options";
const LOGGING_OPTIONS_HEADER: &str = "Logging options";

/// Engine wiring shared by all maintenance commands. These commands assume
/// the device is detached: they talk to the same bucket the daemon would.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(
    long,
    help = "Device capacity",
    default_value = "8GiB",
    value_parser = parse_size,
    help_heading = DEVICE_OPTIONS_HEADER
    )]
    pub size: ReadableSize,

    #[arg(
    long,
    help = "Block size in bytes, 512 or 4096",
    default_value_t = 4096,
    help_heading = DEVICE_OPTIONS_HEADER
    )]
    pub block_size: usize,

    #[arg(
    long,
    help = "Stored object size",
    default_value = "4MiB",
    value_parser = parse_size,
    help_heading = DEVICE_OPTIONS_HEADER
    )]
    pub chunk_size: ReadableSize,

    #[arg(
    long,
    help = "Do not restore from the checkpoint object",
    help_heading = DEVICE_OPTIONS_HEADER
    )]
    pub skip_checkpoint: bool,

    #[arg(
    long,
    help = "Bucket holding the device objects",
    default_value = "cumulo",
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub bucket: String,

    #[arg(
    long,
    help = "Endpoint override; empty for the AWS default",
    default_value = "",
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub remote: String,

    #[arg(
    long,
    help = "Region",
    default_value = "us-east-1",
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub region: String,

    #[arg(
    long,
    help = "Access key",
    env = "CUMULO_S3_ACCESS_KEY",
    default_value = "",
    hide_env_values = true,
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub access_key: String,

    #[arg(
    long,
    help = "Secret key",
    env = "CUMULO_S3_SECRET_KEY",
    default_value = "",
    hide_env_values = true,
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub secret_key: String,

    #[arg(
    long,
    help = "Upload worker pool size",
    default_value_t = 16,
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub uploaders: usize,

    #[arg(
    long,
    help = "Download worker pool size",
    default_value_t = 16,
    help_heading = STORE_OPTIONS_HEADER
    )]
    pub downloaders: usize,

    #[arg(
    long,
    help = "Stride in sectors for the live-extent walk",
    default_value_t = 1024,
    help_heading = GC_OPTIONS_HEADER
    )]
    pub gc_step: u64,

    #[arg(
    long,
    help = "Live-data fraction below which an object is compacted",
    default_value_t = 0.3,
    help_heading = GC_OPTIONS_HEADER
    )]
    pub gc_live_data: f64,

    #[arg(
    long,
    help = "Write log files to this directory",
    default_value = DEFAULT_LOG_DIR,
    value_name = "DIRECTORY",
    help_heading = LOGGING_OPTIONS_HEADER
    )]
    pub log_directory: String,

    #[arg(
    short,
    long,
    help = "Log level",
    value_name = "LEVEL",
    help_heading = LOGGING_OPTIONS_HEADER
    )]
    pub level: Option<String>,
}

fn parse_size(s: &str) -> Result<ReadableSize, String> { s.parse() }

impl EngineArgs {
    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            dir: self.log_directory.clone(),
            level: self.level.clone(),
            append_stdout: false,
        }
    }

    pub fn to_config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.size = self.size;
        cfg.block_size = self.block_size;
        cfg.skip_checkpoint = self.skip_checkpoint;
        cfg.write.chunk_size = self.chunk_size;
        cfg.s3.bucket = self.bucket.clone();
        cfg.s3.remote = self.remote.clone();
        cfg.s3.region = self.region.clone();
        cfg.s3.access_key = self.access_key.clone();
        cfg.s3.secret_key = self.secret_key.clone();
        cfg.s3.uploaders = self.uploaders;
        cfg.s3.downloaders = self.downloaders;
        cfg.gc.step = self.gc_step;
        cfg.gc.live_data = self.gc_live_data;
        cfg
    }

    /// Build the engine and rebuild its map from the backend.
    pub async fn recovered_engine(&self) -> Result<Engine, Whatever> {
        let engine = Engine::with_defaults(self.to_config())
            .await
            .whatever_context("could not reach the object backend")?;
        if !self.skip_checkpoint {
            engine
                .recover()
                .await
                .whatever_context("could not recover the extent map")?;
        }
        Ok(engine)
    }
}

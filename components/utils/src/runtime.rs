use std::future::Future;

use once_cell::sync::Lazy;
use tokio::task::JoinHandle;
use tracing::debug;

static GLOBAL_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    debug!("start tokio runtime");
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap()
});

pub fn handle() -> tokio::runtime::Handle { GLOBAL_RUNTIME.handle().clone() }

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    GLOBAL_RUNTIME.spawn(future)
}

pub fn block_on<F: Future>(future: F) -> F::Output { GLOBAL_RUNTIME.block_on(future) }

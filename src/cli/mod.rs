pub mod sources;
pub mod tui;

use std::future::Future;
use std::io;

use tokio::runtime::Builder;
use tracing::debug;

/// Drive `future` to completion on a fresh multi-threaded runtime.
///
/// Copies run on the blocking pool and can hang on a vanishing volume. They
/// are abandoned when `future` returns instead of being waited for.
pub fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(future);

    debug!("Shutting down runtime without waiting for blocking tasks");
    runtime.shutdown_background();

    Ok(output)
}

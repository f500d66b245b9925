//! Ctrl-C handling.

use databay_sync_engine::CancellationToken;
use std::thread;
use tracing::{debug, warn};

/// Cancels `tokens` on the first Ctrl-C.
///
/// The signal is awaited on a background thread running its own
/// single-threaded runtime. In-flight requests finish; nothing new starts.
pub fn cancel_on_interrupt(tokens: Vec<CancellationToken>) {
    let spawned = thread::Builder::new()
        .name("databay-interrupt".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "cannot watch for interrupts");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                warn!("interrupted, finishing in-flight requests");
                for token in &tokens {
                    token.cancel();
                }
            }
        });
    if let Err(e) = spawned {
        debug!(error = %e, "interrupt watcher not started");
    }
}

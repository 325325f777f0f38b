//! Flush-on-exit signal handling
//!
//! Installs SIGINT/SIGTERM handlers that run one deadline-bounded final
//! flush before the process exits. The flush must never hang: process exit
//! depends on it returning, so it runs under a hard timeout.

use crate::processor::BatchProcessor;
use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Upper bound on the final flush; past this the process exits anyway
const FINAL_FLUSH_DEADLINE: Duration = Duration::from_secs(2);

/// Install the SIGINT/SIGTERM final-flush hook.
///
/// Must be called from within a tokio runtime; the signal thread uses the
/// captured runtime handle to drive the flush.
pub fn install_flush_on_signal(processor: Arc<BatchProcessor>) -> Result<()> {
    let runtime = tokio::runtime::Handle::try_current()
        .context("signal flush hook requires a running tokio runtime")?;
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;

    thread::spawn(move || {
        #[allow(clippy::never_loop)]
        for sig in signals.forever() {
            debug!("signal {} received, flushing telemetry before exit", sig);
            let _ = runtime.block_on(async {
                tokio::time::timeout(FINAL_FLUSH_DEADLINE, processor.flush()).await
            });
            match sig {
                SIGINT => std::process::exit(130),
                SIGTERM => std::process::exit(143),
                _ => unreachable!(),
            }
        }
    });

    Ok(())
}

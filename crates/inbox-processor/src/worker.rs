//! Polling worker driving the processor.
//!
//! Wraps a [`Processor`] in a loop: run a pass, and if nothing was claimed,
//! sleep for the poll interval before trying again. Multiple workers may
//! run against the same store; the claiming protocol keeps them disjoint.

use std::sync::Arc;

use inbox_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::processor::Processor;

/// Long-running polling loop around a processor.
pub struct InboxWorker {
    processor: Arc<Processor>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl InboxWorker {
    /// Creates a worker sharing the processor's cancellation token, so
    /// cancelling the processor also stops the loop.
    pub fn new(processor: Arc<Processor>, clock: Arc<dyn Clock>) -> Self {
        let cancellation_token = processor.cancellation_token();
        Self { processor, clock, cancellation_token }
    }

    /// Runs passes until cancelled.
    ///
    /// An idle pass (nothing claimed) sleeps for the configured poll
    /// interval; a productive pass loops immediately to drain the backlog.
    pub async fn run(&self) {
        info!("inbox worker starting");

        let batch_size = self.processor.config().batch_size;
        let poll_interval = self.processor.config().poll_interval;

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let summary = self.processor.process(batch_size).await;

            if summary.claimed == 0 {
                tokio::select! {
                    () = self.clock.sleep(poll_interval) => {},
                    () = self.cancellation_token.cancelled() => break,
                }
            }
        }

        info!("inbox worker stopped");
    }
}

use std::thread;

use tracing::{debug, info};

use crate::channel::Received;
use crate::events::EventKind;
use crate::pipeline::RoleContext;

/// Why a consumer exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumerExit {
    EndOfStream,
    StopRequested,
}

/// Runs a consumer role: drains the channel until the end of the stream or a stop request.
///
/// The stop signal is checked before every `get` and after every timeout, so a stop is
/// observed within one poll interval.
pub(crate) fn run_consumer(context: &RoleContext, index: usize) -> ConsumerExit {
    let exit = consume(context);

    context.emit(EventKind::ConsumerStopped, index as u64);
    info!(?exit, "consumer stopped");

    exit
}

fn consume(context: &RoleContext) -> ConsumerExit {
    loop {
        if context.shutdown_rx.is_shutdown_requested() {
            return ConsumerExit::StopRequested;
        }

        match context.channel.get(context.poll_interval) {
            Received::Item(item) => {
                if !context.consume_delay.is_zero() {
                    thread::sleep(context.consume_delay);
                }

                context.tallies.record_consumed();
                context.counter.apply(-1, context.mode);
                debug!(sequence = item.sequence(), payload = %item.payload(), "item consumed");
                context.emit(EventKind::Dequeued, item.sequence());
            }
            Received::Timeout => continue,
            Received::EndOfStream => return ConsumerExit::EndOfStream,
        }
    }
}

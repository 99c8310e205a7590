use std::thread;

use tracing::{debug, info, warn};

use crate::channel::Sent;
use crate::error::ConveyorResult;
use crate::events::EventKind;
use crate::pipeline::RoleContext;
use crate::types::{Item, Sequence};

/// Payload type flowing through the pipeline.
pub type Payload = String;

/// Runs the producer role: creates `item_count` items, appends them to the channel and
/// closes it.
///
/// While the channel is full the producer wakes up once per poll interval to check the stop
/// signal. The channel is closed on every exit path so consumers always reach the end of
/// the stream.
pub(crate) fn run_producer(context: &RoleContext) -> ConveyorResult<()> {
    let result = produce(context);
    context.channel.close();

    let produced = context.tallies.produced();
    context.emit(EventKind::ProducerFinished, produced);
    info!(produced, "producer finished");

    result
}

fn produce(context: &RoleContext) -> ConveyorResult<()> {
    for sequence in 0..context.item_count {
        if context.shutdown_rx.is_shutdown_requested() {
            warn!(sequence, "stop requested, producer exiting early");
            return Ok(());
        }

        if !context.produce_delay.is_zero() {
            thread::sleep(context.produce_delay);
        }

        if !offer(context, build_item(sequence))? {
            warn!(sequence, "stop requested while the channel was full");
            return Ok(());
        }

        context.tallies.record_produced();
        context.counter.apply(1, context.mode);
        debug!(sequence, "item enqueued");
        context.emit(EventKind::Enqueued, sequence);
    }

    Ok(())
}

/// Appends `item`, polling the stop signal while the channel is full.
///
/// Returns `false` if a stop was requested before the item was stored.
fn offer(context: &RoleContext, mut item: Item<Payload>) -> ConveyorResult<bool> {
    loop {
        match context.channel.put_timeout(item, context.poll_interval)? {
            Sent::Stored => return Ok(true),
            Sent::Timeout(returned) => {
                if context.shutdown_rx.is_shutdown_requested() {
                    return Ok(false);
                }
                item = returned;
            }
        }
    }
}

fn build_item(sequence: Sequence) -> Item<Payload> {
    Item::new(sequence, format!("item-{sequence}"))
}

//! Presentation of progress events and final reports on stdout.

use conveyor::events::{EventStream, ProgressEvent};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Prints every event until all sinks are dropped.
pub async fn print_events(mut stream: EventStream, format: OutputFormat) -> u64 {
    let mut printed = 0;
    while let Some(event) = stream.recv().await {
        print_event(&event, format);
        printed += 1;
    }

    printed
}

fn print_event(event: &ProgressEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Text => {
            let snapshot = &event.snapshot;
            println!(
                "{:<18} #{:<4} counter={:<5} channel={}/{} progress={}/{}",
                format!("{:?}", event.kind),
                event.subject_id,
                snapshot.counter_value,
                snapshot.channel_occupancy,
                snapshot.channel_capacity,
                snapshot.completed,
                snapshot.total,
            );
        }
    }
}

/// Prints a serializable report as one JSON line.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "failed to serialize output line"),
    }
}

//! Newline-delimited JSON event source.
//!
//! # Purpose
//! Reads one [`Event`] per line and forwards it to the [`Dispatcher`]. Blank
//! lines are ignored. Lines that are not UTF-8 or not a valid event are
//! logged, counted and skipped; only I/O errors end the source.
use super::{Dispatcher, Event};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// `None` for a blank line.
pub fn parse_line(line: &str) -> Option<Result<Event, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Forward every event of `reader` until end of input.
pub async fn forward_lines<R>(mut reader: R, dispatcher: &Dispatcher) -> anyhow::Result<SourceStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = SourceStats::default();
    let mut buf = Vec::new();
    let mut line_number = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_number += 1;
        let parsed = match std::str::from_utf8(&buf) {
            Ok(line) => parse_line(line).map(|parsed| parsed.map_err(|err| err.to_string())),
            Err(err) => Some(Err(err.to_string())),
        };
        match parsed {
            None => {}
            Some(Ok(event)) => {
                dispatcher.submit(event).await?;
                stats.accepted += 1;
            }
            Some(Err(err)) => {
                metrics::counter!("roster_events_dropped_total", "reason" => "malformed")
                    .increment(1);
                tracing::warn!(line = line_number, error = %err, "malformed event skipped");
                stats.rejected += 1;
            }
        }
    }
    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "event source drained"
    );
    Ok(stats)
}

//! Progress and flow reporting.
//!
//! Tracks bytes done against the header total and estimates throughput over
//! a fixed trailing window. Purely observational: the only flow-control
//! decision in the pipeline is the sender's watermark check, which reads
//! the channel directly.

use crate::TransferEvent;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Trailing window for the throughput estimate.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5);

/// Minimum gap between progress events, to avoid spamming the reporter.
const EMIT_INTERVAL: Duration = Duration::from_millis(200);

pub struct ProgressTracker {
    file_name: String,
    is_sending: bool,
    total: u64,
    done: u64,
    samples: VecDeque<(Instant, u64)>,
    last_emit: Option<Instant>,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl ProgressTracker {
    pub fn new(
        file_name: impl Into<String>,
        total: u64,
        is_sending: bool,
        event_tx: mpsc::Sender<TransferEvent>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            is_sending,
            total,
            done: 0,
            samples: VecDeque::new(),
            last_emit: None,
            event_tx,
        }
    }

    /// Account for `bytes` more transferred bytes and emit a progress event
    /// if one is due.
    pub async fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.done += bytes;
        self.samples.push_back((now, bytes));
        self.prune(now);

        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= EMIT_INTERVAL,
            None => true,
        };
        if due || self.done >= self.total {
            self.last_emit = Some(now);
            tracing::debug!(
                file = %self.file_name,
                percent = self.percent(),
                rate = %crate::util::format_throughput(self.throughput_bps()),
                "progress"
            );
            let _ = self
                .event_tx
                .send(TransferEvent::Progress {
                    file_name: self.file_name.clone(),
                    percent: self.percent(),
                    throughput_bps: self.throughput_bps(),
                    bytes_done: self.done,
                    total_bytes: self.total,
                    is_sending: self.is_sending,
                })
                .await;
        }
    }

    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        (self.done as f32 / self.total as f32) * 100.0
    }

    /// Rolling throughput over the trailing window, bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        let now = Instant::now();
        let windowed: u64 = self
            .samples
            .iter()
            .filter(|(at, _)| now.duration_since(*at) <= THROUGHPUT_WINDOW)
            .map(|(_, bytes)| bytes)
            .sum();
        let span = match self.samples.front() {
            Some((oldest, _)) => now.duration_since(*oldest).min(THROUGHPUT_WINDOW),
            None => return 0.0,
        };
        if span.as_secs_f64() <= f64::EPSILON {
            return 0.0;
        }
        windowed as f64 / span.as_secs_f64()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > THROUGHPUT_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

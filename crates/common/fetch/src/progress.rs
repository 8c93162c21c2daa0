//! Shared transfer counters and the periodic reporter task.

use crate::format::format_bandwidth;
use crate::format::format_duration;
use crate::format::format_size;
use crate::plan::MAX_WORKERS;
use crate::resume;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Counters shared between the workers and the reporter.
///
/// Workers only ever add to `received` and store into their own slot; the
/// reporter only reads. Relaxed ordering is enough, nothing is synchronised
/// through these values.
pub(crate) struct ProgressState {
    received: AtomicI64,
    size: AtomicI64,
    slots: [[AtomicI64; 3]; MAX_WORKERS],
}

impl ProgressState {
    pub(crate) fn new(total_size: i64) -> Self {
        ProgressState {
            received: AtomicI64::new(0),
            size: AtomicI64::new(total_size),
            slots: Default::default(),
        }
    }

    pub(crate) fn add_received(&self, bytes: i64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn received(&self) -> i64 {
        self.received.load(Ordering::Relaxed)
    }

    pub(crate) fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Settles the final size of an unknown-length transfer.
    pub(crate) fn settle_size(&self) {
        self.size.store(self.received(), Ordering::Relaxed);
    }

    /// Publishes worker `id`'s progress; `watermark` is the last written byte.
    pub(crate) fn record(&self, id: usize, start: i64, watermark: i64, end: i64) {
        let slot = &self.slots[id];
        slot[0].store(start, Ordering::Relaxed);
        slot[1].store(watermark, Ordering::Relaxed);
        slot[2].store(end, Ordering::Relaxed);
    }

    pub(crate) fn table(&self, workers: usize) -> Vec<[i64; 3]> {
        self.slots[..workers]
            .iter()
            .map(|slot| {
                [
                    slot[0].load(Ordering::Relaxed),
                    slot[1].load(Ordering::Relaxed),
                    slot[2].load(Ordering::Relaxed),
                ]
            })
            .collect()
    }
}

/// One JSON line on stdout, emitted per reporter tick.
#[derive(serde::Serialize)]
struct ProgressEvent<'a> {
    event: &'a str,
    concurrency: usize,
    size: i64,
    received: i64,
    bandwidth: String,
    elapsed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
}

/// The single task sampling the transfer once per second.
///
/// All human output goes through here so the carriage-return rewrites on
/// stderr stay coherent; JSON events go to stdout, one object per line. The
/// reporter also owns the resume sidecar: it flushes the worker table every
/// tick and deletes the file once the transfer is complete. It runs even
/// with both reporting flags off, so the sidecar stays current regardless.
pub(crate) struct Reporter {
    pub state: Arc<ProgressState>,
    pub concurrency: usize,
    pub sidecar: Option<PathBuf>,
    pub verbose: bool,
    pub progress_json: bool,
}

impl Reporter {
    pub(crate) fn spawn(self, mut done: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let started = Instant::now();
            let initial = self.state.received();
            let mut previous = initial;
            let mut previous_tick = started;
            let mut event = "start";

            loop {
                let received = self.state.received();
                let size = self.state.size();
                let elapsed = started.elapsed().as_secs_f64();
                let interval = previous_tick.elapsed().as_secs_f64().max(0.001);
                let mut bandwidth = ((received - previous) * 8) as f64 / interval;
                let mean = if elapsed > 0.0 {
                    ((received - initial) * 8) as f64 / elapsed
                } else {
                    0.0
                };
                let complete = size >= 0 && received >= size;
                if complete {
                    event = "end";
                    bandwidth = mean;
                }

                if self.verbose {
                    self.render(received, size, bandwidth, mean, elapsed, initial);
                }
                if self.progress_json {
                    self.emit(event, received, size, bandwidth, elapsed);
                }
                if event == "start" {
                    event = "progress";
                }

                if let Some(path) = &self.sidecar {
                    if let Err(err) = resume::store(path, &self.state.table(self.concurrency)) {
                        tracing::warn!("cannot persist resume sidecar: {err}");
                    }
                }

                if complete {
                    if let Some(path) = &self.sidecar {
                        let _ = std::fs::remove_file(path);
                    }
                    break;
                }

                previous = received;
                previous_tick = Instant::now();
                tokio::select! {
                    _ = done.changed() => self.state.settle_size(),
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }

            if self.verbose {
                let elapsed = started.elapsed();
                let mean = if elapsed.as_secs_f64() > 0.0 {
                    ((self.state.received() - initial) * 8) as f64 / elapsed.as_secs_f64()
                } else {
                    0.0
                };
                eprintln!(
                    "\r{} | {} | {} | {}{:20}",
                    self.concurrency,
                    format_size(self.state.size()),
                    format_bandwidth(mean),
                    format_duration(elapsed.as_secs() as i64),
                    ""
                );
            }
        })
    }

    fn render(
        &self,
        received: i64,
        size: i64,
        bandwidth: f64,
        mean: f64,
        elapsed: f64,
        initial: i64,
    ) {
        let mut stderr = std::io::stderr();
        let line = if size < 0 {
            format!(
                "\r{} | {} | {} | {}     ",
                self.concurrency,
                format_size(received),
                format_bandwidth(bandwidth),
                format_duration(elapsed as i64)
            )
        } else {
            let eta = if mean > 0.0 {
                (((size - initial) * 8) as f64 / mean) as i64
            } else {
                -1
            };
            format!(
                "\r{} | {}/{} | {:.2}% | {} | {}/{}     ",
                self.concurrency,
                format_size(received),
                format_size(size),
                received as f64 * 100.0 / size as f64,
                format_bandwidth(bandwidth),
                format_duration(elapsed as i64),
                format_duration(eta)
            )
        };
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }

    fn emit(&self, event: &str, received: i64, size: i64, bandwidth: f64, elapsed: f64) {
        let line = ProgressEvent {
            event,
            concurrency: self.concurrency,
            size,
            received,
            bandwidth: format_bandwidth(bandwidth),
            elapsed: (elapsed * 100.0).round() / 100.0,
            progress: (size >= 0)
                .then(|| (received as f64 * 10_000.0 / size.max(1) as f64).round() / 100.0),
        };
        if let Ok(line) = serde_json::to_string(&line) {
            let mut stdout = std::io::stdout();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    }
}

//! Flush engine — drains the write buffer into one bulk per cycle
//!
//! A cycle drains every dirty entry under the map lock, encodes the values
//! outside it, submits a single atomic bulk to the driver and notifies
//! every waiter collected from the drained entries exactly once with the
//! bulk's result.
//!
//! The dirty flags are cleared BEFORE the bulk is submitted. A write that
//! arrives while the bulk is in flight re-dirties its entry and rides the
//! next cycle. On a bulk failure the drained values are restored as dirty
//! so the next cycle retries them; waiters are still notified with the
//! error.
//!
//! Cycles run from four places: the background thread below, explicit
//! `flush` calls, the eviction sweep's all-dirty escape hatch, and
//! shutdown. The buffer's flush gate serializes all of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::buffer::{PendingWrite, WriteBuffer};
use crate::config::Config;
use crate::driver::{BulkOp, Driver};
use crate::error::{PouchError, PouchResult};

/// Granularity at which the background thread checks the stop flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Encode one buffered value for the driver boundary.
///
/// `None` (the deleted marker) has no encoding; callers translate it to a
/// remove operation. With `json` off, only string values pass through.
pub(crate) fn encode_value(key: &str, value: &Value, json: bool) -> PouchResult<String> {
    if json {
        serde_json::to_string(value).map_err(|e| PouchError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })
    } else {
        match value.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(PouchError::Encode {
                key: key.to_string(),
                message: "non-string value with JSON serialization disabled".to_string(),
            }),
        }
    }
}

/// Notify every waiter of one drained entry, in insertion order.
///
/// A waiter whose receipt was dropped cannot observe a failure, so the
/// error is reported on the log instead of vanishing.
fn notify(pending: &PendingWrite, result: &PouchResult<()>) {
    for tx in &pending.waiters {
        if tx.send(result.clone()).is_err() {
            if let Err(e) = result {
                eprintln!("[FLUSH] unclaimed write error for key '{}': {}", pending.key, e);
            }
        }
    }
}

/// Run one flush cycle.
///
/// An empty cycle (nothing dirty) submits no bulk but still counts as a
/// completed cycle. Returns the bulk's error, if any, after the waiters
/// have been notified and the batch restored as dirty.
pub(crate) fn flush_cycle(
    buffer: &WriteBuffer,
    driver: &dyn Driver,
    config: &Config,
) -> PouchResult<()> {
    let _gate = buffer.lock_flush();

    let batch = buffer.drain_dirty();
    if batch.is_empty() {
        buffer.record_cycle(0);
        return Ok(());
    }

    // Encode outside the map lock. An entry whose value cannot be encoded
    // is reported to its own waiters and dropped from the bulk; the rest
    // of the batch proceeds.
    let mut ops = Vec::with_capacity(batch.len());
    let mut encoded = Vec::with_capacity(batch.len());
    for pending in batch {
        match &pending.value {
            None => {
                ops.push(BulkOp::Remove {
                    key: pending.key.clone(),
                });
                encoded.push(pending);
            }
            Some(value) => match encode_value(&pending.key, value, config.json) {
                Ok(raw) => {
                    ops.push(BulkOp::Set {
                        key: pending.key.clone(),
                        value: raw,
                    });
                    encoded.push(pending);
                }
                Err(e) => notify(&pending, &Err(e)),
            },
        }
    }

    if ops.is_empty() {
        buffer.record_cycle(0);
        return Ok(());
    }

    match driver.do_bulk(&ops) {
        Ok(()) => {
            for pending in &encoded {
                notify(pending, &Ok(()));
            }
            buffer.record_cycle(ops.len() as u64);

            // With caching disabled, flushed entries have no reason to
            // stay resident.
            if config.cache == 0 {
                let keys: Vec<String> = encoded.into_iter().map(|p| p.key).collect();
                buffer.drop_clean(&keys);
            }
            Ok(())
        }
        Err(e) => {
            let result = Err(e.clone());
            for pending in &encoded {
                notify(pending, &result);
            }
            buffer.restore_dirty(&encoded);
            buffer.record_cycle(0);
            Err(e)
        }
    }
}

/// Handle to a running background flusher thread.
/// Dropping this handle signals the thread to stop.
pub(crate) struct FlushHandle {
    /// Signal the background thread to stop
    shutdown: Arc<AtomicBool>,
    /// Background thread join handle
    thread: Option<thread::JoinHandle<()>>,
}

impl FlushHandle {
    /// Request graceful shutdown and wait for the background thread to
    /// finish. The thread runs a final flush before exiting.
    pub(crate) fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the periodic flusher thread.
///
/// Every `write_interval` the thread runs one flush cycle. On shutdown it
/// runs a final cycle so buffered writes are not abandoned. Cycle errors
/// are logged; the entries stay dirty and the next tick retries them.
pub(crate) fn start_flusher(
    buffer: Arc<WriteBuffer>,
    driver: Arc<dyn Driver>,
    config: Config,
) -> PouchResult<FlushHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name("pouchstore-flush".to_string())
        .spawn(move || {
            flush_loop(buffer, driver, config, shutdown_clone);
        })
        .map_err(|e| PouchError::Driver {
            message: format!("failed to spawn flusher thread: {}", e),
        })?;

    Ok(FlushHandle {
        shutdown,
        thread: Some(thread),
    })
}

/// Main flusher loop — runs on the background thread.
fn flush_loop(
    buffer: Arc<WriteBuffer>,
    driver: Arc<dyn Driver>,
    config: Config,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        // Sleep for the configured interval, checking shutdown at a finer
        // granularity so close() is not held up by a long interval.
        let wake_time = Instant::now() + config.write_interval;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                final_flush(&buffer, &driver, &config);
                return;
            }
            thread::sleep(SHUTDOWN_POLL.min(config.write_interval));
        }

        if shutdown.load(Ordering::Acquire) {
            final_flush(&buffer, &driver, &config);
            return;
        }

        if let Err(e) = flush_cycle(&buffer, driver.as_ref(), &config) {
            eprintln!("[FLUSH] cycle failed, will retry next tick: {}", e);
        }
    }
}

/// Best-effort flush on shutdown.
fn final_flush(buffer: &WriteBuffer, driver: &Arc<dyn Driver>, config: &Config) {
    if let Err(e) = flush_cycle(buffer, driver.as_ref(), config) {
        eprintln!("[FLUSH] final flush failed, buffered writes lost: {}", e);
    }
}

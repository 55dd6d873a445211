// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for pipeline worker loops
//!
//! Each worker owns its resources from start to finish: they are created
//! by `init` on the worker thread, used by `step`, and torn down by
//! `finish` on the same thread. Nothing created by `init` ever crosses a
//! thread boundary, which is what lets the render thread own the GPU
//! context outright.

use crate::constants::timing;
use crate::errors::PipelineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a worker loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let mut worker = WorkerLoop::spawn(
///     "render",
///     || Ok(open_gpu()?),
///     |gpu| { gpu.draw(); LoopAction::Continue },
///     |gpu| gpu.release(),
/// )?;
///
/// // Later, stop the loop and collect what `finish` returned
/// let report = worker.stop();
/// ```
pub struct WorkerLoop<T> {
    thread_handle: Option<JoinHandle<Option<T>>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl<T: Send + 'static> WorkerLoop<T> {
    /// Start a worker and wait for its initialization
    ///
    /// `init` runs on the new thread. If it fails the thread exits and the
    /// error is returned here; `step` and `finish` never run.
    pub fn spawn<S, I, F, D>(
        name: &str,
        init: I,
        mut step: F,
        finish: D,
    ) -> Result<Self, PipelineError>
    where
        S: 'static,
        I: FnOnce() -> Result<S, PipelineError> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        D: FnOnce(S) -> T + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), PipelineError>>();

        info!(name = %name, "Starting worker loop");

        let thread_handle = thread::Builder::new()
            .name(format!("dualcam-{}", name))
            .spawn(move || {
                debug!(name = %name_clone, "Worker thread started, initializing...");

                let mut state = match init() {
                    Ok(s) => {
                        let _ = init_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        let _ = init_tx.send(Err(e));
                        return None;
                    }
                };

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match step(&mut state) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                let result = finish(state);
                info!(name = %name_clone, "Worker thread exiting");
                Some(result)
            })
            .map_err(|e| PipelineError::Thread(format!("Failed to spawn {}: {}", name, e)))?;

        let mut worker = Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        };

        match init_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.join();
                Err(e)
            }
            Err(_) => {
                worker.join();
                Err(PipelineError::Thread(format!(
                    "{} exited during initialization",
                    name
                )))
            }
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Get a clone of the stop signal for external use
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting worker loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop, wait for `finish`, and return its result
    ///
    /// Returns `None` if the thread already was joined, panicked, or did
    /// not finish within the join timeout.
    pub fn stop(&mut self) -> Option<T> {
        self.request_stop();
        self.join()
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) -> Option<T> {
        let handle = self.thread_handle.take()?;
        debug!(name = %self.name, "Waiting for worker thread to finish");

        let deadline = Instant::now() + timing::THREAD_JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline && self.stop_signal.load(Ordering::SeqCst) {
                warn!(name = %self.name, "Worker thread did not finish in time, detaching");
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }

        match handle.join() {
            Ok(result) => {
                debug!(name = %self.name, "Worker thread finished");
                result
            }
            Err(e) => {
                warn!(name = %self.name, "Worker thread panicked: {:?}", e);
                None
            }
        }
    }
}

impl<T> Drop for WorkerLoop<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "WorkerLoop dropped, stopping loop");
            self.stop_signal.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                warn!(name = %self.name, "Worker thread panicked");
            }
        }
    }
}

/// Fixed-cadence ticker for the render loop
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next: Instant,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the next tick
    ///
    /// A late tick does not try to catch up; the schedule restarts from now.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
            self.next += self.interval;
        } else {
            self.next = now + self.interval;
        }
    }
}
